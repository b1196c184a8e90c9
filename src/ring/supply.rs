//! The record supply: a power-of-two ring of [`RingItem`]s coordinating one
//! producer, K compressor workers, and one writer through sequence barriers.
//!
//! Stage cursors:
//!
//! * the producer claims slot `P`, blocked until the writer has recycled the
//!   slot's previous occupant (`written ≥ P − N`);
//! * compressor worker *i* consumes published sequences with
//!   `seq mod K == i`, a deterministic partition that keeps workers
//!   independent while leaving a total order intact;
//! * the writer consumes sequences strictly in order, blocked until the
//!   compressor owning the next sequence has released it.
//!
//! Items physically move: each slot holds `Option<RingItem>`, a claiming
//! stage takes the value out, and a releasing stage puts it back.  Whoever
//! holds the item owns it outright; a stage that has released an item no
//! longer has it to release again.
//!
//! All waits park on one condvar and are cancellable via
//! [`error_alert`](RecordSupply::error_alert), which makes every blocked
//! `get_*` return [`HipoError::Cancelled`].

use std::sync::{Condvar, Mutex};

use crate::codec::CompressionType;
use crate::error::{HipoError, Result};
use crate::header::ByteOrder;
use crate::record::RecordBuilder;
use crate::ring::RingItem;

/// Default number of ring slots.
pub const DEFAULT_RING_SIZE: usize = 8;

struct State {
    slots: Vec<Option<RingItem>>,
    /// Next sequence the producer will claim.
    claim_next: i64,
    /// Highest sequence published by the producer; -1 before the first.
    published: i64,
    /// Next sequence each compressor worker will claim.
    compress_next: Vec<i64>,
    /// Highest sequence each compressor worker has released; -1 initially.
    compress_released: Vec<i64>,
    /// Next sequence the writer will claim.
    write_next: i64,
    /// Highest sequence the writer has released; -1 initially.
    written: i64,
    alerted: bool,
}

/// The shared ring.  Typically wrapped in an `Arc` and handed to the
/// producer, the compressor threads, and the writer thread.
pub struct RecordSupply {
    state: Mutex<State>,
    cond: Condvar,
    size: usize,
    mask: i64,
    compressor_count: usize,
    byte_order: ByteOrder,
}

impl RecordSupply {
    /// A supply of `ring_size` slots (rounded up to a power of two) feeding
    /// `compressor_count` workers.  Every slot's builder is configured with
    /// the given order, compression, and record limits.
    pub fn new(
        ring_size: usize,
        compressor_count: usize,
        byte_order: ByteOrder,
        compression: CompressionType,
        max_event_count: usize,
        max_buffer_size: usize,
    ) -> RecordSupply {
        let size = ring_size.max(1).next_power_of_two();
        let workers = compressor_count.max(1);
        let slots = (0..size)
            .map(|_| {
                let mut builder =
                    RecordBuilder::with_capacity(byte_order, max_event_count, max_buffer_size);
                builder.set_compression_type(compression);
                Some(RingItem::new(builder))
            })
            .collect();

        RecordSupply {
            state: Mutex::new(State {
                slots,
                claim_next: 0,
                published: -1,
                compress_next: (0..workers as i64).collect(),
                compress_released: vec![-1; workers],
                write_next: 0,
                written: -1,
                alerted: false,
            }),
            cond: Condvar::new(),
            size,
            mask: (size - 1) as i64,
            compressor_count: workers,
            byte_order,
        }
    }

    /// Number of slots in the ring.
    pub fn ring_size(&self) -> usize {
        self.size
    }

    /// Number of compressor workers the sequence space is partitioned over.
    pub fn compressor_count(&self) -> usize {
        self.compressor_count
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    #[inline]
    fn index(&self, seq: i64) -> usize {
        (seq & self.mask) as usize
    }

    fn take_slot(&self, state: &mut State, seq: i64) -> RingItem {
        let idx = self.index(seq);
        state.slots[idx]
            .take()
            .expect("ring slot empty at claimed sequence")
    }

    // ── Producer ─────────────────────────────────────────────────────────────

    /// Claims the next free slot, blocking while the ring is full.
    ///
    /// The returned item is reset and stamped with its sequence.
    pub fn get(&self) -> Result<RingItem> {
        let mut state = self.state.lock().unwrap();
        let seq = state.claim_next;
        // Wait for the slot's previous occupant to complete its full cycle.
        while !state.alerted && seq - state.written > self.size as i64 {
            state = self.cond.wait(state).unwrap();
        }
        if state.alerted {
            return Err(HipoError::Cancelled);
        }
        state.claim_next += 1;
        let mut item = self.take_slot(&mut state, seq);
        item.prepare(seq);
        Ok(item)
    }

    /// Hands a claimed item to the compressor stage, waking any worker
    /// waiting on its sequence.
    pub fn publish(&self, item: RingItem) {
        let mut state = self.state.lock().unwrap();
        let seq = item.sequence();
        let idx = self.index(seq);
        state.slots[idx] = Some(item);
        if seq > state.published {
            state.published = seq;
        }
        self.cond.notify_all();
    }

    // ── Compressor workers ───────────────────────────────────────────────────

    /// Claims the next published sequence belonging to `worker`
    /// (`seq mod K == worker`), blocking until the producer publishes it.
    pub fn get_to_compress(&self, worker: usize) -> Result<RingItem> {
        if worker >= self.compressor_count {
            return Err(HipoError::InvalidState(format!(
                "compressor index {worker} out of range (workers: {})",
                self.compressor_count
            )));
        }
        let mut state = self.state.lock().unwrap();
        let seq = state.compress_next[worker];
        while !state.alerted && state.published < seq {
            state = self.cond.wait(state).unwrap();
        }
        if state.alerted {
            return Err(HipoError::Cancelled);
        }
        state.compress_next[worker] += self.compressor_count as i64;
        Ok(self.take_slot(&mut state, seq))
    }

    /// Releases a compressed item for the writer stage.
    pub fn release_compressor(&self, item: RingItem) -> Result<()> {
        if item.is_already_released() {
            return Err(HipoError::InvalidState(
                "compressor release of an already-released item".into(),
            ));
        }
        let seq = item.sequence();
        let worker = (seq as usize) % self.compressor_count;
        let mut state = self.state.lock().unwrap();
        let idx = self.index(seq);
        state.slots[idx] = Some(item);
        if seq > state.compress_released[worker] {
            state.compress_released[worker] = seq;
        }
        self.cond.notify_all();
        Ok(())
    }

    // ── Writer ───────────────────────────────────────────────────────────────

    /// Claims the next sequence in strict order, blocking until its owning
    /// compressor has released it.
    pub fn get_to_write(&self) -> Result<RingItem> {
        let mut state = self.state.lock().unwrap();
        let seq = state.write_next;
        let worker = (seq as usize) % self.compressor_count;
        while !state.alerted && state.compress_released[worker] < seq {
            state = self.cond.wait(state).unwrap();
        }
        if state.alerted {
            return Err(HipoError::Cancelled);
        }
        state.write_next += 1;
        Ok(self.take_slot(&mut state, seq))
    }

    /// Recycles a written item, waking a producer waiting for a free slot.
    ///
    /// Writer releases must be strictly sequential; a gap or a repeat, and
    /// any attempt to release a detached snapshot, is a programming error.
    pub fn release_writer(&self, mut item: RingItem) -> Result<()> {
        if item.is_already_released() {
            return Err(HipoError::InvalidState(
                "writer release of an already-released item".into(),
            ));
        }
        let seq = item.sequence();
        let mut state = self.state.lock().unwrap();
        if seq != state.written + 1 {
            return Err(HipoError::InvalidState(format!(
                "out-of-order writer release: sequence {seq} after {}",
                state.written
            )));
        }
        item.mark_released();
        let idx = self.index(seq);
        state.slots[idx] = Some(item);
        state.written = seq;
        self.cond.notify_all();
        Ok(())
    }

    /// Alias for [`release_writer`](RecordSupply::release_writer); the
    /// writer stage is inherently sequential here.
    pub fn release_writer_sequential(&self, item: RingItem) -> Result<()> {
        self.release_writer(item)
    }

    // ── Cancellation ─────────────────────────────────────────────────────────

    /// Wakes every blocked `get_*` call with [`HipoError::Cancelled`].
    /// Used on shutdown and on fatal worker errors.  Irreversible.
    pub fn error_alert(&self) {
        let mut state = self.state.lock().unwrap();
        state.alerted = true;
        self.cond.notify_all();
    }

    /// True once [`error_alert`](RecordSupply::error_alert) has fired.
    pub fn is_alerted(&self) -> bool {
        self.state.lock().unwrap().alerted
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn supply(ring: usize, workers: usize) -> RecordSupply {
        RecordSupply::new(
            ring,
            workers,
            ByteOrder::LittleEndian,
            CompressionType::None,
            100,
            4096,
        )
    }

    #[test]
    fn ring_size_rounds_up_to_power_of_two() {
        assert_eq!(supply(6, 1).ring_size(), 8);
        assert_eq!(supply(8, 1).ring_size(), 8);
        assert_eq!(supply(1, 1).ring_size(), 1);
    }

    #[test]
    fn full_cycle_single_worker() {
        let s = supply(4, 1);
        for expected_seq in 0..10 {
            let mut item = s.get().expect("get");
            assert_eq!(item.sequence(), expected_seq);
            assert!(item.record_mut().add_event(b"ev"));
            s.publish(item);

            let item = s.get_to_compress(0).expect("compress claim");
            assert_eq!(item.sequence(), expected_seq);
            s.release_compressor(item).expect("compress release");

            let item = s.get_to_write().expect("write claim");
            assert_eq!(item.sequence(), expected_seq);
            s.release_writer(item).expect("write release");
        }
    }

    #[test]
    fn mod_k_partition_routes_sequences() {
        let s = supply(8, 3);
        for _ in 0..6 {
            let item = s.get().unwrap();
            s.publish(item);
        }
        // Worker w sees w, w+3, w+6, ... in order.
        for worker in 0..3 {
            for round in 0..2 {
                let item = s.get_to_compress(worker).unwrap();
                assert_eq!(item.sequence(), (worker + 3 * round) as i64);
                s.release_compressor(item).unwrap();
            }
        }
        // Writer drains 0..6 strictly in order regardless of partition.
        for seq in 0..6 {
            let item = s.get_to_write().unwrap();
            assert_eq!(item.sequence(), seq);
            s.release_writer(item).unwrap();
        }
    }

    #[test]
    fn writer_observes_order_despite_out_of_order_compressors() {
        let s = supply(8, 2);
        for _ in 0..4 {
            let item = s.get().unwrap();
            s.publish(item);
        }
        // Worker 1 finishes both of its sequences before worker 0 does any.
        let a = s.get_to_compress(1).unwrap();
        let b = s.get_to_compress(1).unwrap();
        s.release_compressor(a).unwrap();
        s.release_compressor(b).unwrap();

        // Sequence 0 is still unreleased, so the writer must keep waiting.
        let waiting = Arc::new(AtomicBool::new(true));
        let s = Arc::new(s);
        let handle = {
            let s = Arc::clone(&s);
            let waiting = Arc::clone(&waiting);
            thread::spawn(move || {
                let got = s.get_to_write().unwrap();
                waiting.store(false, Ordering::SeqCst);
                assert_eq!(got.sequence(), 0);
                s.release_writer(got).unwrap();
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(waiting.load(Ordering::SeqCst), "writer ran ahead of worker 0");

        let c = s.get_to_compress(0).unwrap();
        s.release_compressor(c).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn producer_blocks_until_writer_recycles() {
        let s = Arc::new(supply(2, 1));
        // Fill the ring without draining it.
        for _ in 0..2 {
            let item = s.get().unwrap();
            s.publish(item);
        }

        let claimed = Arc::new(AtomicBool::new(false));
        let handle = {
            let s = Arc::clone(&s);
            let claimed = Arc::clone(&claimed);
            thread::spawn(move || {
                let item = s.get().unwrap();
                claimed.store(true, Ordering::SeqCst);
                s.publish(item);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(
            !claimed.load(Ordering::SeqCst),
            "producer claimed a slot from a full ring"
        );

        // One full drain frees exactly one slot.
        let item = s.get_to_compress(0).unwrap();
        s.release_compressor(item).unwrap();
        let item = s.get_to_write().unwrap();
        s.release_writer(item).unwrap();
        handle.join().unwrap();
        assert!(claimed.load(Ordering::SeqCst));
    }

    #[test]
    fn snapshot_release_is_rejected() {
        let s = supply(4, 1);
        let item = s.get().unwrap();
        s.publish(item);
        let item = s.get_to_compress(0).unwrap();
        s.release_compressor(item).unwrap();
        let item = s.get_to_write().unwrap();

        let snap = item.snapshot();
        assert!(matches!(
            s.release_writer(snap),
            Err(HipoError::InvalidState(_))
        ));
        // The live item still releases normally.
        s.release_writer(item).unwrap();
    }

    #[test]
    fn alert_wakes_blocked_consumers() {
        let s = Arc::new(supply(4, 2));
        let mut handles = Vec::new();
        for worker in 0..2 {
            let s = Arc::clone(&s);
            handles.push(thread::spawn(move || s.get_to_compress(worker)));
        }
        {
            let s = Arc::clone(&s);
            handles.push(thread::spawn(move || s.get_to_write()));
        }
        thread::sleep(Duration::from_millis(50));
        s.error_alert();
        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap_err(), HipoError::Cancelled);
        }
        assert!(s.is_alerted());
        // Later claims fail immediately.
        assert_eq!(s.get().unwrap_err(), HipoError::Cancelled);
    }

    #[test]
    fn out_of_range_worker_is_rejected() {
        let s = supply(4, 2);
        assert!(matches!(
            s.get_to_compress(2),
            Err(HipoError::InvalidState(_))
        ));
    }
}
