//! One reusable slot of the record supply: a record builder plus the
//! pipeline metadata that rides along with it.

use crate::record::RecordBuilder;

/// A pooled record slot.
///
/// At any instant an item is owned by exactly one pipeline stage; handoff
/// happens only through the supply's sequence barriers, and the item moves
/// by value between stages.  The control flags are written by the producer
/// and read by the writer stage.
#[derive(Debug, Clone)]
pub struct RingItem {
    record: RecordBuilder,
    sequence: i64,
    id: u64,
    last_item: bool,
    force_to_disk: bool,
    disk_full: bool,
    split_file_after_write: bool,
    already_released: bool,
}

impl RingItem {
    /// Wraps a builder into an unclaimed slot.
    pub fn new(record: RecordBuilder) -> RingItem {
        RingItem {
            record,
            sequence: -1,
            id: 0,
            last_item: false,
            force_to_disk: false,
            disk_full: false,
            split_file_after_write: false,
            already_released: false,
        }
    }

    /// The wrapped record builder.
    pub fn record(&self) -> &RecordBuilder {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut RecordBuilder {
        &mut self.record
    }

    /// Ring sequence assigned at the producer's claim; -1 while pooled.
    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    /// Opaque caller tag; survives recycling.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    // ── Control flags ────────────────────────────────────────────────────────

    /// Marks the final item of the stream; the writer flushes and exits
    /// after handling it.
    pub fn set_last(&mut self, last: bool) {
        self.last_item = last;
    }

    pub fn is_last(&self) -> bool {
        self.last_item
    }

    /// Asks the writer to sync the file to persistent storage after this
    /// item's record lands.
    pub fn set_force_to_disk(&mut self, force: bool) {
        self.force_to_disk = force;
    }

    pub fn force_to_disk(&self) -> bool {
        self.force_to_disk
    }

    /// Tells the writer the target disk is full; the write is bypassed and
    /// the record deferred.
    pub fn set_disk_full(&mut self, full: bool) {
        self.disk_full = full;
    }

    pub fn is_disk_full(&self) -> bool {
        self.disk_full
    }

    /// Asks the writer to finish the current file after this item's record
    /// and continue in the next split.
    pub fn set_split_file_after_write(&mut self, split: bool) {
        self.split_file_after_write = split;
    }

    pub fn split_file_after_write(&self) -> bool {
        self.split_file_after_write
    }

    /// True once the writer has released this item back to the ring, and
    /// permanently for detached snapshots.
    pub fn is_already_released(&self) -> bool {
        self.already_released
    }

    pub(crate) fn mark_released(&mut self) {
        self.already_released = true;
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Producer-side re-acquisition: clears the record and every flag, then
    /// assigns the new sequence.  The `id` tag is preserved.
    pub(crate) fn prepare(&mut self, sequence: i64) {
        self.record.reset();
        self.sequence = sequence;
        self.last_item = false;
        self.force_to_disk = false;
        self.disk_full = false;
        self.split_file_after_write = false;
        self.already_released = false;
    }

    /// Deep copy detached from the ring, marked released so it can never be
    /// handed back.  Used to park a record aside (e.g. when the disk is
    /// full) while the live slot returns to circulation immediately.
    pub fn snapshot(&self) -> RingItem {
        let mut copy = self.clone();
        copy.already_released = true;
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::ByteOrder;

    #[test]
    fn prepare_clears_flags_and_record() {
        let mut item = RingItem::new(RecordBuilder::new(ByteOrder::LittleEndian));
        item.set_id(11);
        item.set_last(true);
        item.set_force_to_disk(true);
        item.set_disk_full(true);
        item.set_split_file_after_write(true);
        item.mark_released();
        assert!(item.record_mut().add_event(b"payload"));

        item.prepare(5);
        assert_eq!(item.sequence(), 5);
        assert_eq!(item.id(), 11, "id survives recycling");
        assert!(!item.is_last());
        assert!(!item.force_to_disk());
        assert!(!item.is_disk_full());
        assert!(!item.split_file_after_write());
        assert!(!item.is_already_released());
        assert_eq!(item.record().event_count(), 0);
    }

    #[test]
    fn snapshot_is_detached_and_released() {
        let mut item = RingItem::new(RecordBuilder::new(ByteOrder::LittleEndian));
        item.prepare(3);
        assert!(item.record_mut().add_event(b"abc"));

        let snap = item.snapshot();
        assert!(snap.is_already_released());
        assert_eq!(snap.sequence(), 3);
        assert_eq!(snap.record().event_count(), 1);
        // The original is untouched.
        assert!(!item.is_already_released());
    }
}
