//! The multi-threaded writer: one producer (the caller), K compressor
//! threads, and one writer thread, coupled by a [`RecordSupply`] ring.
//!
//! The producer fills ring items with events and publishes them; compressor
//! workers build (and compress) records in parallel; the writer thread
//! consumes strictly in publication order, so record numbers on disk match
//! the order events were added no matter how compression interleaves.
//!
//! The first fatal error on any worker is stored, the ring is alerted, and
//! the next producer-side call re-raises it.  `close` always joins every
//! thread and releases the file; the trailer is only written after a clean
//! run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{Builder, JoinHandle};

use log::{debug, warn};

use crate::codec::CompressionType;
use crate::error::{HipoError, Result};
use crate::header::{ByteOrder, HeaderType};
use crate::ring::{RecordSupply, RingItem};
use crate::writer::{split_path, OutputFile, WriterOptions};

// ─────────────────────────────────────────────────────────────────────────────
// Shared worker state
// ─────────────────────────────────────────────────────────────────────────────

struct Shared {
    /// First fatal error from any stage; never overwritten.
    error: Mutex<Option<HipoError>>,
    add_trailer: AtomicBool,
    add_trailer_index: AtomicBool,
}

impl Shared {
    fn store_error(&self, e: HipoError) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
        }
    }

    fn error(&self) -> Option<HipoError> {
        self.error.lock().unwrap().clone()
    }
}

/// Final accounting returned by the writer thread.
#[derive(Debug, Clone, Default)]
pub struct WriteSummary {
    /// Bytes landed across all files, trailers included.
    pub bytes_written: u64,
    /// Data records written across all files.
    pub record_count: u32,
    /// Files produced (1 plus the number of splits).
    pub file_count: u32,
    /// Records bypassed because their item was flagged disk-full.
    pub deferred_count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Compressor worker
// ─────────────────────────────────────────────────────────────────────────────

fn run_compressor(supply: Arc<RecordSupply>, shared: Arc<Shared>, worker: usize) {
    loop {
        let mut item = match supply.get_to_compress(worker) {
            Ok(item) => item,
            Err(_) => break,
        };
        let last = item.is_last();
        if item.record().event_count() > 0 {
            if let Err(e) = item.record_mut().build() {
                warn!("compressor {worker}: record build failed: {e}");
                shared.store_error(e);
                supply.error_alert();
                let _ = supply.release_compressor(item);
                break;
            }
        }
        if supply.release_compressor(item).is_err() {
            break;
        }
        if last {
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer worker
// ─────────────────────────────────────────────────────────────────────────────

struct WriterTask {
    supply: Arc<RecordSupply>,
    shared: Arc<Shared>,
    out: OutputFile,
    base_path: PathBuf,
    order: ByteOrder,
    record_type: HeaderType,
    user_header: Vec<u8>,
    /// Next record number within the current file; restarts at 1 per split.
    record_number: u32,
    /// Suffix of the next split file.
    split_index: u32,
    total_bytes: u64,
    total_records: u32,
    files: u32,
    deferred: Vec<RingItem>,
}

impl WriterTask {
    fn handle(&mut self, item: &mut RingItem) -> Result<()> {
        let record = item.record();
        if record.event_count() > 0 && record.is_built() {
            if item.is_disk_full() {
                warn!(
                    "disk full: deferring record of {} events",
                    record.event_count()
                );
                self.deferred.push(item.snapshot());
            } else {
                item.record_mut().stamp_record_number(self.record_number);
                self.out.append_record(item.record().as_bytes())?;
                self.record_number += 1;
                self.total_records += 1;
                if item.force_to_disk() {
                    self.out.sync()?;
                }
            }
        }
        if item.split_file_after_write() {
            self.rotate()?;
        }
        Ok(())
    }

    /// Finishes the current file and continues in the next split.
    fn rotate(&mut self) -> Result<()> {
        let add = self.shared.add_trailer.load(Ordering::Acquire);
        let with_index = self.shared.add_trailer_index.load(Ordering::Acquire);
        let bytes = self.out.finalize(add, with_index, self.record_number)?;
        self.total_bytes += bytes;

        let next = split_path(&self.base_path, self.split_index);
        self.split_index += 1;
        debug!(
            "split after {} records: continuing in {}",
            self.out.record_count(),
            next.display()
        );
        self.out = OutputFile::create(&next, self.order, self.record_type, &self.user_header)?;
        self.files += 1;
        self.record_number = 1;
        Ok(())
    }

    fn into_summary(mut self, clean_finish: bool) -> WriteSummary {
        let add = clean_finish
            && self.shared.error().is_none()
            && self.shared.add_trailer.load(Ordering::Acquire);
        let with_index = self.shared.add_trailer_index.load(Ordering::Acquire);
        match self.out.finalize(add, with_index, self.record_number) {
            Ok(bytes) => self.total_bytes += bytes,
            Err(e) => {
                self.total_bytes += self.out.bytes_written();
                self.shared.store_error(e);
            }
        }
        WriteSummary {
            bytes_written: self.total_bytes,
            record_count: self.total_records,
            file_count: self.files,
            deferred_count: self.deferred.len(),
        }
    }
}

fn run_writer(mut task: WriterTask) -> WriteSummary {
    let mut clean_finish = false;
    loop {
        let mut item = match task.supply.get_to_write() {
            Ok(item) => item,
            Err(_) => break,
        };
        let last = item.is_last();
        if let Err(e) = task.handle(&mut item) {
            warn!("writer thread: {e}");
            task.shared.store_error(e);
            task.supply.error_alert();
            let _ = task.supply.release_writer(item);
            break;
        }
        if task.supply.release_writer(item).is_err() {
            break;
        }
        if last {
            clean_finish = true;
            break;
        }
    }
    task.into_summary(clean_finish)
}

// ─────────────────────────────────────────────────────────────────────────────
// WriterMT
// ─────────────────────────────────────────────────────────────────────────────

/// Multi-threaded record writer over a [`RecordSupply`].
///
/// ```no_run
/// use hipo6::{CompressionType, WriterMT, WriterOptions};
///
/// let mut writer = WriterMT::new(WriterOptions {
///     compression: CompressionType::Lz4,
///     compressor_threads: 4,
///     ..WriterOptions::default()
/// });
/// writer.open("run.evio")?;
/// for event in [&b"one"[..], b"two", b"three"] {
///     writer.add_event(event)?;
/// }
/// writer.close()?;
/// # Ok::<(), hipo6::HipoError>(())
/// ```
pub struct WriterMT {
    opts: WriterOptions,
    supply: Option<Arc<RecordSupply>>,
    shared: Arc<Shared>,
    compressors: Vec<JoinHandle<()>>,
    writer_handle: Option<JoinHandle<WriteSummary>>,
    /// The producer-held ring item currently accumulating events.
    current: Option<RingItem>,
    /// When set, every published item carries the force-to-disk flag.
    force_all: bool,
    opened: bool,
    closed: bool,
    summary: Option<WriteSummary>,
}

impl WriterMT {
    /// A writer with the given configuration; call [`open`](WriterMT::open)
    /// to start the pipeline.
    pub fn new(opts: WriterOptions) -> WriterMT {
        WriterMT {
            opts,
            supply: None,
            shared: Arc::new(Shared {
                error: Mutex::new(None),
                add_trailer: AtomicBool::new(true),
                add_trailer_index: AtomicBool::new(false),
            }),
            compressors: Vec::new(),
            writer_handle: None,
            current: None,
            force_all: false,
            opened: false,
            closed: false,
            summary: None,
        }
    }

    // ── Configuration ────────────────────────────────────────────────────────

    /// Selects the record compression; only legal before `open`.
    pub fn set_compression_type(&mut self, kind: CompressionType) -> Result<()> {
        if self.opened {
            return Err(HipoError::InvalidState(
                "compression type cannot change after open".into(),
            ));
        }
        self.opts.compression = kind;
        Ok(())
    }

    pub fn compression_type(&self) -> CompressionType {
        self.opts.compression
    }

    /// Whether finished files get a trailer (on by default).
    pub fn add_trailer(&mut self, add: bool) {
        self.shared.add_trailer.store(add, Ordering::Release);
    }

    /// Whether trailers carry the record-length index; enabling it implies
    /// the trailer itself.
    pub fn add_trailer_with_index(&mut self, with_index: bool) {
        self.shared
            .add_trailer_index
            .store(with_index, Ordering::Release);
        if with_index {
            self.shared.add_trailer.store(true, Ordering::Release);
        }
    }

    /// When enabled, every record is followed by a sync to persistent
    /// storage (a per-record durability barrier).
    pub fn force_to_disk(&mut self, force: bool) {
        self.force_all = force;
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.opts.byte_order
    }

    // ── File lifecycle ───────────────────────────────────────────────────────

    /// Creates `path`, writes the file header, and starts the compressor
    /// and writer threads.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.open_with_user_header(path, &[])
    }

    /// Creates `path` with a file-level user header (reused by every split
    /// file), then starts the worker threads.
    pub fn open_with_user_header<P: AsRef<Path>>(
        &mut self,
        path: P,
        user_header: &[u8],
    ) -> Result<()> {
        if self.opened {
            return Err(HipoError::InvalidState("writer already has an open file".into()));
        }
        let path = path.as_ref();
        let workers = self.opts.effective_compressor_threads();
        let supply = Arc::new(RecordSupply::new(
            self.opts.ring_size,
            workers,
            self.opts.byte_order,
            self.opts.compression,
            self.opts.max_event_count,
            self.opts.max_buffer_size,
        ));

        let out = OutputFile::create(
            path,
            self.opts.byte_order,
            self.opts.record_type,
            user_header,
        )?;

        for worker in 0..workers {
            let worker_supply = Arc::clone(&supply);
            let shared = Arc::clone(&self.shared);
            let spawned = Builder::new()
                .name(format!("hipo6-compress-{worker}"))
                .spawn(move || run_compressor(worker_supply, shared, worker));
            match spawned {
                Ok(handle) => self.compressors.push(handle),
                Err(e) => {
                    supply.error_alert();
                    self.join_workers();
                    return Err(e.into());
                }
            }
        }

        let task = WriterTask {
            supply: Arc::clone(&supply),
            shared: Arc::clone(&self.shared),
            out,
            base_path: path.to_path_buf(),
            order: self.opts.byte_order,
            record_type: self.opts.record_type,
            user_header: user_header.to_vec(),
            record_number: 1,
            split_index: 1,
            total_bytes: 0,
            total_records: 0,
            files: 1,
            deferred: Vec::new(),
        };
        let spawned = Builder::new()
            .name("hipo6-writer".into())
            .spawn(move || run_writer(task));
        match spawned {
            Ok(handle) => self.writer_handle = Some(handle),
            Err(e) => {
                supply.error_alert();
                self.join_workers();
                return Err(e.into());
            }
        }

        self.supply = Some(supply);
        self.opened = true;
        Ok(())
    }

    fn join_workers(&mut self) {
        for handle in self.compressors.drain(..) {
            let _ = handle.join();
        }
    }

    fn check_active(&self) -> Result<()> {
        if self.closed {
            return Err(HipoError::InvalidState("writer is closed".into()));
        }
        if !self.opened {
            return Err(HipoError::InvalidState("no open file".into()));
        }
        if let Some(e) = self.shared.error() {
            return Err(e);
        }
        Ok(())
    }

    fn supply(&self) -> Result<Arc<RecordSupply>> {
        self.supply
            .as_ref()
            .cloned()
            .ok_or_else(|| HipoError::InvalidState("no open file".into()))
    }

    /// Claims a fresh ring item, translating a cancellation into the stored
    /// worker error when one exists.
    fn claim(&mut self) -> Result<RingItem> {
        let supply = self.supply()?;
        supply.get().map_err(|e| self.shared.error().unwrap_or(e))
    }

    fn publish(&mut self, mut item: RingItem, last: bool) -> Result<()> {
        if self.force_all {
            item.set_force_to_disk(true);
        }
        if last {
            item.set_last(true);
        }
        self.supply()?.publish(item);
        Ok(())
    }

    // ── Event feeding ────────────────────────────────────────────────────────

    /// Appends one event payload to the current record, publishing the full
    /// record and claiming a fresh one when needed.
    pub fn add_event(&mut self, event: &[u8]) -> Result<()> {
        self.check_active()?;
        let mut item = match self.current.take() {
            Some(item) => item,
            None => self.claim()?,
        };
        if item.record_mut().add_event(event) {
            self.current = Some(item);
            return Ok(());
        }

        self.publish(item, false)?;
        let mut item = self.claim()?;
        if !item.record_mut().add_event(event) {
            // The event alone exceeds the record limits; the empty item must
            // still cycle through the ring or its slot would leak.
            let available = item.record().max_buffer_size();
            self.publish(item, false)?;
            return Err(HipoError::BufferTooSmall {
                needed: event.len() + 4,
                available,
            });
        }
        self.current = Some(item);
        Ok(())
    }

    /// Publishes the record under construction without waiting for it to
    /// fill.  A no-op when no events are pending.
    pub fn flush(&mut self) -> Result<()> {
        self.check_active()?;
        if let Some(item) = self.current.take() {
            self.publish(item, false)?;
        }
        Ok(())
    }

    /// Ends the current file after the pending record lands and continues
    /// in the next split (`run.evio` → `run.1.evio`, then `run.2.evio`,
    /// ...).  Record numbering restarts at 1 in the new file.
    pub fn split_file(&mut self) -> Result<()> {
        self.check_active()?;
        let mut item = match self.current.take() {
            Some(item) => item,
            None => self.claim()?,
        };
        item.set_split_file_after_write(true);
        self.publish(item, false)
    }

    /// Flags the record under construction as un-writable because the disk
    /// is full; the writer thread bypasses it and keeps a detached snapshot.
    pub fn mark_disk_full(&mut self) -> Result<()> {
        self.check_active()?;
        let mut item = match self.current.take() {
            Some(item) => item,
            None => self.claim()?,
        };
        item.set_disk_full(true);
        self.current = Some(item);
        Ok(())
    }

    // ── Finalization ─────────────────────────────────────────────────────────

    /// Final accounting; available after [`close`](WriterMT::close).
    pub fn summary(&self) -> Option<&WriteSummary> {
        self.summary.as_ref()
    }

    fn stored_result(&self) -> Result<()> {
        match self.shared.error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Publishes the final (possibly partial) record, waits for the writer
    /// thread to flush and finalize, then stops the compressors.
    ///
    /// Idempotent.  Returns the first stored worker error, if any; the file
    /// handle is released either way.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return self.stored_result();
        }
        self.closed = true;
        if !self.opened {
            return Ok(());
        }

        // The last item carries any pending events; claim an empty one when
        // nothing is pending so the writer thread always sees the marker.
        let last = match self.current.take() {
            Some(item) => Some(item),
            None => self.claim().ok(),
        };
        if let Some(item) = last {
            let _ = self.publish(item, true);
        }

        if let Some(handle) = self.writer_handle.take() {
            match handle.join() {
                Ok(summary) => self.summary = Some(summary),
                Err(_) => self
                    .shared
                    .store_error(HipoError::InvalidState("writer thread panicked".into())),
            }
        }

        // Wake compressors still parked on unreachable sequences.
        if let Some(supply) = &self.supply {
            supply.error_alert();
        }
        self.join_workers();
        self.stored_result()
    }
}

impl Drop for WriterMT {
    fn drop(&mut self) {
        if self.opened && !self.closed {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_event_requires_open() {
        let mut w = WriterMT::new(WriterOptions::default());
        assert!(matches!(
            w.add_event(b"x"),
            Err(HipoError::InvalidState(_))
        ));
    }

    #[test]
    fn close_without_open_is_ok() {
        let mut w = WriterMT::new(WriterOptions::default());
        w.close().unwrap();
        w.close().unwrap();
        assert!(w.summary().is_none());
    }

    #[test]
    fn compression_locked_after_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut w = WriterMT::new(WriterOptions::default());
        w.open(dir.path().join("a.evio")).unwrap();
        assert!(matches!(
            w.set_compression_type(CompressionType::Gzip),
            Err(HipoError::InvalidState(_))
        ));
        w.close().unwrap();
    }

    #[test]
    fn stored_error_surfaces_on_add() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut w = WriterMT::new(WriterOptions::default());
        w.open(dir.path().join("a.evio")).unwrap();
        w.shared.store_error(HipoError::Codec("injected".into()));
        assert_eq!(
            w.add_event(b"x"),
            Err(HipoError::Codec("injected".into()))
        );
        // Close surfaces the same stored error but still joins the workers.
        assert_eq!(w.close(), Err(HipoError::Codec("injected".into())));
    }
}
