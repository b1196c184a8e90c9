//! The single-threaded writer: one record builder, one file, records built
//! and appended inline on the caller's thread.

use std::path::Path;

use log::trace;

use crate::codec::CompressionType;
use crate::error::{HipoError, Result};
use crate::header::ByteOrder;
use crate::record::RecordBuilder;
use crate::writer::{OutputFile, WriterOptions};

/// Which of the two mutually exclusive feeding APIs a writer instance uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedMode {
    Events,
    Records,
}

/// Single-threaded record writer.
///
/// Events accumulate in an internal [`RecordBuilder`]; when a record fills,
/// it is built (compressing if configured) and appended before the add
/// retries.  [`close`](Writer::close) flushes the partial record, appends
/// the optional trailer, and patches the trailer position into the file
/// header.
///
/// The first fatal error moves the writer into a failed state: later
/// `add_event` calls return the stored error, and `close` still releases
/// the file but skips the trailer.
pub struct Writer {
    opts: WriterOptions,
    out: Option<OutputFile>,
    record: RecordBuilder,
    /// Next record number to stamp; 1-based, monotonic within a file.
    record_number: u32,
    mode: Option<FeedMode>,
    add_trailer: bool,
    add_trailer_index: bool,
    error: Option<HipoError>,
    closed: bool,
    final_bytes: u64,
    final_records: u32,
}

impl Default for Writer {
    fn default() -> Self {
        Writer::with_options(WriterOptions::default())
    }
}

impl Writer {
    /// A writer emitting headers and indexes in `order`, uncompressed.
    pub fn new(order: ByteOrder) -> Writer {
        Writer::with_options(WriterOptions {
            byte_order: order,
            ..WriterOptions::default()
        })
    }

    /// A writer with full configuration.
    pub fn with_options(opts: WriterOptions) -> Writer {
        let mut record = RecordBuilder::with_capacity(
            opts.byte_order,
            opts.max_event_count,
            opts.max_buffer_size,
        );
        record.set_compression_type(opts.compression);
        record.set_header_type(opts.record_type);
        Writer {
            opts,
            out: None,
            record,
            record_number: 1,
            mode: None,
            add_trailer: true,
            add_trailer_index: false,
            error: None,
            closed: false,
            final_bytes: 0,
            final_records: 0,
        }
    }

    // ── Configuration ────────────────────────────────────────────────────────

    /// Selects the record compression.  Only legal before the first record
    /// has been flushed; every record in one file shares one codec.
    pub fn set_compression_type(&mut self, kind: CompressionType) -> Result<()> {
        if self.record_number > 1 {
            return Err(HipoError::InvalidState(
                "compression type cannot change after records were written".into(),
            ));
        }
        self.opts.compression = kind;
        self.record.set_compression_type(kind);
        Ok(())
    }

    pub fn compression_type(&self) -> CompressionType {
        self.opts.compression
    }

    /// Whether `close` appends a trailer (on by default).
    pub fn add_trailer(&mut self, add: bool) {
        self.add_trailer = add;
    }

    /// Whether the trailer carries the record-length index; enabling it
    /// implies the trailer itself.
    pub fn add_trailer_with_index(&mut self, with_index: bool) {
        self.add_trailer_index = with_index;
        if with_index {
            self.add_trailer = true;
        }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.opts.byte_order
    }

    // ── File lifecycle ───────────────────────────────────────────────────────

    /// Creates `path` and writes the file header.
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.open_with_user_header(path, &[])
    }

    /// Creates `path` and writes the file header followed by the padded
    /// file-level user header.
    pub fn open_with_user_header<P: AsRef<Path>>(
        &mut self,
        path: P,
        user_header: &[u8],
    ) -> Result<()> {
        if self.out.is_some() {
            return Err(HipoError::InvalidState("writer already has an open file".into()));
        }
        let out = OutputFile::create(
            path.as_ref(),
            self.opts.byte_order,
            self.opts.record_type,
            user_header,
        )?;
        self.out = Some(out);
        self.closed = false;
        Ok(())
    }

    fn checked_out(&mut self) -> Result<()> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        if self.closed {
            return Err(HipoError::InvalidState("writer is closed".into()));
        }
        if self.out.is_none() {
            return Err(HipoError::InvalidState("no open file".into()));
        }
        Ok(())
    }

    fn fail(&mut self, e: HipoError) -> HipoError {
        self.error = Some(e.clone());
        e
    }

    // ── Event feeding ────────────────────────────────────────────────────────

    /// Appends one event payload, flushing a full record first when needed.
    pub fn add_event(&mut self, event: &[u8]) -> Result<()> {
        self.checked_out()?;
        if self.mode == Some(FeedMode::Records) {
            return Err(HipoError::InvalidState(
                "add_event cannot be mixed with write_record".into(),
            ));
        }
        self.mode = Some(FeedMode::Events);

        if self.record.add_event(event) {
            return Ok(());
        }
        match self.flush_record() {
            Ok(()) => {}
            Err(e) => return Err(self.fail(e)),
        }
        if self.record.add_event(event) {
            return Ok(());
        }
        // A fresh record refused: the event alone exceeds the record limits.
        Err(HipoError::BufferTooSmall {
            needed: event.len() + 4,
            available: self.record.max_buffer_size(),
        })
    }

    /// Builds and appends the current record if it holds any events.
    fn flush_record(&mut self) -> Result<()> {
        if self.record.event_count() == 0 {
            return Ok(());
        }
        self.record.stamp_record_number(self.record_number);
        self.record.build()?;
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| HipoError::InvalidState("no open file".into()))?;
        out.append_record(self.record.as_bytes())?;
        trace!(
            "record {} appended, {} events, {} bytes",
            self.record_number,
            self.record.event_count(),
            self.record.as_bytes().len()
        );
        self.record_number += 1;
        self.record.reset();
        Ok(())
    }

    /// Appends a caller-built record, stamping the next record number.
    ///
    /// Mutually exclusive with [`add_event`](Writer::add_event) on the same
    /// writer instance; the record's byte order must match the writer's.
    pub fn write_record(&mut self, record: &mut RecordBuilder) -> Result<()> {
        self.checked_out()?;
        if self.mode == Some(FeedMode::Events) {
            return Err(HipoError::InvalidState(
                "write_record cannot be mixed with add_event".into(),
            ));
        }
        if record.byte_order() != self.opts.byte_order {
            return Err(HipoError::InvalidState(
                "record byte order differs from the writer's".into(),
            ));
        }
        self.mode = Some(FeedMode::Records);

        record.stamp_record_number(self.record_number);
        let result = record.build().and_then(|_| {
            let out = self
                .out
                .as_mut()
                .ok_or_else(|| HipoError::InvalidState("no open file".into()))?;
            out.append_record(record.as_bytes())
        });
        match result {
            Ok(()) => {
                self.record_number += 1;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    // ── Finalization ─────────────────────────────────────────────────────────

    /// Bytes landed in the file so far (final total after `close`).
    pub fn bytes_written(&self) -> u64 {
        self.out
            .as_ref()
            .map_or(self.final_bytes, OutputFile::bytes_written)
    }

    /// Records appended so far (final total after `close`).
    pub fn record_count(&self) -> u32 {
        self.out
            .as_ref()
            .map_or(self.final_records, |o| o.record_count() as u32)
    }

    /// Flushes the partial record, appends the trailer (unless disabled or
    /// the writer already failed), patches the trailer position, and closes
    /// the file.  Idempotent; always releases the file handle.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut result = Ok(());
        if self.error.is_none() && self.mode != Some(FeedMode::Records) {
            if let Err(e) = self.flush_record() {
                result = Err(self.fail(e));
            }
        }

        if let Some(mut out) = self.out.take() {
            let add = self.add_trailer && self.error.is_none();
            match out.finalize(add, self.add_trailer_index, self.record_number) {
                Ok(bytes) => {
                    self.final_bytes = bytes;
                    self.final_records = out.record_count() as u32;
                }
                Err(e) => {
                    self.final_bytes = out.bytes_written();
                    self.final_records = out.record_count() as u32;
                    if result.is_ok() {
                        result = Err(self.fail(e));
                    }
                }
            }
        }
        result
    }

    /// Abandons all current state: drops the open file as-is (no trailer),
    /// clears the stored error and the partial record, and rewinds the
    /// record number so the writer can `open` a new file.
    pub fn reset(&mut self) {
        self.out = None;
        self.record.reset();
        self.record_number = 1;
        self.mode = None;
        self.error = None;
        self.closed = false;
        self.final_bytes = 0;
        self.final_records = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn add_event_requires_open_file() {
        let mut w = Writer::new(ByteOrder::LittleEndian);
        assert!(matches!(
            w.add_event(b"x"),
            Err(HipoError::InvalidState(_))
        ));
    }

    #[test]
    fn feeding_modes_are_exclusive() {
        let dir = TempDir::new().unwrap();
        let mut w = Writer::new(ByteOrder::LittleEndian);
        w.open(dir.path().join("a.evio")).unwrap();
        w.add_event(b"event").unwrap();

        let mut rec = RecordBuilder::new(ByteOrder::LittleEndian);
        assert!(rec.add_event(b"other"));
        assert!(matches!(
            w.write_record(&mut rec),
            Err(HipoError::InvalidState(_))
        ));
        w.close().unwrap();
    }

    #[test]
    fn compression_locked_after_first_record() {
        let dir = TempDir::new().unwrap();
        let mut w = Writer::with_options(WriterOptions {
            max_event_count: 1,
            ..WriterOptions::default()
        });
        w.open(dir.path().join("a.evio")).unwrap();
        w.add_event(b"one").unwrap();
        // Second event flushes record 1, locking the codec choice.
        w.add_event(b"two").unwrap();
        assert!(matches!(
            w.set_compression_type(CompressionType::Lz4),
            Err(HipoError::InvalidState(_))
        ));
        w.close().unwrap();
    }

    #[test]
    fn oversized_event_is_rejected_without_corruption() {
        let dir = TempDir::new().unwrap();
        let mut w = Writer::with_options(WriterOptions {
            max_buffer_size: 64,
            ..WriterOptions::default()
        });
        w.open(dir.path().join("a.evio")).unwrap();
        w.add_event(&[1u8; 32]).unwrap();
        assert!(matches!(
            w.add_event(&[2u8; 128]),
            Err(HipoError::BufferTooSmall { .. })
        ));
        // The writer is still usable: the oversized event was never staged.
        w.add_event(&[3u8; 32]).unwrap();
        w.close().unwrap();
        assert_eq!(w.record_count(), 2);
    }

    #[test]
    fn close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut w = Writer::new(ByteOrder::LittleEndian);
        w.open(dir.path().join("a.evio")).unwrap();
        w.add_event(b"ev").unwrap();
        w.close().unwrap();
        let bytes = w.bytes_written();
        w.close().unwrap();
        assert_eq!(w.bytes_written(), bytes);
    }

    #[test]
    fn reset_allows_reopening() {
        let dir = TempDir::new().unwrap();
        let mut w = Writer::new(ByteOrder::LittleEndian);
        w.open(dir.path().join("a.evio")).unwrap();
        w.add_event(b"ev").unwrap();
        w.reset();
        w.open(dir.path().join("b.evio")).unwrap();
        w.add_event(b"ev2").unwrap();
        w.close().unwrap();
        assert_eq!(w.record_count(), 1);
    }
}
