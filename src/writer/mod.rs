//! File-side plumbing shared by the single-threaded and multi-threaded
//! writers: file-header emission, record appending with length bookkeeping,
//! trailer emission, and trailer-position patching.

pub mod multi;
pub mod single;

pub use multi::WriterMT;
pub use single::Writer;

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::codec::CompressionType;
use crate::error::Result;
use crate::header::{
    pad_to_word, ByteOrder, HeaderType, RecordHeader, HEADER_SIZE_BYTES,
    TRAILER_POSITION_OFFSET,
};
use crate::record::builder::{DEFAULT_MAX_BUFFER_SIZE, DEFAULT_MAX_EVENT_COUNT};
use crate::ring::supply::DEFAULT_RING_SIZE;

// ─────────────────────────────────────────────────────────────────────────────
// WriterOptions
// ─────────────────────────────────────────────────────────────────────────────

/// Construction-time configuration shared by both writers.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Byte order of every header and index the writer emits.
    pub byte_order: ByteOrder,
    /// Payload compression applied to each record.
    pub compression: CompressionType,
    /// Header type stamped on data records; the file header and trailer use
    /// the same family (EVIO or HIPO).
    pub record_type: HeaderType,
    /// Cap on events per record.
    pub max_event_count: usize,
    /// Cap on a record's event-data footprint in bytes.
    pub max_buffer_size: usize,
    /// Ring slots for the multi-threaded writer (rounded to a power of two).
    pub ring_size: usize,
    /// Compressor worker threads for the multi-threaded writer; 0 selects
    /// the number of available CPUs.
    pub compressor_threads: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            byte_order: ByteOrder::default(),
            compression: CompressionType::None,
            record_type: HeaderType::EvioRecord,
            max_event_count: DEFAULT_MAX_EVENT_COUNT,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            ring_size: DEFAULT_RING_SIZE,
            compressor_threads: 1,
        }
    }
}

impl WriterOptions {
    pub(crate) fn effective_compressor_threads(&self) -> usize {
        if self.compressor_threads == 0 {
            num_cpus::get()
        } else {
            self.compressor_threads
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OutputFile
// ─────────────────────────────────────────────────────────────────────────────

/// One open output file: its handle, running offset, and per-record length
/// index.  Owned exclusively by whichever thread is writing.
pub(crate) struct OutputFile {
    file: File,
    path: PathBuf,
    order: ByteOrder,
    file_type: HeaderType,
    bytes_written: u64,
    record_lengths: Vec<u32>,
}

impl OutputFile {
    /// Creates the file and writes its 56-byte file header followed by the
    /// padded user header.  User register 1 (the trailer position) starts at
    /// zero and is patched by [`finalize`](OutputFile::finalize).
    pub(crate) fn create(
        path: &Path,
        order: ByteOrder,
        record_type: HeaderType,
        user_header: &[u8],
    ) -> Result<OutputFile> {
        let file_type = record_type.file_type();
        let mut file = File::create(path)?;

        let padded = pad_to_word(user_header.len());
        let mut buf = vec![0u8; HEADER_SIZE_BYTES + padded];
        let mut header = RecordHeader::new(order);
        header.set_header_type(file_type);
        header.set_user_header_length(user_header.len() as u32);
        header.recompute_record_length();
        header.write_file_header(&mut buf, 0)?;
        buf[HEADER_SIZE_BYTES..HEADER_SIZE_BYTES + user_header.len()]
            .copy_from_slice(user_header);
        file.write_all(&buf)?;

        debug!("opened {} ({:?}, {:?})", path.display(), file_type, order);
        Ok(OutputFile {
            file,
            path: path.to_path_buf(),
            order,
            file_type,
            bytes_written: buf.len() as u64,
            record_lengths: Vec::new(),
        })
    }

    /// Appends one built record and tracks its length for the trailer index.
    pub(crate) fn append_record(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        self.record_lengths.push(bytes.len() as u32);
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    /// Durability barrier: flushes and syncs file content to storage.
    pub(crate) fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub(crate) fn record_count(&self) -> usize {
        self.record_lengths.len()
    }

    pub(crate) fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Finishes the file: optionally appends a trailer (with the
    /// record-length index when asked), patches the file header's trailer
    /// position, and flushes.  Returns the final byte count.
    ///
    /// `trailer_record_number` is the number the trailer claims, one past
    /// the last data record of this file.
    pub(crate) fn finalize(
        &mut self,
        add_trailer: bool,
        with_index: bool,
        trailer_record_number: u32,
    ) -> Result<u64> {
        if add_trailer {
            let trailer_pos = self.bytes_written;

            let index_bytes = if with_index {
                let mut bytes = Vec::with_capacity(self.record_lengths.len() * 4);
                let mut word = [0u8; 4];
                for &len in &self.record_lengths {
                    self.order.put_u32(&mut word, 0, len);
                    bytes.extend_from_slice(&word);
                }
                Some(bytes)
            } else {
                None
            };

            let mut buf = vec![0u8; RecordHeader::trailer_bytes(self.record_lengths.len())];
            let n = RecordHeader::write_trailer_typed(
                &mut buf,
                0,
                trailer_record_number,
                self.order,
                self.file_type.trailer_type(),
                index_bytes.as_deref(),
            )?;
            self.file.write_all(&buf[..n])?;
            self.bytes_written += n as u64;

            // Patch the trailer position into the file header in place.
            let mut pos_word = [0u8; 8];
            self.order.put_u64(&mut pos_word, 0, trailer_pos);
            self.file.seek(SeekFrom::Start(TRAILER_POSITION_OFFSET))?;
            self.file.write_all(&pos_word)?;
            self.file.seek(SeekFrom::End(0))?;
            debug!(
                "finalized {} with trailer at {trailer_pos}",
                self.path.display()
            );
        }
        self.file.flush()?;
        Ok(self.bytes_written)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Split-file naming
// ─────────────────────────────────────────────────────────────────────────────

/// Path of split file `n` for `base`: `run.evio` → `run.1.evio`,
/// extension-less `run` → `run.1`.
pub(crate) fn split_path(base: &Path, n: u32) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}.{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{n}"),
    };
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_with_extension() {
        assert_eq!(
            split_path(Path::new("/data/run.evio"), 1),
            PathBuf::from("/data/run.1.evio")
        );
        assert_eq!(
            split_path(Path::new("run.hipo"), 12),
            PathBuf::from("run.12.hipo")
        );
    }

    #[test]
    fn split_path_without_extension() {
        assert_eq!(split_path(Path::new("/data/run"), 3), PathBuf::from("/data/run.3"));
    }

    #[test]
    fn default_options() {
        let opts = WriterOptions::default();
        assert_eq!(opts.ring_size, 8);
        assert_eq!(opts.compressor_threads, 1);
        assert!(opts.compression.is_none());
        let mut auto = opts.clone();
        auto.compressor_threads = 0;
        assert!(auto.effective_compressor_threads() >= 1);
    }
}
