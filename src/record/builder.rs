//! Accumulates opaque event payloads and materializes them as one on-disk
//! record: header, event index, padded user header, then the (optionally
//! compressed) data region.
//!
//! Events are pre-framed by the caller; the record adds no per-event framing
//! beyond the 4-byte length index.  All buffers grow geometrically and are
//! retained across [`RecordBuilder::reset`] so pooled builders stop
//! allocating once warm.

use crate::codec::{self, CompressionType};
use crate::error::Result;
use crate::header::{pad_to_word, ByteOrder, HeaderType, RecordHeader, HEADER_SIZE_BYTES};

/// Default cap on events per record.
pub const DEFAULT_MAX_EVENT_COUNT: usize = 1_000_000;

/// Default cap on the record's event-data footprint in bytes (8 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Builds one record at a time; reusable via [`reset`](RecordBuilder::reset).
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    header: RecordHeader,
    header_type: HeaderType,
    /// Event payloads, concatenated end-to-end (unpadded).
    events: Vec<u8>,
    /// Per-event payload lengths, in call order.
    index: Vec<u32>,
    user_header: Vec<u8>,
    /// The finished binary record, valid after `build()`.
    binary: Vec<u8>,
    /// Compression scratch, sized to the codec's worst-case bound.
    scratch: Vec<u8>,
    compression: CompressionType,
    max_event_count: usize,
    max_buffer_size: usize,
    built: bool,
}

impl Default for RecordBuilder {
    fn default() -> Self {
        RecordBuilder::new(ByteOrder::default())
    }
}

impl RecordBuilder {
    /// A builder with default limits and no compression.
    pub fn new(order: ByteOrder) -> RecordBuilder {
        RecordBuilder::with_capacity(order, DEFAULT_MAX_EVENT_COUNT, DEFAULT_MAX_BUFFER_SIZE)
    }

    /// A builder with explicit event-count and byte-size limits.
    pub fn with_capacity(
        order: ByteOrder,
        max_event_count: usize,
        max_buffer_size: usize,
    ) -> RecordBuilder {
        RecordBuilder {
            header: RecordHeader::new(order),
            header_type: HeaderType::default(),
            events: Vec::new(),
            index: Vec::new(),
            user_header: Vec::new(),
            binary: Vec::new(),
            scratch: Vec::new(),
            compression: CompressionType::None,
            max_event_count,
            max_buffer_size,
            built: false,
        }
    }

    // ── Configuration ────────────────────────────────────────────────────────

    pub fn set_compression_type(&mut self, kind: CompressionType) {
        self.compression = kind;
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression
    }

    pub fn set_header_type(&mut self, ty: HeaderType) {
        self.header_type = ty;
    }

    /// Record-level user header, stored once after the event index.
    pub fn set_user_header(&mut self, bytes: &[u8]) {
        self.user_header.clear();
        self.user_header.extend_from_slice(bytes);
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order()
    }

    pub fn max_event_count(&self) -> usize {
        self.max_event_count
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    // ── Accumulation ─────────────────────────────────────────────────────────

    /// Appends one event payload.
    ///
    /// Returns `false` without mutating anything when the record is full,
    /// either by event count or by byte footprint (each event costs its
    /// payload plus 4 index bytes).  The caller is expected to flush the
    /// record and retry.  Zero-length events are legal.
    pub fn add_event(&mut self, event: &[u8]) -> bool {
        if self.event_count() + 1 > self.max_event_count {
            return false;
        }
        let footprint = self.events.len() + 4 * self.index.len();
        if footprint + event.len() + 4 > self.max_buffer_size {
            return false;
        }
        self.events.extend_from_slice(event);
        self.index.push(event.len() as u32);
        true
    }

    pub fn event_count(&self) -> usize {
        self.index.len()
    }

    /// Total unpadded event-payload bytes accumulated so far.
    pub fn uncompressed_data_len(&self) -> usize {
        self.events.len()
    }

    // ── Materialization ──────────────────────────────────────────────────────

    /// Assembles the final binary record.
    ///
    /// Layout: 56-byte header, 4-byte length per event, padded user header,
    /// padded data region.  When compression is configured and the record
    /// holds data, the data region carries the compressed payload (padded to
    /// a word); an empty payload is always written uncompressed so the
    /// header's compression word stays consistent.
    pub fn build(&mut self) -> Result<()> {
        let order = self.header.byte_order();
        self.header.set_header_type(self.header_type);
        self.header.set_event_count(self.index.len() as u32);
        self.header
            .set_uncompressed_data_length(self.events.len() as u32);
        self.header
            .set_user_header_length(self.user_header.len() as u32);

        let compressed_len = if self.compression.is_none() || self.events.is_empty() {
            self.header.set_compression(CompressionType::None, 0);
            0
        } else {
            let bound = codec::max_compressed_len(self.compression, self.events.len());
            if self.scratch.len() < bound {
                self.scratch.resize(bound, 0);
            }
            let clen = codec::compress(self.compression, &self.events, &mut self.scratch)?;
            self.header.set_compression(self.compression, clen);
            clen
        };

        self.header.recompute_record_length();
        let total = self.header.record_length_bytes();
        self.binary.clear();
        self.binary.resize(total, 0);

        self.header.write(&mut self.binary, 0)?;

        let mut pos = HEADER_SIZE_BYTES;
        for &len in &self.index {
            order.put_u32(&mut self.binary, pos, len);
            pos += 4;
        }

        self.binary[pos..pos + self.user_header.len()].copy_from_slice(&self.user_header);
        pos += pad_to_word(self.user_header.len());

        if self.header.compression_type().is_none() {
            self.binary[pos..pos + self.events.len()].copy_from_slice(&self.events);
        } else {
            self.binary[pos..pos + compressed_len].copy_from_slice(&self.scratch[..compressed_len]);
        }

        self.built = true;
        Ok(())
    }

    /// The finished binary record; empty until [`build`](RecordBuilder::build).
    pub fn as_bytes(&self) -> &[u8] {
        &self.binary
    }

    /// True once `build()` has produced a binary image for the current batch.
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Sets the record number, patching the already-built binary in place
    /// when present.  The writer stamps numbers at write time, after the
    /// compressors have finished building.
    pub fn stamp_record_number(&mut self, n: u32) {
        self.header.set_record_number(n);
        if self.built {
            let order = self.header.byte_order();
            order.put_u32(&mut self.binary, 4, n);
        }
    }

    // ── Reuse ────────────────────────────────────────────────────────────────

    /// Empties events, index, and the built image; keeps every allocation
    /// and the builder's configuration (order, limits, compression, user
    /// header).
    pub fn reset(&mut self) {
        self.events.clear();
        self.index.clear();
        self.binary.clear();
        self.header.reset();
        self.built = false;
    }

    pub fn header(&self) -> &RecordHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut RecordHeader {
        &mut self.header
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_event_refuses_on_count_limit() {
        let mut b = RecordBuilder::with_capacity(ByteOrder::LittleEndian, 2, 1024);
        assert!(b.add_event(b"one"));
        assert!(b.add_event(b"two"));
        assert!(!b.add_event(b"three"));
        assert_eq!(b.event_count(), 2);
        assert_eq!(b.uncompressed_data_len(), 6);
    }

    #[test]
    fn add_event_refuses_on_size_limit() {
        // Each event costs len + 4 index bytes: two 12-byte events fit in 32.
        let mut b = RecordBuilder::with_capacity(ByteOrder::LittleEndian, 100, 32);
        assert!(b.add_event(&[0u8; 12]));
        assert!(b.add_event(&[0u8; 12]));
        assert!(!b.add_event(&[0u8; 1]));
        assert_eq!(b.event_count(), 2);
    }

    #[test]
    fn zero_length_event_is_legal() {
        let mut b = RecordBuilder::new(ByteOrder::LittleEndian);
        assert!(b.add_event(&[]));
        assert_eq!(b.event_count(), 1);
        assert_eq!(b.uncompressed_data_len(), 0);
        b.build().unwrap();
        assert_eq!(b.header().event_count(), 1);
        assert_eq!(b.header().index_length(), 4);
        assert_eq!(b.header().uncompressed_data_length(), 0);
    }

    #[test]
    fn empty_record_builds_header_only() {
        let mut b = RecordBuilder::new(ByteOrder::LittleEndian);
        b.build().unwrap();
        assert_eq!(b.as_bytes().len(), HEADER_SIZE_BYTES);
        assert_eq!(b.header().record_length_bytes(), HEADER_SIZE_BYTES);
    }

    #[test]
    fn uncompressed_layout_is_exact() {
        let mut b = RecordBuilder::new(ByteOrder::LittleEndian);
        assert!(b.add_event(&[0xAAu8; 100]));
        b.build().unwrap();

        // 56 header + 4 index + 0 user header + 100 data (no pad) = 160.
        let bytes = b.as_bytes();
        assert_eq!(bytes.len(), 160);

        let mut parsed = RecordHeader::default();
        parsed.read(bytes, 0).unwrap();
        assert_eq!(parsed.event_count(), 1);
        assert_eq!(parsed.index_length(), 4);
        assert_eq!(parsed.uncompressed_data_length(), 100);
        assert_eq!(parsed.compressed_data_words(), 0);
        assert_eq!(parsed.record_length_bytes(), bytes.len());

        // Index entry then the payload itself.
        assert_eq!(ByteOrder::LittleEndian.get_u32(bytes, 56), 100);
        assert!(bytes[60..160].iter().all(|&x| x == 0xAA));
    }

    #[test]
    fn data_region_is_zero_padded() {
        let mut b = RecordBuilder::new(ByteOrder::LittleEndian);
        assert!(b.add_event(&[0xFFu8; 5]));
        b.build().unwrap();

        let bytes = b.as_bytes();
        // 56 + 4 + 0 + 8 (5 data + 3 pad).
        assert_eq!(bytes.len(), 68);
        assert_eq!(&bytes[60..65], &[0xFF; 5]);
        assert_eq!(&bytes[65..68], &[0, 0, 0]);

        let mut parsed = RecordHeader::default();
        parsed.read(bytes, 0).unwrap();
        assert_eq!(parsed.data_padding(), 3);
    }

    #[test]
    fn user_header_sits_between_index_and_data() {
        let mut b = RecordBuilder::new(ByteOrder::LittleEndian);
        b.set_user_header(b"cfg");
        assert!(b.add_event(b"payload!"));
        b.build().unwrap();

        let bytes = b.as_bytes();
        // 56 + 4 + 4 (3 user + 1 pad) + 8 data.
        assert_eq!(bytes.len(), 72);
        assert_eq!(&bytes[60..63], b"cfg");
        assert_eq!(bytes[63], 0);
        assert_eq!(&bytes[64..72], b"payload!");

        let mut parsed = RecordHeader::default();
        parsed.read(bytes, 0).unwrap();
        assert_eq!(parsed.user_header_length(), 3);
        assert_eq!(parsed.user_header_padding(), 1);
    }

    #[test]
    fn compressed_build_round_trips() {
        for kind in [
            CompressionType::Lz4,
            CompressionType::Lz4Best,
            CompressionType::Gzip,
        ] {
            let mut b = RecordBuilder::new(ByteOrder::LittleEndian);
            b.set_compression_type(kind);
            let payload = b"event payload that repeats itself, ".repeat(30);
            assert!(b.add_event(&payload));
            assert!(b.add_event(&payload));
            b.build().unwrap();

            let bytes = b.as_bytes();
            let mut parsed = RecordHeader::default();
            parsed.read(bytes, 0).unwrap();
            assert_eq!(parsed.compression_type(), kind);
            assert!(parsed.compressed_data_words() > 0);
            assert_eq!(
                parsed.uncompressed_data_length() as usize,
                2 * payload.len()
            );

            let data_off = HEADER_SIZE_BYTES
                + parsed.index_length() as usize
                + parsed.user_header_region_bytes();
            let compressed = &bytes[data_off..data_off + parsed.compressed_data_bytes()];
            let mut restored = vec![0u8; parsed.uncompressed_data_length() as usize];
            let n = codec::decompress(kind, compressed, &mut restored).unwrap();
            assert_eq!(n, 2 * payload.len());
            assert_eq!(&restored[..payload.len()], &payload[..]);
            assert_eq!(&restored[payload.len()..], &payload[..]);
        }
    }

    #[test]
    fn empty_payload_downgrades_compression() {
        let mut b = RecordBuilder::new(ByteOrder::LittleEndian);
        b.set_compression_type(CompressionType::Lz4);
        b.build().unwrap();
        assert_eq!(b.header().compression_type(), CompressionType::None);
        assert_eq!(b.header().compressed_data_words(), 0);
    }

    #[test]
    fn reset_keeps_capacity_and_config() {
        let mut b = RecordBuilder::new(ByteOrder::BigEndian);
        b.set_compression_type(CompressionType::Gzip);
        for _ in 0..50 {
            assert!(b.add_event(&[7u8; 128]));
        }
        b.build().unwrap();
        let events_cap = b.events.capacity();
        let binary_cap = b.binary.capacity();

        b.reset();
        assert_eq!(b.event_count(), 0);
        assert_eq!(b.uncompressed_data_len(), 0);
        assert!(b.as_bytes().is_empty());
        assert!(!b.is_built());
        assert!(b.events.capacity() >= events_cap);
        assert!(b.binary.capacity() >= binary_cap);
        assert_eq!(b.compression_type(), CompressionType::Gzip);
        assert_eq!(b.byte_order(), ByteOrder::BigEndian);
    }

    #[test]
    fn stamp_record_number_patches_built_binary() {
        let mut b = RecordBuilder::new(ByteOrder::LittleEndian);
        assert!(b.add_event(b"x"));
        b.build().unwrap();
        b.stamp_record_number(42);

        let mut parsed = RecordHeader::default();
        parsed.read(b.as_bytes(), 0).unwrap();
        assert_eq!(parsed.record_number(), 42);
    }

    #[test]
    fn big_endian_record_parses_back() {
        let mut b = RecordBuilder::new(ByteOrder::BigEndian);
        assert!(b.add_event(&[1, 2, 3, 4, 5, 6, 7, 8]));
        b.build().unwrap();

        let mut parsed = RecordHeader::default();
        parsed.read(b.as_bytes(), 0).unwrap();
        assert_eq!(parsed.byte_order(), ByteOrder::BigEndian);
        assert_eq!(parsed.event_count(), 1);
        assert_eq!(ByteOrder::BigEndian.get_u32(b.as_bytes(), 56), 8);
    }
}
