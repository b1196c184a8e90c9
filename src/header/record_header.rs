//! The fixed 56-byte record header shared by records, file headers, and
//! trailers.
//!
//! Word layout (byte offsets, all fields in the header's own byte order):
//!
//! | offset | width | field                                 |
//! |-------:|------:|---------------------------------------|
//! | 0      | 4     | record length in words, incl. header  |
//! | 4      | 4     | record number (1-based)               |
//! | 8      | 4     | header length in words (= 14)         |
//! | 12     | 4     | event count                           |
//! | 16     | 4     | event index length in bytes           |
//! | 20     | 4     | bit info + version                    |
//! | 24     | 4     | user header length in bytes, unpadded |
//! | 28     | 4     | magic `0xc0da0100`                    |
//! | 32     | 4     | uncompressed data length in bytes     |
//! | 36     | 4     | compression type + compressed words   |
//! | 40     | 8     | user register 1                       |
//! | 48     | 8     | user register 2                       |
//!
//! Bit-info word: bits 0–7 version, 8–13 header type, 14–15 reserved, 16–17
//! data-region pad count, 18–19 user-header pad count, 20–31 user flag bits.

use crate::codec::CompressionType;
use crate::error::{HipoError, Result};
use crate::header::{
    pad_to_word, word_padding, ByteOrder, HeaderType, BIT_INFO_DATA_PAD_SHIFT,
    BIT_INFO_TYPE_SHIFT, BIT_INFO_USER_FLAG_SHIFT, BIT_INFO_USER_PAD_SHIFT,
    COMPRESSED_WORDS_MASK, COMPRESSION_TYPE_SHIFT, HEADER_MAGIC, HEADER_SIZE_BYTES,
    HEADER_SIZE_WORDS, HEADER_VERSION,
};

/// Mutable value object holding every header field.
///
/// A `RecordHeader` never touches the file system; it only encodes itself
/// into and decodes itself from caller-provided byte slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    record_length_words: u32,
    record_number: u32,
    event_count: u32,
    index_length: u32,
    header_type: HeaderType,
    data_padding: u32,
    user_header_padding: u32,
    user_flags: u32,
    user_header_length: u32,
    uncompressed_data_length: u32,
    compression_type: CompressionType,
    compressed_data_words: u32,
    user_register_1: u64,
    user_register_2: u64,
    byte_order: ByteOrder,
}

impl Default for RecordHeader {
    fn default() -> Self {
        RecordHeader::new(ByteOrder::default())
    }
}

impl RecordHeader {
    /// A fresh header in `order` with all counters zeroed.
    pub fn new(order: ByteOrder) -> RecordHeader {
        RecordHeader {
            record_length_words: HEADER_SIZE_WORDS,
            record_number: 0,
            event_count: 0,
            index_length: 0,
            header_type: HeaderType::EvioRecord,
            data_padding: 0,
            user_header_padding: 0,
            user_flags: 0,
            user_header_length: 0,
            uncompressed_data_length: 0,
            compression_type: CompressionType::None,
            compressed_data_words: 0,
            user_register_1: 0,
            user_register_2: 0,
            byte_order: order,
        }
    }

    /// Zeroes all counters and restores defaults; keeps the byte order.
    pub fn reset(&mut self) {
        let order = self.byte_order;
        *self = RecordHeader::new(order);
    }

    // ── Field accessors ──────────────────────────────────────────────────────

    pub fn record_length_words(&self) -> u32 {
        self.record_length_words
    }

    pub fn record_length_bytes(&self) -> usize {
        self.record_length_words as usize * 4
    }

    pub fn record_number(&self) -> u32 {
        self.record_number
    }

    pub fn set_record_number(&mut self, n: u32) {
        self.record_number = n;
    }

    pub fn event_count(&self) -> u32 {
        self.event_count
    }

    pub fn set_event_count(&mut self, count: u32) {
        self.event_count = count;
        self.index_length = count * 4;
    }

    /// Event index length in bytes (4 per event).
    pub fn index_length(&self) -> u32 {
        self.index_length
    }

    pub fn header_type(&self) -> HeaderType {
        self.header_type
    }

    pub fn set_header_type(&mut self, ty: HeaderType) {
        self.header_type = ty;
    }

    pub fn user_header_length(&self) -> u32 {
        self.user_header_length
    }

    /// Sets the unpadded user-header length; the pad nibble follows.
    pub fn set_user_header_length(&mut self, len: u32) {
        self.user_header_length = len;
        self.user_header_padding = word_padding(len as usize) as u32;
    }

    pub fn user_header_padding(&self) -> u32 {
        self.user_header_padding
    }

    pub fn uncompressed_data_length(&self) -> u32 {
        self.uncompressed_data_length
    }

    /// Sets the unpadded data length.  For uncompressed records this also
    /// fixes the data-region pad nibble; a later
    /// [`set_compression`](RecordHeader::set_compression) overrides it.
    pub fn set_uncompressed_data_length(&mut self, len: u32) {
        self.uncompressed_data_length = len;
        self.data_padding = word_padding(len as usize) as u32;
    }

    /// Pad bytes (0..=3) at the end of the on-disk data region: the padding
    /// of the compressed payload when compressed, of the raw payload
    /// otherwise.
    pub fn data_padding(&self) -> u32 {
        self.data_padding
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression_type
    }

    pub fn compressed_data_words(&self) -> u32 {
        self.compressed_data_words
    }

    /// Exact compressed payload length in bytes (the word count minus the
    /// pad nibble); 0 when uncompressed.
    pub fn compressed_data_bytes(&self) -> usize {
        if self.compression_type.is_none() {
            0
        } else {
            self.compressed_data_words as usize * 4 - self.data_padding as usize
        }
    }

    /// Records the compression outcome from the exact compressed byte
    /// length.  The data-region pad nibble becomes the compressed payload's
    /// padding so readers can recover the exact span.  A zero length forces
    /// the type back to NONE so the two fields stay mutually consistent.
    pub fn set_compression(&mut self, kind: CompressionType, compressed_bytes: usize) {
        if compressed_bytes == 0 || kind.is_none() {
            self.compression_type = CompressionType::None;
            self.compressed_data_words = 0;
            self.data_padding = word_padding(self.uncompressed_data_length as usize) as u32;
        } else {
            self.compression_type = kind;
            self.compressed_data_words =
                (pad_to_word(compressed_bytes) as u32 / 4) & COMPRESSED_WORDS_MASK;
            self.data_padding = word_padding(compressed_bytes) as u32;
        }
    }

    pub fn user_register_1(&self) -> u64 {
        self.user_register_1
    }

    pub fn set_user_register_1(&mut self, v: u64) {
        self.user_register_1 = v;
    }

    pub fn user_register_2(&self) -> u64 {
        self.user_register_2
    }

    pub fn set_user_register_2(&mut self, v: u64) {
        self.user_register_2 = v;
    }

    /// Caller-visible flag bits (stored in bit-info bits 20..=31).
    pub fn user_flags(&self) -> u32 {
        self.user_flags
    }

    pub fn set_user_flags(&mut self, flags: u32) {
        self.user_flags = flags & 0xFFF;
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    // ── Derived lengths ──────────────────────────────────────────────────────

    /// On-disk size of the data region in bytes: the padded compressed length
    /// when compressed, the padded uncompressed length otherwise.
    pub fn data_region_bytes(&self) -> usize {
        if self.compression_type.is_none() {
            pad_to_word(self.uncompressed_data_length as usize)
        } else {
            self.compressed_data_words as usize * 4
        }
    }

    /// On-disk size of the padded user header in bytes.
    pub fn user_header_region_bytes(&self) -> usize {
        pad_to_word(self.user_header_length as usize)
    }

    /// Recomputes the total record length from the current component fields.
    pub fn recompute_record_length(&mut self) {
        let total = HEADER_SIZE_BYTES
            + self.index_length as usize
            + self.user_header_region_bytes()
            + self.data_region_bytes();
        self.record_length_words = (total / 4) as u32;
    }

    fn bit_info_word(&self) -> u32 {
        HEADER_VERSION
            | (self.header_type.code() << BIT_INFO_TYPE_SHIFT)
            | ((self.data_padding & 3) << BIT_INFO_DATA_PAD_SHIFT)
            | ((self.user_header_padding & 3) << BIT_INFO_USER_PAD_SHIFT)
            | (self.user_flags << BIT_INFO_USER_FLAG_SHIFT)
    }

    // ── Encoding ─────────────────────────────────────────────────────────────

    /// Emits the 56-byte header into `buf` at `offset`.
    pub fn write(&self, buf: &mut [u8], offset: usize) -> Result<()> {
        if buf.len() < offset + HEADER_SIZE_BYTES {
            return Err(HipoError::BufferTooSmall {
                needed: offset + HEADER_SIZE_BYTES,
                available: buf.len(),
            });
        }
        let o = self.byte_order;
        o.put_u32(buf, offset, self.record_length_words);
        o.put_u32(buf, offset + 4, self.record_number);
        o.put_u32(buf, offset + 8, HEADER_SIZE_WORDS);
        o.put_u32(buf, offset + 12, self.event_count);
        o.put_u32(buf, offset + 16, self.index_length);
        o.put_u32(buf, offset + 20, self.bit_info_word());
        o.put_u32(buf, offset + 24, self.user_header_length);
        o.put_u32(buf, offset + 28, HEADER_MAGIC);
        o.put_u32(buf, offset + 32, self.uncompressed_data_length);
        o.put_u32(
            buf,
            offset + 36,
            (self.compression_type.code() << COMPRESSION_TYPE_SHIFT)
                | (self.compressed_data_words & COMPRESSED_WORDS_MASK),
        );
        o.put_u64(buf, offset + 40, self.user_register_1);
        o.put_u64(buf, offset + 48, self.user_register_2);
        Ok(())
    }

    /// Emits a start-of-file header.  Identical layout; the header type must
    /// be one of the file-header types, and user register 1 carries the
    /// trailer position (0 until the file is finalized and patched).
    pub fn write_file_header(&self, buf: &mut [u8], offset: usize) -> Result<()> {
        if !self.header_type.is_file_header() {
            return Err(HipoError::InvalidState(format!(
                "header type {:?} is not a file-header type",
                self.header_type
            )));
        }
        self.write(buf, offset)
    }

    // ── Decoding ─────────────────────────────────────────────────────────────

    /// Parses 56 bytes at `offset`, detecting byte order from the magic word.
    ///
    /// A magic that matches in neither order fails with [`HipoError::BadMagic`];
    /// inconsistent length fields fail with [`HipoError::BadLength`].  On
    /// success the header's stored byte order reflects the detected one.
    pub fn read(&mut self, buf: &[u8], offset: usize) -> Result<()> {
        if buf.len() < offset + HEADER_SIZE_BYTES {
            return Err(HipoError::BadLength(format!(
                "buffer holds {} bytes at offset {offset}, header needs {}",
                buf.len().saturating_sub(offset),
                HEADER_SIZE_BYTES
            )));
        }

        let raw_magic = ByteOrder::LittleEndian.get_u32(buf, offset + 28);
        let order = if raw_magic == HEADER_MAGIC {
            ByteOrder::LittleEndian
        } else if raw_magic.swap_bytes() == HEADER_MAGIC {
            ByteOrder::BigEndian
        } else {
            return Err(HipoError::BadMagic(raw_magic));
        };

        let bit_info = order.get_u32(buf, offset + 20);
        let version = bit_info & 0xFF;
        if version != HEADER_VERSION {
            return Err(HipoError::UnsupportedVersion(version));
        }

        let header_length = order.get_u32(buf, offset + 8);
        if header_length != HEADER_SIZE_WORDS {
            return Err(HipoError::BadLength(format!(
                "header length word is {header_length}, expected {HEADER_SIZE_WORDS}"
            )));
        }

        let type_code = (bit_info >> BIT_INFO_TYPE_SHIFT) & 0x3F;
        let header_type = HeaderType::from_code(type_code).ok_or_else(|| {
            HipoError::BadLength(format!("unknown header type code {type_code}"))
        })?;

        let compression_word = order.get_u32(buf, offset + 36);
        let compression_type =
            CompressionType::from_code(compression_word >> COMPRESSION_TYPE_SHIFT)?;
        if compression_type.is_none() && compression_word & COMPRESSED_WORDS_MASK != 0 {
            return Err(HipoError::BadLength(
                "uncompressed record with nonzero compressed length".into(),
            ));
        }

        self.record_length_words = order.get_u32(buf, offset);
        self.record_number = order.get_u32(buf, offset + 4);
        self.event_count = order.get_u32(buf, offset + 12);
        self.index_length = order.get_u32(buf, offset + 16);
        self.header_type = header_type;
        self.data_padding = (bit_info >> BIT_INFO_DATA_PAD_SHIFT) & 3;
        self.user_header_padding = (bit_info >> BIT_INFO_USER_PAD_SHIFT) & 3;
        self.user_flags = bit_info >> BIT_INFO_USER_FLAG_SHIFT;
        self.user_header_length = order.get_u32(buf, offset + 24);
        self.uncompressed_data_length = order.get_u32(buf, offset + 32);
        self.compression_type = compression_type;
        self.compressed_data_words = compression_word & COMPRESSED_WORDS_MASK;
        self.user_register_1 = order.get_u64(buf, offset + 40);
        self.user_register_2 = order.get_u64(buf, offset + 48);
        self.byte_order = order;

        let expected = HEADER_SIZE_BYTES
            + self.index_length as usize
            + self.user_header_region_bytes()
            + self.data_region_bytes();
        if self.record_length_bytes() != expected {
            return Err(HipoError::BadLength(format!(
                "record length {} bytes, component sum {} bytes",
                self.record_length_bytes(),
                expected
            )));
        }
        Ok(())
    }

    // ── Trailer ──────────────────────────────────────────────────────────────

    /// Total trailer size in bytes for `record_count` indexed records.
    pub fn trailer_bytes(record_count: usize) -> usize {
        HEADER_SIZE_BYTES + record_count * 4
    }

    /// Emits an end-of-file trailer of the given family at `offset`.
    ///
    /// A trailer is a plain 56-byte header with zero events and no
    /// compression.  When `index` is given (4 bytes per record, so already
    /// word-aligned), it becomes the trailer's data region and the record
    /// length grows accordingly.  Returns the number of bytes written.
    pub fn write_trailer_typed(
        buf: &mut [u8],
        offset: usize,
        record_number: u32,
        order: ByteOrder,
        trailer_type: HeaderType,
        index: Option<&[u8]>,
    ) -> Result<usize> {
        if !trailer_type.is_trailer() {
            return Err(HipoError::InvalidState(format!(
                "header type {trailer_type:?} is not a trailer type"
            )));
        }
        let index_bytes = index.map_or(0, <[u8]>::len);
        let total = HEADER_SIZE_BYTES + index_bytes;
        if buf.len() < offset + total {
            return Err(HipoError::BufferTooSmall {
                needed: offset + total,
                available: buf.len(),
            });
        }

        let mut header = RecordHeader::new(order);
        header.set_header_type(trailer_type);
        header.set_record_number(record_number);
        header.set_uncompressed_data_length(index_bytes as u32);
        header.recompute_record_length();
        header.write(buf, offset)?;

        if let Some(index) = index {
            buf[offset + HEADER_SIZE_BYTES..offset + total].copy_from_slice(index);
        }
        Ok(total)
    }

    /// [`RecordHeader::write_trailer_typed`] with the EVIO trailer type.
    pub fn write_trailer(
        buf: &mut [u8],
        offset: usize,
        record_number: u32,
        order: ByteOrder,
        index: Option<&[u8]>,
    ) -> Result<usize> {
        RecordHeader::write_trailer_typed(
            buf,
            offset,
            record_number,
            order,
            HeaderType::EvioTrailer,
            index,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn populated(order: ByteOrder) -> RecordHeader {
        let mut h = RecordHeader::new(order);
        h.set_record_number(7);
        h.set_event_count(3);
        h.set_user_header_length(13);
        h.set_uncompressed_data_length(301);
        h.set_compression(CompressionType::Lz4, 19);
        h.set_user_register_1(0x1122_3344_5566_7788);
        h.set_user_register_2(0x99AA_BBCC_DDEE_FF00);
        h.set_user_flags(0xABC);
        h.set_header_type(HeaderType::HipoRecord);
        h.recompute_record_length();
        h
    }

    #[test]
    fn write_read_round_trip_both_orders() {
        for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            let original = populated(order);
            let mut buf = vec![0u8; HEADER_SIZE_BYTES];
            original.write(&mut buf, 0).expect("write");

            let mut parsed = RecordHeader::default();
            parsed.read(&buf, 0).expect("read");
            assert_eq!(parsed, original, "round trip in {order:?}");
            assert_eq!(parsed.byte_order(), order);
        }
    }

    #[test]
    fn cross_order_read_detects_swap() {
        let original = populated(ByteOrder::BigEndian);
        let mut buf = vec![0u8; HEADER_SIZE_BYTES];
        original.write(&mut buf, 0).unwrap();

        // A header that assumed little-endian still parses, flipping itself.
        let mut parsed = RecordHeader::new(ByteOrder::LittleEndian);
        parsed.read(&buf, 0).unwrap();
        assert_eq!(parsed.byte_order(), ByteOrder::BigEndian);
        assert_eq!(parsed.record_number(), 7);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = vec![0u8; HEADER_SIZE_BYTES];
        populated(ByteOrder::LittleEndian).write(&mut buf, 0).unwrap();
        buf[28] ^= 0x5A;
        let mut parsed = RecordHeader::default();
        assert!(matches!(parsed.read(&buf, 0), Err(HipoError::BadMagic(_))));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let buf = vec![0u8; HEADER_SIZE_BYTES - 1];
        let mut parsed = RecordHeader::default();
        assert!(matches!(parsed.read(&buf, 0), Err(HipoError::BadLength(_))));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut buf = vec![0u8; HEADER_SIZE_BYTES];
        populated(ByteOrder::LittleEndian).write(&mut buf, 0).unwrap();
        // Overwrite the version byte (bit-info word is at offset 20, LE).
        buf[20] = 5;
        let mut parsed = RecordHeader::default();
        assert_eq!(parsed.read(&buf, 0), Err(HipoError::UnsupportedVersion(5)));
    }

    #[test]
    fn compression_code_above_three_is_rejected() {
        let mut buf = vec![0u8; HEADER_SIZE_BYTES];
        let mut h = populated(ByteOrder::LittleEndian);
        h.set_compression(CompressionType::None, 0);
        h.recompute_record_length();
        h.write(&mut buf, 0).unwrap();
        // Force compression nibble to 4 (offset 36, LE: top nibble of byte 39).
        buf[39] = 0x40;
        let mut parsed = RecordHeader::default();
        assert_eq!(
            parsed.read(&buf, 0),
            Err(HipoError::UnsupportedCompression(4))
        );
    }

    #[test]
    fn inconsistent_length_is_rejected() {
        let mut buf = vec![0u8; HEADER_SIZE_BYTES];
        let mut h = populated(ByteOrder::LittleEndian);
        h.set_compression(CompressionType::None, 0);
        h.recompute_record_length();
        h.write(&mut buf, 0).unwrap();
        // Shrink the record-length word below the component sum.
        ByteOrder::LittleEndian.put_u32(&mut buf, 0, HEADER_SIZE_WORDS);
        let mut parsed = RecordHeader::default();
        assert!(matches!(parsed.read(&buf, 0), Err(HipoError::BadLength(_))));
    }

    #[test]
    fn padding_nibbles_follow_lengths() {
        let mut h = RecordHeader::default();
        h.set_user_header_length(13);
        assert_eq!(h.user_header_padding(), 3);
        h.set_uncompressed_data_length(101);
        assert_eq!(h.data_padding(), 3);
        h.set_uncompressed_data_length(100);
        assert_eq!(h.data_padding(), 0);
    }

    #[test]
    fn record_length_matches_component_sum() {
        let mut h = RecordHeader::default();
        h.set_event_count(2);
        h.set_user_header_length(5);
        h.set_uncompressed_data_length(9);
        h.recompute_record_length();
        // 56 header + 8 index + 8 padded user header + 12 padded data = 84.
        assert_eq!(h.record_length_bytes(), 84);
    }

    #[test]
    fn zero_compressed_words_forces_type_none() {
        let mut h = RecordHeader::default();
        h.set_compression(CompressionType::Gzip, 0);
        assert_eq!(h.compression_type(), CompressionType::None);
        assert_eq!(h.compressed_data_words(), 0);
    }

    #[test]
    fn trailer_without_index() {
        let mut buf = vec![0u8; HEADER_SIZE_BYTES];
        let n = RecordHeader::write_trailer(&mut buf, 0, 9, ByteOrder::LittleEndian, None)
            .expect("trailer");
        assert_eq!(n, HEADER_SIZE_BYTES);

        let mut parsed = RecordHeader::default();
        parsed.read(&buf, 0).unwrap();
        assert_eq!(parsed.header_type(), HeaderType::EvioTrailer);
        assert_eq!(parsed.event_count(), 0);
        assert_eq!(parsed.compression_type(), CompressionType::None);
        assert_eq!(parsed.record_number(), 9);
        assert_eq!(parsed.record_length_bytes(), HEADER_SIZE_BYTES);
    }

    #[test]
    fn trailer_with_index_carries_lengths() {
        let lengths: [u32; 3] = [84, 120, 96];
        let mut index = Vec::new();
        for len in lengths {
            index.extend_from_slice(&len.to_le_bytes());
        }

        let mut buf = vec![0u8; RecordHeader::trailer_bytes(lengths.len())];
        let n = RecordHeader::write_trailer_typed(
            &mut buf,
            0,
            4,
            ByteOrder::LittleEndian,
            HeaderType::HipoTrailer,
            Some(&index),
        )
        .expect("trailer");
        assert_eq!(n, HEADER_SIZE_BYTES + 12);

        let mut parsed = RecordHeader::default();
        parsed.read(&buf, 0).unwrap();
        assert_eq!(parsed.header_type(), HeaderType::HipoTrailer);
        assert_eq!(parsed.uncompressed_data_length(), 12);
        assert_eq!(parsed.record_length_bytes(), n);
        assert_eq!(&buf[HEADER_SIZE_BYTES..], &index[..]);
    }

    #[test]
    fn file_header_requires_file_type() {
        let mut buf = vec![0u8; HEADER_SIZE_BYTES];
        let h = RecordHeader::default();
        assert!(matches!(
            h.write_file_header(&mut buf, 0),
            Err(HipoError::InvalidState(_))
        ));

        let mut h = RecordHeader::default();
        h.set_header_type(HeaderType::HipoFile);
        h.write_file_header(&mut buf, 0).expect("file header");
    }
}
