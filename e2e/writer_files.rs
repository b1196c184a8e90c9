//! E2E Test Suite 02: single-threaded writer file layout.
//!
//! Writes real files with `Writer` and verifies the on-disk structure:
//! file header, records, trailer, and the patched trailer-position field.

use std::fs;

use tempfile::TempDir;

use hipo6::{
    ByteOrder, CompressionType, HeaderType, RecordBuilder, RecordHeader, Writer, WriterOptions,
};

const HEADER_BYTES: usize = 56;

fn read_header(bytes: &[u8], offset: usize) -> RecordHeader {
    let mut header = RecordHeader::default();
    header.read(bytes, offset).expect("header parses");
    header
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: zero events, trailer only
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn empty_file_is_header_plus_trailer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.evio");

    let mut writer = Writer::new(ByteOrder::LittleEndian);
    writer.add_trailer(true);
    writer.open(&path).unwrap();
    writer.close().unwrap();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 2 * HEADER_BYTES);

    let file_header = read_header(&bytes, 0);
    assert_eq!(file_header.header_type(), HeaderType::EvioFile);
    // The trailer position patched into user register 1 points right after
    // the file header (no user header).
    assert_eq!(file_header.user_register_1(), HEADER_BYTES as u64);

    let trailer = read_header(&bytes, HEADER_BYTES);
    assert_eq!(trailer.header_type(), HeaderType::EvioTrailer);
    assert_eq!(trailer.event_count(), 0);
    assert_eq!(trailer.compression_type(), CompressionType::None);
    assert_eq!(trailer.record_number(), 1);
}

#[test]
fn trailer_position_accounts_for_user_header() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("userheader.evio");

    let mut writer = Writer::new(ByteOrder::LittleEndian);
    writer
        .open_with_user_header(&path, b"run metadata!")
        .unwrap();
    writer.close().unwrap();

    let bytes = fs::read(&path).unwrap();
    let file_header = read_header(&bytes, 0);
    assert_eq!(file_header.user_header_length(), 13);
    // 13 bytes padded to 16.
    let trailer_pos = HEADER_BYTES + 16;
    assert_eq!(file_header.user_register_1(), trailer_pos as u64);
    assert_eq!(&bytes[HEADER_BYTES..HEADER_BYTES + 13], b"run metadata!");

    let trailer = read_header(&bytes, trailer_pos);
    assert!(trailer.header_type().is_trailer());
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: one 100-byte event, no compression
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn single_event_record_layout() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("one.evio");

    let mut writer = Writer::new(ByteOrder::LittleEndian);
    writer.add_trailer(false);
    writer.open(&path).unwrap();
    writer.add_event(&[0x5Au8; 100]).unwrap();
    writer.close().unwrap();

    let bytes = fs::read(&path).unwrap();
    let record = read_header(&bytes, HEADER_BYTES);
    assert_eq!(record.record_number(), 1);
    assert_eq!(record.event_count(), 1);
    assert_eq!(record.index_length(), 4);
    assert_eq!(record.uncompressed_data_length(), 100);
    assert_eq!(record.compressed_data_words(), 0);
    // (56 header + 4 index + 100 data + 0 pad) / 4 words.
    assert_eq!(record.record_length_words(), 40);
    assert_eq!(bytes.len(), HEADER_BYTES + 160);

    // No trailer: the position field stays zero.
    let file_header = read_header(&bytes, 0);
    assert_eq!(file_header.user_register_1(), 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Record numbering and the trailer index
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn record_numbers_are_contiguous_and_indexed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("many.evio");

    // Two events per record.
    let mut writer = Writer::with_options(WriterOptions {
        max_event_count: 2,
        ..WriterOptions::default()
    });
    writer.add_trailer_with_index(true);
    writer.open(&path).unwrap();
    for i in 0..10u8 {
        writer.add_event(&[i; 50]).unwrap();
    }
    writer.close().unwrap();
    assert_eq!(writer.record_count(), 5);

    let bytes = fs::read(&path).unwrap();
    let mut offset = HEADER_BYTES;
    let mut lengths = Vec::new();
    for expected_number in 1..=5u32 {
        let record = read_header(&bytes, offset);
        assert_eq!(record.record_number(), expected_number);
        assert_eq!(record.event_count(), 2);
        lengths.push(record.record_length_bytes() as u32);
        offset += record.record_length_bytes();
    }

    // The trailer's data region holds one length word per record.
    let trailer = read_header(&bytes, offset);
    assert!(trailer.header_type().is_trailer());
    assert_eq!(trailer.record_number(), 6);
    assert_eq!(trailer.uncompressed_data_length(), 20);
    let order = trailer.byte_order();
    for (i, &len) in lengths.iter().enumerate() {
        assert_eq!(order.get_u32(&bytes, offset + HEADER_BYTES + 4 * i), len);
    }

    let file_header = read_header(&bytes, 0);
    assert_eq!(file_header.user_register_1(), offset as u64);
    assert_eq!(bytes.len(), offset + HEADER_BYTES + 20);
}

#[test]
fn compressed_file_reads_back_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("packed.evio");

    let mut writer = Writer::with_options(WriterOptions {
        compression: CompressionType::Lz4,
        max_event_count: 16,
        ..WriterOptions::default()
    });
    writer.open(&path).unwrap();
    let mut expected = Vec::new();
    for i in 0..100u32 {
        let event: Vec<u8> = (0..64).map(|j| (i + j) as u8).collect();
        writer.add_event(&event).unwrap();
        expected.push(event);
    }
    writer.close().unwrap();

    let bytes = fs::read(&path).unwrap();
    let mut offset = HEADER_BYTES;
    let mut events_seen = 0usize;
    loop {
        let record = read_header(&bytes, offset);
        if record.header_type().is_trailer() {
            break;
        }
        assert_eq!(record.compression_type(), CompressionType::Lz4);

        let data_off = offset + HEADER_BYTES + record.index_length() as usize;
        let compressed = &bytes[data_off..data_off + record.compressed_data_bytes()];
        let mut restored = vec![0u8; record.uncompressed_data_length() as usize];
        hipo6::codec::decompress(CompressionType::Lz4, compressed, &mut restored).unwrap();

        for chunk in restored.chunks(64) {
            assert_eq!(chunk, &expected[events_seen][..]);
            events_seen += 1;
        }
        offset += record.record_length_bytes();
    }
    assert_eq!(events_seen, 100);
}

// ─────────────────────────────────────────────────────────────────────────────
// writeRecord API
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn caller_built_records_get_numbered() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("prebuilt.evio");

    let mut writer = Writer::new(ByteOrder::LittleEndian);
    writer.open(&path).unwrap();

    for batch in 0..3u8 {
        let mut record = RecordBuilder::new(ByteOrder::LittleEndian);
        assert!(record.add_event(&[batch; 24]));
        writer.write_record(&mut record).unwrap();
    }
    writer.close().unwrap();
    assert_eq!(writer.record_count(), 3);

    let bytes = fs::read(&path).unwrap();
    let mut offset = HEADER_BYTES;
    for expected_number in 1..=3u32 {
        let record = read_header(&bytes, offset);
        assert_eq!(record.record_number(), expected_number);
        offset += record.record_length_bytes();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure surfaces
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn add_after_close_is_an_error() {
    let dir = TempDir::new().unwrap();
    let mut writer = Writer::new(ByteOrder::LittleEndian);
    writer.open(dir.path().join("closed.evio")).unwrap();
    writer.close().unwrap();
    assert!(writer.add_event(b"late").is_err());
    // Close stays idempotent after the failed add.
    writer.close().unwrap();
}

#[test]
fn bytes_written_matches_file_size() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sized.evio");
    let mut writer = Writer::new(ByteOrder::BigEndian);
    writer.add_trailer_with_index(true);
    writer.open(&path).unwrap();
    for _ in 0..20 {
        writer.add_event(&[7u8; 333]).unwrap();
    }
    writer.close().unwrap();

    let on_disk = fs::metadata(&path).unwrap().len();
    assert_eq!(writer.bytes_written(), on_disk);
}
