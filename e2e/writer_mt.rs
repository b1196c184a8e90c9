//! E2E Test Suite 03: multi-threaded writer pipeline.
//!
//! Exercises the producer / compressor / writer pipeline end-to-end against
//! real files and verifies the ordering contract: records land on disk in
//! publication order with contiguous record numbers, no matter how many
//! compressor workers run.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use hipo6::{codec, CompressionType, HeaderType, RecordHeader, WriterMT, WriterOptions};

const HEADER_BYTES: usize = 56;
const EVENT_SIZE: usize = 4096;

/// A 4 KiB event whose first word is its global index.
fn event(i: u32) -> Vec<u8> {
    let mut payload = vec![(i % 251) as u8; EVENT_SIZE];
    payload[..4].copy_from_slice(&i.to_le_bytes());
    payload
}

/// Reads every data record of a file: returns (record numbers, events).
fn read_back(path: &Path) -> (Vec<u32>, Vec<Vec<u8>>) {
    let bytes = fs::read(path).expect("file readable");
    let file_header = {
        let mut h = RecordHeader::default();
        h.read(&bytes, 0).expect("file header");
        h
    };
    assert!(file_header.header_type().is_file_header());

    let mut offset = HEADER_BYTES + file_header.user_header_region_bytes();
    let mut numbers = Vec::new();
    let mut events = Vec::new();
    while offset < bytes.len() {
        let mut record = RecordHeader::default();
        record.read(&bytes, offset).expect("record header");
        if record.header_type().is_trailer() {
            break;
        }
        numbers.push(record.record_number());

        let order = record.byte_order();
        let index_off = offset + HEADER_BYTES;
        let data_off =
            index_off + record.index_length() as usize + record.user_header_region_bytes();
        let data = if record.compression_type().is_none() {
            bytes[data_off..data_off + record.uncompressed_data_length() as usize].to_vec()
        } else {
            let compressed = &bytes[data_off..data_off + record.compressed_data_bytes()];
            let mut restored = vec![0u8; record.uncompressed_data_length() as usize];
            codec::decompress(record.compression_type(), compressed, &mut restored)
                .expect("record decompresses");
            restored
        };

        let mut pos = 0;
        for i in 0..record.event_count() as usize {
            let len = order.get_u32(&bytes, index_off + 4 * i) as usize;
            events.push(data[pos..pos + len].to_vec());
            pos += len;
        }
        offset += record.record_length_bytes();
    }
    (numbers, events)
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: 1,000 × 4 KiB events, LZ4, ring 8, 4 compressors
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn thousand_events_four_compressors_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.evio");

    let mut writer = WriterMT::new(WriterOptions {
        compression: CompressionType::Lz4,
        compressor_threads: 4,
        ring_size: 8,
        max_event_count: 64,
        ..WriterOptions::default()
    });
    writer.open(&path).unwrap();
    for i in 0..1000u32 {
        writer.add_event(&event(i)).unwrap();
    }
    writer.close().unwrap();

    let (numbers, events) = read_back(&path);
    // 15 full records of 64 events plus the 40-event remainder.
    let expected_records: Vec<u32> = (1..=16).collect();
    assert_eq!(numbers, expected_records);
    assert_eq!(events.len(), 1000);
    for (i, payload) in events.iter().enumerate() {
        assert_eq!(payload, &event(i as u32), "event {i} out of order");
    }

    let summary = writer.summary().expect("summary after close");
    assert_eq!(summary.record_count, 16);
    assert_eq!(summary.file_count, 1);
    assert_eq!(summary.bytes_written, fs::metadata(&path).unwrap().len());
}

#[test]
fn single_compressor_produces_identical_stream() {
    // The worker count must not change what lands on disk.
    let dir = TempDir::new().unwrap();
    let mut paths = Vec::new();
    for (name, threads) in [("one.evio", 1usize), ("four.evio", 4)] {
        let path = dir.path().join(name);
        let mut writer = WriterMT::new(WriterOptions {
            compression: CompressionType::Gzip,
            compressor_threads: threads,
            max_event_count: 10,
            ..WriterOptions::default()
        });
        writer.open(&path).unwrap();
        for i in 0..100u32 {
            writer.add_event(&event(i)).unwrap();
        }
        writer.close().unwrap();
        paths.push(path);
    }
    let a = fs::read(&paths[0]).unwrap();
    let b = fs::read(&paths[1]).unwrap();
    assert_eq!(a, b);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: file splitting
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn split_continues_in_next_file_with_fresh_numbering() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.evio");

    let mut writer = WriterMT::new(WriterOptions {
        compression: CompressionType::Lz4,
        compressor_threads: 2,
        max_event_count: 64,
        ..WriterOptions::default()
    });
    writer.open(&path).unwrap();
    for i in 0..500u32 {
        writer.add_event(&event(i)).unwrap();
    }
    writer.split_file().unwrap();
    for i in 500..1000u32 {
        writer.add_event(&event(i)).unwrap();
    }
    writer.close().unwrap();

    let split = dir.path().join("run.1.evio");
    assert!(split.exists(), "split file missing");

    let (numbers_a, events_a) = read_back(&path);
    assert_eq!(events_a.len(), 500);
    assert_eq!(numbers_a, (1..=8).collect::<Vec<u32>>());
    assert_eq!(events_a.last().unwrap(), &event(499));

    // The next file restarts at record 1, beginning with event 500.
    let (numbers_b, events_b) = read_back(&split);
    assert_eq!(numbers_b.first(), Some(&1));
    assert_eq!(events_b.len(), 500);
    assert_eq!(events_b.first().unwrap(), &event(500));
    assert_eq!(events_b.last().unwrap(), &event(999));

    let summary = writer.summary().unwrap();
    assert_eq!(summary.file_count, 2);
    assert_eq!(summary.record_count, 16);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: per-record durability barrier
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn force_to_disk_every_record() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("durable.evio");

    let mut writer = WriterMT::new(WriterOptions {
        compressor_threads: 2,
        max_event_count: 1,
        ..WriterOptions::default()
    });
    writer.force_to_disk(true);
    writer.open(&path).unwrap();
    for i in 0..25u32 {
        writer.add_event(&event(i)).unwrap();
    }
    writer.close().unwrap();

    let (numbers, events) = read_back(&path);
    assert_eq!(events.len(), 25, "every published event must be on disk");
    assert_eq!(numbers, (1..=25).collect::<Vec<u32>>());
}

// ─────────────────────────────────────────────────────────────────────────────
// Flush, trailer index, disk-full bypass
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn flush_forces_a_record_boundary() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flushed.evio");

    let mut writer = WriterMT::new(WriterOptions::default());
    writer.open(&path).unwrap();
    writer.add_event(b"first batch").unwrap();
    writer.flush().unwrap();
    writer.add_event(b"second batch").unwrap();
    writer.close().unwrap();

    let (numbers, events) = read_back(&path);
    assert_eq!(numbers, vec![1, 2]);
    assert_eq!(events, vec![b"first batch".to_vec(), b"second batch".to_vec()]);
}

#[test]
fn trailer_index_lists_every_record() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("indexed.evio");

    let mut writer = WriterMT::new(WriterOptions {
        record_type: HeaderType::HipoRecord,
        max_event_count: 3,
        ..WriterOptions::default()
    });
    writer.add_trailer_with_index(true);
    writer.open(&path).unwrap();
    for i in 0..9u32 {
        writer.add_event(&event(i)).unwrap();
    }
    writer.close().unwrap();

    let bytes = fs::read(&path).unwrap();
    let mut file_header = RecordHeader::default();
    file_header.read(&bytes, 0).unwrap();
    assert_eq!(file_header.header_type(), HeaderType::HipoFile);

    let trailer_pos = file_header.user_register_1() as usize;
    assert!(trailer_pos > 0);
    let mut trailer = RecordHeader::default();
    trailer.read(&bytes, trailer_pos).unwrap();
    assert_eq!(trailer.header_type(), HeaderType::HipoTrailer);
    assert_eq!(trailer.uncompressed_data_length(), 12);

    // The indexed lengths walk the file exactly from the first record back
    // to the trailer.
    let order = trailer.byte_order();
    let mut offset = HEADER_BYTES;
    for i in 0..3usize {
        let len = order.get_u32(&bytes, trailer_pos + HEADER_BYTES + 4 * i) as usize;
        let mut record = RecordHeader::default();
        record.read(&bytes, offset).unwrap();
        assert_eq!(record.record_length_bytes(), len);
        offset += len;
    }
    assert_eq!(offset, trailer_pos);
}

#[test]
fn disk_full_record_is_bypassed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("full.evio");

    let mut writer = WriterMT::new(WriterOptions::default());
    writer.open(&path).unwrap();
    writer.add_event(b"kept one").unwrap();
    writer.flush().unwrap();

    writer.mark_disk_full().unwrap();
    writer.add_event(b"lost to the full disk").unwrap();
    writer.flush().unwrap();

    writer.add_event(b"kept two").unwrap();
    writer.close().unwrap();

    let (numbers, events) = read_back(&path);
    assert_eq!(numbers, vec![1, 2], "bypassed record must not consume a number");
    assert_eq!(events, vec![b"kept one".to_vec(), b"kept two".to_vec()]);
    assert_eq!(writer.summary().unwrap().deferred_count, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Shutdown behavior
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn close_with_no_events_leaves_valid_empty_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.evio");

    let mut writer = WriterMT::new(WriterOptions {
        compressor_threads: 3,
        ..WriterOptions::default()
    });
    writer.open(&path).unwrap();
    writer.close().unwrap();

    let bytes = fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 2 * HEADER_BYTES);
    let (numbers, events) = read_back(&path);
    assert!(numbers.is_empty());
    assert!(events.is_empty());
}

#[test]
fn close_is_idempotent_and_summary_stable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("twice.evio");

    let mut writer = WriterMT::new(WriterOptions::default());
    writer.open(&path).unwrap();
    writer.add_event(b"payload").unwrap();
    writer.close().unwrap();
    let first = writer.summary().unwrap().clone();
    writer.close().unwrap();
    let second = writer.summary().unwrap().clone();
    assert_eq!(first.bytes_written, second.bytes_written);
    assert_eq!(first.record_count, second.record_count);
}

#[test]
fn user_header_is_replicated_in_split_files() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meta.evio");

    let mut writer = WriterMT::new(WriterOptions::default());
    writer
        .open_with_user_header(&path, b"beam energy 10.6 GeV")
        .unwrap();
    writer.add_event(b"before split").unwrap();
    writer.split_file().unwrap();
    writer.add_event(b"after split").unwrap();
    writer.close().unwrap();

    for file in [path, dir.path().join("meta.1.evio")] {
        let bytes = fs::read(&file).unwrap();
        let mut header = RecordHeader::default();
        header.read(&bytes, 0).unwrap();
        assert_eq!(header.user_header_length(), 20);
        assert_eq!(&bytes[HEADER_BYTES..HEADER_BYTES + 20], b"beam energy 10.6 GeV");
    }
}
