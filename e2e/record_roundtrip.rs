//! E2E Test Suite 01: record build / parse / decompress round trips.
//!
//! Builds records directly through `RecordBuilder` and verifies the binary
//! layout invariants by parsing the result back:
//! - record length equals the component sum (header + index + padded user
//!   header + padded data)
//! - the index lengths recover every event boundary
//! - decompressing the data region restores the original payload bytes
//! - both byte orders survive the trip

use hipo6::codec;
use hipo6::{ByteOrder, CompressionType, RecordBuilder, RecordHeader};

const HEADER_BYTES: usize = 56;

/// Parses one record at `offset`, returning its header and event payloads.
fn parse_record(bytes: &[u8], offset: usize) -> (RecordHeader, Vec<Vec<u8>>) {
    let mut header = RecordHeader::default();
    header.read(bytes, offset).expect("record header parses");
    let order = header.byte_order();

    let index_off = offset + HEADER_BYTES;
    let lengths: Vec<usize> = (0..header.event_count() as usize)
        .map(|i| order.get_u32(bytes, index_off + 4 * i) as usize)
        .collect();

    let data_off =
        index_off + header.index_length() as usize + header.user_header_region_bytes();
    let data = if header.compression_type().is_none() {
        bytes[data_off..data_off + header.uncompressed_data_length() as usize].to_vec()
    } else {
        let compressed = &bytes[data_off..data_off + header.compressed_data_bytes()];
        let mut restored = vec![0u8; header.uncompressed_data_length() as usize];
        let n = codec::decompress(header.compression_type(), compressed, &mut restored)
            .expect("data region decompresses");
        assert_eq!(n, restored.len());
        restored
    };

    // The index must account for every data byte.
    assert_eq!(lengths.iter().sum::<usize>(), data.len());

    let mut events = Vec::new();
    let mut pos = 0;
    for len in lengths {
        events.push(data[pos..pos + len].to_vec());
        pos += len;
    }
    (header, events)
}

fn sample_events() -> Vec<Vec<u8>> {
    vec![
        b"alpha".to_vec(),
        Vec::new(),
        b"a longer event payload with some repetition repetition repetition".to_vec(),
        vec![0xEE; 1021],
        (0u16..700).flat_map(u16::to_le_bytes).collect(),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Uncompressed layout
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn uncompressed_round_trip_both_orders() {
    for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
        let mut builder = RecordBuilder::new(order);
        let events = sample_events();
        for event in &events {
            assert!(builder.add_event(event));
        }
        builder.build().expect("build");

        let bytes = builder.as_bytes();
        let (header, parsed) = parse_record(bytes, 0);
        assert_eq!(header.byte_order(), order);
        assert_eq!(header.record_length_bytes(), bytes.len());
        assert_eq!(parsed, events);
    }
}

#[test]
fn record_length_equals_component_sum() {
    let mut builder = RecordBuilder::new(ByteOrder::LittleEndian);
    for event in sample_events() {
        assert!(builder.add_event(&event));
    }
    builder.set_user_header(b"user header bytes");
    builder.build().expect("build");

    let (header, _) = parse_record(builder.as_bytes(), 0);
    let component_sum = HEADER_BYTES
        + header.index_length() as usize
        + header.user_header_region_bytes()
        + header.data_region_bytes();
    assert_eq!(header.record_length_bytes(), component_sum);
    assert_eq!(builder.as_bytes().len(), component_sum);
    assert_eq!(header.user_header_length(), 17);
    assert_eq!(header.user_header_padding(), 3);
}

// ─────────────────────────────────────────────────────────────────────────────
// Compressed round trips
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn compressed_round_trip_all_codecs_both_orders() {
    for kind in [
        CompressionType::Lz4,
        CompressionType::Lz4Best,
        CompressionType::Gzip,
    ] {
        for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            let mut builder = RecordBuilder::new(order);
            builder.set_compression_type(kind);
            let events = sample_events();
            for event in &events {
                assert!(builder.add_event(event));
            }
            builder.build().expect("build");

            let (header, parsed) = parse_record(builder.as_bytes(), 0);
            assert_eq!(header.compression_type(), kind, "{kind:?}/{order:?}");
            assert!(header.compressed_data_words() > 0);
            assert_eq!(parsed, events, "{kind:?}/{order:?}");
        }
    }
}

#[test]
fn compressed_region_is_word_aligned_with_pad_nibble() {
    let mut builder = RecordBuilder::new(ByteOrder::LittleEndian);
    builder.set_compression_type(CompressionType::Lz4);
    assert!(builder.add_event(&b"squeeze me ".repeat(64)));
    builder.build().expect("build");

    let (header, _) = parse_record(builder.as_bytes(), 0);
    let words = header.compressed_data_words() as usize;
    let exact = header.compressed_data_bytes();
    assert!(header.data_padding() <= 3);
    assert_eq!(words * 4 - header.data_padding() as usize, exact);
    assert_eq!(header.data_region_bytes(), words * 4);
}

// ─────────────────────────────────────────────────────────────────────────────
// Edge shapes
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn empty_record_is_valid() {
    let mut builder = RecordBuilder::new(ByteOrder::LittleEndian);
    builder.build().expect("build");

    let (header, events) = parse_record(builder.as_bytes(), 0);
    assert_eq!(header.event_count(), 0);
    assert_eq!(header.record_length_bytes(), HEADER_BYTES);
    assert!(events.is_empty());
}

#[test]
fn single_zero_length_event() {
    let mut builder = RecordBuilder::new(ByteOrder::LittleEndian);
    assert!(builder.add_event(&[]));
    builder.build().expect("build");

    let (header, events) = parse_record(builder.as_bytes(), 0);
    assert_eq!(header.event_count(), 1);
    assert_eq!(events, vec![Vec::<u8>::new()]);
}

#[test]
fn rebuilt_after_reset_matches_fresh_builder() {
    let mut recycled = RecordBuilder::new(ByteOrder::LittleEndian);
    assert!(recycled.add_event(b"first use, thrown away"));
    recycled.build().expect("build");
    recycled.reset();
    assert!(recycled.add_event(b"second use"));
    recycled.build().expect("rebuild");

    let mut fresh = RecordBuilder::new(ByteOrder::LittleEndian);
    assert!(fresh.add_event(b"second use"));
    fresh.build().expect("build");

    assert_eq!(recycled.as_bytes(), fresh.as_bytes());
}

#[test]
fn record_level_user_header_round_trips() {
    let mut builder = RecordBuilder::new(ByteOrder::LittleEndian);
    builder.set_user_header(b"detector configuration blob");
    builder.set_compression_type(CompressionType::Gzip);
    assert!(builder.add_event(&b"hit bank ".repeat(100)));
    builder.build().expect("build");

    let bytes = builder.as_bytes();
    let (header, events) = parse_record(bytes, 0);
    assert_eq!(header.user_header_length() as usize, 27);
    let user_off = HEADER_BYTES + header.index_length() as usize;
    assert_eq!(&bytes[user_off..user_off + 27], b"detector configuration blob");
    assert_eq!(events.len(), 1);
}
