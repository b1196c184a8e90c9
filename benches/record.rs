//! Criterion benchmarks for record building under each payload codec.
//!
//! Run with:
//!   cargo bench --bench record

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use hipo6::{ByteOrder, CompressionType, RecordBuilder};

/// Synthetic event mix: mildly compressible detector-like payloads.
fn events(event_size: usize, count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| {
            let mut payload = vec![(i % 17) as u8; event_size];
            for (j, byte) in payload.iter_mut().enumerate().step_by(7) {
                *byte = ((i * 31 + j) % 251) as u8;
            }
            payload
        })
        .collect()
}

fn bench_record_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_build");

    for &event_size in &[512usize, 4096] {
        let batch = events(event_size, 256);
        let total: usize = batch.iter().map(Vec::len).sum();

        for kind in [
            CompressionType::None,
            CompressionType::Lz4,
            CompressionType::Lz4Best,
            CompressionType::Gzip,
        ] {
            group.throughput(Throughput::Bytes(total as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{kind:?}"), event_size),
                &batch,
                |b, batch| {
                    let mut builder = RecordBuilder::new(ByteOrder::LittleEndian);
                    builder.set_compression_type(kind);
                    b.iter(|| {
                        builder.reset();
                        for event in batch {
                            assert!(builder.add_event(event));
                        }
                        builder.build().unwrap();
                        builder.as_bytes().len()
                    })
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_record_build);
criterion_main!(benches);
