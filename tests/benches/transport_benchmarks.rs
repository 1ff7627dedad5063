//! # XTables Transport Benchmarks
//!
//! | Path | Target |
//! |------|--------|
//! | Ring buffer write + read | < 1µs per item, uncontended |
//! | Compression of a 4 KiB table snapshot | < 1ms at the default level |
//! | Request round trip on scripted channels | bounded by the correlator, not the wire |

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use xt_transport::testing::{ManualClock, ScriptedChannelManager};
use xt_transport::{
    AdaptiveCompressor, CompressionConfig, RingBuffer, TransportApi, TransportConfig,
    XTablesTransport,
};

// ============================================================================
// RING BUFFER
// ============================================================================

fn bench_ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring-buffer");

    for capacity in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(capacity as u64));
        group.bench_with_input(
            BenchmarkId::new("fill_then_drain", capacity),
            &capacity,
            |b, &capacity| {
                let buffer = RingBuffer::new(capacity);
                b.iter(|| {
                    for i in 0..capacity {
                        black_box(buffer.write(i));
                    }
                    while let Some(item) = buffer.try_read() {
                        black_box(item);
                    }
                })
            },
        );
    }

    // Writes past capacity evict the oldest item every time.
    group.bench_function("overwrite_full", |b| {
        let buffer = RingBuffer::new(64);
        for i in 0..64u64 {
            buffer.write(i);
        }
        let mut next = 64u64;
        b.iter(|| {
            next += 1;
            black_box(buffer.write(next))
        })
    });

    group.finish();
}

// ============================================================================
// COMPRESSION
// ============================================================================

fn table_snapshot(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(len + 64);
    out.push('{');
    while out.len() < len {
        let key = rng.gen_range(0..64);
        let value: f64 = rng.gen_range(-1.0..1.0);
        out.push_str(&format!("\"drivetrain.module{key}.speed\":{value:.4},"));
    }
    out.push('}');
    out.into_bytes()
}

fn fixed_level(level: i32) -> AdaptiveCompressor {
    let config = CompressionConfig {
        initial_level: level,
        min_level: level,
        max_level: level,
        ..Default::default()
    };
    AdaptiveCompressor::new(&config, Arc::new(ManualClock::new()))
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    group.measurement_time(Duration::from_secs(5));

    let snapshot = table_snapshot(4 * 1024);
    group.throughput(Throughput::Bytes(snapshot.len() as u64));

    for level in [1, 3, 9] {
        let compressor = fixed_level(level);
        group.bench_with_input(BenchmarkId::new("compress", level), &snapshot, |b, data| {
            b.iter(|| black_box(compressor.compress(data)))
        });

        let compressed = compressor.compress(&snapshot).unwrap_or_default();
        group.bench_with_input(
            BenchmarkId::new("decompress", level),
            &compressed,
            |b, data| b.iter(|| black_box(compressor.decompress(data))),
        );
    }

    let compressor = fixed_level(3);
    group.bench_function("compress_to_base64", |b| {
        b.iter(|| black_box(compressor.compress_to_base64(&snapshot)))
    });

    group.finish();
}

// ============================================================================
// REQUEST PATH
// ============================================================================

fn bench_request_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("request-path");

    let transport = XTablesTransport::start(
        TransportConfig::default(),
        Arc::new(ScriptedChannelManager::new()),
        Arc::new(ManualClock::new()),
    );
    let Ok(transport) = transport else {
        return;
    };
    let payload = Bytes::from_static(b"GET drivetrain.module0.speed");

    group.bench_function("submit_wait_echo", |b| {
        b.iter(|| black_box(transport.submit(payload.to_vec()).wait()))
    });

    for batch in [10usize, 100] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(
            BenchmarkId::new("pipelined_submit", batch),
            &batch,
            |b, &batch| {
                b.iter(|| {
                    let futures: Vec<_> = (0..batch)
                        .map(|_| transport.submit(payload.to_vec()))
                        .collect();
                    for future in futures {
                        black_box(future.wait()).ok();
                    }
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ring_buffer,
    bench_compression,
    bench_request_round_trip
);
criterion_main!(benches);
