//! Hex codec and statistics recorder benchmarks.

use criterion::{criterion_group, criterion_main, Criterion};
use plc_runtime::debug::{format_hex, parse_hex};
use plc_runtime::stats::ScanStats;
use std::hint::black_box;

fn bench_hex_codec(c: &mut Criterion) {
    let bytes: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    let text = format_hex(&bytes);

    c.bench_function("hex_format_1k", |b| {
        b.iter(|| format_hex(black_box(&bytes)))
    });
    c.bench_function("hex_parse_1k", |b| b.iter(|| parse_hex(black_box(&text))));
}

fn bench_stats_record(c: &mut Criterion) {
    c.bench_function("stats_record_cycle", |b| {
        let stats = ScanStats::new();
        stats.seed_cycle();
        b.iter(|| {
            stats.record_cycle(black_box(1_000_000), black_box(5_000));
            stats.record_scan(black_box(400_000), false);
        })
    });
}

criterion_group!(benches, bench_hex_codec, bench_stats_record);
criterion_main!(benches);
