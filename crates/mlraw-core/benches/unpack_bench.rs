//! Benchmarks for sample unpacking.
//!
//! Run with: cargo bench -p mlraw-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mlraw_core::bitunpack::{expand_to_float, pack16to14, unpack14to16};

fn full_hd_samples() -> Vec<u16> {
    (0..1920 * 1080).map(|i| (i % 16384) as u16).collect()
}

fn bench_unpack_native(c: &mut Criterion) {
    let packed = pack16to14(&full_hd_samples(), false).unwrap();

    c.bench_function("unpack14to16_1080p_native", |bencher| {
        bencher.iter(|| unpack14to16(black_box(&packed), false).unwrap());
    });
}

fn bench_unpack_big_endian(c: &mut Criterion) {
    let packed = pack16to14(&full_hd_samples(), true).unwrap();

    c.bench_function("unpack14to16_1080p_big_endian", |bencher| {
        bencher.iter(|| unpack14to16(black_box(&packed), true).unwrap());
    });
}

fn bench_expand_to_float(c: &mut Criterion) {
    let samples = full_hd_samples();

    c.bench_function("expand_to_float_1080p", |bencher| {
        bencher.iter(|| expand_to_float(black_box(&samples), 2048, 15000));
    });
}

criterion_group!(
    benches,
    bench_unpack_native,
    bench_unpack_big_endian,
    bench_expand_to_float,
);
criterion_main!(benches);
