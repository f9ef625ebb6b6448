//! Criterion benchmarks for Spriteforge critical paths
//!
//! Benchmarks the per-pixel and per-frame operations every export runs:
//! - Spritesheet: compose and extract
//! - Chroma: key-color removal
//! - Alpha: threshold clamping
//! - Normalize: canvas normalization with shared bounds

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image::{Rgba, RgbaImage};
use spriteforge::alpha::clamped;
use spriteforge::chroma::ChromaKey;
use spriteforge::normalize::{normalize_batch, NormalizeSettings};
use spriteforge::spritesheet::{compose, default_columns, extract, ExtractOptions, SpritesheetLayout};

// =============================================================================
// Test Data Generators
// =============================================================================

/// A magenta-keyed frame with an opaque body and a soft outline.
fn make_frame(size: u32, index: usize) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(size, size, Rgba([255, 0, 255, 255]));
    let shade = (index * 13 % 200) as u8;
    for y in size / 4..size {
        for x in size / 3..size * 2 / 3 {
            img.put_pixel(x, y, Rgba([shade, 90, 140, 255]));
        }
        img.put_pixel(size / 3 - 1, y, Rgba([shade, 90, 140, 40]));
    }
    img
}

fn make_frames(count: usize, size: u32) -> Vec<RgbaImage> {
    (0..count).map(|i| make_frame(size, i)).collect()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_spritesheet(c: &mut Criterion) {
    let mut group = c.benchmark_group("spritesheet");
    for &count in &[8usize, 32, 96] {
        let frames = make_frames(count, 64);
        let layout = SpritesheetLayout::for_frames(64, 64, default_columns(count), count);
        let sheet = compose(&frames, &layout).unwrap();
        let options = ExtractOptions::sized(64, 64).with_count(count);

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("compose", count), &frames, |b, frames| {
            b.iter(|| compose(black_box(frames), black_box(&layout)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("extract", count), &sheet, |b, sheet| {
            b.iter(|| extract(black_box(sheet), black_box(&options)).unwrap())
        });
    }
    group.finish();
}

fn bench_keying(c: &mut Criterion) {
    let mut group = c.benchmark_group("keying");
    let key = ChromaKey::default();
    for &size in &[64u32, 256, 1024] {
        let frame = make_frame(size, 1);
        group.throughput(Throughput::Elements((size * size) as u64));
        group.bench_with_input(BenchmarkId::new("chroma", size), &frame, |b, frame| {
            b.iter(|| key.keyed(black_box(frame)))
        });

        let keyed = key.keyed(&frame);
        group.bench_with_input(BenchmarkId::new("clamp", size), &keyed, |b, frame| {
            b.iter(|| clamped(black_box(frame), 16))
        });
    }
    group.finish();
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    group.sample_size(20);
    let settings = NormalizeSettings::default();
    for &count in &[4usize, 16] {
        let frames: Vec<RgbaImage> =
            make_frames(count, 96).iter().map(|f| ChromaKey::default().keyed(f)).collect();
        group.bench_with_input(BenchmarkId::new("batch", count), &frames, |b, frames| {
            b.iter(|| normalize_batch(black_box(frames), black_box(&settings)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_spritesheet, bench_keying, bench_normalize);
criterion_main!(benches);
