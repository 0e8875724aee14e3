//! Spectral analysis cost against the live real-time budget
//!
//! One live block at the default settings (16384 samples at 192kHz) must be
//! analyzed in well under its ~85ms capture time.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use usvdetect::audio::spectral::SpectralAnalyzer;
use usvdetect::{AudioBuffer, DetectorConfig, DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE};

fn chirp(len: usize, sample_rate: u32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f64 / sample_rate as f64;
            let freq = 35_000.0 + 20_000.0 * t;
            (0.3 * (2.0 * std::f64::consts::PI * freq * t).sin()) as f32
        })
        .collect()
}

fn bench_live_block(c: &mut Criterion) {
    let mut analyzer =
        SpectralAnalyzer::new(DEFAULT_SAMPLE_RATE, DEFAULT_BLOCK_SIZE, 30_000.0).unwrap();
    let block = chirp(DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE);

    c.bench_function("analyze_live_block_16384", |b| {
        b.iter(|| analyzer.analyze(black_box(&block)).unwrap())
    });
}

fn bench_file_second(c: &mut Criterion) {
    let config = DetectorConfig::default();
    let buffer = AudioBuffer::new(chirp(192_000, 192_000), 192_000).unwrap();

    c.bench_function("analyze_buffer_1s_192k", |b| {
        b.iter(|| {
            usvdetect::analyze_buffer(
                black_box(&buffer),
                &config,
                &mut usvdetect::sink::NoopSink,
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, bench_live_block, bench_file_second);
criterion_main!(benches);
