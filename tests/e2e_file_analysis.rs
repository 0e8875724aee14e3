//! E2E tests for offline analysis of complete buffers
//!
//! Covers window layout, band energy edge cases, threshold behavior, and
//! the tone-in-silence scenarios.

use approx::assert_abs_diff_eq;
use usvdetect::audio::segmenter::WindowSpec;
use usvdetect::audio::spectral::SpectralAnalyzer;
use usvdetect::sink::{NoopSink, ResultSink};
use usvdetect::{analyze_buffer, AudioBuffer, DetectionEvent, DetectorConfig, DetectorError};

fn scenario_config() -> DetectorConfig {
    DetectorConfig {
        min_freq_hz: 20_000.0,
        threshold_rms: 0.01,
        window_ms: 100.0,
        hop_overlap_pct: 50.0,
        ..Default::default()
    }
}

/// One second of silence with a unit-amplitude tone from 0.3s to 0.4s
fn tone_in_silence(sample_rate: u32, freq: f64) -> AudioBuffer {
    let fs = sample_rate as f64;
    let start = (0.3 * fs).round() as usize;
    let end = (0.4 * fs).round() as usize;
    let samples = (0..sample_rate as usize)
        .map(|i| {
            if (start..end).contains(&i) {
                (2.0 * std::f64::consts::PI * freq * i as f64 / fs).sin() as f32
            } else {
                0.0
            }
        })
        .collect();
    AudioBuffer::new(samples, sample_rate).unwrap()
}

/// Deterministic white noise in [-amplitude, amplitude]
fn noise(len: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
            (unit * 2.0 - 1.0) * amplitude
        })
        .collect()
}

#[test]
fn test_silence_yields_no_events() {
    let buffer = AudioBuffer::new(vec![0.0; 48_000], 48_000).unwrap();
    let events = analyze_buffer(&buffer, &scenario_config(), &mut NoopSink).unwrap();
    assert!(events.is_empty());
}

#[test]
fn test_injected_tone_is_detected_with_peak_frequency() {
    let buffer = tone_in_silence(96_000, 25_000.0);
    let config = scenario_config();
    let events = analyze_buffer(&buffer, &config, &mut NoopSink).unwrap();

    let bin_width = 96_000.0 / (96_000.0 * config.window_ms / 1000.0);
    let matching: Vec<&DetectionEvent> = events
        .iter()
        .filter(|e| e.overlaps(0.3, 0.4))
        .filter(|e| (e.peak_freq_hz - 25_000.0).abs() <= bin_width)
        .collect();
    assert!(!matching.is_empty(), "no matching event in {:?}", events);

    // Nothing outside the burst triggers
    for event in &events {
        assert!(event.overlaps(0.3, 0.4), "stray event {:?}", event);
    }
}

#[test]
fn test_tone_above_nyquist_folds_back() {
    // At 48kHz a 25kHz tone is indistinguishable from 23kHz
    let buffer = tone_in_silence(48_000, 25_000.0);
    let events = analyze_buffer(&buffer, &scenario_config(), &mut NoopSink).unwrap();

    assert!(!events.is_empty());
    let strongest = events
        .iter()
        .max_by(|a, b| a.rms.total_cmp(&b.rms))
        .unwrap();
    assert!(strongest.overlaps(0.3, 0.4));
    assert_abs_diff_eq!(strongest.peak_freq_hz, 23_000.0, epsilon = 10.0);
}

#[test]
fn test_cutoff_above_nyquist_gives_exact_zero() {
    let mut analyzer = SpectralAnalyzer::new(48_000, 4_800, 30_000.0).unwrap();
    let window = noise(4_800, 1.0, 7);
    let result = analyzer.analyze(&window).unwrap();
    assert_eq!(result.rms_band, 0.0);
    assert!(analyzer.band().is_empty());
}

#[test]
fn test_pure_sine_resolves_to_nearest_bin() {
    let fs = 48_000u32;
    let n = 1_000usize;
    let mut analyzer = SpectralAnalyzer::new(fs, n, 0.0).unwrap();
    // Bin width 48Hz; none of these sit on a bin centre
    for &freq in &[1_000.0, 10_090.0, 21_110.0] {
        let window: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * freq * i as f64 / fs as f64).sin() as f32)
            .collect();
        let result = analyzer.analyze(&window).unwrap();
        let nearest_bin = (freq * n as f64 / fs as f64).round();
        assert_abs_diff_eq!(result.peak_freq_hz, nearest_bin * 48.0, epsilon = 1e-6);
    }
}

#[test]
fn test_window_count_formula() {
    let cases = [
        (48_000usize, 4_800usize, 2_400usize),
        (48_000, 4_800, 4_800),
        (4_799, 4_800, 2_400),
        (4_800, 4_800, 2_400),
        (10_001, 1_000, 333),
        (0, 10, 5),
    ];
    for &(len, window, hop) in &cases {
        let spec = WindowSpec::new(window, hop, 20_000.0).unwrap();
        let expected = if len >= window {
            (len - window) / hop + 1
        } else {
            0
        };
        let samples = vec![0.0f32; len];
        assert_eq!(spec.window_count(len), expected, "len={} window={} hop={}", len, window, hop);
        assert_eq!(spec.windows(&samples).count(), expected);
    }
}

#[test]
fn test_scenario_window_layout() {
    let spec = WindowSpec::from_config(48_000, &scenario_config()).unwrap();
    assert_eq!(spec.length_samples(), 4_800);
    assert_eq!(spec.hop_samples(), 2_400);
    assert_eq!(spec.window_count(48_000), 19);
}

#[test]
fn test_detection_is_monotonic_in_threshold() {
    let fs = 96_000u32;
    let mut samples = noise(fs as usize, 0.05, 42);
    for (i, s) in samples.iter_mut().enumerate() {
        // Tone whose amplitude ramps over the buffer
        let amplitude = i as f64 / fs as f64;
        *s += (amplitude * (2.0 * std::f64::consts::PI * 40_000.0 * i as f64 / fs as f64).sin()) as f32;
    }
    let buffer = AudioBuffer::new(samples, fs).unwrap();

    let mut previous = usize::MAX;
    for &threshold in &[0.5, 5.0, 20.0, 50.0, 100.0, 200.0, 1_000.0] {
        let config = DetectorConfig {
            threshold_rms: threshold,
            ..scenario_config()
        };
        let count = analyze_buffer(&buffer, &config, &mut NoopSink).unwrap().len();
        assert!(
            count <= previous,
            "threshold {} gave {} events after {}",
            threshold,
            count,
            previous
        );
        previous = count;
    }
}

#[test]
fn test_analysis_is_idempotent() {
    let mut samples = noise(96_000, 0.2, 3);
    for (i, s) in samples.iter_mut().enumerate().skip(40_000).take(9_600) {
        *s += (2.0 * std::f64::consts::PI * 35_000.0 * i as f64 / 96_000.0).sin() as f32;
    }
    let buffer = AudioBuffer::new(samples, 96_000).unwrap();
    let config = scenario_config();

    let first = analyze_buffer(&buffer, &config, &mut NoopSink).unwrap();
    let second = analyze_buffer(&buffer, &config, &mut NoopSink).unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_events_are_time_ordered_and_unmerged() {
    let buffer = tone_in_silence(96_000, 30_000.0);
    let events = analyze_buffer(&buffer, &scenario_config(), &mut NoopSink).unwrap();

    assert!(events.len() >= 2);
    for pair in events.windows(2) {
        assert!(pair[0].start_time_s < pair[1].start_time_s);
        assert_abs_diff_eq!(pair[1].start_time_s - pair[0].start_time_s, 0.05, epsilon = 1e-9);
    }
    for event in &events {
        assert_abs_diff_eq!(event.duration_s(), 0.1, epsilon = 1e-9);
    }
}

#[derive(Default)]
struct Recorded {
    progress: Vec<f64>,
    events: Option<usize>,
}

impl ResultSink for Recorded {
    fn on_progress(&mut self, pct: f64) {
        self.progress.push(pct);
    }

    fn on_events(&mut self, events: &[DetectionEvent]) {
        self.events = Some(events.len());
    }
}

#[test]
fn test_progress_reaches_100_after_every_window() {
    let buffer = tone_in_silence(48_000, 10_000.0);
    let mut sink = Recorded::default();
    let events = analyze_buffer(&buffer, &scenario_config(), &mut sink).unwrap();

    // One report per window plus the final 100
    assert_eq!(sink.progress.len(), 19 + 1);
    assert_eq!(sink.progress[0], 0.0);
    assert!(sink.progress.windows(2).all(|p| p[0] <= p[1]));
    assert_eq!(*sink.progress.last().unwrap(), 100.0);
    assert_eq!(sink.events, Some(events.len()));
}

#[test]
fn test_buffer_shorter_than_window() {
    let buffer = AudioBuffer::new(vec![0.5; 100], 48_000).unwrap();
    let mut sink = Recorded::default();
    let events = analyze_buffer(&buffer, &scenario_config(), &mut sink).unwrap();
    assert!(events.is_empty());
    assert_eq!(sink.progress, vec![100.0]);
}

#[test]
fn test_non_finite_sample_aborts_without_results() {
    let mut samples = vec![0.0f32; 48_000];
    samples[30_000] = f32::INFINITY;
    let buffer = AudioBuffer::new(samples, 48_000).unwrap();
    let mut sink = Recorded::default();

    let result = analyze_buffer(&buffer, &scenario_config(), &mut sink);
    assert!(matches!(result, Err(DetectorError::AnalysisFailure(_))));
    assert_eq!(sink.events, None);
}
