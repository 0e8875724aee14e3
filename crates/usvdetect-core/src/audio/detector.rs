//! RMS threshold detection and the file-mode pipeline
//!
//! Every window whose band-limited RMS exceeds the threshold becomes its own
//! [`DetectionEvent`]. Adjacent or overlapping triggering windows are not
//! merged, so with overlap enabled a single call usually yields several
//! events with overlapping time ranges.

use crate::audio::buffer::AudioBuffer;
use crate::audio::segmenter::WindowSpec;
use crate::audio::spectral::{BandAnalysis, FrequencyBand, SpectralAnalyzer};
use crate::config::DetectorConfig;
use crate::error::{DetectorError, Result};
use crate::sink::ResultSink;

/// One window whose ultrasonic energy exceeded the threshold
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    /// Window start in seconds from the beginning of the buffer
    pub start_time_s: f64,
    /// Window end in seconds (exclusive)
    pub end_time_s: f64,
    /// Band-limited RMS of the window
    pub rms: f64,
    /// Frequency of the strongest bin over the full spectrum
    pub peak_freq_hz: f64,
    /// Bins that counted as ultrasonic for this window
    pub band: FrequencyBand,
}

impl DetectionEvent {
    /// Event length in seconds
    pub fn duration_s(&self) -> f64 {
        self.end_time_s - self.start_time_s
    }

    /// Whether the event shares any time with `[start_s, end_s]`
    pub fn overlaps(&self, start_s: f64, end_s: f64) -> bool {
        self.start_time_s <= end_s && start_s <= self.end_time_s
    }
}

/// Stateless per-window classifier
///
/// # Example
/// ```
/// use usvdetect_core::audio::detector::ThresholdDetector;
///
/// let detector = ThresholdDetector::new(0.2).unwrap();
/// assert!(detector.is_event(0.3));
/// assert!(!detector.is_event(0.2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdDetector {
    threshold_rms: f64,
}

impl ThresholdDetector {
    /// Create a detector; the threshold must be positive and finite
    pub fn new(threshold_rms: f64) -> Result<Self> {
        if !threshold_rms.is_finite() || threshold_rms <= 0.0 {
            return Err(DetectorError::InvalidConfig(format!(
                "threshold must be positive, got {}",
                threshold_rms
            )));
        }
        Ok(Self { threshold_rms })
    }

    /// Strictly-greater comparison against the threshold
    pub fn is_event(&self, rms_band: f64) -> bool {
        rms_band > self.threshold_rms
    }

    /// Build the event for a window starting at `start_index`, if it triggers
    pub fn classify_window(
        &self,
        analysis: &BandAnalysis,
        band: FrequencyBand,
        start_index: usize,
        length_samples: usize,
        sample_rate: u32,
    ) -> Option<DetectionEvent> {
        if !self.is_event(analysis.rms_band) {
            return None;
        }
        let fs = sample_rate as f64;
        Some(DetectionEvent {
            start_time_s: start_index as f64 / fs,
            end_time_s: (start_index + length_samples) as f64 / fs,
            rms: analysis.rms_band,
            peak_freq_hz: analysis.peak_freq_hz,
            band,
        })
    }

    /// Get the configured threshold
    pub fn threshold(&self) -> f64 {
        self.threshold_rms
    }
}

/// Run file-mode detection over a complete buffer
///
/// Reports progress to `sink` before each window and once more at 100% when
/// done, then hands the ordered event list to `sink` and returns it. A
/// failure in any window aborts the run and no partial list is delivered.
pub fn analyze_buffer(
    buffer: &AudioBuffer,
    config: &DetectorConfig,
    sink: &mut dyn ResultSink,
) -> Result<Vec<DetectionEvent>> {
    config.validate()?;
    let sample_rate = buffer.sample_rate();
    let spec = WindowSpec::from_config(sample_rate, config)?;
    let detector = ThresholdDetector::new(config.threshold_rms)?;

    let total_windows = spec.window_count(buffer.len());
    if total_windows == 0 {
        tracing::info!(
            samples = buffer.len(),
            window = spec.length_samples(),
            "Buffer shorter than one window, nothing to analyze"
        );
        sink.on_progress(100.0);
        sink.on_events(&[]);
        return Ok(Vec::new());
    }

    let mut analyzer =
        SpectralAnalyzer::new(sample_rate, spec.length_samples(), spec.min_freq_hz())?;
    let band = analyzer.band();
    tracing::info!(
        sample_rate,
        window = spec.length_samples(),
        hop = spec.hop_samples(),
        windows = total_windows,
        band_bins = band.len(),
        "Analyzing buffer"
    );
    if band.is_empty() {
        tracing::warn!(
            min_freq_hz = spec.min_freq_hz(),
            nyquist_hz = sample_rate as f64 / 2.0,
            "Cutoff above Nyquist, no window can trigger"
        );
    }

    let mut events = Vec::new();
    for window in spec.windows(buffer.samples()) {
        sink.on_progress(spec.progress_pct(window.index, total_windows));

        let analysis = analyzer.analyze(window.samples).map_err(|e| {
            tracing::error!(window = window.index, start = window.start, error = %e, "Window analysis failed");
            e
        })?;

        if let Some(event) = detector.classify_window(
            &analysis,
            band,
            window.start,
            spec.length_samples(),
            sample_rate,
        ) {
            events.push(event);
        }
    }

    sink.on_progress(100.0);
    tracing::info!(detections = events.len(), "Analysis complete");
    sink.on_events(&events);
    Ok(events)
}
