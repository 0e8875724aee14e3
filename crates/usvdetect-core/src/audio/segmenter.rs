//! Window layout for spectral analysis
//!
//! File mode walks a complete buffer with fixed-length windows spaced by a
//! hop derived from the overlap percentage. A tail shorter than one window
//! is never analyzed. Live mode uses one window per delivered block, which
//! is the same layout with `hop == length`.

use crate::config::DetectorConfig;
use crate::error::{DetectorError, Result};

/// Window length, hop, and band cutoff for one run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSpec {
    length_samples: usize,
    hop_samples: usize,
    min_freq_hz: f64,
}

impl WindowSpec {
    /// Create a window layout from explicit sample counts
    ///
    /// Requires `0 < hop_samples <= length_samples`.
    pub fn new(length_samples: usize, hop_samples: usize, min_freq_hz: f64) -> Result<Self> {
        if length_samples == 0 {
            return Err(DetectorError::InvalidConfig(
                "window must span at least one sample".to_string(),
            ));
        }
        if hop_samples == 0 || hop_samples > length_samples {
            return Err(DetectorError::InvalidConfig(format!(
                "hop of {} samples is outside 1..={}",
                hop_samples, length_samples
            )));
        }
        if !min_freq_hz.is_finite() || min_freq_hz < 0.0 {
            return Err(DetectorError::InvalidConfig(format!(
                "min frequency must be >= 0, got {}",
                min_freq_hz
            )));
        }
        Ok(Self {
            length_samples,
            hop_samples,
            min_freq_hz,
        })
    }

    /// Derive the layout from a window duration and an overlap percentage
    ///
    /// `length = round(fs * window_ms / 1000)`,
    /// `hop = round(length * (1 - overlap_pct / 100))`.
    pub fn from_duration(
        sample_rate: u32,
        window_ms: f64,
        overlap_pct: f64,
        min_freq_hz: f64,
    ) -> Result<Self> {
        if !(0.0..100.0).contains(&overlap_pct) {
            return Err(DetectorError::InvalidConfig(format!(
                "overlap must be in [0, 100), got {}",
                overlap_pct
            )));
        }
        let length = (sample_rate as f64 * window_ms / 1000.0).round();
        if !length.is_finite() || length < 1.0 {
            return Err(DetectorError::InvalidConfig(format!(
                "{} ms at {} Hz is shorter than one sample",
                window_ms, sample_rate
            )));
        }
        let length = length as usize;
        let hop = (length as f64 * (1.0 - overlap_pct / 100.0)).round() as usize;
        Self::new(length, hop, min_freq_hz)
    }

    /// File-mode layout for a buffer recorded at `sample_rate`
    pub fn from_config(sample_rate: u32, config: &DetectorConfig) -> Result<Self> {
        Self::from_duration(
            sample_rate,
            config.window_ms,
            config.hop_overlap_pct,
            config.min_freq_hz,
        )
    }

    /// Live-mode layout: every delivered block is one window
    pub fn per_block(block_size: usize, min_freq_hz: f64) -> Result<Self> {
        Self::new(block_size, block_size, min_freq_hz)
    }

    /// Samples per window
    pub fn length_samples(&self) -> usize {
        self.length_samples
    }

    /// Samples between consecutive window starts
    pub fn hop_samples(&self) -> usize {
        self.hop_samples
    }

    /// Lower edge of the ultrasonic band
    pub fn min_freq_hz(&self) -> f64 {
        self.min_freq_hz
    }

    /// Number of full windows in a buffer of `total_len` samples
    pub fn window_count(&self, total_len: usize) -> usize {
        if total_len < self.length_samples {
            0
        } else {
            (total_len - self.length_samples) / self.hop_samples + 1
        }
    }

    /// Percentage of the run completed before window `index`, clamped to [0, 100]
    pub fn progress_pct(&self, index: usize, total_windows: usize) -> f64 {
        if total_windows == 0 {
            return 100.0;
        }
        (index as f64 / total_windows as f64 * 100.0).clamp(0.0, 100.0)
    }

    /// Iterate the full windows of `samples` in time order
    pub fn windows<'a>(&self, samples: &'a [f32]) -> Windows<'a> {
        Windows {
            samples,
            length: self.length_samples,
            hop: self.hop_samples,
            next_start: 0,
            index: 0,
        }
    }
}

/// One analysis window borrowed from a buffer
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    /// Position of this window in the sequence (0-based)
    pub index: usize,
    /// Index of the first sample in the source buffer
    pub start: usize,
    /// The window's samples
    pub samples: &'a [f32],
}

/// Lazy, finite sequence of windows over a buffer
#[derive(Debug)]
pub struct Windows<'a> {
    samples: &'a [f32],
    length: usize,
    hop: usize,
    next_start: usize,
    index: usize,
}

impl<'a> Iterator for Windows<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.next_start.checked_add(self.length)?;
        if end > self.samples.len() {
            return None;
        }
        let window = Window {
            index: self.index,
            start: self.next_start,
            samples: &self.samples[self.next_start..end],
        };
        self.next_start += self.hop;
        self.index += 1;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.samples.len().checked_sub(self.next_start) {
            Some(left) if left >= self.length => (left - self.length) / self.hop + 1,
            _ => 0,
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows<'_> {}
