//! Immutable mono sample buffers
//!
//! Loaded from WAV files for offline analysis, produced by the recorder, and
//! used to cut out the spans that triggered detections.

use crate::audio::detector::DetectionEvent;
use crate::error::{DetectorError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::Path;
use std::sync::Arc;

/// Single-channel floating point samples at a fixed rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap samples recorded at `sample_rate`
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(DetectorError::InvalidConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    /// Load a WAV file, downmixing to mono and normalizing integer samples to [-1, 1]
    pub fn from_wav(path: &Path) -> Result<Self> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<f32>, hound::Error>>()?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<f32>, hound::Error>>()?
            }
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        tracing::info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels,
            samples = samples.len(),
            "Loaded WAV file"
        );

        Self::new(samples, spec.sample_rate)
    }

    /// Write the buffer as a 32-bit float mono WAV file
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(path, spec)?;
        for &sample in self.samples.iter() {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Samples in time order
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds
    pub fn duration_s(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Samples between two times, clamped to the buffer
    pub fn slice_seconds(&self, start_s: f64, end_s: f64) -> &[f32] {
        let to_index = |t: f64| ((t.max(0.0) * self.sample_rate as f64).round() as usize).min(self.len());
        let start = to_index(start_s);
        let end = to_index(end_s).max(start);
        &self.samples[start..end]
    }

    /// Concatenate the audio of every detection in event order
    ///
    /// Overlapping detections contribute their shared samples once per event.
    pub fn detected_spans(&self, events: &[DetectionEvent]) -> AudioBuffer {
        let mut combined = Vec::new();
        for event in events {
            combined.extend_from_slice(self.slice_seconds(event.start_time_s, event.end_time_s));
        }
        AudioBuffer {
            samples: combined.into(),
            sample_rate: self.sample_rate,
        }
    }
}
