//! Band-limited spectral energy for ultrasonic detection
//!
//! Computes, for one fixed-length window, the RMS of the spectral magnitudes
//! at or above a cutoff frequency together with the frequency of the
//! strongest bin over the whole spectrum.
//!
//! Magnitudes are taken from the unnormalized forward DFT, so the band RMS
//! scales with the window length: a full-scale sine centred on a bin yields a
//! peak magnitude of `N / 2`.

use crate::error::{DetectorError, Result};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Contiguous run of non-negative frequency bins at or above the cutoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyBand {
    first_bin: usize,
    bin_count: usize,
    bin_width_hz: f64,
}

impl FrequencyBand {
    /// Select the bins of an `window_len`-point spectrum whose frequency is `>= min_freq_hz`
    pub fn above(min_freq_hz: f64, sample_rate: u32, window_len: usize) -> Self {
        let bin_width_hz = sample_rate as f64 / window_len as f64;
        let last_bin = window_len / 2;

        match (0..=last_bin).find(|&k| k as f64 * bin_width_hz >= min_freq_hz) {
            Some(first_bin) => Self {
                first_bin,
                bin_count: last_bin + 1 - first_bin,
                bin_width_hz,
            },
            None => Self {
                first_bin: last_bin + 1,
                bin_count: 0,
                bin_width_hz,
            },
        }
    }

    /// True when the cutoff lies above Nyquist
    pub fn is_empty(&self) -> bool {
        self.bin_count == 0
    }

    /// Number of bins in the band
    pub fn len(&self) -> usize {
        self.bin_count
    }

    /// Index of the lowest bin in the band
    pub fn first_bin(&self) -> usize {
        self.first_bin
    }

    /// Spacing between adjacent bins in Hz
    pub fn bin_width_hz(&self) -> f64 {
        self.bin_width_hz
    }

    /// Whether bin `k` belongs to the band
    pub fn contains_bin(&self, k: usize) -> bool {
        k >= self.first_bin && k < self.first_bin + self.bin_count
    }

    /// Frequency of the lowest bin, if any
    pub fn lowest_hz(&self) -> Option<f64> {
        (!self.is_empty()).then(|| self.first_bin as f64 * self.bin_width_hz)
    }

    /// Frequency of the highest bin, if any
    pub fn highest_hz(&self) -> Option<f64> {
        (!self.is_empty()).then(|| (self.first_bin + self.bin_count - 1) as f64 * self.bin_width_hz)
    }

    /// Frequencies of every bin in the band, ascending
    pub fn frequencies(&self) -> impl Iterator<Item = f64> + '_ {
        (self.first_bin..self.first_bin + self.bin_count).map(move |k| k as f64 * self.bin_width_hz)
    }
}

/// Result of analyzing one window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandAnalysis {
    /// RMS of the magnitudes inside the band (0.0 when the band is empty)
    pub rms_band: f64,
    /// Frequency of the strongest bin over the full spectrum
    pub peak_freq_hz: f64,
}

/// Spectral band analyzer for a fixed window length
///
/// Owns its FFT plan and working buffers so that repeated calls on the
/// real-time path do not allocate.
///
/// # Example
/// ```
/// use usvdetect_core::audio::spectral::SpectralAnalyzer;
///
/// let mut analyzer = SpectralAnalyzer::new(48000, 480, 20_000.0).unwrap();
/// let silence = vec![0.0f32; 480];
/// let result = analyzer.analyze(&silence).unwrap();
/// assert_eq!(result.rms_band, 0.0);
/// ```
pub struct SpectralAnalyzer {
    /// Sample rate in Hz
    sample_rate: u32,
    /// Window length in samples
    window_len: usize,
    /// Bins at or above the cutoff
    band: FrequencyBand,
    /// Planned forward FFT of `window_len` points
    fft: Arc<dyn Fft<f32>>,
    /// Working buffer for the in-place transform
    buffer: Vec<Complex<f32>>,
    /// Scratch space required by the planned FFT
    scratch: Vec<Complex<f32>>,
}

impl SpectralAnalyzer {
    /// Create an analyzer for windows of `window_len` samples
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate in Hz
    /// * `window_len` - Samples per analyzed window
    /// * `min_freq_hz` - Lower edge of the ultrasonic band
    pub fn new(sample_rate: u32, window_len: usize, min_freq_hz: f64) -> Result<Self> {
        if sample_rate == 0 {
            return Err(DetectorError::InvalidConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        if window_len == 0 {
            return Err(DetectorError::InvalidConfig(
                "window length must be positive".to_string(),
            ));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_len);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Ok(Self {
            sample_rate,
            window_len,
            band: FrequencyBand::above(min_freq_hz, sample_rate, window_len),
            fft,
            buffer: vec![Complex::new(0.0, 0.0); window_len],
            scratch,
        })
    }

    /// Analyze one window of exactly `window_len` samples
    ///
    /// Fails with [`DetectorError::AnalysisFailure`] on a length mismatch or
    /// non-finite input. An empty band is not an error and yields an RMS of 0.0.
    pub fn analyze(&mut self, window: &[f32]) -> Result<BandAnalysis> {
        if window.len() != self.window_len {
            return Err(DetectorError::AnalysisFailure(format!(
                "window has {} samples, analyzer expects {}",
                window.len(),
                self.window_len
            )));
        }

        for (slot, &sample) in self.buffer.iter_mut().zip(window) {
            if !sample.is_finite() {
                return Err(DetectorError::AnalysisFailure(
                    "non-finite sample in window".to_string(),
                ));
            }
            *slot = Complex::new(sample, 0.0);
        }

        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);

        let mut peak_bin = 0;
        let mut peak_mag = f64::MIN;
        let mut band_energy = 0.0f64;

        for (k, c) in self.buffer[..=self.window_len / 2].iter().enumerate() {
            let mag = c.norm() as f64;
            if mag > peak_mag {
                peak_mag = mag;
                peak_bin = k;
            }
            if self.band.contains_bin(k) {
                band_energy += mag * mag;
            }
        }

        let rms_band = if self.band.is_empty() {
            0.0
        } else {
            (band_energy / self.band.len() as f64).sqrt()
        };

        if !rms_band.is_finite() {
            return Err(DetectorError::AnalysisFailure(
                "band energy overflowed".to_string(),
            ));
        }

        Ok(BandAnalysis {
            rms_band,
            peak_freq_hz: self.bin_frequency(peak_bin),
        })
    }

    /// Frequency of bin `k` in Hz
    pub fn bin_frequency(&self, k: usize) -> f64 {
        k as f64 * self.sample_rate as f64 / self.window_len as f64
    }

    /// Bins considered ultrasonic for every window
    pub fn band(&self) -> FrequencyBand {
        self.band
    }

    /// Get the configured sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per analyzed window
    pub fn window_len(&self) -> usize {
        self.window_len
    }
}
