//! Detector configuration
//!
//! Stores detection thresholds, window layout, pulse output settings, and
//! live capture parameters in a JSON file at
//! `<data_dir>/usvdetect/config.json`. Missing fields fall back to defaults.

use crate::error::{DetectorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest pulse a session will hold the line for
pub const MAX_PULSE_DURATION_S: f64 = 3600.0;

fn default_threshold_rms() -> f64 {
    0.2
}

fn default_min_freq_hz() -> f64 {
    30_000.0
}

fn default_window_ms() -> f64 {
    100.0
}

fn default_hop_overlap_pct() -> f64 {
    50.0
}

fn default_pulse_pin_id() -> u32 {
    17
}

fn default_pulse_duration_s() -> f64 {
    0.05
}

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_fallback_sample_rate() -> u32 {
    crate::FALLBACK_SAMPLE_RATE
}

fn default_block_size() -> usize {
    crate::DEFAULT_BLOCK_SIZE
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

/// Parameters for one detection run, read-only while the run is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Band-limited RMS above which a window counts as an event
    #[serde(default = "default_threshold_rms")]
    pub threshold_rms: f64,
    /// Lower edge of the ultrasonic band in Hz
    #[serde(default = "default_min_freq_hz")]
    pub min_freq_hz: f64,
    /// File-mode window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: f64,
    /// File-mode window overlap in percent, in [0, 100)
    #[serde(default = "default_hop_overlap_pct")]
    pub hop_overlap_pct: f64,
    /// Output line driven on live detections
    #[serde(default = "default_pulse_pin_id")]
    pub pulse_pin_id: u32,
    /// How long the output line is held high, in seconds
    #[serde(default = "default_pulse_duration_s")]
    pub pulse_duration_s: f64,
    /// Primary live capture rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// Live capture rate tried when the primary one is unsupported
    #[serde(default = "default_fallback_sample_rate")]
    pub fallback_sample_rate: u32,
    /// Samples per live block
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Upper bound for each device capability check
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold_rms: default_threshold_rms(),
            min_freq_hz: default_min_freq_hz(),
            window_ms: default_window_ms(),
            hop_overlap_pct: default_hop_overlap_pct(),
            pulse_pin_id: default_pulse_pin_id(),
            pulse_duration_s: default_pulse_duration_s(),
            sample_rate: default_sample_rate(),
            fallback_sample_rate: default_fallback_sample_rate(),
            block_size: default_block_size(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl DetectorConfig {
    /// Config file path: `<data_dir>/usvdetect/config.json`
    pub fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("usvdetect")
            .join("config.json")
    }

    /// Load config from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        let path = Self::path();
        match Self::load_from(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded config from disk");
                config
            }
            Err(DetectorError::Io(_)) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Pretty-printed JSON form, as written by [`DetectorConfig::save`]
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values that would make either pipeline meaningless
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(DetectorError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )))
            }
        }

        positive("threshold_rms", self.threshold_rms)?;
        positive("window_ms", self.window_ms)?;
        positive("pulse_duration_s", self.pulse_duration_s)?;
        if self.pulse_duration_s > MAX_PULSE_DURATION_S {
            return Err(DetectorError::InvalidConfig(format!(
                "pulse_duration_s must be at most {} s, got {}",
                MAX_PULSE_DURATION_S, self.pulse_duration_s
            )));
        }

        if !self.min_freq_hz.is_finite() || self.min_freq_hz < 0.0 {
            return Err(DetectorError::InvalidConfig(format!(
                "min_freq_hz must be >= 0, got {}",
                self.min_freq_hz
            )));
        }
        if !(0.0..100.0).contains(&self.hop_overlap_pct) {
            return Err(DetectorError::InvalidConfig(format!(
                "hop_overlap_pct must be in [0, 100), got {}",
                self.hop_overlap_pct
            )));
        }
        if self.sample_rate == 0 || self.fallback_sample_rate == 0 {
            return Err(DetectorError::InvalidConfig(
                "sample rates must be positive".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(DetectorError::InvalidConfig(
                "block_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Pulse hold time
    pub fn pulse_duration(&self) -> Duration {
        Duration::from_secs_f64(self.pulse_duration_s)
    }

    /// Bound for a single device capability check
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Live sample rates in probing order, without duplicates
    pub fn candidate_rates(&self) -> Vec<u32> {
        if self.fallback_sample_rate == self.sample_rate {
            vec![self.sample_rate]
        } else {
            vec![self.sample_rate, self.fallback_sample_rate]
        }
    }
}
