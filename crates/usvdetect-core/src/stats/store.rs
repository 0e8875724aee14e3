//! Time-series storage for live block updates
//!
//! Stores recent band RMS values with automatic eviction of old data, plus
//! the onset of every detected event.

use crate::audio::engine::BlockUpdate;
use crate::sink::ResultSink;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Maximum number of RMS points kept (~5 minutes of 85ms blocks)
const MAX_HISTORY_SIZE: usize = 3600;

/// Maximum number of onsets kept
const MAX_ONSET_HISTORY: usize = 1000;

/// A single measurement point
#[derive(Debug, Clone)]
pub struct Measurement {
    /// Wall-clock time the update was recorded
    pub timestamp: DateTime<Utc>,
    /// Capture time of the block in seconds since the session started
    pub time_s: f64,
    /// Band RMS of the block
    pub value: f64,
}

/// The block that started a detected event
#[derive(Debug, Clone)]
pub struct EventOnset {
    pub timestamp: DateTime<Utc>,
    pub block_index: u64,
    pub time_s: f64,
    pub rms: f64,
    pub peak_freq_hz: f64,
    /// Whether the onset raised the pulse line
    pub pulse_fired: bool,
}

/// Running statistics calculated from block updates
#[derive(Debug, Default, Clone)]
pub struct RunningStats {
    /// Band RMS of the most recent block
    pub current_rms: f64,
    /// Highest band RMS seen
    pub max_rms: f64,
    /// Average band RMS over the retained history
    pub avg_rms: f64,
    /// Blocks recorded
    pub blocks: u64,
    /// Blocks classified as events
    pub event_blocks: u64,
    /// Transitions into an event
    pub onsets: u64,
    /// Pulses handed to the pulse worker
    pub pulses: u64,
    /// Whether the last block was an event
    pub in_event: bool,
    /// Peak frequency of the last block
    pub last_peak_hz: f64,
    /// Capture sample rate (cached from the session)
    pub sample_rate: u32,
    /// Samples per block (cached from the session)
    pub block_size: usize,
}

/// Statistics store for one live session
#[derive(Debug)]
pub struct SessionStats {
    rms_history: VecDeque<Measurement>,
    onsets: VecDeque<EventOnset>,
    max_size: usize,
    stats: RunningStats,
    /// Sum of `rms_history` values
    history_sum: f64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::with_capacity(MAX_HISTORY_SIZE)
    }

    /// Create a store keeping at most `max_size` RMS points
    pub fn with_capacity(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            rms_history: VecDeque::with_capacity(max_size),
            onsets: VecDeque::new(),
            max_size,
            stats: RunningStats::default(),
            history_sum: 0.0,
        }
    }

    /// Record one block update
    pub fn record_block(&mut self, update: &BlockUpdate) {
        let now = Utc::now();

        if self.rms_history.len() >= self.max_size {
            if let Some(old) = self.rms_history.pop_front() {
                self.history_sum -= old.value;
            }
        }
        self.rms_history.push_back(Measurement {
            timestamp: now,
            time_s: update.time_s,
            value: update.rms_band,
        });
        self.history_sum += update.rms_band;

        let onset = update.is_event && !self.stats.in_event;
        if onset {
            if self.onsets.len() >= MAX_ONSET_HISTORY {
                self.onsets.pop_front();
            }
            self.onsets.push_back(EventOnset {
                timestamp: now,
                block_index: update.block_index,
                time_s: update.time_s,
                rms: update.rms_band,
                peak_freq_hz: update.peak_freq_hz,
                pulse_fired: update.pulse_fired,
            });
            self.stats.onsets += 1;
        }

        self.stats.current_rms = update.rms_band;
        self.stats.max_rms = self.stats.max_rms.max(update.rms_band);
        self.stats.blocks += 1;
        if update.is_event {
            self.stats.event_blocks += 1;
        }
        if update.pulse_fired {
            self.stats.pulses += 1;
        }
        self.stats.in_event = update.is_event;
        self.stats.last_peak_hz = update.peak_freq_hz;
        self.stats.avg_rms = self.history_sum / self.rms_history.len() as f64;
    }

    /// Update session info (called when a session starts)
    pub fn set_session_info(&mut self, sample_rate: u32, block_size: usize) {
        self.stats.sample_rate = sample_rate;
        self.stats.block_size = block_size;
    }

    /// Get RMS history
    pub fn rms_history(&self) -> &VecDeque<Measurement> {
        &self.rms_history
    }

    /// Get recorded onsets, oldest first
    pub fn onsets(&self) -> &VecDeque<EventOnset> {
        &self.onsets
    }

    /// Get running statistics
    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    /// Fraction of blocks classified as events
    pub fn event_ratio(&self) -> f64 {
        if self.stats.blocks == 0 {
            0.0
        } else {
            self.stats.event_blocks as f64 / self.stats.blocks as f64
        }
    }

    /// Get RMS data as `(seconds_ago, rms)` pairs relative to the newest block
    pub fn rms_plot_data(&self) -> Vec<(f64, f64)> {
        let newest = match self.rms_history.back() {
            Some(m) => m.time_s,
            None => return Vec::new(),
        };
        self.rms_history
            .iter()
            .map(|m| (m.time_s - newest, m.value))
            .collect()
    }

    /// Clear all statistics, keeping the session info
    pub fn clear(&mut self) {
        let sample_rate = self.stats.sample_rate;
        let block_size = self.stats.block_size;
        self.rms_history.clear();
        self.onsets.clear();
        self.history_sum = 0.0;
        self.stats = RunningStats {
            sample_rate,
            block_size,
            ..Default::default()
        };
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for SessionStats {
    fn on_block(&mut self, update: &BlockUpdate) {
        self.record_block(update);
    }
}
