//! Usvdetect Core - Ultrasonic event detection engine
//!
//! Turns raw audio into discrete ultrasonic detection events by thresholding
//! the spectral energy above a configurable cutoff frequency. The same engine
//! drives two pipelines:
//! - File mode: a recorded buffer is segmented into overlapping windows and
//!   every triggering window becomes a [`DetectionEvent`]
//! - Live mode: a capture session analyzes each delivered block and fires a
//!   timed pulse on a hardware output line when an event starts

pub mod audio;
pub mod config;
pub mod error;
pub mod pulse;
pub mod report;
pub mod sink;
pub mod stats;

pub use audio::buffer::AudioBuffer;
pub use audio::detector::{analyze_buffer, DetectionEvent, ThresholdDetector};
pub use audio::engine::{BlockUpdate, CancelToken, CaptureSummary, LiveDetector, SessionState};
pub use audio::recorder::{Recorder, RecorderHandle};
pub use audio::segmenter::WindowSpec;
pub use audio::source::{AudioSource, BlockRead, BlockStream, BufferSource, CpalSource};
pub use audio::spectral::{BandAnalysis, FrequencyBand, SpectralAnalyzer};
pub use config::DetectorConfig;
pub use error::{DetectorError, Result};
pub use pulse::gpio::{DryRunSink, SysfsGpio};
pub use pulse::{PulseLine, PulseRequest, PulseSink, PulseTrigger};
pub use report::DetectionReport;
pub use sink::{NoopSink, ResultSink};
pub use stats::store::SessionStats;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Primary live capture rate (192kHz keeps the band up to 96kHz observable)
pub const DEFAULT_SAMPLE_RATE: u32 = 192_000;

/// Rate probed when the primary rate is not supported
pub const FALLBACK_SAMPLE_RATE: u32 = 96_000;

/// Samples per live block (~85ms at 192kHz)
pub const DEFAULT_BLOCK_SIZE: usize = 16_384;
