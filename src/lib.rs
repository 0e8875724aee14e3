//! Usvdetect - ultrasonic vocalization detector
//!
//! This library re-exports the detection engine, capture, pulse output,
//! and statistics functionality from `usvdetect-core`.

pub use usvdetect_core::audio;
pub use usvdetect_core::pulse;
pub use usvdetect_core::report;
pub use usvdetect_core::sink;
pub use usvdetect_core::stats;

pub use usvdetect_core::{
    analyze_buffer, AudioBuffer, DetectionEvent, DetectionReport, DetectorConfig, DetectorError,
    LiveDetector, Result, SessionState, SessionStats,
};
pub use usvdetect_core::{BUILD_DATE, DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE, FALLBACK_SAMPLE_RATE, VERSION};
