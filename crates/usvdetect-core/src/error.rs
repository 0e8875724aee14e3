//! Error kinds shared by the file and live pipelines

use thiserror::Error;

/// Errors that can occur while configuring, running, or persisting a detection run
#[derive(Error, Debug)]
pub enum DetectorError {
    /// No compatible capture device, or no candidate sample rate is supported
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The pulse output line could not be acquired
    #[error("Hardware handle error: {0}")]
    HardwareHandle(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected fault while processing a window or block
    #[error("Analysis failure: {0}")]
    AnalysisFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result alias used across the core crate
pub type Result<T> = std::result::Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_detail() {
        let err = DetectorError::DeviceUnavailable("no input device".into());
        assert_eq!(err.to_string(), "Audio device unavailable: no input device");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: DetectorError = io.into();
        assert!(matches!(err, DetectorError::Io(_)));
    }
}
