//! E2E tests for persistent detector configuration
//!
//! Tests config round-trip, defaults, backward compatibility with partial
//! files, and rejection of values either pipeline cannot run with.

use usvdetect::{DetectorConfig, DetectorError, DEFAULT_BLOCK_SIZE, FALLBACK_SAMPLE_RATE};

#[test]
fn test_config_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("usvdetect").join("config.json");

    let config = DetectorConfig {
        threshold_rms: 0.8,
        min_freq_hz: 25_000.0,
        window_ms: 20.0,
        hop_overlap_pct: 75.0,
        pulse_pin_id: 4,
        pulse_duration_s: 0.25,
        ..Default::default()
    };
    config.save(&path).unwrap();

    let loaded = DetectorConfig::load_from(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_saved_file_is_readable_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    DetectorConfig::default().save(&path).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"threshold_rms\""));
    assert!(raw.contains("\"pulse_pin_id\": 17"));
    assert_eq!(raw, DetectorConfig::default().to_json().unwrap());
}

#[test]
fn test_old_config_without_live_fields_loads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{ "threshold_rms": 0.1, "min_freq_hz": 20000.0, "window_ms": 50.0 }"#,
    )
    .unwrap();

    let config = DetectorConfig::load_from(&path).unwrap();
    assert_eq!(config.threshold_rms, 0.1);
    assert_eq!(config.window_ms, 50.0);
    assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
    assert_eq!(config.fallback_sample_rate, FALLBACK_SAMPLE_RATE);
    assert!(config.validate().is_ok());
}

#[test]
fn test_unknown_fields_are_ignored() {
    let json = r#"{ "threshold_rms": 0.3, "channel_pair": [1, 2] }"#;
    let config: DetectorConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.threshold_rms, 0.3);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = DetectorConfig::load_from(&dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, DetectorError::Io(_)));
}

#[test]
fn test_invalid_values_are_rejected() {
    let cases = [
        DetectorConfig {
            threshold_rms: -0.1,
            ..Default::default()
        },
        DetectorConfig {
            min_freq_hz: f64::NAN,
            ..Default::default()
        },
        DetectorConfig {
            window_ms: 0.0,
            ..Default::default()
        },
        DetectorConfig {
            hop_overlap_pct: 100.0,
            ..Default::default()
        },
        DetectorConfig {
            pulse_duration_s: 0.0,
            ..Default::default()
        },
        DetectorConfig {
            fallback_sample_rate: 0,
            ..Default::default()
        },
    ];
    for config in &cases {
        assert!(
            matches!(config.validate(), Err(DetectorError::InvalidConfig(_))),
            "accepted {:?}",
            config
        );
    }
}

#[test]
fn test_zero_cutoff_is_valid() {
    let config = DetectorConfig {
        min_freq_hz: 0.0,
        hop_overlap_pct: 0.0,
        ..Default::default()
    };
    assert!(config.validate().is_ok());
}

#[test]
fn test_derived_durations() {
    let config = DetectorConfig {
        pulse_duration_s: 0.5,
        probe_timeout_ms: 1500,
        ..Default::default()
    };
    assert_eq!(config.pulse_duration(), std::time::Duration::from_millis(500));
    assert_eq!(config.probe_timeout(), std::time::Duration::from_millis(1500));
}
