//! Plain-text detection report
//!
//! The run configuration comes first, then one block per detection:
//!
//! ```text
//! USV Detection Results
//! File: session.wav
//! Generated: 2026-03-01 14:02:11
//! Sample Rate: 192000 Hz
//! Threshold: 0.2
//! Min Frequency: 30 kHz
//! Window Size: 100 ms
//! Hop Overlap: 50%
//! Total detections: 1
//!
//! Detection 1:
//!   Start Time: 0.300s
//!   End Time: 0.400s
//!   Duration: 0.100s
//!   RMS: 12.3456
//!   Peak Frequency: 25000.0 Hz
//!   Ultrasonic Band: 30000.0 - 96000.0 Hz (6601 bins)
//! ```

use crate::audio::detector::DetectionEvent;
use crate::config::DetectorConfig;
use crate::error::Result;
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// A finished file-mode run, ready to be written out
pub struct DetectionReport<'a> {
    source: Option<String>,
    sample_rate: u32,
    config: &'a DetectorConfig,
    events: &'a [DetectionEvent],
    generated_at: DateTime<Local>,
}

impl<'a> DetectionReport<'a> {
    pub fn new(sample_rate: u32, config: &'a DetectorConfig, events: &'a [DetectionEvent]) -> Self {
        Self {
            source: None,
            sample_rate,
            config,
            events,
            generated_at: Local::now(),
        }
    }

    /// Name the analyzed file; only the file name is kept
    pub fn with_source(mut self, path: &Path) -> Self {
        self.source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .or_else(|| Some(path.display().to_string()));
        self
    }

    /// Override the generation timestamp
    pub fn generated_at(mut self, at: DateTime<Local>) -> Self {
        self.generated_at = at;
        self
    }

    /// Write the report to any sink
    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "USV Detection Results")?;
        if let Some(source) = &self.source {
            writeln!(out, "File: {}", source)?;
        }
        writeln!(out, "Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(out, "Sample Rate: {} Hz", self.sample_rate)?;
        writeln!(out, "Threshold: {}", self.config.threshold_rms)?;
        writeln!(out, "Min Frequency: {} kHz", self.config.min_freq_hz / 1000.0)?;
        writeln!(out, "Window Size: {} ms", self.config.window_ms)?;
        writeln!(out, "Hop Overlap: {}%", self.config.hop_overlap_pct)?;
        writeln!(out, "Total detections: {}", self.events.len())?;

        for (i, event) in self.events.iter().enumerate() {
            writeln!(out)?;
            writeln!(out, "Detection {}:", i + 1)?;
            writeln!(out, "  Start Time: {:.3}s", event.start_time_s)?;
            writeln!(out, "  End Time: {:.3}s", event.end_time_s)?;
            writeln!(out, "  Duration: {:.3}s", event.duration_s())?;
            writeln!(out, "  RMS: {:.4}", event.rms)?;
            writeln!(out, "  Peak Frequency: {:.1} Hz", event.peak_freq_hz)?;
            match (event.band.lowest_hz(), event.band.highest_hz()) {
                (Some(low), Some(high)) => writeln!(
                    out,
                    "  Ultrasonic Band: {:.1} - {:.1} Hz ({} bins)",
                    low,
                    high,
                    event.band.len()
                )?,
                _ => writeln!(out, "  Ultrasonic Band: empty")?,
            }
        }
        Ok(())
    }

    /// Render the report into a string
    pub fn render(&self) -> Result<String> {
        let mut out = Vec::new();
        self.write_to(&mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Write the report to `path`, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out)?;
        out.flush()?;
        tracing::info!(path = %path.display(), detections = self.events.len(), "Report saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::spectral::FrequencyBand;
    use chrono::TimeZone;

    fn event(start: f64, end: f64) -> DetectionEvent {
        DetectionEvent {
            start_time_s: start,
            end_time_s: end,
            rms: 12.34567,
            peak_freq_hz: 25_000.0,
            band: FrequencyBand::above(30_000.0, 192_000, 19_200),
        }
    }

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 1, 14, 2, 11).unwrap()
    }

    #[test]
    fn test_header_lists_configuration() {
        let config = DetectorConfig::default();
        let text = DetectionReport::new(192_000, &config, &[])
            .with_source(Path::new("/data/runs/session.wav"))
            .generated_at(fixed_time())
            .render()
            .unwrap();

        let expected = "USV Detection Results\n\
                        File: session.wav\n\
                        Generated: 2026-03-01 14:02:11\n\
                        Sample Rate: 192000 Hz\n\
                        Threshold: 0.2\n\
                        Min Frequency: 30 kHz\n\
                        Window Size: 100 ms\n\
                        Hop Overlap: 50%\n\
                        Total detections: 0\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_one_block_per_detection() {
        let config = DetectorConfig::default();
        let events = vec![event(0.3, 0.4), event(0.35, 0.45)];
        let text = DetectionReport::new(192_000, &config, &events)
            .render()
            .unwrap();

        assert!(text.contains("Total detections: 2"));
        assert!(text.contains("Detection 1:\n  Start Time: 0.300s\n  End Time: 0.400s\n  Duration: 0.100s\n  RMS: 12.3457\n  Peak Frequency: 25000.0 Hz\n"));
        assert!(text.contains("Detection 2:\n  Start Time: 0.350s"));
        assert!(text.contains("  Ultrasonic Band: 30000.0 - 96000.0 Hz (6601 bins)"));
        assert!(!text.contains("File:"));
    }

    #[test]
    fn test_empty_band_is_reported() {
        let config = DetectorConfig::default();
        let events = vec![DetectionEvent {
            band: FrequencyBand::above(50_000.0, 48_000, 4800),
            ..event(0.0, 0.1)
        }];
        let text = DetectionReport::new(48_000, &config, &events).render().unwrap();
        assert!(text.contains("  Ultrasonic Band: empty"));
    }

    #[test]
    fn test_save_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.txt");
        let config = DetectorConfig::default();
        let events = vec![event(1.0, 1.1)];

        DetectionReport::new(192_000, &config, &events)
            .save(&path)
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("USV Detection Results\n"));
        assert!(contents.contains("Detection 1:"));
    }
}
