//! Fixed-duration capture into an [`AudioBuffer`]
//!
//! Used to collect material for offline analysis. Recording runs on its own
//! thread and can be cut short through the returned handle; a cut-short or
//! early-ending capture keeps whatever was recorded.

use super::buffer::AudioBuffer;
use super::engine::{probe_rate, CancelToken};
use super::source::{AudioSource, BlockRead};
use crate::error::{DetectorError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Samples requested from the source per read
const RECORD_BLOCK_SIZE: usize = 4096;

/// Handle returned by [`Recorder::start`]
pub struct RecorderHandle {
    cancel: CancelToken,
    /// Samples captured so far, updated by the recorder thread
    samples_captured: Arc<AtomicU64>,
    thread: Option<std::thread::JoinHandle<Result<AudioBuffer>>>,
}

impl RecorderHandle {
    /// Ask the recorder to stop at the next block
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Check if the recorder thread is still alive
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Samples captured so far
    pub fn samples_captured(&self) -> u64 {
        self.samples_captured.load(Ordering::Relaxed)
    }

    /// Wait for the recording to finish and take the buffer
    pub fn wait(mut self) -> Result<AudioBuffer> {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                Err(DetectorError::AnalysisFailure(
                    "recorder thread panicked".to_string(),
                ))
            }),
            None => Err(DetectorError::AnalysisFailure(
                "recording already collected".to_string(),
            )),
        }
    }
}

impl Drop for RecorderHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Records a fixed number of seconds from one source
pub struct Recorder {
    source: Arc<dyn AudioSource>,
    sample_rate: u32,
    duration: Duration,
    probe_timeout: Duration,
}

impl Recorder {
    pub fn new(source: Arc<dyn AudioSource>, sample_rate: u32, duration: Duration) -> Self {
        Self {
            source,
            sample_rate,
            duration,
            probe_timeout: Duration::from_millis(2000),
        }
    }

    /// Bound the initial sample rate check
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Spawn the recording thread
    pub fn start(self) -> Result<RecorderHandle> {
        let cancel = CancelToken::new();
        let samples_captured = Arc::new(AtomicU64::new(0));

        let thread_cancel = cancel.clone();
        let thread_count = Arc::clone(&samples_captured);
        let thread = std::thread::Builder::new()
            .name("usv-recorder".into())
            .spawn(move || self.record(&thread_cancel, &thread_count))?;

        Ok(RecorderHandle {
            cancel,
            samples_captured,
            thread: Some(thread),
        })
    }

    /// Record on the calling thread
    pub fn record(&self, cancel: &CancelToken, captured: &AtomicU64) -> Result<AudioBuffer> {
        if self.sample_rate == 0 {
            return Err(DetectorError::InvalidConfig(
                "sample rate must be positive".to_string(),
            ));
        }
        if !probe_rate(&self.source, self.sample_rate, self.probe_timeout)? {
            return Err(DetectorError::DeviceUnavailable(format!(
                "{} does not support {} Hz",
                self.source.name(),
                self.sample_rate
            )));
        }

        let wanted = (self.duration.as_secs_f64() * self.sample_rate as f64).round() as usize;
        let block_period =
            Duration::from_secs_f64(RECORD_BLOCK_SIZE as f64 / self.sample_rate as f64);
        let mut stream = self.source.open(self.sample_rate, RECORD_BLOCK_SIZE)?;
        let mut samples = Vec::with_capacity(wanted);

        tracing::info!(
            source = %self.source.name(),
            sample_rate = self.sample_rate,
            seconds = self.duration.as_secs_f64(),
            "Recording started"
        );

        while samples.len() < wanted && !cancel.is_cancelled() {
            match stream.next_block(block_period)? {
                BlockRead::Block(block) => {
                    let take = block.len().min(wanted - samples.len());
                    samples.extend_from_slice(&block[..take]);
                    captured.store(samples.len() as u64, Ordering::Relaxed);
                }
                BlockRead::Pending => {}
                BlockRead::Closed => {
                    tracing::warn!(samples = samples.len(), wanted, "Source closed before recording finished");
                    break;
                }
            }
        }

        tracing::info!(samples = samples.len(), "Recording finished");
        AudioBuffer::new(samples, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::BufferSource;

    fn source(len: usize, sample_rate: u32) -> Arc<dyn AudioSource> {
        let samples = (0..len).map(|i| (i % 100) as f32 / 100.0).collect();
        Arc::new(BufferSource::new(
            AudioBuffer::new(samples, sample_rate).unwrap(),
        ))
    }

    #[test]
    fn test_records_exact_duration() {
        let recorder = Recorder::new(source(48000, 48000), 48000, Duration::from_millis(250));
        let handle = recorder.start().unwrap();
        let buffer = handle.wait().unwrap();
        assert_eq!(buffer.len(), 12000);
        assert_eq!(buffer.sample_rate(), 48000);
        assert_eq!(buffer.samples()[101], 0.01);
    }

    #[test]
    fn test_short_source_keeps_partial_recording() {
        let recorder = Recorder::new(source(10000, 48000), 48000, Duration::from_secs(1));
        let buffer = recorder.start().unwrap().wait().unwrap();
        // Only whole blocks are delivered
        assert_eq!(buffer.len(), 2 * RECORD_BLOCK_SIZE);
    }

    #[test]
    fn test_unsupported_rate_is_device_error() {
        let recorder = Recorder::new(source(48000, 48000), 96000, Duration::from_millis(10));
        let err = recorder.start().unwrap().wait().unwrap_err();
        assert!(matches!(err, DetectorError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_cancelled_recording_stops_early() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let captured = AtomicU64::new(0);
        let recorder = Recorder::new(source(48000, 48000), 48000, Duration::from_secs(1));
        let buffer = recorder.record(&cancel, &captured).unwrap();
        assert!(buffer.is_empty());
        assert_eq!(captured.load(Ordering::Relaxed), 0);
    }
}
