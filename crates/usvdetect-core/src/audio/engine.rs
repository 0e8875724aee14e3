//! Live detection session
//!
//! Owns one capture session from start to stop:
//! - Probes the candidate sample rates, each check bounded by a timeout
//! - Acquires the pulse line, then opens the stream on a dedicated capture
//!   thread
//! - Classifies every delivered block and fires a pulse when an event starts
//! - Releases the pulse line on every exit path
//!
//! ## Session states
//!
//! `Idle → Starting → Running → Stopping → Idle`, with `Error` reachable from
//! `Starting` (probe, hardware, or stream failure) and `Running` (analysis or
//! device failure). The line is released before `Error` is entered.
//!
//! ## Threads
//!
//! The capture thread never sleeps on pulses or blocks on result delivery:
//! pulses go to the pulse worker, and block updates go over a bounded
//! channel with `try_send`. Stopping cancels the [`CancelToken`], which the
//! capture thread checks once per block period.

use crate::audio::detector::ThresholdDetector;
use crate::audio::segmenter::WindowSpec;
use crate::audio::source::{AudioSource, BlockRead};
use crate::audio::spectral::SpectralAnalyzer;
use crate::config::DetectorConfig;
use crate::error::{DetectorError, Result};
use crate::pulse::{PulseLine, PulseRequest, PulseSink, PulseTrigger};
use crate::sink::ResultSink;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Capacity of the block update channel (~5s of blocks at 192kHz)
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Minimum spacing of repeated capture-path diagnostics
const NOTICE_INTERVAL: Duration = Duration::from_secs(1);

/// Cooperative stop signal for capture loops
///
/// Cloned into the capture thread; cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the loop to stop at its next check
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Live session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; the pulse line is released
    Idle,
    /// Probing the device and acquiring hardware
    Starting,
    /// Capturing and classifying blocks
    Running,
    /// Waiting for the capture thread to exit
    Stopping,
    /// The session failed; the pulse line is released
    Error,
}

/// Classification of one live block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockUpdate {
    /// Zero-based block counter within the session
    pub block_index: u64,
    /// Block start in seconds since capture began
    pub time_s: f64,
    /// Band-limited RMS of the block
    pub rms_band: f64,
    /// Strongest bin over the full spectrum
    pub peak_freq_hz: f64,
    /// Whether the block exceeded the threshold
    pub is_event: bool,
    /// Whether this block handed a pulse to the pulse worker
    pub pulse_fired: bool,
}

/// Counters for one finished capture session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub blocks: u64,
    /// Transitions into an event
    pub onsets: u64,
    pub pulses_fired: u64,
    /// Onsets that arrived while a pulse was still held
    pub pulses_dropped: u64,
}

/// Live detector driving one [`AudioSource`] and one [`PulseSink`]
pub struct LiveDetector {
    config: DetectorConfig,
    source: Arc<dyn AudioSource>,
    line: PulseLine,
    state: SessionState,
    sample_rate: Option<u32>,
    cancel: Option<CancelToken>,
    worker: Option<JoinHandle<Result<CaptureSummary>>>,
    updates: Option<Receiver<BlockUpdate>>,
    dropped_updates: Arc<AtomicU64>,
    last_summary: Option<CaptureSummary>,
    last_error: Option<String>,
}

impl LiveDetector {
    /// Create an idle detector; nothing is probed or acquired until [`LiveDetector::start`]
    pub fn new(
        config: DetectorConfig,
        source: Arc<dyn AudioSource>,
        sink: Box<dyn PulseSink>,
    ) -> Self {
        Self {
            config,
            source,
            line: PulseLine::new(sink),
            state: SessionState::Idle,
            sample_rate: None,
            cancel: None,
            worker: None,
            updates: None,
            dropped_updates: Arc::new(AtomicU64::new(0)),
            last_summary: None,
            last_error: None,
        }
    }

    /// Current state as of the last start, stop, or refresh
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Rate the session is capturing at
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Message of the error that moved the session to `Error`
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Counters of the most recently finished session
    pub fn last_summary(&self) -> Option<CaptureSummary> {
        self.last_summary
    }

    /// Updates discarded because the update channel was full
    pub fn dropped_updates(&self) -> u64 {
        self.dropped_updates.load(Ordering::Relaxed)
    }

    /// Whether the pulse line is currently held by this detector
    pub fn holds_hardware(&self) -> bool {
        self.line.is_acquired()
    }

    /// Start a capture session
    ///
    /// Fails with `InvalidConfig` before anything is touched,
    /// `DeviceUnavailable` before the pulse line is acquired, or
    /// `HardwareHandle` when the line cannot be opened or the pin cannot be
    /// claimed. On failure the
    /// session is left in `Error` with nothing held.
    pub fn start(&mut self) -> Result<()> {
        self.refresh();
        match self.state {
            SessionState::Idle | SessionState::Error => {}
            other => {
                tracing::warn!(state = ?other, "Start ignored, session already active");
                return Ok(());
            }
        }

        self.config.validate()?;
        self.state = SessionState::Starting;
        self.last_error = None;
        self.dropped_updates.store(0, Ordering::Relaxed);
        tracing::info!(source = %self.source.name(), "Live session starting");

        match self.launch() {
            Ok(()) => {
                self.state = SessionState::Running;
                tracing::info!(
                    sample_rate = self.sample_rate.unwrap_or_default(),
                    block_size = self.config.block_size,
                    pin = self.config.pulse_pin_id,
                    "Live session running"
                );
                Ok(())
            }
            Err(e) => {
                self.line.release();
                self.sample_rate = None;
                self.state = SessionState::Error;
                self.last_error = Some(e.to_string());
                tracing::error!(error = %e, "Live session failed to start");
                Err(e)
            }
        }
    }

    fn launch(&mut self) -> Result<()> {
        let sample_rate = self.select_rate()?;
        let block_size = self.config.block_size;
        let spec = WindowSpec::per_block(block_size, self.config.min_freq_hz)?;
        let analyzer = SpectralAnalyzer::new(sample_rate, spec.length_samples(), spec.min_freq_hz())?;
        let detector = ThresholdDetector::new(self.config.threshold_rms)?;
        if analyzer.band().is_empty() {
            tracing::warn!(
                min_freq_hz = spec.min_freq_hz(),
                sample_rate,
                "Cutoff above Nyquist, no block can trigger"
            );
        }

        self.line.acquire()?;
        self.line.claim(self.config.pulse_pin_id)?;

        let cancel = CancelToken::new();
        let (update_tx, update_rx) = crossbeam_channel::bounded(UPDATE_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let capture = CaptureLoop {
            source: Arc::clone(&self.source),
            line: self.line.clone(),
            analyzer,
            detector,
            sample_rate,
            block_size,
            pulse: PulseRequest::new(self.config.pulse_pin_id, self.config.pulse_duration()),
            cancel: cancel.clone(),
            updates: update_tx,
            dropped_updates: Arc::clone(&self.dropped_updates),
        };
        let worker = std::thread::Builder::new()
            .name("usv-capture".into())
            .spawn(move || capture.run(ready_tx))?;

        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(DetectorError::AnalysisFailure(
                "capture thread exited before the stream opened".to_string(),
            ))
        });
        if let Err(e) = opened {
            cancel.cancel();
            if worker.join().is_err() {
                tracing::error!("Capture thread panicked during start");
            }
            return Err(e);
        }

        self.sample_rate = Some(sample_rate);
        self.cancel = Some(cancel);
        self.worker = Some(worker);
        self.updates = Some(update_rx);
        Ok(())
    }

    /// First candidate rate the source supports
    fn select_rate(&self) -> Result<u32> {
        let candidates = self.config.candidate_rates();
        let timeout = self.config.probe_timeout();
        for &rate in &candidates {
            match probe_rate(&self.source, rate, timeout) {
                Ok(true) => {
                    if rate != self.config.sample_rate {
                        tracing::warn!(
                            requested = self.config.sample_rate,
                            fallback = rate,
                            "Primary sample rate unsupported, using fallback"
                        );
                    }
                    return Ok(rate);
                }
                Ok(false) => tracing::warn!(rate, "Sample rate not supported"),
                Err(e) => tracing::warn!(rate, error = %e, "Sample rate probe failed"),
            }
        }
        Err(DetectorError::DeviceUnavailable(format!(
            "{} supports none of {:?} Hz",
            self.source.name(),
            candidates
        )))
    }

    /// Pick up a capture thread that ended on its own
    ///
    /// A closed stream returns the session to `Idle`; an analysis or device
    /// failure moves it to `Error`.
    pub fn refresh(&mut self) -> SessionState {
        let finished = self
            .worker
            .as_ref()
            .map(|w| w.is_finished())
            .unwrap_or(false);
        if finished {
            let outcome = self.join_worker();
            self.line.release();
            self.cancel = None;
            self.state = match outcome {
                Ok(_) => {
                    tracing::info!("Capture stream ended, session idle");
                    SessionState::Idle
                }
                Err(e) => {
                    tracing::error!(error = %e, "Live session failed");
                    self.last_error = Some(e.to_string());
                    SessionState::Error
                }
            };
        }
        self.state
    }

    fn join_worker(&mut self) -> Result<CaptureSummary> {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return Ok(CaptureSummary::default()),
        };
        let outcome = worker.join().unwrap_or_else(|_| {
            Err(DetectorError::AnalysisFailure(
                "capture thread panicked".to_string(),
            ))
        });
        if let Ok(summary) = &outcome {
            self.last_summary = Some(*summary);
        }
        outcome
    }

    /// Stop the session and release the pulse line
    ///
    /// Blocks until the capture thread has observed the cancellation, which
    /// takes at most one block period. Safe to call in any state.
    pub fn stop(&mut self) {
        if matches!(self.state, SessionState::Running | SessionState::Starting) {
            self.state = SessionState::Stopping;
            tracing::info!("Live session stopping");
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Err(e) = self.join_worker() {
            tracing::warn!(error = %e, "Capture thread ended with an error");
            self.last_error = Some(e.to_string());
        }
        self.line.release();
        if self.state != SessionState::Idle {
            tracing::info!("Live session idle");
        }
        self.state = SessionState::Idle;
    }

    /// Forward every pending block update to `sink`, returning how many
    pub fn drain_updates(&self, sink: &mut dyn ResultSink) -> usize {
        let mut delivered = 0;
        if let Some(updates) = &self.updates {
            while let Ok(update) = updates.try_recv() {
                sink.on_block(&update);
                delivered += 1;
            }
        }
        delivered
    }
}

impl Drop for LiveDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ask `source` about `rate`, giving up after `timeout`
///
/// The query runs on its own thread so a hung driver cannot stall the caller.
pub fn probe_rate(source: &Arc<dyn AudioSource>, rate: u32, timeout: Duration) -> Result<bool> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let probed = Arc::clone(source);
    std::thread::Builder::new()
        .name("usv-probe".into())
        .spawn(move || {
            let _ = tx.send(probed.supports_rate(rate));
        })?;

    match rx.recv_timeout(timeout) {
        Ok(supported) => supported,
        Err(RecvTimeoutError::Timeout) => Err(DetectorError::DeviceUnavailable(format!(
            "probe at {} Hz timed out after {:?}",
            rate, timeout
        ))),
        Err(RecvTimeoutError::Disconnected) => Err(DetectorError::DeviceUnavailable(format!(
            "probe at {} Hz ended without an answer",
            rate
        ))),
    }
}

/// Everything the capture thread owns
struct CaptureLoop {
    source: Arc<dyn AudioSource>,
    line: PulseLine,
    analyzer: SpectralAnalyzer,
    detector: ThresholdDetector,
    sample_rate: u32,
    block_size: usize,
    pulse: PulseRequest,
    cancel: CancelToken,
    updates: Sender<BlockUpdate>,
    dropped_updates: Arc<AtomicU64>,
}

impl CaptureLoop {
    fn run(mut self, ready: Sender<Result<()>>) -> Result<CaptureSummary> {
        let line = self.line.clone();
        let outcome = self.capture(ready);
        line.release();
        outcome
    }

    fn capture(&mut self, ready: Sender<Result<()>>) -> Result<CaptureSummary> {
        let mut stream = match self.source.open(self.sample_rate, self.block_size) {
            Ok(stream) => stream,
            Err(e) => {
                let message = e.to_string();
                let _ = ready.send(Err(e));
                return Err(DetectorError::DeviceUnavailable(message));
            }
        };
        let mut trigger = match PulseTrigger::spawn(self.line.clone()) {
            Ok(trigger) => trigger,
            Err(e) => {
                let message = e.to_string();
                let _ = ready.send(Err(e));
                return Err(DetectorError::HardwareHandle(message));
            }
        };
        let _ = ready.send(Ok(()));
        drop(ready);

        let block_period = Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64);
        let band_empty = self.analyzer.band().is_empty();
        let mut summary = CaptureSummary::default();
        let mut previous_event = false;
        let mut last_notice: Option<Instant> = None;

        let result = loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(blocks = summary.blocks, "Capture cancelled");
                break Ok(());
            }

            let block = match stream.next_block(block_period) {
                Ok(BlockRead::Block(block)) => block,
                Ok(BlockRead::Pending) => continue,
                Ok(BlockRead::Closed) => {
                    tracing::info!(blocks = summary.blocks, "Capture stream closed");
                    break Ok(());
                }
                Err(e) => break Err(e),
            };

            let analysis = match self.analyzer.analyze(block) {
                Ok(analysis) => analysis,
                Err(e) => break Err(e),
            };

            if band_empty && last_notice.map_or(true, |t| t.elapsed() >= NOTICE_INTERVAL) {
                tracing::debug!(block = summary.blocks, "No ultrasonic bins at this rate");
                last_notice = Some(Instant::now());
            }

            let is_event = self.detector.is_event(analysis.rms_band);
            let mut pulse_fired = false;
            if is_event && !previous_event {
                summary.onsets += 1;
                pulse_fired = trigger.fire(self.pulse);
                if pulse_fired {
                    summary.pulses_fired += 1;
                } else {
                    summary.pulses_dropped += 1;
                }
            }
            previous_event = is_event;

            let update = BlockUpdate {
                block_index: summary.blocks,
                time_s: (summary.blocks as f64 * self.block_size as f64) / self.sample_rate as f64,
                rms_band: analysis.rms_band,
                peak_freq_hz: analysis.peak_freq_hz,
                is_event,
                pulse_fired,
            };
            if self.updates.try_send(update).is_err() {
                self.dropped_updates.fetch_add(1, Ordering::Relaxed);
            }
            summary.blocks += 1;
        };

        trigger.shutdown();
        drop(stream);

        if summary.pulses_dropped > 0 {
            tracing::warn!(dropped = summary.pulses_dropped, "Pulses dropped while line was busy");
        }
        result.map(|()| summary)
    }
}
