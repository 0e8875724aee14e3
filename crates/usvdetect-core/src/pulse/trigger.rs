//! Pulse dispatch off the capture thread
//!
//! [`PulseLine`] owns the acquired [`PulseSink`] and is shared between the
//! session, the capture worker, and the pulse worker. [`PulseTrigger`] runs
//! a single dedicated worker that holds the line high for the requested
//! duration. Requests that arrive while a pulse is in progress are dropped,
//! never queued.
//!
//! The hold is interruptible: shutting the trigger down cuts an in-flight
//! pulse short and leaves the line low.

use super::{PulseRequest, PulseSink};
use crate::error::{DetectorError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

struct LineState {
    sink: Box<dyn PulseSink>,
    acquired: bool,
    /// Pins currently driven high
    high: Vec<u32>,
}

/// Shared handle to one pulse sink
#[derive(Clone)]
pub struct PulseLine {
    inner: Arc<Mutex<LineState>>,
}

impl PulseLine {
    /// Wrap a sink; nothing is acquired until [`PulseLine::acquire`]
    pub fn new(sink: Box<dyn PulseSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LineState {
                sink,
                acquired: false,
                high: Vec::new(),
            })),
        }
    }

    // Release must work even after a worker panicked while holding the lock
    fn lock(&self) -> MutexGuard<'_, LineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the underlying sink
    ///
    /// Any failure is reported as [`DetectorError::HardwareHandle`].
    pub fn acquire(&self) -> Result<()> {
        let mut state = self.lock();
        if state.acquired {
            return Ok(());
        }
        state.sink.open().map_err(|e| match e {
            DetectorError::HardwareHandle(msg) => DetectorError::HardwareHandle(msg),
            other => DetectorError::HardwareHandle(other.to_string()),
        })?;
        state.acquired = true;
        tracing::info!("Pulse line acquired");
        Ok(())
    }

    /// Reserve `pin` on the acquired sink
    ///
    /// Any failure is reported as [`DetectorError::HardwareHandle`].
    pub fn claim(&self, pin: u32) -> Result<()> {
        let mut state = self.lock();
        if !state.acquired {
            return Err(DetectorError::HardwareHandle(
                "pulse line is not acquired".to_string(),
            ));
        }
        state.sink.claim(pin).map_err(|e| match e {
            DetectorError::HardwareHandle(msg) => DetectorError::HardwareHandle(msg),
            other => DetectorError::HardwareHandle(format!("pin {}: {}", pin, other)),
        })?;
        tracing::debug!(pin, "Pulse pin claimed");
        Ok(())
    }

    /// Drive `pin` high
    pub fn assert(&self, pin: u32) -> Result<()> {
        let mut state = self.lock();
        if !state.acquired {
            return Err(DetectorError::HardwareHandle(
                "pulse line is not acquired".to_string(),
            ));
        }
        state.sink.assert(pin)?;
        if !state.high.contains(&pin) {
            state.high.push(pin);
        }
        Ok(())
    }

    /// Drive `pin` low; a no-op once the line is released
    pub fn deassert(&self, pin: u32) -> Result<()> {
        let mut state = self.lock();
        if !state.acquired {
            return Ok(());
        }
        state.sink.deassert(pin)?;
        state.high.retain(|&p| p != pin);
        Ok(())
    }

    /// Drive every raised pin low and close the sink
    ///
    /// Idempotent: releasing an unacquired line does nothing.
    pub fn release(&self) {
        let mut state = self.lock();
        if !state.acquired {
            return;
        }
        let raised = std::mem::take(&mut state.high);
        for pin in raised {
            if let Err(e) = state.sink.deassert(pin) {
                tracing::error!(pin, error = %e, "Failed to lower pin during release");
            }
        }
        state.sink.close();
        state.acquired = false;
        tracing::info!("Pulse line released");
    }

    /// Whether the sink is currently open
    pub fn is_acquired(&self) -> bool {
        self.lock().acquired
    }

    /// Whether `pin` is currently driven high
    pub fn is_high(&self, pin: u32) -> bool {
        self.lock().high.contains(&pin)
    }
}

/// Single-worker pulse dispatcher with a drop-if-busy policy
pub struct PulseTrigger {
    requests: Option<Sender<PulseRequest>>,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    busy: Arc<AtomicBool>,
    fired: AtomicU64,
    dropped: AtomicU64,
    line: PulseLine,
}

impl PulseTrigger {
    /// Start the pulse worker for an acquired line
    pub fn spawn(line: PulseLine) -> Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::bounded::<PulseRequest>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let busy = Arc::new(AtomicBool::new(false));

        let worker_line = line.clone();
        let worker_busy = Arc::clone(&busy);
        let worker = std::thread::Builder::new()
            .name("usv-pulse".into())
            .spawn(move || pulse_worker(request_rx, shutdown_rx, worker_line, worker_busy))?;

        Ok(Self {
            requests: Some(request_tx),
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
            busy,
            fired: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            line,
        })
    }

    /// Hand a request to the worker without blocking
    ///
    /// Returns `false` when the request was dropped because a pulse is
    /// already in progress or the trigger is shut down.
    pub fn fire(&self, request: PulseRequest) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(pin = request.pin_id, "Pulse in progress, request dropped");
            return false;
        }

        let sent = self
            .requests
            .as_ref()
            .map(|tx| tx.try_send(request).is_ok())
            .unwrap_or(false);

        if sent {
            self.fired.fetch_add(1, Ordering::Relaxed);
        } else {
            self.busy.store(false, Ordering::Release);
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    /// Whether a pulse is currently being emitted
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Pulses handed to the worker
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Requests dropped by the busy policy
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop the worker, cutting any in-flight pulse short
    ///
    /// Returns once the worker has exited and the line is low. Idempotent.
    pub fn shutdown(&mut self) {
        self.requests = None;
        self.shutdown = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Pulse worker panicked");
            }
        }
        // Covers a worker that died between assert and deassert
        let still_high: Vec<u32> = self.line.lock().high.clone();
        for pin in still_high {
            if let Err(e) = self.line.deassert(pin) {
                tracing::error!(pin, error = %e, "Failed to lower pin on shutdown");
            }
        }
        self.busy.store(false, Ordering::Release);
    }
}

impl Drop for PulseTrigger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pulse_worker(
    requests: Receiver<PulseRequest>,
    shutdown: Receiver<()>,
    line: PulseLine,
    busy: Arc<AtomicBool>,
) {
    while let Ok(request) = requests.recv() {
        if let Err(e) = line.assert(request.pin_id) {
            tracing::error!(pin = request.pin_id, error = %e, "Failed to raise pulse line");
            busy.store(false, Ordering::Release);
            continue;
        }

        let interrupted = !matches!(
            shutdown.recv_timeout(request.duration),
            Err(RecvTimeoutError::Timeout)
        );

        if let Err(e) = line.deassert(request.pin_id) {
            tracing::error!(pin = request.pin_id, error = %e, "Failed to lower pulse line");
        }
        busy.store(false, Ordering::Release);

        if interrupted {
            tracing::debug!(pin = request.pin_id, "Pulse cut short by shutdown");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Open,
        Claim(u32),
        High(u32),
        Low(u32),
        Close,
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        ops: Arc<Mutex<Vec<Op>>>,
        fail_open: bool,
        fail_claim: bool,
    }

    impl RecordingSink {
        fn ops(&self) -> Vec<Op> {
            self.ops.lock().unwrap().clone()
        }
    }

    impl PulseSink for RecordingSink {
        fn open(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(DetectorError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "denied",
                )));
            }
            self.ops.lock().unwrap().push(Op::Open);
            Ok(())
        }

        fn claim(&mut self, pin: u32) -> Result<()> {
            if self.fail_claim {
                return Err(DetectorError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "export denied",
                )));
            }
            self.ops.lock().unwrap().push(Op::Claim(pin));
            Ok(())
        }

        fn assert(&mut self, pin: u32) -> Result<()> {
            self.ops.lock().unwrap().push(Op::High(pin));
            Ok(())
        }

        fn deassert(&mut self, pin: u32) -> Result<()> {
            self.ops.lock().unwrap().push(Op::Low(pin));
            Ok(())
        }

        fn close(&mut self) {
            self.ops.lock().unwrap().push(Op::Close);
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_acquire_failure_is_hardware_error() {
        let sink = RecordingSink {
            fail_open: true,
            ..Default::default()
        };
        let line = PulseLine::new(Box::new(sink));
        assert!(matches!(
            line.acquire(),
            Err(DetectorError::HardwareHandle(_))
        ));
        assert!(!line.is_acquired());
    }

    #[test]
    fn test_release_is_idempotent() {
        let sink = RecordingSink::default();
        let line = PulseLine::new(Box::new(sink.clone()));
        line.release();
        line.acquire().unwrap();
        line.assert(17).unwrap();
        line.release();
        line.release();
        assert_eq!(sink.ops(), vec![Op::Open, Op::High(17), Op::Low(17), Op::Close]);
    }

    #[test]
    fn test_claim_failure_is_hardware_error() {
        let sink = RecordingSink {
            fail_claim: true,
            ..Default::default()
        };
        let line = PulseLine::new(Box::new(sink.clone()));
        assert!(line.claim(17).is_err());

        line.acquire().unwrap();
        let err = line.claim(17).unwrap_err();
        assert!(matches!(err, DetectorError::HardwareHandle(ref msg) if msg.contains("17")));
        line.release();
        assert_eq!(sink.ops(), vec![Op::Open, Op::Close]);
    }

    #[test]
    fn test_assert_requires_acquire() {
        let line = PulseLine::new(Box::new(RecordingSink::default()));
        assert!(line.assert(4).is_err());
        assert!(line.deassert(4).is_ok());
    }

    #[test]
    fn test_pulse_raises_then_lowers() {
        let sink = RecordingSink::default();
        let line = PulseLine::new(Box::new(sink.clone()));
        line.acquire().unwrap();
        let trigger = PulseTrigger::spawn(line.clone()).unwrap();

        assert!(trigger.fire(PulseRequest::new(17, Duration::from_millis(20))));
        assert!(wait_until(Duration::from_secs(2), || !trigger.is_busy()));

        assert_eq!(sink.ops(), vec![Op::Open, Op::High(17), Op::Low(17)]);
        assert!(!line.is_high(17));
        assert_eq!(trigger.fired(), 1);
    }

    #[test]
    fn test_busy_requests_are_dropped() {
        let line = PulseLine::new(Box::new(RecordingSink::default()));
        line.acquire().unwrap();
        let trigger = PulseTrigger::spawn(line).unwrap();

        assert!(trigger.fire(PulseRequest::new(5, Duration::from_secs(5))));
        assert!(!trigger.fire(PulseRequest::new(5, Duration::from_secs(5))));
        assert!(!trigger.fire(PulseRequest::new(6, Duration::from_secs(5))));
        assert_eq!(trigger.fired(), 1);
        assert_eq!(trigger.dropped(), 2);
    }

    #[test]
    fn test_shutdown_cuts_pulse_short() {
        let sink = RecordingSink::default();
        let line = PulseLine::new(Box::new(sink.clone()));
        line.acquire().unwrap();
        let mut trigger = PulseTrigger::spawn(line.clone()).unwrap();

        trigger.fire(PulseRequest::new(17, Duration::from_secs(30)));
        assert!(wait_until(Duration::from_secs(2), || line.is_high(17)));

        let started = Instant::now();
        trigger.shutdown();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!line.is_high(17));
        assert_eq!(sink.ops().last(), Some(&Op::Low(17)));

        // Shut down triggers refuse new work
        assert!(!trigger.fire(PulseRequest::new(17, Duration::from_millis(1))));
        trigger.shutdown();
    }
}
