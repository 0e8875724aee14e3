//! Consumers of detection results
//!
//! File mode reports progress while it runs and hands over the complete,
//! time-ordered event list at the end. Live mode produces one
//! [`BlockUpdate`] per analyzed block; those travel over a channel and are
//! forwarded to a sink by [`LiveDetector::drain_updates`].
//!
//! [`LiveDetector::drain_updates`]: crate::audio::engine::LiveDetector::drain_updates

use crate::audio::detector::DetectionEvent;
use crate::audio::engine::BlockUpdate;

/// Receiver of progress, detections, and live block updates
///
/// Every method has an empty default so a sink only implements what it shows.
pub trait ResultSink {
    /// File mode: percentage of windows processed, non-decreasing, ends at 100
    fn on_progress(&mut self, _pct: f64) {}

    /// File mode: the final ordered detection list
    fn on_events(&mut self, _events: &[DetectionEvent]) {}

    /// Live mode: classification of one block
    fn on_block(&mut self, _update: &BlockUpdate) {}
}

/// Sink that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ResultSink for NoopSink {}
