//! Timed pulses on a hardware output line
//!
//! A live detection raises an output line for a fixed duration to signal an
//! external system. The line is reached through the [`PulseSink`]
//! capability:
//! - Linux sysfs GPIO and a logging stand-in ([`gpio`])
//! - Shared line ownership and the pulse worker thread ([`trigger`])

pub mod gpio;
pub mod trigger;

pub use trigger::{PulseLine, PulseTrigger};

use crate::error::Result;
use std::time::Duration;

/// Digital output lines keyed by integer pin identifiers
///
/// A sink must be opened and its pin claimed before any pin is driven, and
/// closed afterwards.
/// `close` is only called on an opened sink.
pub trait PulseSink: Send {
    /// Acquire the hardware handle
    fn open(&mut self) -> Result<()>;

    /// Reserve `pin` as a low output before any pulse is emitted
    ///
    /// Sinks whose pins need no setup keep the default.
    fn claim(&mut self, _pin: u32) -> Result<()> {
        Ok(())
    }

    /// Drive `pin` high
    fn assert(&mut self, pin: u32) -> Result<()>;

    /// Drive `pin` low
    fn deassert(&mut self, pin: u32) -> Result<()>;

    /// Release the hardware handle
    fn close(&mut self);
}

/// One pulse to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseRequest {
    /// Output line to drive
    pub pin_id: u32,
    /// How long the line stays high
    pub duration: Duration,
}

impl PulseRequest {
    pub fn new(pin_id: u32, duration: Duration) -> Self {
        Self { pin_id, duration }
    }
}
