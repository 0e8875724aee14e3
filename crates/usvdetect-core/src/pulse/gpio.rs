//! Concrete pulse sinks
//!
//! [`SysfsGpio`] drives kernel GPIO lines through the sysfs interface.
//! [`DryRunSink`] only logs, for machines without an output line.

use super::PulseSink;
use crate::error::{DetectorError, Result};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Default sysfs GPIO root
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// GPIO output through `/sys/class/gpio`
///
/// Pins are kernel GPIO numbers. A pin is exported and switched to output
/// when it is claimed (or first driven); pins this sink exported are
/// unexported again on close.
pub struct SysfsGpio {
    root: PathBuf,
    opened: bool,
    exported: Vec<u32>,
    values: HashMap<u32, File>,
}

impl SysfsGpio {
    pub fn new() -> Self {
        Self::with_root(SYSFS_GPIO_ROOT)
    }

    /// Use a different sysfs root
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            opened: false,
            exported: Vec::new(),
            values: HashMap::new(),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }

    fn output(&mut self, pin: u32) -> Result<&mut File> {
        if !self.opened {
            return Err(DetectorError::HardwareHandle(
                "GPIO sink is not open".to_string(),
            ));
        }
        if !self.values.contains_key(&pin) {
            let dir = self.pin_dir(pin);
            if !dir.exists() {
                fs::write(self.root.join("export"), pin.to_string())?;
                self.exported.push(pin);
                tracing::debug!(pin, "Exported GPIO pin");
            }
            if !dir.exists() {
                return Err(DetectorError::HardwareHandle(format!(
                    "GPIO {} did not appear at {}",
                    pin,
                    dir.display()
                )));
            }
            fs::write(dir.join("direction"), "out")?;
            let file = OpenOptions::new().write(true).open(dir.join("value"))?;
            self.values.insert(pin, file);
        }
        self.values
            .get_mut(&pin)
            .ok_or_else(|| DetectorError::HardwareHandle(format!("GPIO {} not claimed", pin)))
    }

    fn write_level(file: &mut File, level: &[u8]) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(level)?;
        file.flush()?;
        Ok(())
    }

    /// Root this sink was created with
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseSink for SysfsGpio {
    fn open(&mut self) -> Result<()> {
        if !self.root.join("export").exists() {
            return Err(DetectorError::HardwareHandle(format!(
                "GPIO interface not found at {}",
                self.root.display()
            )));
        }
        self.opened = true;
        tracing::info!(root = %self.root.display(), "GPIO sink opened");
        Ok(())
    }

    fn claim(&mut self, pin: u32) -> Result<()> {
        let file = self.output(pin)?;
        Self::write_level(file, b"0")
    }

    fn assert(&mut self, pin: u32) -> Result<()> {
        let file = self.output(pin)?;
        Self::write_level(file, b"1")
    }

    fn deassert(&mut self, pin: u32) -> Result<()> {
        match self.values.get_mut(&pin) {
            Some(file) => Self::write_level(file, b"0"),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        for (pin, mut file) in self.values.drain() {
            if let Err(e) = Self::write_level(&mut file, b"0") {
                tracing::warn!(pin, error = %e, "Failed to lower GPIO on close");
            }
        }
        for pin in self.exported.drain(..) {
            if let Err(e) = fs::write(self.root.join("unexport"), pin.to_string()) {
                tracing::warn!(pin, error = %e, "Failed to unexport GPIO");
            }
        }
        self.opened = false;
        tracing::info!("GPIO sink closed");
    }
}

/// Sink that logs pulses instead of driving hardware
#[derive(Debug, Default)]
pub struct DryRunSink {
    asserted: u64,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times a pin was raised
    pub fn asserted(&self) -> u64 {
        self.asserted
    }
}

impl PulseSink for DryRunSink {
    fn open(&mut self) -> Result<()> {
        tracing::info!("Dry-run pulse sink opened, no hardware will be driven");
        Ok(())
    }

    fn assert(&mut self, pin: u32) -> Result<()> {
        self.asserted += 1;
        tracing::info!(pin, "Pulse high (dry run)");
        Ok(())
    }

    fn deassert(&mut self, pin: u32) -> Result<()> {
        tracing::info!(pin, "Pulse low (dry run)");
        Ok(())
    }

    fn close(&mut self) {
        tracing::info!(pulses = self.asserted, "Dry-run pulse sink closed");
    }
}
