//! LED actuation
//!
//! This module handles:
//! - Driving the physical output (sysfs LED or in-memory pin)
//! - Timed auto-off and blink jobs, one at a time
//! - Parameter validation for control directives

mod pin;
mod scheduler;

pub use pin::{MemoryPin, OutputPin, SysfsLed};
pub use scheduler::ActuatorScheduler;

use anyhow::Result;

/// Which output the firmware drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedSelection {
    /// Kernel LED class device, e.g. `led0` or `ACT`
    Sysfs(String),
    /// No hardware, level kept in memory
    Memory,
}

/// Actuator configuration
#[derive(Debug, Clone)]
pub struct ActuatorConfig {
    pub led: LedSelection,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            led: LedSelection::Sysfs("led0".into()),
        }
    }
}

impl ActuatorConfig {
    /// Open the configured output
    pub fn open_pin(&self) -> Result<Box<dyn OutputPin>> {
        match &self.led {
            LedSelection::Sysfs(name) => Ok(Box::new(SysfsLed::open(name)?)),
            LedSelection::Memory => Ok(Box::new(MemoryPin::new())),
        }
    }
}
