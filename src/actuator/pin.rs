//! Output pin drivers

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A single binary output
pub trait OutputPin: Send {
    /// Drive the output to `level`
    fn set(&mut self, level: bool);

    /// Invert the output
    fn toggle(&mut self) {
        let level = self.level();
        self.set(!level);
    }

    /// Last level driven
    fn level(&self) -> bool;
}

/// LED exposed by the kernel under `/sys/class/leds`
pub struct SysfsLed {
    brightness: PathBuf,
    on_value: String,
    level: bool,
}

impl SysfsLed {
    /// Open `/sys/class/leds/<name>` and switch the LED off
    pub fn open(name: &str) -> Result<Self> {
        let dir = PathBuf::from("/sys/class/leds").join(name);
        let max = std::fs::read_to_string(dir.join("max_brightness"))
            .with_context(|| format!("LED '{}' not found under /sys/class/leds", name))?;
        let on_value = match max.trim() {
            "" | "0" => "1".to_string(),
            other => other.to_string(),
        };

        let mut led = Self {
            brightness: dir.join("brightness"),
            on_value,
            level: false,
        };
        led.set(false);
        Ok(led)
    }
}

impl OutputPin for SysfsLed {
    fn set(&mut self, level: bool) {
        let value = if level { self.on_value.as_str() } else { "0" };
        if let Err(e) = std::fs::write(&self.brightness, value) {
            warn!("[LED] Failed to write {}: {}", self.brightness.display(), e);
        }
        self.level = level;
    }

    fn level(&self) -> bool {
        self.level
    }
}

/// In-memory output for development and tests
///
/// Clones share state, so a clone kept aside observes the driven pin.
#[derive(Clone, Default)]
pub struct MemoryPin {
    level: Arc<AtomicBool>,
    toggles: Arc<AtomicUsize>,
    sets: Arc<AtomicUsize>,
}

impl MemoryPin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of toggles performed so far
    #[cfg(test)]
    pub fn toggles(&self) -> usize {
        self.toggles.load(Ordering::SeqCst)
    }

    /// Number of explicit level writes so far
    #[cfg(test)]
    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// Current level
    pub fn is_on(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl OutputPin for MemoryPin {
    fn set(&mut self, level: bool) {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.level.store(level, Ordering::SeqCst);
        debug!("[LED] (memory) level={}", level);
    }

    fn toggle(&mut self) {
        self.toggles.fetch_add(1, Ordering::SeqCst);
        let was = self.level.fetch_xor(true, Ordering::SeqCst);
        debug!("[LED] (memory) level={}", !was);
    }

    fn level(&self) -> bool {
        self.is_on()
    }
}
