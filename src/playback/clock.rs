//! Output-timeline clocks.
//!
//! The scheduler reads time through a trait so the same logic runs against a
//! real audio device clock in production and a virtual clock in tests.

use std::sync::Mutex;
use std::time::Instant;

/// Monotonic audio-output timeline, in seconds.
pub trait OutputClock: Send + Sync {
    fn now_secs(&self) -> f64;
}

/// Wall-clock backed output timeline anchored at construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for SystemClock {
    fn now_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually advanced clock for deterministic scheduling tests.
pub struct VirtualClock {
    now: Mutex<f64>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(0.0),
        }
    }

    pub fn set(&self, secs: f64) {
        *self.now.lock().expect("clock lock poisoned") = secs;
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock().expect("clock lock poisoned") += secs;
    }
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputClock for VirtualClock {
    fn now_secs(&self) -> f64 {
        *self.now.lock().expect("clock lock poisoned")
    }
}
