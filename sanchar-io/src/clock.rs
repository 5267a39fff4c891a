//! Monotonic time source, injected wherever wall-clock age matters so tests
//! can drive timeouts without sleeping.

use std::sync::Mutex;
use std::time::Instant;

/// Monotonic seconds source
pub trait Clock: Send + Sync {
    /// Seconds since an arbitrary fixed origin; never decreases
    fn now_seconds(&self) -> f64;
}

/// Production clock: seconds since construction
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Test clock advanced by hand
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `dt` seconds
    pub fn advance(&self, dt: f64) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += dt;
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> f64 {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
