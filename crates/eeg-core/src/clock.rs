//! Clock sources shared by marker and signal sessions
//!
//! Every timestamp in the toolkit is a floating point number of seconds on a
//! monotonic timeline. Components that belong to one experiment session must
//! read the same clock so their markers and chunks line up downstream.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic time source, in seconds
pub trait Clock: Send + Sync {
    /// Current time in seconds
    fn now(&self) -> f64;

    /// Block the calling thread for `secs` seconds
    fn sleep(&self, secs: f64) {
        if secs > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(secs));
        }
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn sleep(&self, secs: f64) {
        (**self).sleep(secs)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn sleep(&self, secs: f64) {
        (**self).sleep(secs)
    }
}

/// Wall clock backed by `Instant`
///
/// Clones share the origin, so two components built from clones of one
/// `MonotonicClock` report times on the same timeline.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose zero is the moment of construction
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Create a clock anchored at an existing instant
    pub fn with_origin(origin: Instant) -> Self {
        Self { origin }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually driven clock for deterministic timing
///
/// `sleep` advances the shared time instead of blocking, so a real-time loop
/// driven by a `ManualClock` runs instantly and reproducibly.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Arc<Mutex<f64>>,
}

impl ManualClock {
    /// Create a clock starting at `start` seconds
    pub fn new(start: f64) -> Self {
        Self {
            time: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `secs`
    pub fn advance(&self, secs: f64) {
        let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
        *time += secs;
    }

    /// Jump the clock to an absolute time
    pub fn set(&self, secs: f64) {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner) = secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.time.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, secs: f64) {
        if secs > 0.0 {
            self.advance(secs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let first = clock.now();
        clock.sleep(0.002);
        let second = clock.now();
        assert!(first >= 0.0);
        assert!(second >= first + 0.001);
    }

    #[test]
    fn test_monotonic_clock_with_origin() {
        let origin = Instant::now().checked_sub(Duration::from_secs(2)).unwrap();
        let clock = MonotonicClock::with_origin(origin);
        let now = clock.now();
        assert!(now >= 2.0 && now < 10.0);
    }

    #[test]
    fn test_monotonic_clones_share_origin() {
        let clock = MonotonicClock::new();
        let copy = clock;
        let a = clock.now();
        let b = copy.now();
        assert!((b - a).abs() < 0.01);
    }

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new(10.0);
        let shared = clock.clone();

        clock.sleep(0.5);
        assert_eq!(shared.now(), 10.5);

        shared.set(2.0);
        assert_eq!(clock.now(), 2.0);

        clock.sleep(-1.0);
        assert_eq!(clock.now(), 2.0);
    }

    #[test]
    fn test_clock_through_arc() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1.0));
        clock.sleep(1.0);
        assert_eq!(clock.now(), 2.0);
    }
}
