//! Time and identifier sources.
//!
//! Every time-sensitive component (token bucket, sliding window, spike
//! detector, conversation TTLs) reads the current time through the [`Clock`]
//! trait instead of calling the system clock directly.  Production code uses
//! [`SystemClock`]; tests drive a [`ManualClock`] to replay rate-limit
//! scenarios deterministically without sleeping.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// Source of UTC wall time expressed as fractional epoch seconds.
///
/// Implementations must be cheap to call: the rate gate consults the clock on
/// every admission check.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch, with sub-second precision.
    fn epoch_secs(&self) -> f64;

    /// Current UTC wall time.
    fn utc_now(&self) -> DateTime<Utc> {
        let secs = self.epoch_secs();
        let nanos = ((secs.fract()) * 1e9) as u32;
        DateTime::from_timestamp(secs as i64, nanos).unwrap_or_else(Utc::now)
    }
}

/// Production clock backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_secs(&self) -> f64 {
        let now = Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_nanos()) / 1e9
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that only moves when told to.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use squadron::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000.0);
/// clock.advance(Duration::from_secs(60));
/// assert_eq!(clock.epoch_secs(), 1_060.0);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    secs: Mutex<f64>,
}

impl ManualClock {
    /// Create a clock frozen at the given epoch second.
    pub fn new(start_secs: f64) -> Self {
        Self {
            secs: Mutex::new(start_secs),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut secs = self.secs.lock().unwrap();
        *secs += by.as_secs_f64();
    }

    /// Jump the clock to an absolute epoch second.
    pub fn set(&self, to_secs: f64) {
        *self.secs.lock().unwrap() = to_secs;
    }
}

impl Clock for ManualClock {
    fn epoch_secs(&self) -> f64 {
        *self.secs.lock().unwrap()
    }
}

/// Generate a unique request identifier.
///
/// Used for correlation across log lines and as the member value of
/// sliding-window entries, where uniqueness prevents two admissions in the
/// same instant from collapsing into one sorted-set member.
pub fn request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100.0);
        assert_eq!(clock.epoch_secs(), 100.0);
        clock.advance(Duration::from_millis(1500));
        assert!((clock.epoch_secs() - 101.5).abs() < 1e-9);
        clock.set(42.0);
        assert_eq!(clock.epoch_secs(), 42.0);
    }

    #[test]
    fn request_ids_are_unique() {
        let a = request_id();
        let b = request_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.epoch_secs();
        let b = clock.epoch_secs();
        assert!(b >= a);
    }
}
