//! Per-provider 60-second sliding window, persisted as a KV sorted set.
//!
//! The window forbids clustering more than `limit` requests in any trailing
//! 60-second interval, even when the token bucket would momentarily permit a
//! burst.  Entries are `(score = epoch secs, member = "{ts}-{uuid}")`; the
//! unique member suffix keeps two admissions in the same instant distinct.

use std::sync::Arc;
use std::time::Duration;

use crate::squadron::clock::{self, Clock};
use crate::squadron::kv::{KvCommand, KvError, KvStore};

/// Default trailing horizon.
pub const DEFAULT_HORIZON: Duration = Duration::from_secs(60);

pub struct SlidingWindow {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    horizon: Duration,
}

impl SlidingWindow {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            clock,
            horizon: DEFAULT_HORIZON,
        }
    }

    fn key(provider: &str) -> String {
        format!("window:{}", provider)
    }

    /// Trim expired entries, count the rest, and admit iff under `limit`.
    ///
    /// Trim and count run as one pipeline so concurrent checks observe a
    /// consistent occupancy.
    pub async fn check_and_add(&self, provider: &str, limit: u32) -> Result<bool, KvError> {
        let key = Self::key(provider);
        let now = self.clock.epoch_secs();
        let cutoff = now - self.horizon.as_secs_f64();

        let results = self
            .kv
            .pipeline(vec![
                KvCommand::ZRemRangeByScore {
                    key: key.clone(),
                    lo: f64::NEG_INFINITY,
                    hi: cutoff,
                },
                KvCommand::ZCount {
                    key: key.clone(),
                    lo: f64::NEG_INFINITY,
                    hi: f64::INFINITY,
                },
            ])
            .await?;

        let occupancy = results.get(1).map(|v| v.as_int()).unwrap_or(0);
        if occupancy >= i64::from(limit) {
            return Ok(false);
        }

        let member = format!("{:.6}-{}", now, clock::request_id());
        self.kv.zadd(&key, now, &member).await?;
        self.kv.expire(&key, self.horizon * 2).await?;
        Ok(true)
    }

    /// Number of admissions currently inside the trailing horizon.
    pub async fn occupancy(&self, provider: &str) -> Result<u64, KvError> {
        let key = Self::key(provider);
        let now = self.clock.epoch_secs();
        let cutoff = now - self.horizon.as_secs_f64();
        self.kv
            .zremrangebyscore(&key, f64::NEG_INFINITY, cutoff)
            .await?;
        self.kv.zcount(&key, f64::NEG_INFINITY, f64::INFINITY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::squadron::clock::ManualClock;
    use crate::squadron::kv::MemoryKvStore;

    fn fixture() -> (SlidingWindow, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(5_000.0));
        let kv = Arc::new(MemoryKvStore::new());
        (SlidingWindow::new(kv, clock.clone()), clock)
    }

    #[tokio::test]
    async fn admits_up_to_limit_then_denies() {
        let (window, _clock) = fixture();
        for _ in 0..3 {
            assert!(window.check_and_add("p", 3).await.unwrap());
        }
        assert!(!window.check_and_add("p", 3).await.unwrap());
        assert_eq!(window.occupancy("p").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn entries_age_out_after_horizon() {
        let (window, clock) = fixture();
        for _ in 0..3 {
            assert!(window.check_and_add("p", 3).await.unwrap());
        }
        assert!(!window.check_and_add("p", 3).await.unwrap());

        clock.advance(Duration::from_secs(61));
        assert_eq!(window.occupancy("p").await.unwrap(), 0);
        assert!(window.check_and_add("p", 3).await.unwrap());
    }

    #[tokio::test]
    async fn windows_are_independent_per_provider() {
        let (window, _clock) = fixture();
        assert!(window.check_and_add("a", 1).await.unwrap());
        assert!(!window.check_and_add("a", 1).await.unwrap());
        assert!(window.check_and_add("b", 1).await.unwrap());
    }

    #[tokio::test]
    async fn no_trailing_interval_exceeds_limit() {
        let (window, clock) = fixture();
        let mut admitted_at: Vec<f64> = Vec::new();
        // Fire for three minutes at one attempt per second.
        for _ in 0..180 {
            if window.check_and_add("p", 10).await.unwrap() {
                admitted_at.push(clock.epoch_secs());
            }
            clock.advance(Duration::from_secs(1));
        }
        for (i, start) in admitted_at.iter().enumerate() {
            let in_window = admitted_at[i..]
                .iter()
                .take_while(|t| **t < start + 60.0)
                .count();
            assert!(in_window <= 10, "{} admissions inside one minute", in_window);
        }
    }
}
