//! Per-provider token bucket, persisted in KV.
//!
//! State lives in the hash `bucket:{provider}` as `tokens` (a real number)
//! and `last_refill` (epoch seconds).  Refill happens lazily on every
//! acquisition: `elapsed × rpm / 60`, capped at burst.  The bucket is the
//! final admission step of the composite rate gate; the sliding window
//! provides the precision leg (see [`super::window`]).

use std::sync::Arc;
use std::time::Duration;

use crate::squadron::clock::Clock;
use crate::squadron::kv::{KvError, KvStore};

/// Outcome of a bucket acquisition attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketDecision {
    pub admitted: bool,
    /// How long the caller should wait before the next token is expected.
    /// Zero when admitted.
    pub wait_hint: Duration,
}

pub struct TokenBucket {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    fn key(provider: &str) -> String {
        format!("bucket:{}", provider)
    }

    async fn load(&self, provider: &str) -> Result<Option<(f64, f64)>, KvError> {
        let key = Self::key(provider);
        let tokens = self.kv.hget(&key, "tokens").await?;
        let last_refill = self.kv.hget(&key, "last_refill").await?;
        match (tokens, last_refill) {
            (Some(tokens), Some(last_refill)) => {
                let tokens = tokens.parse::<f64>().unwrap_or(0.0);
                let last_refill = last_refill.parse::<f64>().unwrap_or(0.0);
                Ok(Some((tokens, last_refill)))
            }
            _ => Ok(None),
        }
    }

    async fn store(&self, provider: &str, tokens: f64, now: f64) -> Result<(), KvError> {
        let key = Self::key(provider);
        self.kv.hset(&key, "tokens", &format!("{:.6}", tokens)).await?;
        self.kv
            .hset(&key, "last_refill", &format!("{:.6}", now))
            .await
    }

    /// Refill, then take one token if at least one is available.
    ///
    /// `rpm` is the *effective* requests-per-minute for the provider (the
    /// adaptive throttle may have lowered it below the configured value);
    /// `burst` is the configured burst capacity and bounds the token count.
    pub async fn try_acquire(
        &self,
        provider: &str,
        rpm: u32,
        burst: u32,
    ) -> Result<BucketDecision, KvError> {
        let now = self.clock.epoch_secs();
        let burst_f = f64::from(burst);
        let rate_per_sec = f64::from(rpm) / 60.0;

        let (mut tokens, last_refill) = match self.load(provider).await? {
            Some(state) => state,
            None => (burst_f, now),
        };

        let elapsed = (now - last_refill).max(0.0);
        tokens = (tokens + elapsed * rate_per_sec).clamp(0.0, burst_f);

        if tokens >= 1.0 {
            tokens -= 1.0;
            self.store(provider, tokens, now).await?;
            Ok(BucketDecision {
                admitted: true,
                wait_hint: Duration::ZERO,
            })
        } else {
            self.store(provider, tokens, now).await?;
            let wait_secs = (1.0 - tokens) * 60.0 / f64::from(rpm.max(1));
            Ok(BucketDecision {
                admitted: false,
                wait_hint: Duration::from_secs_f64(wait_secs),
            })
        }
    }

    /// Whole tokens currently available, after projecting the refill to now.
    /// Introspection only; does not mutate state.
    pub async fn available(&self, provider: &str, rpm: u32, burst: u32) -> Result<u32, KvError> {
        let now = self.clock.epoch_secs();
        let burst_f = f64::from(burst);
        let (tokens, last_refill) = match self.load(provider).await? {
            Some(state) => state,
            None => return Ok(burst),
        };
        let elapsed = (now - last_refill).max(0.0);
        let projected = (tokens + elapsed * f64::from(rpm) / 60.0).clamp(0.0, burst_f);
        Ok(projected.floor() as u32)
    }
}
