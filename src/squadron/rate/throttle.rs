//! Spike detection and adaptive self-throttling.
//!
//! Every HTTP 429 is recorded in the 60-second sorted set `spike:{provider}`.
//! Three or more entries inside the horizon mean the provider is spiking: the
//! effective RPM drops to `max(current × 0.8, configured × 0.5)` and a
//! throttle event is emitted.  At most one drop happens per 60-second
//! episode, so a burst of 429s inside one spike does not cascade the cap
//! downward.
//!
//! While throttled, every 60-second observation interval with no new 429
//! restores `configured × 0.1` RPM (whole steps, at least 1), capped at the
//! configured value.  Restoration is applied lazily on [`effective_rpm`]
//! reads, which the bucket and window perform on every acquisition, so cap
//! changes take effect immediately without restart.  A new 429 during
//! restoration resets the restoration clock without re-dropping the cap.
//!
//! [`effective_rpm`]: AdaptiveThrottle::effective_rpm

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::squadron::clock::{self, Clock};
use crate::squadron::event::{EventHandler, SquadronEvent};
use crate::squadron::kv::{KvError, KvStore};

/// 429 count inside the horizon that marks a provider as spiking.
pub const SPIKE_THRESHOLD: u64 = 3;
/// Multiplier applied to the effective RPM on spike.
pub const DROP_FACTOR: f64 = 0.8;
/// The effective RPM never falls below this fraction of the configured RPM.
pub const FLOOR_FACTOR: f64 = 0.5;
/// Fraction of the configured RPM restored per clean observation interval.
pub const RESTORE_FACTOR: f64 = 0.1;

const HORIZON: Duration = Duration::from_secs(60);

pub struct AdaptiveThrottle {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<dyn EventHandler>>,
}

impl AdaptiveThrottle {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            kv,
            clock,
            events: None,
        }
    }

    /// Register an observer for throttle engagement and restoration events.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = Some(handler);
        self
    }

    fn spike_key(provider: &str) -> String {
        format!("spike:{}", provider)
    }

    fn effective_key(provider: &str) -> String {
        format!("effective_rpm:{}", provider)
    }

    fn meta_key(provider: &str) -> String {
        format!("throttle:{}", provider)
    }

    fn floor(configured_rpm: u32) -> u32 {
        ((f64::from(configured_rpm) * FLOOR_FACTOR).ceil() as u32).max(1)
    }

    async fn emit(&self, event: SquadronEvent) {
        if let Some(handler) = &self.events {
            handler.on_event(&event).await;
        }
    }

    async fn read_effective(&self, provider: &str, configured_rpm: u32) -> Result<u32, KvError> {
        let stored = self.kv.get(&Self::effective_key(provider)).await?;
        let effective = stored
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(configured_rpm);
        Ok(effective.clamp(Self::floor(configured_rpm), configured_rpm))
    }

    async fn write_effective(&self, provider: &str, value: u32) -> Result<(), KvError> {
        self.kv
            .set(&Self::effective_key(provider), &value.to_string())
            .await
    }

    async fn read_meta(&self, provider: &str, field: &str) -> Result<f64, KvError> {
        Ok(self
            .kv
            .hget(&Self::meta_key(provider), field)
            .await?
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0))
    }

    async fn write_meta(&self, provider: &str, field: &str, value: f64) -> Result<(), KvError> {
        self.kv
            .hset(&Self::meta_key(provider), field, &format!("{:.6}", value))
            .await
    }

    /// Record one rate-limit rejection and drop the cap on spike transition.
    pub async fn record_429(&self, provider: &str, configured_rpm: u32) -> Result<(), KvError> {
        let now = self.clock.epoch_secs();
        let key = Self::spike_key(provider);
        let cutoff = now - HORIZON.as_secs_f64();

        self.kv
            .zremrangebyscore(&key, f64::NEG_INFINITY, cutoff)
            .await?;
        let member = format!("{:.6}-{}", now, clock::request_id());
        self.kv.zadd(&key, now, &member).await?;
        self.kv.expire(&key, HORIZON * 2).await?;

        // Any 429 resets the restoration clock.
        self.write_meta(provider, "last_429", now).await?;

        let count = self.kv.zcount(&key, f64::NEG_INFINITY, f64::INFINITY).await?;
        if count < SPIKE_THRESHOLD {
            return Ok(());
        }

        // One drop per 60-second spike episode.
        let last_drop = self.read_meta(provider, "last_drop").await?;
        if last_drop > 0.0 && now - last_drop < HORIZON.as_secs_f64() {
            return Ok(());
        }

        let current = self.read_effective(provider, configured_rpm).await?;
        let dropped =
            ((f64::from(current) * DROP_FACTOR).floor() as u32).max(Self::floor(configured_rpm));
        if dropped < current {
            self.write_effective(provider, dropped).await?;
            self.write_meta(provider, "last_drop", now).await?;
            warn!(
                "provider '{}' is spiking ({} rate limits in {}s), throttling {} -> {} rpm",
                provider,
                count,
                HORIZON.as_secs(),
                current,
                dropped
            );
            self.emit(SquadronEvent::ThrottleEngaged {
                provider: provider.to_string(),
                effective_rpm: dropped,
            })
            .await;
        }
        Ok(())
    }

    /// Hook invoked after a successful provider call; trims the spike set and
    /// gives restoration a chance to run.
    pub async fn record_success(&self, provider: &str, configured_rpm: u32) -> Result<(), KvError> {
        self.effective_rpm(provider, configured_rpm).await?;
        Ok(())
    }

    /// Currently active requests-per-minute ceiling for the provider.
    ///
    /// Applies one restoration step when the provider is throttled, the last
    /// 60 seconds saw no 429, and at least one observation interval passed
    /// since the previous adjustment.
    pub async fn effective_rpm(&self, provider: &str, configured_rpm: u32) -> Result<u32, KvError> {
        let effective = self.read_effective(provider, configured_rpm).await?;
        if effective >= configured_rpm {
            return Ok(configured_rpm);
        }

        let now = self.clock.epoch_secs();
        if self.recent_429s(provider).await? > 0 {
            return Ok(effective);
        }

        let last_429 = self.read_meta(provider, "last_429").await?;
        let last_drop = self.read_meta(provider, "last_drop").await?;
        let last_restore = self.read_meta(provider, "last_restore").await?;
        let anchor = last_429.max(last_drop).max(last_restore);
        if now - anchor < HORIZON.as_secs_f64() {
            return Ok(effective);
        }

        let step = ((f64::from(configured_rpm) * RESTORE_FACTOR).floor() as u32).max(1);
        let restored = (effective + step).min(configured_rpm);
        self.write_effective(provider, restored).await?;
        self.write_meta(provider, "last_restore", now).await?;
        if restored >= configured_rpm {
            info!(
                "provider '{}' restored to configured {} rpm",
                provider, configured_rpm
            );
            self.emit(SquadronEvent::ThrottleRestored {
                provider: provider.to_string(),
                effective_rpm: restored,
            })
            .await;
        }
        Ok(restored)
    }

    /// 429 count inside the trailing horizon.
    pub async fn recent_429s(&self, provider: &str) -> Result<u64, KvError> {
        let key = Self::spike_key(provider);
        let cutoff = self.clock.epoch_secs() - HORIZON.as_secs_f64();
        self.kv
            .zremrangebyscore(&key, f64::NEG_INFINITY, cutoff)
            .await?;
        self.kv.zcount(&key, f64::NEG_INFINITY, f64::INFINITY).await
    }
}
