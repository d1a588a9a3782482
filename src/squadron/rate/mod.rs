//! Rate-limit admission.
//!
//! Composes three gates in a fixed order: the process-wide
//! [`GlobalGate`](gate::GlobalGate) (prevents a thundering herd on the KV
//! store), the per-provider [`SlidingWindow`](window::SlidingWindow) (the
//! cheap precise check), and the per-provider
//! [`TokenBucket`](bucket::TokenBucket) (final admission).  A denial at the
//! window or bucket releases the global permit before the gate sleeps and
//! tries again, so waiting callers never starve the process-wide slots.
//!
//! Both per-provider checks consult the
//! [`AdaptiveThrottle`](throttle::AdaptiveThrottle) for the effective RPM on
//! every acquisition, so cap changes apply immediately.

pub mod bucket;
pub mod gate;
pub mod throttle;
pub mod window;

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::squadron::clock::Clock;
use crate::squadron::error::FailureKind;
use crate::squadron::event::EventHandler;
use crate::squadron::kv::{KvError, KvStore};

use bucket::TokenBucket;
use gate::{GatePermit, GlobalGate};
use throttle::AdaptiveThrottle;
use window::SlidingWindow;

/// Floor for denial-retry sleeps, so a zero wait hint cannot spin-loop.
const MIN_BACKOFF: Duration = Duration::from_millis(50);

/// Admission handle.  The window and bucket are event-based, so release only
/// returns the global concurrency slot (on drop).
pub struct RatePermit {
    _gate: GatePermit,
}

/// Rate-state snapshot for one provider, used by status surfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct RateStatus {
    pub configured_rpm: u32,
    pub effective_rpm: u32,
    pub bucket_tokens: u32,
    pub window_occupancy: u64,
    pub recent_429_count: u64,
}

pub struct RateGate {
    global: GlobalGate,
    window: SlidingWindow,
    bucket: TokenBucket,
    throttle: Arc<AdaptiveThrottle>,
}

impl RateGate {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, global_capacity: usize) -> Self {
        Self {
            global: GlobalGate::new(global_capacity),
            window: SlidingWindow::new(kv.clone(), clock.clone()),
            bucket: TokenBucket::new(kv.clone(), clock.clone()),
            throttle: Arc::new(AdaptiveThrottle::new(kv, clock)),
        }
    }

    /// Route throttle events (engaged/restored) to an observer.
    pub fn with_event_handler(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        global_capacity: usize,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            global: GlobalGate::new(global_capacity),
            window: SlidingWindow::new(kv.clone(), clock.clone()),
            bucket: TokenBucket::new(kv.clone(), clock.clone()),
            throttle: Arc::new(
                AdaptiveThrottle::new(kv, clock).with_event_handler(handler),
            ),
        }
    }

    /// Shared spike detector, also fed by the retry engine on every 429.
    pub fn throttle(&self) -> Arc<AdaptiveThrottle> {
        self.throttle.clone()
    }

    /// Block until the provider admits one request or `deadline` elapses.
    ///
    /// Order is a contract: global gate, then sliding window, then token
    /// bucket.  A per-provider denial drops the global permit, sleeps (the
    /// bucket's wait hint when available), and re-enters the queue.
    pub async fn acquire(
        &self,
        provider: &str,
        configured_rpm: u32,
        burst: u32,
        deadline: Instant,
    ) -> Result<RatePermit, FailureKind> {
        loop {
            if Instant::now() >= deadline {
                return Err(FailureKind::CancelledByCaller);
            }

            let permit = self.global.acquire(deadline).await?;
            let effective = self
                .throttle
                .effective_rpm(provider, configured_rpm)
                .await
                .map_err(kv_failure)?;

            if !self
                .window
                .check_and_add(provider, effective)
                .await
                .map_err(kv_failure)?
            {
                drop(permit);
                debug!("window full for '{}', backing off", provider);
                sleep_until_or(deadline, MIN_BACKOFF).await?;
                continue;
            }

            let decision = self
                .bucket
                .try_acquire(provider, effective, burst)
                .await
                .map_err(kv_failure)?;
            if !decision.admitted {
                drop(permit);
                debug!(
                    "bucket empty for '{}', waiting {:?}",
                    provider, decision.wait_hint
                );
                sleep_until_or(deadline, decision.wait_hint.max(MIN_BACKOFF)).await?;
                continue;
            }

            return Ok(RatePermit { _gate: permit });
        }
    }

    /// Introspect rate state without consuming anything.
    pub async fn status(
        &self,
        provider: &str,
        configured_rpm: u32,
        burst: u32,
    ) -> Result<RateStatus, KvError> {
        let effective = self.throttle.effective_rpm(provider, configured_rpm).await?;
        Ok(RateStatus {
            configured_rpm,
            effective_rpm: effective,
            bucket_tokens: self.bucket.available(provider, effective, burst).await?,
            window_occupancy: self.window.occupancy(provider).await?,
            recent_429_count: self.throttle.recent_429s(provider).await?,
        })
    }

    pub fn global_capacity(&self) -> usize {
        self.global.capacity()
    }

    pub fn global_available(&self) -> usize {
        self.global.available()
    }
}

fn kv_failure(err: KvError) -> FailureKind {
    FailureKind::Network(err.to_string())
}

/// Sleep for `wait`, clipped to the deadline; erroring out when the deadline
/// arrives first so callers stop waiting exactly on time.
async fn sleep_until_or(deadline: Instant, wait: Duration) -> Result<(), FailureKind> {
    let wake = Instant::now() + wait;
    if wake >= deadline {
        tokio::time::sleep_until(deadline).await;
        return Err(FailureKind::CancelledByCaller);
    }
    tokio::time::sleep_until(wake).await;
    Ok(())
}
