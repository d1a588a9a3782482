//! Structured event hooks.
//!
//! The orchestrator and the adaptive throttle emit [`SquadronEvent`]s at the
//! points an external audit sink cares about: request lifecycle, provider
//! attempts, throttle engagement, tool invocations.  Field names are stable;
//! subscribers must never need to reach into component internals.
//!
//! Implement [`EventHandler`] and register it on the runtime.  All methods
//! default to no-ops so a handler only overrides what it consumes.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use squadron::event::{EventHandler, SquadronEvent};
//!
//! struct AuditSink;
//!
//! #[async_trait]
//! impl EventHandler for AuditSink {
//!     async fn on_event(&self, event: &SquadronEvent) {
//!         if let SquadronEvent::ThrottleEngaged { provider, effective_rpm } = event {
//!             eprintln!("throttled {} to {} rpm", provider, effective_rpm);
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Observable side effects of the dispatch pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SquadronEvent {
    /// An orchestrator call began.
    RequestStarted {
        user_id: String,
        agent_id: String,
        mode: String,
    },
    /// One provider chain link finished (successfully or not).
    ProviderAttempted {
        provider: String,
        /// 1-based position in the chain walk.
        attempt: u32,
        /// `"ok"` or a [`FailureKind::code`](crate::squadron::error::FailureKind::code).
        outcome: String,
    },
    /// The spike detector lowered a provider's effective RPM.
    ThrottleEngaged {
        provider: String,
        effective_rpm: u32,
    },
    /// A throttled provider returned to its configured RPM.
    ThrottleRestored {
        provider: String,
        effective_rpm: u32,
    },
    /// A tool finished executing inside the tool loop.
    ToolInvoked {
        name: String,
        success: bool,
        elapsed_ms: u64,
    },
    /// The orchestrator call completed with a final assistant message.
    RequestCompleted {
        provider: String,
        turns: u32,
        latency_ms: u64,
    },
    /// The orchestrator call failed; `code` is a stable error identifier.
    RequestFailed { code: String },
    /// The loader replaced a cached agent definition after a file change.
    AgentReloaded { agent_id: String },
}

/// Callback interface for observers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, _event: &SquadronEvent) {}
}

/// Handler that records every event in order; intended for tests and
/// debugging sessions.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<SquadronEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything received so far.
    pub async fn events(&self) -> Vec<SquadronEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventHandler for MemoryEventLog {
    async fn on_event(&self, event: &SquadronEvent) {
        self.events.lock().await.push(event.clone());
    }
}
