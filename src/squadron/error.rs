//! Error taxonomy shared across the dispatch pipeline.
//!
//! Two layers of errors exist.  [`FailureKind`] classifies the outcome of a
//! single provider attempt and drives retry and fallback decisions.
//! [`SquadronError`] is what the orchestrator surfaces to callers: a typed
//! error carrying a machine-readable kind, a human message, and, for chain
//! exhaustion, the full list of attempted providers with their failures.
//!
//! Tool-execution failures deliberately do not appear here; they are returned
//! to the LLM as tool-role messages so the model can recover on its next turn
//! (see [`crate::tool_protocol`]).

use std::time::Duration;
use thiserror::Error;

/// Classified outcome of one provider call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureKind {
    /// HTTP 429 from the provider, optionally carrying a parsed `Retry-After`.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// The call exceeded the provider's configured timeout.
    #[error("provider call timed out")]
    Timeout,

    /// Transport-level failure (DNS, TLS, connection reset, KV outage).
    #[error("network error: {0}")]
    Network(String),

    /// HTTP 5xx from the provider.
    #[error("provider server error: HTTP {status}")]
    ServerError { status: u16 },

    /// HTTP 4xx other than 401/403/429; the request itself is malformed and
    /// will fail identically on every provider.
    #[error("bad request: HTTP {status}")]
    BadRequest { status: u16 },

    /// The response came back but failed the quality bar for its tier.
    #[error("response rejected: {reason}")]
    QualityRejected { reason: String },

    /// HTTP 401 or 403; the API key is missing, wrong, or revoked.
    #[error("authentication failed")]
    AuthFailed,

    /// Every link in the agent's provider chain failed.
    #[error("provider chain exhausted")]
    ChainExhausted,

    /// The caller's deadline elapsed or the caller dropped the request.
    #[error("cancelled by caller")]
    CancelledByCaller,
}

impl FailureKind {
    /// Stable snake_case identifier used in attempted-provider listings,
    /// structured events, and log lines.
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::RateLimited { .. } => "rate_limited",
            FailureKind::Timeout => "timeout",
            FailureKind::Network(_) => "network",
            FailureKind::ServerError { .. } => "server_error",
            FailureKind::BadRequest { .. } => "bad_request",
            FailureKind::QualityRejected { .. } => "quality_rejected",
            FailureKind::AuthFailed => "auth_failed",
            FailureKind::ChainExhausted => "chain_exhausted",
            FailureKind::CancelledByCaller => "cancelled",
        }
    }

    /// Whether the retry engine may try this provider again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::RateLimited { .. }
                | FailureKind::Timeout
                | FailureKind::Network(_)
                | FailureKind::ServerError { .. }
        )
    }

    /// Whether the fallback executor should advance to the next chain link
    /// after retries on the current provider are exhausted.
    pub fn advances_chain(&self) -> bool {
        matches!(
            self,
            FailureKind::RateLimited { .. }
                | FailureKind::Timeout
                | FailureKind::Network(_)
                | FailureKind::ServerError { .. }
        )
    }
}

/// One failed hop in a provider chain walk.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAttempt {
    /// Provider name as configured.
    pub provider: String,
    /// Final classified failure after retries.
    pub failure: FailureKind,
}

impl ProviderAttempt {
    pub fn new(provider: impl Into<String>, failure: FailureKind) -> Self {
        Self {
            provider: provider.into(),
            failure,
        }
    }
}

/// Errors surfaced by the orchestrator and runtime facade.
#[derive(Debug, Clone, Error)]
pub enum SquadronError {
    /// The requested agent id is not loaded; carries the ids that are.
    #[error("unknown agent '{agent_id}' (available: {})", .available.join(", "))]
    AgentNotFound {
        agent_id: String,
        available: Vec<String>,
    },

    /// Every provider in the chain failed; inspect provider status.
    #[error("all providers in the chain failed ({})", describe_attempts(.attempts))]
    ChainExhausted { attempts: Vec<ProviderAttempt> },

    /// A non-advancing provider failure (bad request, auth) on a named link.
    #[error("provider '{provider}' failed: {failure}")]
    Provider {
        provider: String,
        failure: FailureKind,
    },

    /// The caller's deadline elapsed; partial work was discarded.
    #[error("request cancelled by caller")]
    Cancelled,

    /// The KV store failed outside of a provider call path.
    #[error("storage error: {0}")]
    Storage(#[from] crate::squadron::kv::KvError),

    /// Startup configuration failed cross-validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SquadronError {
    /// Stable snake_case identifier for structured events and API surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            SquadronError::AgentNotFound { .. } => "agent_not_found",
            SquadronError::ChainExhausted { .. } => "chain_exhausted",
            SquadronError::Provider { .. } => "provider_failed",
            SquadronError::Cancelled => "cancelled",
            SquadronError::Storage(_) => "storage",
            SquadronError::Config(_) => "config",
        }
    }
}

fn describe_attempts(attempts: &[ProviderAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.provider, a.failure.code()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_codes_are_stable() {
        assert_eq!(
            FailureKind::RateLimited { retry_after: None }.code(),
            "rate_limited"
        );
        assert_eq!(FailureKind::Timeout.code(), "timeout");
        assert_eq!(FailureKind::AuthFailed.code(), "auth_failed");
        assert_eq!(FailureKind::ServerError { status: 502 }.code(), "server_error");
    }

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(FailureKind::RateLimited { retry_after: None }.is_retryable());
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::Network("reset".into()).is_retryable());
        assert!(FailureKind::ServerError { status: 500 }.is_retryable());
        assert!(!FailureKind::BadRequest { status: 422 }.is_retryable());
        assert!(!FailureKind::AuthFailed.is_retryable());
        assert!(!FailureKind::CancelledByCaller.is_retryable());
    }

    #[test]
    fn chain_exhausted_lists_every_attempt() {
        let err = SquadronError::ChainExhausted {
            attempts: vec![
                ProviderAttempt::new("stub_a", FailureKind::RateLimited { retry_after: None }),
                ProviderAttempt::new("stub_b", FailureKind::ServerError { status: 503 }),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("stub_a: rate_limited"));
        assert!(text.contains("stub_b: server_error"));
    }
}
