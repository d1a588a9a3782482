//! Ordered provider-chain execution with quality escalation.
//!
//! Given an agent id and a materialized request, the executor walks the
//! agent's chain strictly in list order, never racing links in parallel.
//! Each hop acquires the rate gate and goes through the retry engine; the
//! final classified failure decides whether to advance:
//!
//! - `RateLimited` / `Timeout` / `Network` / `ServerError`: record, advance.
//! - `BadRequest` / `AuthFailed`: the request itself is at fault, surface
//!   immediately without advancing.
//! - Quality rejection on a worker-tier provider escalates to a boss-tier
//!   link when one remains later in the chain; otherwise the response is
//!   returned as-is (returning beats an escalation loop that can never
//!   terminate).
//!
//! Chain exhaustion reports every link's failure in attempt order.  The
//! caller deadline is honored at every hop; elapsing mid-chain returns
//! cancellation.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

use crate::squadron::client_wrapper::{ChatRequest, LlmResponse, ProviderClient};
use crate::squadron::config::{ProviderConfig, Tier};
use crate::squadron::error::{FailureKind, ProviderAttempt, SquadronError};
use crate::squadron::event::{EventHandler, SquadronEvent};
use crate::squadron::quality::{QualityValidator, Verdict};
use crate::squadron::rate::RateGate;
use crate::squadron::retry::{call_with_retry, RetryPolicy};

/// Registered provider: the adapter plus its validated configuration.
pub struct ProviderEntry {
    pub client: Arc<dyn ProviderClient>,
    pub config: ProviderConfig,
}

/// Successful dispatch result.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub response: LlmResponse,
    /// Provider that produced the accepted response.
    pub provider: String,
    /// True when any link other than the primary served the request.
    pub fallback_used: bool,
    /// The validator's verdict; `Rejected` when the response was returned
    /// as-is because no boss-tier escalation remained.
    pub quality: Verdict,
}

pub struct FallbackExecutor {
    providers: HashMap<String, ProviderEntry>,
    chains: HashMap<String, Vec<String>>,
    rate_gate: Arc<RateGate>,
    retry_policy: RetryPolicy,
    validator: QualityValidator,
    events: Option<Arc<dyn EventHandler>>,
}

impl FallbackExecutor {
    pub fn new(rate_gate: Arc<RateGate>) -> Self {
        Self {
            providers: HashMap::new(),
            chains: HashMap::new(),
            rate_gate,
            retry_policy: RetryPolicy::default(),
            validator: QualityValidator::default(),
            events: None,
        }
    }

    pub fn with_provider(
        mut self,
        client: Arc<dyn ProviderClient>,
        config: ProviderConfig,
    ) -> Self {
        self.providers
            .insert(config.name.clone(), ProviderEntry { client, config });
        self
    }

    pub fn with_chain(mut self, agent_id: impl Into<String>, links: Vec<String>) -> Self {
        self.chains.insert(agent_id.into(), links);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_validator(mut self, validator: QualityValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = Some(handler);
        self
    }

    pub fn chain_for(&self, agent_id: &str) -> Option<&[String]> {
        self.chains.get(agent_id).map(|links| links.as_slice())
    }

    pub fn provider_entry(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }

    pub fn rate_gate(&self) -> &RateGate {
        &self.rate_gate
    }

    async fn emit(&self, event: SquadronEvent) {
        if let Some(handler) = &self.events {
            handler.on_event(&event).await;
        }
    }

    /// Walk the agent's chain until one link produces an acceptable response.
    ///
    /// `validate_quality` is false in yolo mode; rate limits and retries still
    /// apply, only the validator is bypassed.
    pub async fn dispatch(
        &self,
        agent_id: &str,
        request: &ChatRequest,
        validate_quality: bool,
        deadline: Instant,
    ) -> Result<DispatchOutcome, SquadronError> {
        let chain = self.chains.get(agent_id).ok_or_else(|| {
            SquadronError::Config(format!("no provider chain configured for '{}'", agent_id))
        })?;

        let throttle = self.rate_gate.throttle();
        let mut attempts: Vec<ProviderAttempt> = Vec::new();

        for (index, link) in chain.iter().enumerate() {
            if Instant::now() >= deadline {
                return Err(SquadronError::Cancelled);
            }

            let entry = self.providers.get(link).ok_or_else(|| {
                SquadronError::Config(format!("chain references unknown provider '{}'", link))
            })?;
            if !entry.config.enabled {
                debug!("skipping disabled provider '{}'", link);
                continue;
            }

            let rpm = entry.config.rate.rpm;
            let burst = entry.config.rate.burst;
            let gate = self.rate_gate.clone();
            let client = entry.client.clone();
            let provider_name = link.clone();

            let result = call_with_retry(
                &self.retry_policy,
                link,
                rpm,
                &throttle,
                deadline,
                || {
                    let gate = gate.clone();
                    let client = client.clone();
                    let provider_name = provider_name.clone();
                    async move {
                        // Held across the provider call; drops with the block.
                        let _permit = gate.acquire(&provider_name, rpm, burst, deadline).await?;
                        client.call(request).await
                    }
                },
            )
            .await;

            match result {
                Ok(response) => {
                    self.emit(SquadronEvent::ProviderAttempted {
                        provider: link.clone(),
                        attempt: (index + 1) as u32,
                        outcome: "ok".to_string(),
                    })
                    .await;

                    // Tool-call turns carry no prose to score; quality applies
                    // to final text responses only.
                    if !validate_quality || !response.tool_calls.is_empty() {
                        return Ok(DispatchOutcome {
                            response,
                            provider: link.clone(),
                            fallback_used: index > 0,
                            quality: Verdict::Accepted,
                        });
                    }

                    match self.validator.validate(&response.content, entry.config.tier) {
                        Verdict::Accepted => {
                            return Ok(DispatchOutcome {
                                response,
                                provider: link.clone(),
                                fallback_used: index > 0,
                                quality: Verdict::Accepted,
                            });
                        }
                        Verdict::Rejected { reason } => {
                            let boss_remains = chain[index + 1..].iter().any(|later| {
                                self.providers
                                    .get(later)
                                    .map(|e| e.config.enabled && e.config.tier == Tier::Boss)
                                    .unwrap_or(false)
                            });
                            if entry.config.tier == Tier::Worker && boss_remains {
                                warn!(
                                    "quality rejection from '{}' ({}), escalating to boss tier",
                                    link, reason
                                );
                                attempts.push(ProviderAttempt::new(
                                    link.clone(),
                                    FailureKind::QualityRejected {
                                        reason: reason.clone(),
                                    },
                                ));
                                continue;
                            }
                            // No escalation path: return the response as-is.
                            return Ok(DispatchOutcome {
                                response,
                                provider: link.clone(),
                                fallback_used: index > 0,
                                quality: Verdict::Rejected { reason },
                            });
                        }
                    }
                }
                Err(failure) => {
                    self.emit(SquadronEvent::ProviderAttempted {
                        provider: link.clone(),
                        attempt: (index + 1) as u32,
                        outcome: failure.code().to_string(),
                    })
                    .await;

                    match failure {
                        FailureKind::CancelledByCaller => return Err(SquadronError::Cancelled),
                        FailureKind::BadRequest { .. } | FailureKind::AuthFailed => {
                            // The request is malformed for every provider;
                            // advancing would only repeat the failure.
                            return Err(SquadronError::Provider {
                                provider: link.clone(),
                                failure,
                            });
                        }
                        other => {
                            warn!(
                                "provider '{}' failed ({}), advancing in chain",
                                link,
                                other.code()
                            );
                            attempts.push(ProviderAttempt::new(link.clone(), other));
                        }
                    }
                }
            }
        }

        Err(SquadronError::ChainExhausted { attempts })
    }
}
