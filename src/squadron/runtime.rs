//! Runtime assembly and the inbound service surface.
//!
//! [`Squadron`] is the process-scoped bundle an HTTP layer (out of scope
//! here) talks to.  Bootstrap validates the configuration, builds one adapter
//! per configured provider, wires the rate gate, loader, conversation store,
//! and tool registry, and exposes the three inbound operations:
//! [`execute_agent`](Squadron::execute_agent),
//! [`list_agents`](Squadron::list_agents), and
//! [`provider_status`](Squadron::provider_status).
//!
//! There are no ambient singletons: the KV store, clock, and event handler
//! are constructed once by the caller and passed in explicitly, which is also
//! what makes the whole runtime testable against `MemoryKvStore`,
//! `ManualClock`, and `StubClient`.

use futures_util::future::join_all;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::squadron::agent::AgentLoader;
use crate::squadron::client_wrapper::ProviderClient;
use crate::squadron::clients::claude::ClaudeClient;
use crate::squadron::clients::gemini::GeminiClient;
use crate::squadron::clients::grok::GrokClient;
use crate::squadron::clients::openai::OpenAiClient;
use crate::squadron::clients::stub::StubClient;
use crate::squadron::clock::{Clock, SystemClock};
use crate::squadron::config::{ProviderConfig, SquadronConfig};
use crate::squadron::conversation::ConversationStore;
use crate::squadron::error::SquadronError;
use crate::squadron::event::EventHandler;
use crate::squadron::fallback::FallbackExecutor;
use crate::squadron::kv::KvStore;
use crate::squadron::orchestrator::{Mode, Orchestrator, OrchestratorResult};
use crate::squadron::rate::RateGate;
use crate::squadron::tool_protocol::ToolRegistry;
use crate::squadron::tools::{default_registry, PathSandbox};

/// One row of [`Squadron::list_agents`].
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub title: String,
    pub icon: String,
    pub available_tools: Vec<String>,
}

/// One row of [`Squadron::provider_status`].
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub configured_rpm: u32,
    pub effective_rpm: u32,
    pub bucket_tokens: u32,
    pub window_occupancy: u64,
    pub recent_429_count: u64,
    pub healthy: bool,
}

/// Process-scoped runtime; construct once at bootstrap and share.
pub struct Squadron {
    config: SquadronConfig,
    loader: Arc<AgentLoader>,
    executor: Arc<FallbackExecutor>,
    registry: Arc<ToolRegistry>,
    orchestrator: Orchestrator,
}

impl std::fmt::Debug for Squadron {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Squadron").finish_non_exhaustive()
    }
}

impl Squadron {
    /// Assemble the runtime with the system clock and no event handler.
    pub async fn bootstrap(
        config: SquadronConfig,
        kv: Arc<dyn KvStore>,
    ) -> Result<Self, SquadronError> {
        Self::bootstrap_with(config, kv, Arc::new(SystemClock), HashMap::new(), None).await
    }

    /// Fully parameterized assembly.
    ///
    /// `client_overrides` substitutes adapters by provider name; tests use it
    /// to install [`StubClient`]s without touching the configuration.
    pub async fn bootstrap_with(
        config: SquadronConfig,
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        client_overrides: HashMap<String, Arc<dyn ProviderClient>>,
        events: Option<Arc<dyn EventHandler>>,
    ) -> Result<Self, SquadronError> {
        config.validate()?;

        let rate_gate = Arc::new(match &events {
            Some(handler) => RateGate::with_event_handler(
                kv.clone(),
                clock.clone(),
                config.global_concurrency,
                handler.clone(),
            ),
            None => RateGate::new(kv.clone(), clock.clone(), config.global_concurrency),
        });

        let mut executor = FallbackExecutor::new(rate_gate);
        if let Some(handler) = &events {
            executor = executor.with_event_handler(handler.clone());
        }
        for provider in &config.providers {
            let client = match client_overrides.get(&provider.name) {
                Some(client) => client.clone(),
                None => build_client(provider),
            };
            executor = executor.with_provider(client, provider.clone());
        }
        for (agent_id, chain) in &config.chains {
            executor = executor.with_chain(agent_id.clone(), chain.links());
        }
        let executor = Arc::new(executor);

        let mut loader = AgentLoader::new(&config.agent_dir, kv.clone());
        if let Some(handler) = &events {
            loader = loader.with_event_handler(handler.clone());
        }
        let loader = Arc::new(loader);
        match loader.load_all().await {
            Ok(count) => info!("loaded {} agent definitions", count),
            Err(e) => warn!(
                "agent directory {} not loadable ({}); starting with no agents",
                config.agent_dir.display(),
                e
            ),
        }

        let sandbox = PathSandbox::new(&config.project_root);
        let registry = Arc::new(default_registry(sandbox, clock.clone()));

        let conversations = Arc::new(ConversationStore::new(kv));
        let mut orchestrator = Orchestrator::new(
            loader.clone(),
            conversations,
            executor.clone(),
            registry.clone(),
        );
        if let Some(handler) = events {
            orchestrator = orchestrator.with_event_handler(handler);
        }

        Ok(Self {
            config,
            loader,
            executor,
            registry,
            orchestrator,
        })
    }

    /// The primary inbound call: run one agent task.
    pub async fn execute_agent(
        &self,
        user_id: &str,
        agent_id: &str,
        task: &str,
        mode: &str,
    ) -> Result<OrchestratorResult, SquadronError> {
        let mode = Mode::from_str(mode)?;
        self.orchestrator.execute(user_id, agent_id, task, mode).await
    }

    /// Loaded personas, with the tool names each can invoke.
    pub async fn list_agents(&self) -> Vec<AgentSummary> {
        let tools = self.registry.names();
        self.loader
            .list()
            .await
            .into_iter()
            .map(|definition| AgentSummary {
                id: definition.id.clone(),
                name: definition.name.clone(),
                title: definition.title.clone(),
                icon: definition.icon.clone(),
                available_tools: tools.clone(),
            })
            .collect()
    }

    /// Rate-state introspection plus a live health probe per provider.
    ///
    /// Probes run concurrently; a provider whose rate state is unreadable is
    /// omitted from the listing.
    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let probes = self.config.providers.iter().map(|provider| async move {
            let rate = self
                .executor
                .rate_gate()
                .status(&provider.name, provider.rate.rpm, provider.rate.burst)
                .await;
            let rate = match rate {
                Ok(rate) => rate,
                Err(e) => {
                    warn!("rate status for '{}' unavailable: {}", provider.name, e);
                    return None;
                }
            };

            let healthy = match self.executor.provider_entry(&provider.name) {
                Some(entry) if provider.enabled => entry.client.health_check().await,
                _ => false,
            };

            Some(ProviderStatus {
                name: provider.name.clone(),
                configured_rpm: rate.configured_rpm,
                effective_rpm: rate.effective_rpm,
                bucket_tokens: rate.bucket_tokens,
                window_occupancy: rate.window_occupancy,
                recent_429_count: rate.recent_429_count,
                healthy,
            })
        });
        join_all(probes).await.into_iter().flatten().collect()
    }

    /// Begin polling the agent directory for definition changes.
    pub fn spawn_agent_watcher(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        self.loader.clone().spawn_watcher(interval)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn loader(&self) -> &Arc<AgentLoader> {
        &self.loader
    }

    pub fn config(&self) -> &SquadronConfig {
        &self.config
    }
}

/// Map a provider config onto a concrete adapter.
///
/// Well-known names select their vendor adapter; anything else is treated as
/// an OpenAI-compatible endpoint at `base_url`.  A name starting with `stub`
/// builds a scripted [`StubClient`], which keeps development configs free of
/// real credentials.
fn build_client(provider: &ProviderConfig) -> Arc<dyn ProviderClient> {
    if provider.name.starts_with("stub") {
        return Arc::new(StubClient::new(provider.name.clone()).with_model(&provider.model));
    }

    let api_key = provider.resolve_api_key().unwrap_or_default();
    let timeout = provider.timeout();

    match provider.name.as_str() {
        "claude" | "anthropic" => {
            let client = match &provider.base_url {
                Some(base_url) => ClaudeClient::new_with_base_url(&api_key, &provider.model, base_url),
                None => ClaudeClient::new(&api_key, &provider.model),
            };
            Arc::new(
                client
                    .with_timeout(timeout)
                    .with_provider_name(provider.name.clone()),
            )
        }
        "gemini" | "google" => {
            let client = match &provider.base_url {
                Some(base_url) => GeminiClient::new_with_base_url(&api_key, &provider.model, base_url),
                None => GeminiClient::new(&api_key, &provider.model),
            };
            Arc::new(
                client
                    .with_timeout(timeout)
                    .with_provider_name(provider.name.clone()),
            )
        }
        "grok" | "xai" => {
            let client = match &provider.base_url {
                Some(base_url) => GrokClient::new_with_base_url(&api_key, &provider.model, base_url),
                None => GrokClient::new(&api_key, &provider.model),
            };
            Arc::new(
                client
                    .with_timeout(timeout)
                    .with_provider_name(provider.name.clone()),
            )
        }
        _ => {
            let client = match &provider.base_url {
                Some(base_url) => {
                    OpenAiClient::new_with_base_url(&api_key, &provider.model, base_url)
                }
                None => OpenAiClient::new(&api_key, &provider.model),
            };
            Arc::new(
                client
                    .with_timeout(timeout)
                    .with_provider_name(provider.name.clone()),
            )
        }
    }
}
