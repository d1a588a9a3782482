//! Startup configuration surface.
//!
//! Parsing configuration *files* is the bootstrap layer's concern; this
//! module defines the validated, read-only structures the core consumes, plus
//! the cross-validation that must pass before the runtime starts.  All
//! structs derive `serde` so whatever format the bootstrap layer reads
//! (YAML, TOML, env-driven builders) deserializes straight into them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::squadron::error::SquadronError;

/// Quality/priority tag on a provider, influencing validator thresholds and
/// chain placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Worker,
    Boss,
    Creative,
    Fallback,
}

/// Per-provider rate bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per minute; must be > 0.
    pub rpm: u32,
    /// Burst capacity; must be >= rpm.
    pub burst: u32,
    /// Token budget per minute; must be > 0.
    pub tokens_per_minute: u32,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

/// One remote provider, immutable per process generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Wire model identifier, e.g. `"gpt-4.1-mini"`.
    pub model: String,
    /// Override for the provider's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub rate: RateLimitConfig,
    #[serde(default)]
    pub tier: Tier,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Read the API key from the declared environment variable; empty values
    /// count as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }
}

/// Ordered provider chain for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl ChainConfig {
    /// Full chain in walk order: primary first, then fallbacks.
    pub fn links(&self) -> Vec<String> {
        let mut links = Vec::with_capacity(1 + self.fallbacks.len());
        links.push(self.primary.clone());
        links.extend(self.fallbacks.iter().cloned());
        links
    }
}

fn default_global_concurrency() -> usize {
    12
}

fn default_agent_dir() -> PathBuf {
    PathBuf::from(".bmad/agents")
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

/// Everything the runtime needs at bootstrap, treated as read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadronConfig {
    pub providers: Vec<ProviderConfig>,
    /// Agent id to provider chain.
    pub chains: HashMap<String, ChainConfig>,
    /// Cap on simultaneous outbound LLM calls.
    #[serde(default = "default_global_concurrency")]
    pub global_concurrency: usize,
    /// Directory the agent loader scans for definition files.
    #[serde(default = "default_agent_dir")]
    pub agent_dir: PathBuf,
    /// Root the tool sandbox confines path arguments to.
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
}

impl SquadronConfig {
    /// Cross-validate the whole configuration; any violation fails fast.
    pub fn validate(&self) -> Result<(), SquadronError> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            if !names.insert(provider.name.as_str()) {
                return Err(SquadronError::Config(format!(
                    "duplicate provider '{}'",
                    provider.name
                )));
            }
            if provider.rate.rpm == 0 {
                return Err(SquadronError::Config(format!(
                    "provider '{}': rpm must be > 0",
                    provider.name
                )));
            }
            if provider.rate.burst < provider.rate.rpm {
                return Err(SquadronError::Config(format!(
                    "provider '{}': burst ({}) must be >= rpm ({})",
                    provider.name, provider.rate.burst, provider.rate.rpm
                )));
            }
            if provider.rate.tokens_per_minute == 0 {
                return Err(SquadronError::Config(format!(
                    "provider '{}': tokens_per_minute must be > 0",
                    provider.name
                )));
            }
            if provider.enabled && provider.resolve_api_key().is_none() {
                return Err(SquadronError::Config(format!(
                    "provider '{}' is enabled but ${} is unset or empty",
                    provider.name, provider.api_key_env
                )));
            }
        }

        for (agent_id, chain) in &self.chains {
            let links = chain.links();
            let mut seen = HashSet::new();
            for link in &links {
                if !names.contains(link.as_str()) {
                    return Err(SquadronError::Config(format!(
                        "chain for '{}' references unknown provider '{}'",
                        agent_id, link
                    )));
                }
                if !seen.insert(link.as_str()) {
                    return Err(SquadronError::Config(format!(
                        "chain for '{}' lists provider '{}' twice",
                        agent_id, link
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}
