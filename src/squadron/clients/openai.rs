//! OpenAI Chat Completions adapter.
//!
//! This is the reference transport for every OpenAI-compatible endpoint in
//! the crate: the Claude, Gemini, and Grok adapters all delegate here with a
//! different base URL.  Requests go through the shared pooled HTTP client and
//! are bounded by the configured per-request timeout.
//!
//! # Example
//!
//! ```rust,no_run
//! use squadron::client_wrapper::{ChatRequest, ProviderClient};
//! use squadron::clients::openai::{Model, OpenAiClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAiClient::new_with_model_enum(&key, Model::Gpt41Mini);
//!     let reply = client
//!         .call(&ChatRequest::from_prompts("You are brief.", "Hello!"))
//!         .await?;
//!     println!("{}", reply.content);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::time::Duration;

use crate::squadron::client_wrapper::{ChatRequest, LlmResponse, ProviderClient};
use crate::squadron::clients::common::send_chat;
use crate::squadron::clients::http_pool::get_shared_http_client;
use crate::squadron::error::FailureKind;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Common OpenAI chat model identifiers (early 2026 snapshot).
pub enum Model {
    /// `gpt-4.1` – general availability GPT-4.1.
    Gpt41,
    /// `gpt-4.1-mini` – reduced cost GPT-4.1 tier.
    Gpt41Mini,
    /// `gpt-4.1-nano` – ultra low cost GPT-4.1 derivative.
    Gpt41Nano,
    /// `gpt-4o` – Omni model with text + image inputs.
    Gpt4o,
    /// `gpt-4o-mini` – cost effective GPT-4o derivative.
    Gpt4oMini,
}

/// Convert a [`Model`] variant into the string identifier expected by the API.
pub fn model_to_string(model: Model) -> String {
    match model {
        Model::Gpt41 => "gpt-4.1".to_string(),
        Model::Gpt41Mini => "gpt-4.1-mini".to_string(),
        Model::Gpt41Nano => "gpt-4.1-nano".to_string(),
        Model::Gpt4o => "gpt-4o".to_string(),
        Model::Gpt4oMini => "gpt-4o-mini".to_string(),
    }
}

/// Adapter for OpenAI's Chat Completions API (and compatible surfaces).
pub struct OpenAiClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    provider: String,
}

impl OpenAiClient {
    /// Create a client against the official OpenAI endpoint.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    /// Variant of [`OpenAiClient::new`] accepting a [`Model`] variant.
    pub fn new_with_model_enum(api_key: &str, model: Model) -> Self {
        Self::new(api_key, &model_to_string(model))
    }

    /// Create a client pointing at any OpenAI-compatible base URL.
    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            http_client: get_shared_http_client().clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout: DEFAULT_TIMEOUT,
            provider: "openai".to_string(),
        }
    }

    /// Bound every request to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register the adapter under a different provider name (used when a
    /// config declares several OpenAI-compatible providers).
    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.provider = name.into();
        self
    }
}

#[async_trait]
impl ProviderClient for OpenAiClient {
    async fn call(&self, request: &ChatRequest) -> Result<LlmResponse, FailureKind> {
        send_chat(
            &self.http_client,
            &self.base_url,
            &self.api_key,
            &self.model,
            self.timeout,
            request,
        )
        .await
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
