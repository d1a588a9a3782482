//! Anthropic Claude adapter built on the OpenAI-compatible transport.
//!
//! Anthropic exposes an OpenAI-compatible surface, so this wrapper delegates
//! HTTP concerns to [`OpenAiClient`] and only pins the base URL and provider
//! name.  Swapping an agent chain from OpenAI to Claude requires nothing but
//! a different constructor.

use async_trait::async_trait;
use std::time::Duration;

use crate::squadron::client_wrapper::{ChatRequest, LlmResponse, ProviderClient};
use crate::squadron::clients::openai::OpenAiClient;
use crate::squadron::error::FailureKind;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic Claude models available through the compatibility layer.
pub enum Model {
    /// `claude-opus-4-1` – flagship reasoning tier.
    ClaudeOpus41,
    /// `claude-sonnet-4-0` – balanced reasoning + throughput.
    ClaudeSonnet4,
    /// `claude-haiku-3-5` – fastest Claude tier.
    ClaudeHaiku35,
}

/// Convert a [`Model`] variant into its public string identifier.
fn model_to_string(model: Model) -> String {
    match model {
        Model::ClaudeOpus41 => "claude-opus-4-1".to_string(),
        Model::ClaudeSonnet4 => "claude-sonnet-4-0".to_string(),
        Model::ClaudeHaiku35 => "claude-haiku-3-5".to_string(),
    }
}

/// Adapter for Anthropic's Claude API routed through the OpenAI-compatible
/// surface.
pub struct ClaudeClient {
    delegate: OpenAiClient,
    model: String,
}

impl ClaudeClient {
    pub fn new_with_model_enum(api_key: &str, model: Model) -> Self {
        Self::new(api_key, &model_to_string(model))
    }

    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        ClaudeClient {
            // Reuse the OpenAI transport and delegate the calls to it.
            delegate: OpenAiClient::new_with_base_url(api_key, model, base_url)
                .with_provider_name("claude"),
            model: model.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.delegate = self.delegate.with_timeout(timeout);
        self
    }

    pub fn with_provider_name(mut self, name: impl Into<String>) -> Self {
        self.delegate = self.delegate.with_provider_name(name);
        self
    }
}

#[async_trait]
impl ProviderClient for ClaudeClient {
    async fn call(&self, request: &ChatRequest) -> Result<LlmResponse, FailureKind> {
        self.delegate.call(request).await
    }

    fn provider_name(&self) -> &str {
        self.delegate.provider_name()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
