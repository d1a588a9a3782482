//! xAI Grok adapter routed through the OpenAI-compatible surface.
//!
//! Grok speaks the same chat-completions dialect as OpenAI, so existing
//! chains can target the Grok family of models with nothing but a different
//! constructor.

use async_trait::async_trait;
use std::time::Duration;

use crate::squadron::client_wrapper::{ChatRequest, LlmResponse, ProviderClient};
use crate::squadron::clients::openai::OpenAiClient;
use crate::squadron::error::FailureKind;

const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";

/// Grok model identifiers.
pub enum Model {
    /// `grok-3` – flagship tier.
    Grok3,
    /// `grok-3-mini` – cheaper, faster tier.
    Grok3Mini,
}

fn model_to_string(model: Model) -> String {
    match model {
        Model::Grok3 => "grok-3".to_string(),
        Model::Grok3Mini => "grok-3-mini".to_string(),
    }
}

/// Adapter for xAI's Grok chat endpoints.
pub struct GrokClient {
    delegate: OpenAiClient,
    model: String,
}

impl GrokClient {
    pub fn new_with_model_enum(api_key: &str, model: Model) -> Self {
        Self::new(api_key, &model_to_string(model))
    }

    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        GrokClient {
            delegate: OpenAiClient::new_with_base_url(api_key, model, base_url)
                .with_provider_name("grok"),
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
impl ProviderClient for GrokClient {
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
