//! Google Gemini adapter over the Generative Language OpenAI-compatible
//! endpoint.
//!
//! Google exposes Gemini models through an OpenAI-compatible path, so this
//! wrapper delegates to [`OpenAiClient`] with the Gemini base URL and pins
//! the provider name.

use async_trait::async_trait;
use std::time::Duration;

use crate::squadron::client_wrapper::{ChatRequest, LlmResponse, ProviderClient};
use crate::squadron::clients::openai::OpenAiClient;
use crate::squadron::error::FailureKind;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Gemini model identifiers commonly used for chat.
pub enum Model {
    /// `gemini-2.0-flash` – fast, cost effective default tier.
    Gemini20Flash,
    /// `gemini-2.0-flash-lite` – lowest latency tier.
    Gemini20FlashLite,
    /// `gemini-1.5-pro` – larger context, stronger reasoning.
    Gemini15Pro,
}

fn model_to_string(model: Model) -> String {
    match model {
        Model::Gemini20Flash => "gemini-2.0-flash".to_string(),
        Model::Gemini20FlashLite => "gemini-2.0-flash-lite".to_string(),
        Model::Gemini15Pro => "gemini-1.5-pro".to_string(),
    }
}

/// Adapter for Google Gemini chat-style endpoints.
pub struct GeminiClient {
    delegate: OpenAiClient,
    model: String,
}

impl GeminiClient {
    pub fn new_with_model_enum(api_key: &str, model: Model) -> Self {
        Self::new(api_key, &model_to_string(model))
    }

    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, DEFAULT_BASE_URL)
    }

    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        GeminiClient {
            delegate: OpenAiClient::new_with_base_url(api_key, model, base_url)
                .with_provider_name("gemini"),
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
impl ProviderClient for GeminiClient {
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
