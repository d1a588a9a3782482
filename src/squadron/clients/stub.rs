//! Deterministic stub adapter for tests and local development.
//!
//! The stub plays back a scripted queue of outcomes (responses or failures)
//! and falls back to a fixed default response when the script runs dry.  It
//! records every request it receives so tests can assert on call counts and
//! message shapes, and it can simulate latency.
//!
//! # Example
//!
//! ```rust
//! use squadron::client_wrapper::{ChatRequest, ProviderClient};
//! use squadron::clients::stub::StubClient;
//! use squadron::error::FailureKind;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let stub = StubClient::new("stub_a");
//! stub.push_failure(FailureKind::RateLimited { retry_after: None }).await;
//! stub.push_response("recovered").await;
//!
//! let request = ChatRequest::from_prompts("sys", "hi");
//! assert!(stub.call(&request).await.is_err());
//! assert_eq!(stub.call(&request).await.unwrap().content, "recovered");
//! assert_eq!(stub.call_count().await, 2);
//! # }
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::squadron::client_wrapper::{
    ChatRequest, LlmResponse, ProviderClient, ToolCallRequest,
};
use crate::squadron::error::FailureKind;

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub content: String,
    pub tokens_input: usize,
    pub tokens_output: usize,
    pub finish_reason: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl StubResponse {
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            tokens_input: 10,
            tokens_output: (content.len() / 4).max(1),
            finish_reason: "stop".to_string(),
            tool_calls: Vec::new(),
            content,
        }
    }

    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            content: String::new(),
            tokens_input: 10,
            tokens_output: 1,
            finish_reason: "tool_calls".to_string(),
            tool_calls: vec![ToolCallRequest {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
        }
    }
}

#[derive(Debug, Clone)]
enum StubOutcome {
    Respond(StubResponse),
    Fail(FailureKind),
}

/// Scriptable in-memory [`ProviderClient`].
pub struct StubClient {
    provider: String,
    model: String,
    latency: Duration,
    script: Mutex<VecDeque<StubOutcome>>,
    /// Applied whenever the script is empty.
    fallback: Mutex<StubOutcome>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl StubClient {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: "stub-model".to_string(),
            latency: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(StubOutcome::Respond(StubResponse::text("ok"))),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Simulate network latency on every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a plain text reply.
    pub async fn push_response(&self, content: impl Into<String>) {
        self.script
            .lock()
            .await
            .push_back(StubOutcome::Respond(StubResponse::text(content)));
    }

    /// Queue a fully specified reply.
    pub async fn push_response_with(&self, response: StubResponse) {
        self.script
            .lock()
            .await
            .push_back(StubOutcome::Respond(response));
    }

    /// Queue a failure.
    pub async fn push_failure(&self, failure: FailureKind) {
        self.script
            .lock()
            .await
            .push_back(StubOutcome::Fail(failure));
    }

    /// Replace the default outcome used once the script is exhausted.
    pub async fn set_default_response(&self, content: impl Into<String>) {
        *self.fallback.lock().await = StubOutcome::Respond(StubResponse::text(content));
    }

    /// Make the stub fail persistently once the script is exhausted.
    pub async fn fail_always(&self, failure: FailureKind) {
        *self.fallback.lock().await = StubOutcome::Fail(failure);
    }

    /// Number of calls received since construction or the last `reset`.
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Every request received, in order.
    pub async fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().await.clone()
    }

    /// Clear the script, the call history, and the fallback outcome.
    pub async fn reset(&self) {
        self.script.lock().await.clear();
        self.calls.lock().await.clear();
        *self.fallback.lock().await = StubOutcome::Respond(StubResponse::text("ok"));
    }
}

#[async_trait]
impl ProviderClient for StubClient {
    async fn call(&self, request: &ChatRequest) -> Result<LlmResponse, FailureKind> {
        self.calls.lock().await.push(request.clone());
        if self.latency > Duration::ZERO {
            tokio::time::sleep(self.latency).await;
        }

        let outcome = {
            let mut script = self.script.lock().await;
            match script.pop_front() {
                Some(outcome) => outcome,
                None => self.fallback.lock().await.clone(),
            }
        };

        match outcome {
            StubOutcome::Fail(failure) => Err(failure),
            StubOutcome::Respond(response) => Ok(LlmResponse {
                content: response.content,
                tokens_input: response.tokens_input,
                tokens_output: response.tokens_output,
                latency_ms: self.latency.as_millis() as u64,
                model: self.model.clone(),
                finish_reason: response.finish_reason,
                tool_calls: response.tool_calls,
                raw: None,
            }),
        }
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_plays_back_in_order_then_falls_back() {
        let stub = StubClient::new("stub");
        stub.push_response("first").await;
        stub.push_failure(FailureKind::Timeout).await;

        let request = ChatRequest::from_prompts("s", "u");
        assert_eq!(stub.call(&request).await.unwrap().content, "first");
        assert!(matches!(
            stub.call(&request).await,
            Err(FailureKind::Timeout)
        ));
        assert_eq!(stub.call(&request).await.unwrap().content, "ok");
        assert_eq!(stub.call_count().await, 3);
    }

    #[tokio::test]
    async fn reset_clears_history_and_script() {
        let stub = StubClient::new("stub");
        stub.push_response("queued").await;
        stub.fail_always(FailureKind::AuthFailed).await;
        let _ = stub.call(&ChatRequest::default()).await;
        stub.reset().await;

        assert_eq!(stub.call_count().await, 0);
        assert_eq!(
            stub.call(&ChatRequest::default()).await.unwrap().content,
            "ok"
        );
    }

    #[tokio::test]
    async fn records_received_messages() {
        let stub = StubClient::new("stub");
        let _ = stub
            .call(&ChatRequest::from_prompts("system text", "user text"))
            .await;
        let calls = stub.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].messages.len(), 2);
        assert_eq!(calls[0].messages[1].content.as_ref(), "user text");
    }
}
