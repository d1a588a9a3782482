//! Shared primitives for provider-agnostic LLM clients.
//!
//! Applications interact with providers through the [`ProviderClient`] trait
//! and the lightweight data types defined here.  The trait abstracts over
//! concrete vendor implementations while the supporting structs describe chat
//! messages, tool schemas, and the normalized response envelope.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use squadron::client_wrapper::{ChatRequest, ProviderClient};
//! use squadron::clients::openai::OpenAiClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAiClient::new(&key, "gpt-4.1-mini");
//!
//!     let request = ChatRequest::from_prompts("You are terse.", "Who are you?");
//!     let response = client.call(&request).await?;
//!     println!("{} ({} output tokens)", response.content, response.tokens_output);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::squadron::error::FailureKind;

/// Represents the possible roles for a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message (model responses).
    Assistant,
    /// A tool-result message correlating with a prior assistant
    /// [`ToolCallRequest`] by call id.
    Tool { call_id: String },
}

/// A single tool call requested by the LLM in a function-calling response.
///
/// Providers assign an opaque [`id`](ToolCallRequest::id) to each call so the
/// tool result can be correlated back in a follow-up `Role::Tool` message.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// Provider-assigned call ID, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the [`ToolDefinition`]s sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the LLM for this call.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema passed to the LLM along with a chat request.
///
/// Serialised as an OpenAI-compatible `tools` array entry before
/// transmission; the `parameters_schema` follows the standard function-schema
/// shape (`{"type": "object", "properties": ..., "required": ...}`).
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Represents a generic message to be sent to an LLM.
///
/// Content is stored as `Arc<str>` so histories can be cheaply cloned by the
/// conversation store and the orchestrator's tool loop.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: Arc<str>,
    /// Native tool calls requested by the assistant.  Non-empty only on
    /// assistant messages that carry function-calling results.
    pub tool_calls: Vec<ToolCallRequest>,
}

impl Message {
    pub fn system(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::System,
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }

    pub fn user(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::User,
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Assistant,
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Tool {
                call_id: call_id.into(),
            },
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }
}

/// How many tokens were spent on prompt vs. completion?
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Normalized response envelope returned by every provider adapter.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Assistant text; empty when the model responded only with tool calls.
    pub content: String,
    pub tokens_input: usize,
    pub tokens_output: usize,
    /// Wall-clock latency of the round-trip as measured by the adapter.
    pub latency_ms: u64,
    /// Model identifier echoed by the provider (or the requested one).
    pub model: String,
    /// Provider completion status, e.g. `"stop"` or `"tool_calls"`.
    pub finish_reason: String,
    pub tool_calls: Vec<ToolCallRequest>,
    /// Unparsed vendor fields kept for observability; never interpreted.
    pub raw: Option<serde_json::Value>,
}

/// A chat invocation in the common format.
///
/// Normalizes the two calling conventions providers are driven with: a split
/// `(system_prompt, user_prompt)` pair or a full ordered message list.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn from_prompts(system_prompt: impl AsRef<str>, user_prompt: impl AsRef<str>) -> Self {
        Self::from_messages(vec![
            Message::system(system_prompt),
            Message::user(user_prompt),
        ])
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Trait-driven abstraction for a concrete remote chat API.
///
/// A [`ProviderClient`] translates the common [`ChatRequest`] into its
/// provider's wire format and returns responses in the uniform
/// [`LlmResponse`] shape.  The abstraction deliberately excludes retry,
/// fallback, and rate limiting; those live in the layers above.
///
/// All implementations must be thread-safe (`Send + Sync`) and safe for
/// concurrent use from multiple orchestrator invocations; HTTP-backed
/// adapters share a pooled client (see [`crate::clients::http_pool`]).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Send a full request/response style chat completion.
    ///
    /// Implementations classify every failure into the [`FailureKind`]
    /// taxonomy and must not block longer than their configured timeout.
    async fn call(&self, request: &ChatRequest) -> Result<LlmResponse, FailureKind>;

    /// Minimal round-trip to determine whether the provider is reachable.
    async fn health_check(&self) -> bool {
        let probe = ChatRequest::from_prompts("Reply with the single word: ok", "ping")
            .with_max_tokens(8);
        self.call(&probe).await.is_ok()
    }

    /// Name this adapter is registered under (matches the provider config).
    fn provider_name(&self) -> &str;

    /// Identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;
}
