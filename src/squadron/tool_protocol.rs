//! Tool abstraction layer.
//!
//! Tools are named side-effectful operations the LLM can invoke through
//! native function calling.  The registry holds the fixed set of tools and
//! derives their function schemas; a per-run [`ToolRunSession`] enforces the
//! per-invocation call cap and records every call for observers.
//!
//! Tool failures are not orchestrator errors: the orchestrator appends them
//! as tool-role messages (`"error: <code>"`) so the LLM can recover on its
//! next turn.
//!
//! # Key components
//!
//! - **[`Tool`] trait**: name, function schema, async execution
//! - **[`ToolRegistry`]**: name-to-tool routing and schema aggregation
//! - **[`ToolRunSession`]**: per-orchestrator-run call cap + records
//! - **[`ToolCallRecord`]**: what ran, with what, how long, and how it ended

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::squadron::client_wrapper::{ToolCallRequest, ToolDefinition};

/// Error codes surfaced to the LLM as tool-role messages.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    /// No tool registered under the requested name.
    #[error("unknown tool")]
    UnknownTool,
    /// Arguments missing or of the wrong shape.
    #[error("bad arguments: {0}")]
    BadArguments(String),
    /// Path argument failed the sandbox (traversal, whitelist, absolute
    /// escape).
    #[error("path rejected: {0}")]
    PathRejected(String),
    /// Refused to read a file above the configured ceiling.
    #[error("file too large: {0} bytes")]
    FileTooLarge(u64),
    /// Filesystem-level failure.
    #[error("io error: {0}")]
    Io(String),
    /// Outbound HTTP failure (web search).
    #[error("network error: {0}")]
    Network(String),
    /// The per-run tool call cap was hit.
    #[error("tool call limit exceeded")]
    LimitExceeded,
}

impl ToolError {
    /// Stable snake_case identifier embedded in tool-role error messages.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::UnknownTool => "unknown_tool",
            ToolError::BadArguments(_) => "bad_arguments",
            ToolError::PathRejected(_) => "path_rejected",
            ToolError::FileTooLarge(_) => "file_too_large",
            ToolError::Io(_) => "io_error",
            ToolError::Network(_) => "network",
            ToolError::LimitExceeded => "tool_limit_exceeded",
        }
    }
}

/// A named side-effectful operation invocable by the LLM.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Function schema advertised to providers.
    fn definition(&self) -> ToolDefinition;

    /// Run the tool; the returned text goes back to the LLM verbatim.
    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError>;
}

/// Helper for the standard `{"type": "object", ...}` parameter schema shape.
pub fn object_schema(
    properties: serde_json::Value,
    required: &[&str],
) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Name-to-tool routing table.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Schemas for every registered tool, sorted by name for determinism.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// One executed (or refused) tool call, surfaced to observers; the core does
/// not persist these.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    /// Provider-assigned call id.
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    /// Tool output, or the stable error code on failure.
    pub outcome: Result<String, String>,
    pub elapsed_ms: u64,
}

impl ToolCallRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-orchestrator-run execution context: enforces the call cap and keeps
/// the call records.
pub struct ToolRunSession {
    registry: Arc<ToolRegistry>,
    max_calls: usize,
    calls_made: usize,
    records: Vec<ToolCallRecord>,
}

/// Default cap on tool calls per orchestrator invocation.
pub const DEFAULT_MAX_CALLS_PER_RUN: usize = 20;

impl ToolRunSession {
    pub fn new(registry: Arc<ToolRegistry>, max_calls: usize) -> Self {
        Self {
            registry,
            max_calls,
            calls_made: 0,
            records: Vec::new(),
        }
    }

    /// Execute one requested call, recording it either way.
    pub async fn execute(&mut self, call: &ToolCallRequest) -> Result<String, ToolError> {
        if self.calls_made >= self.max_calls {
            return Err(ToolError::LimitExceeded);
        }
        self.calls_made += 1;

        let started = std::time::Instant::now();
        let outcome = match self.registry.get(&call.name) {
            None => Err(ToolError::UnknownTool),
            Some(tool) => tool.execute(&call.arguments).await,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.records.push(ToolCallRecord {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            outcome: outcome
                .as_ref()
                .map(|text| text.clone())
                .map_err(|e| e.code().to_string()),
            elapsed_ms,
        });
        outcome
    }

    /// Whether the cap has been consumed.
    pub fn limit_reached(&self) -> bool {
        self.calls_made >= self.max_calls
    }

    pub fn records(&self) -> &[ToolCallRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ToolCallRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".to_string(),
                description: "Echo the text argument back.".to_string(),
                parameters_schema: object_schema(
                    serde_json::json!({"text": {"type": "string"}}),
                    &["text"],
                ),
            }
        }

        async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
            arguments
                .get("text")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| ToolError::BadArguments("text".to_string()))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new().with_tool(Arc::new(EchoTool)))
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn executes_and_records() {
        let mut session = ToolRunSession::new(registry(), 5);
        let result = session
            .execute(&call("echo", serde_json::json!({"text": "hi"})))
            .await;
        assert_eq!(result.unwrap(), "hi");
        assert_eq!(session.records().len(), 1);
        assert!(session.records()[0].succeeded());
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_and_recorded() {
        let mut session = ToolRunSession::new(registry(), 5);
        let err = session
            .execute(&call("nope", serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unknown_tool");
        assert_eq!(
            session.records()[0].outcome,
            Err("unknown_tool".to_string())
        );
    }

    #[tokio::test]
    async fn bad_arguments_surface_as_code() {
        let mut session = ToolRunSession::new(registry(), 5);
        let err = session
            .execute(&call("echo", serde_json::json!({"wrong": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "bad_arguments");
    }

    #[tokio::test]
    async fn call_cap_is_enforced() {
        let mut session = ToolRunSession::new(registry(), 2);
        let args = serde_json::json!({"text": "x"});
        assert!(session.execute(&call("echo", args.clone())).await.is_ok());
        assert!(session.execute(&call("echo", args.clone())).await.is_ok());
        assert!(session.limit_reached());
        let err = session.execute(&call("echo", args)).await.unwrap_err();
        assert_eq!(err, ToolError::LimitExceeded);
        // Refused calls past the cap are not recorded.
        assert_eq!(session.records().len(), 2);
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let registry = ToolRegistry::new().with_tool(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }
}
