//! Web search tool backed by the DuckDuckGo Instant Answer API.
//!
//! Keyless JSON endpoint, queried through the shared HTTP pool.  Results are
//! flattened into a short plain-text digest (abstract first, then related
//! topics).  Failures surface as tool-level errors, never as orchestrator
//! errors.

use async_trait::async_trait;
use std::time::Duration;

use crate::squadron::client_wrapper::ToolDefinition;
use crate::squadron::clients::http_pool::get_shared_http_client;
use crate::squadron::tool_protocol::{object_schema, Tool, ToolError};

const DEFAULT_ENDPOINT: &str = "https://api.duckduckgo.com";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TOPICS: usize = 5;

pub struct WebSearchTool {
    http_client: reqwest::Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            http_client: get_shared_http_client().clone(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Point the tool at a different endpoint (tests, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten an Instant Answer body into a digest the LLM can quote from.
fn digest(body: &serde_json::Value) -> String {
    let mut lines = Vec::new();

    if let Some(abstract_text) = body.get("AbstractText").and_then(|v| v.as_str()) {
        if !abstract_text.is_empty() {
            lines.push(abstract_text.to_string());
        }
    }

    if let Some(topics) = body.get("RelatedTopics").and_then(|v| v.as_array()) {
        for topic in topics.iter().take(MAX_TOPICS) {
            if let Some(text) = topic.get("Text").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    lines.push(format!("- {}", text));
                }
            }
        }
    }

    if lines.is_empty() {
        "no results".to_string()
    } else {
        lines.join("\n")
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_search".to_string(),
            description: "Search the web and return a short digest of results.".to_string(),
            parameters_schema: object_schema(
                serde_json::json!({
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    }
                }),
                &["query"],
            ),
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
        let query = arguments
            .get("query")
            .and_then(|v| v.as_str())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ToolError::BadArguments("missing string field 'query'".to_string()))?;

        let url = format!(
            "{}/?q={}&format=json&no_html=1",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(query)
        );

        let response = self
            .http_client
            .get(&url)
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| ToolError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ToolError::Network(format!(
                "search endpoint returned HTTP {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ToolError::Network(e.to_string()))?;

        Ok(digest(&body))
    }
}
