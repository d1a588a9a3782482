//! Shared wire codec for OpenAI-compatible chat endpoints.
//!
//! Every reference adapter (OpenAI, Claude via Anthropic's compatibility
//! surface, Gemini's OpenAI-compatible endpoint, xAI Grok) speaks the same
//! chat-completions dialect, so the request serialisation, response parsing,
//! and failure classification live here once.  Adapters supply a base URL, a
//! bearer token, and a timeout.
//!
//! # Message serialisation
//!
//! | [`Role`] variant | Wire representation |
//! |---|---|
//! | `System` | `{"role":"system","content":"..."}` |
//! | `User` | `{"role":"user","content":"..."}` |
//! | `Assistant` with tool_calls | `{"role":"assistant","content":null,"tool_calls":[...]}` |
//! | `Assistant` without tool_calls | `{"role":"assistant","content":"..."}` |
//! | `Tool { call_id }` | `{"role":"tool","tool_call_id":"<id>","content":"..."}` |

use log::error;
use std::time::Duration;
use tokio::time::Instant;

use crate::squadron::client_wrapper::{
    ChatRequest, LlmResponse, Message, Role, ToolCallRequest, ToolDefinition,
};
use crate::squadron::error::FailureKind;

/// Serialise messages to the OpenAI wire format.
pub fn wire_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|msg| match &msg.role {
            Role::System => serde_json::json!({
                "role": "system",
                "content": msg.content.as_ref()
            }),
            Role::User => serde_json::json!({
                "role": "user",
                "content": msg.content.as_ref()
            }),
            Role::Assistant => {
                if msg.tool_calls.is_empty() {
                    serde_json::json!({
                        "role": "assistant",
                        "content": msg.content.as_ref()
                    })
                } else {
                    let tool_calls: Vec<serde_json::Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": serde_json::to_string(&tc.arguments)
                                        .unwrap_or_else(|_| "{}".to_string())
                                }
                            })
                        })
                        .collect();
                    serde_json::json!({
                        "role": "assistant",
                        "content": serde_json::Value::Null,
                        "tool_calls": tool_calls
                    })
                }
            }
            Role::Tool { call_id } => serde_json::json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": msg.content.as_ref()
            }),
        })
        .collect()
}

/// Serialise tool definitions to the OpenAI `tools` array shape.
pub fn wire_tools(tools: &[ToolDefinition]) -> Vec<serde_json::Value> {
    tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters_schema
                }
            })
        })
        .collect()
}

/// Build the complete request body for a chat-completions call.
pub fn build_body(model: &str, request: &ChatRequest) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": wire_messages(&request.messages),
    });
    if !request.tools.is_empty() {
        body["tools"] = serde_json::Value::Array(wire_tools(&request.tools));
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = serde_json::json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    body
}

/// Map an HTTP status (plus an optional parsed `Retry-After`) into the
/// common failure taxonomy.
pub fn classify_status(status: u16, retry_after: Option<Duration>) -> FailureKind {
    match status {
        429 => FailureKind::RateLimited { retry_after },
        401 | 403 => FailureKind::AuthFailed,
        400..=499 => FailureKind::BadRequest { status },
        _ => FailureKind::ServerError { status },
    }
}

/// Map a transport-level reqwest error into the common failure taxonomy.
pub fn classify_transport(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Network(err.to_string())
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Interpret a parsed chat-completions body into the normalized envelope.
///
/// Vendor fields outside `choices[0].message` and `usage` are retained in
/// [`LlmResponse::raw`] untouched.
pub fn parse_chat_response(
    parsed: serde_json::Value,
    requested_model: &str,
    latency_ms: u64,
) -> Result<LlmResponse, FailureKind> {
    let choice_msg = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| FailureKind::Network("no choices in provider response".to_string()))?;

    let content = choice_msg
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls: Vec<ToolCallRequest> = choice_msg
        .get("tool_calls")
        .and_then(|tc| tc.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                    let arguments: serde_json::Value = serde_json::from_str(args_str)
                        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
                    Some(ToolCallRequest {
                        id,
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = parsed.get("usage");
    let tokens_input = usage
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    let tokens_output = usage
        .and_then(|u| u.get("completion_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;

    let finish_reason = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("finish_reason"))
        .and_then(|v| v.as_str())
        .unwrap_or(if tool_calls.is_empty() { "stop" } else { "tool_calls" })
        .to_string();

    let model = parsed
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(requested_model)
        .to_string();

    Ok(LlmResponse {
        content,
        tokens_input,
        tokens_output,
        latency_ms,
        model,
        finish_reason,
        tool_calls,
        raw: Some(parsed),
    })
}

/// Send a chat-completions request and normalize the outcome.
///
/// Posts to `{base_url}/chat/completions` with a bearer token.  The
/// per-request timeout bounds the whole round-trip; the adapter never blocks
/// longer than it.
pub async fn send_chat(
    http_client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    timeout: Duration,
    request: &ChatRequest,
) -> Result<LlmResponse, FailureKind> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let body = build_body(model, request);
    let started = Instant::now();

    let resp = http_client
        .post(&url)
        .timeout(timeout)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(&body)
        .send()
        .await
        .map_err(|e| classify_transport(&e))?;

    let status = resp.status();
    let retry_after = parse_retry_after(resp.headers());
    let text = resp.text().await.map_err(|e| classify_transport(&e))?;
    let latency_ms = started.elapsed().as_millis() as u64;

    if !status.is_success() {
        if log::log_enabled!(log::Level::Error) {
            error!("send_chat: HTTP {} from {}: {}", status, url, text);
        }
        return Err(classify_status(status.as_u16(), retry_after));
    }

    let parsed: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| FailureKind::Network(format!("unparseable provider response: {}", e)))?;

    parse_chat_response(parsed, model, latency_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn status_classification_covers_the_taxonomy() {
        assert_eq!(
            classify_status(429, Some(Duration::from_secs(7))),
            FailureKind::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
        assert_eq!(classify_status(401, None), FailureKind::AuthFailed);
        assert_eq!(classify_status(403, None), FailureKind::AuthFailed);
        assert_eq!(
            classify_status(422, None),
            FailureKind::BadRequest { status: 422 }
        );
        assert_eq!(
            classify_status(503, None),
            FailureKind::ServerError { status: 503 }
        );
    }

    #[test]
    fn assistant_tool_calls_serialise_with_null_content() {
        let msg = Message {
            role: Role::Assistant,
            content: Arc::from(""),
            tool_calls: vec![ToolCallRequest {
                id: "call_1".to_string(),
                name: "load_file".to_string(),
                arguments: serde_json::json!({"path": "docs/plan.md"}),
            }],
        };
        let wire = wire_messages(&[msg]);
        assert!(wire[0]["content"].is_null());
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "load_file");
    }

    #[test]
    fn tool_role_carries_call_id() {
        let wire = wire_messages(&[Message::tool("call_9", "result text")]);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "call_9");
    }

    #[test]
    fn response_parsing_extracts_usage_and_tool_calls() {
        let body = serde_json::json!({
            "model": "echo-model",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "web_search",
                            "arguments": "{\"query\": \"rust\"}"
                        }
                    }]
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3},
            "vendor_extension": {"trace": "abc"}
        });
        let resp = parse_chat_response(body, "requested", 42).unwrap();
        assert_eq!(resp.model, "echo-model");
        assert_eq!(resp.tokens_input, 12);
        assert_eq!(resp.tokens_output, 3);
        assert_eq!(resp.finish_reason, "tool_calls");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "web_search");
        assert_eq!(
            resp.tool_calls[0].arguments,
            serde_json::json!({"query": "rust"})
        );
        // The vendor extension survives in the raw bag.
        assert_eq!(
            resp.raw.unwrap()["vendor_extension"]["trace"],
            serde_json::json!("abc")
        );
    }

    #[test]
    fn missing_choices_is_a_network_failure() {
        let err = parse_chat_response(serde_json::json!({"usage": {}}), "m", 1).unwrap_err();
        assert!(matches!(err, FailureKind::Network(_)));
    }

    #[test]
    fn body_includes_decoding_parameters_when_set() {
        let request = ChatRequest::from_prompts("sys", "user")
            .with_max_tokens(128)
            .with_temperature(0.2);
        let body = build_body("m", &request);
        assert_eq!(body["max_tokens"], 128);
        assert!(body.get("tools").is_none());
    }
}
