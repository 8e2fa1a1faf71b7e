use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::core::store::types::{Finding, SuggestedAction};

/// Final structured outcome from the agent runtime's `result` envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOutcome {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub suggested_actions: Vec<SuggestedAction>,
    #[serde(default)]
    pub deployments_found: Vec<Value>,
    #[serde(default)]
    pub trace_ref: Option<String>,
}

/// Normalized upstream event. The raw wire envelope is inspected exactly once
/// (here); everything downstream works on this union.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    Token { text: String },
    ToolCall { name: String, args: Value, id: String },
    ToolResult { name: String, content: String },
    Result(Box<RunOutcome>),
    Error { message: String },
}

/// Turn one raw runtime envelope into zero or more normalized events.
pub fn normalize_envelope(envelope: &Value) -> Vec<AgentEvent> {
    match envelope.get("event").and_then(Value::as_str) {
        Some("messages") => match envelope.get("data") {
            Some(data) => normalize_message(data),
            None => Vec::new(),
        },
        Some("result") => {
            let data = envelope.get("data").cloned().unwrap_or(Value::Null);
            match serde_json::from_value::<RunOutcome>(data) {
                Ok(outcome) => vec![AgentEvent::Result(Box::new(outcome))],
                Err(e) => {
                    warn!("discarding malformed result envelope: {e}");
                    Vec::new()
                }
            }
        }
        Some("error") => {
            let message = envelope
                .get("data")
                .and_then(|d| d.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("agent runtime error")
                .to_string();
            vec![AgentEvent::Error { message }]
        }
        _ => Vec::new(),
    }
}

fn normalize_message(msg: &Value) -> Vec<AgentEvent> {
    // A single message may carry several simultaneous tool calls; each
    // becomes its own event, in the order listed.
    if let Some(calls) = msg.get("tool_calls").and_then(Value::as_array) {
        if !calls.is_empty() {
            return calls
                .iter()
                .filter_map(|call| {
                    let name = call.get("name").and_then(Value::as_str)?;
                    Some(AgentEvent::ToolCall {
                        name: name.to_string(),
                        args: call.get("args").cloned().unwrap_or(Value::Null),
                        id: call
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect();
        }
    }

    if is_tool_message(msg) {
        let name = msg
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let content = content_text(msg).unwrap_or_default();
        return vec![AgentEvent::ToolResult { name, content }];
    }

    match token_text(msg) {
        Some(text) => vec![AgentEvent::Token { text }],
        None => Vec::new(),
    }
}

fn is_tool_message(msg: &Value) -> bool {
    msg.get("type").and_then(Value::as_str) == Some("tool")
        || msg.get("role").and_then(Value::as_str) == Some("tool")
}

fn content_text(msg: &Value) -> Option<String> {
    msg.get("content")
        .and_then(Value::as_str)
        .map(String::from)
}

/// The token filter. The upstream stream interleaves assistant prose with
/// tool-call echoes and raw tool-output JSON on the same channel; only prose
/// may render as typed text. A chunk yields a token iff every condition
/// holds:
/// - content is a non-empty string;
/// - the message is not tool-typed or tool-roled;
/// - it carries no `name` field (tool messages are identified by a name);
/// - it did not originate from the node named `tools`;
/// - its trimmed content does not look like a raw JSON object.
pub fn token_text(msg: &Value) -> Option<String> {
    let content = msg.get("content").and_then(Value::as_str)?;
    if content.is_empty() {
        return None;
    }
    if is_tool_message(msg) {
        return None;
    }
    if msg.get("name").is_some_and(|name| !name.is_null()) {
        return None;
    }
    if msg.get("node").and_then(Value::as_str) == Some("tools") {
        return None;
    }
    let trimmed = content.trim();
    if trimmed.starts_with("{\"") || trimmed.starts_with("{ \"") {
        return None;
    }
    Some(content.to_string())
}
