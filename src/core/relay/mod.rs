use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::agent::events::{AgentEvent, RunOutcome};

/// Client-facing SSE event. Serialized as
/// `{"type": "token"|"tool_call"|"tool_result"|"done"|"error", ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Token {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_name: String,
        tool_args: Value,
        tool_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_name: String,
        content: String,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        thread_id: Option<String>,
        request_id: String,
    },
    Error {
        error: String,
    },
}

/// What the relay learned from one run, for the lifecycle to persist.
#[derive(Debug, Default)]
pub struct RelaySummary {
    pub outcome: Option<RunOutcome>,
    pub tool_call_count: i64,
    pub error: Option<String>,
}

async fn emit(sink: &Option<mpsc::Sender<ClientEvent>>, event: ClientEvent) {
    if let Some(tx) = sink {
        // A closed sink means the client went away; the run itself continues.
        let _ = tx.send(event).await;
    }
}

/// Single-consumer pull loop over the normalized agent event stream.
///
/// Re-emits to at most one downstream sink. The next upstream event is only
/// pulled after the current one is written downstream, so backpressure comes
/// from the transport. Termination is exact: one `done` after upstream
/// exhaustion, or one `error` on upstream failure, never a silent close,
/// since clients rely on a terminal event to stop rendering.
pub async fn relay(
    mut rx: mpsc::Receiver<AgentEvent>,
    sink: Option<mpsc::Sender<ClientEvent>>,
    request_id: &str,
) -> RelaySummary {
    let mut summary = RelaySummary::default();

    while let Some(event) = rx.recv().await {
        match event {
            AgentEvent::Token { text } => {
                emit(&sink, ClientEvent::Token { text }).await;
            }
            AgentEvent::ToolCall { name, args, id } => {
                summary.tool_call_count += 1;
                emit(
                    &sink,
                    ClientEvent::ToolCall {
                        tool_name: name,
                        tool_args: args,
                        tool_id: id,
                    },
                )
                .await;
            }
            AgentEvent::ToolResult { name, content } => {
                emit(
                    &sink,
                    ClientEvent::ToolResult {
                        tool_name: name,
                        content,
                    },
                )
                .await;
            }
            AgentEvent::Result(outcome) => {
                summary.outcome = Some(*outcome);
            }
            AgentEvent::Error { message } => {
                summary.error = Some(message.clone());
                emit(&sink, ClientEvent::Error { error: message }).await;
                return summary;
            }
        }
    }

    let thread_id = summary
        .outcome
        .as_ref()
        .and_then(|outcome| outcome.thread_id.clone());
    emit(
        &sink,
        ClientEvent::Done {
            thread_id,
            request_id: request_id.to_string(),
        },
    )
    .await;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn run_relay(events: Vec<AgentEvent>) -> (Vec<ClientEvent>, RelaySummary) {
        let (up_tx, up_rx) = mpsc::channel(16);
        let (down_tx, mut down_rx) = mpsc::channel(16);

        let feeder = tokio::spawn(async move {
            for event in events {
                up_tx.send(event).await.unwrap();
            }
        });

        let summary = relay(up_rx, Some(down_tx), "req-1").await;
        feeder.await.unwrap();

        let mut out = Vec::new();
        while let Ok(event) = down_rx.try_recv() {
            out.push(event);
        }
        (out, summary)
    }

    fn event_types(events: &[ClientEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| {
                serde_json::to_value(e).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn exactly_one_done_after_exhaustion() {
        let (events, summary) = run_relay(vec![
            AgentEvent::Token {
                text: "looking".to_string(),
            },
            AgentEvent::Token {
                text: " into it".to_string(),
            },
        ])
        .await;
        assert_eq!(event_types(&events), vec!["token", "token", "done"]);
        assert!(summary.error.is_none());
    }

    #[tokio::test]
    async fn done_finalizes_even_without_tokens() {
        let (events, _) = run_relay(vec![
            AgentEvent::ToolCall {
                name: "check_deployments".to_string(),
                args: json!({}),
                id: "call_1".to_string(),
            },
            AgentEvent::ToolResult {
                name: "check_deployments".to_string(),
                content: "no deployments".to_string(),
            },
        ])
        .await;
        assert_eq!(event_types(&events), vec!["tool_call", "tool_result", "done"]);
    }

    #[tokio::test]
    async fn error_terminates_with_single_error_event() {
        let (events, summary) = run_relay(vec![
            AgentEvent::Token {
                text: "partial".to_string(),
            },
            AgentEvent::Error {
                message: "upstream died".to_string(),
            },
        ])
        .await;
        assert_eq!(event_types(&events), vec!["token", "error"]);
        assert_eq!(summary.error.as_deref(), Some("upstream died"));
    }

    #[tokio::test]
    async fn done_carries_thread_id_from_result() {
        let (events, summary) = run_relay(vec![AgentEvent::Result(Box::new(RunOutcome {
            thread_id: Some("thread-7".to_string()),
            summary: Some("all clear".to_string()),
            ..Default::default()
        }))])
        .await;

        let done = serde_json::to_value(events.last().unwrap()).unwrap();
        assert_eq!(done["type"], "done");
        assert_eq!(done["threadId"], "thread-7");
        assert_eq!(done["requestId"], "req-1");
        assert_eq!(summary.outcome.unwrap().summary.as_deref(), Some("all clear"));
    }

    #[tokio::test]
    async fn tool_calls_are_counted_even_without_a_sink() {
        let (up_tx, up_rx) = mpsc::channel(16);
        for _ in 0..3 {
            up_tx
                .send(AgentEvent::ToolCall {
                    name: "query_metrics".to_string(),
                    args: json!({}),
                    id: String::new(),
                })
                .await
                .unwrap();
        }
        drop(up_tx);

        let summary = relay(up_rx, None, "req-1").await;
        assert_eq!(summary.tool_call_count, 3);
    }

    #[test]
    fn wire_shapes_match_the_protocol() {
        let call = serde_json::to_value(ClientEvent::ToolCall {
            tool_name: "check_deployments".to_string(),
            tool_args: json!({"service": "checkout"}),
            tool_id: "call_1".to_string(),
        })
        .unwrap();
        assert_eq!(call["type"], "tool_call");
        assert_eq!(call["toolName"], "check_deployments");
        assert_eq!(call["toolArgs"]["service"], "checkout");
        assert_eq!(call["toolId"], "call_1");

        let result = serde_json::to_value(ClientEvent::ToolResult {
            tool_name: "check_deployments".to_string(),
            content: "ok".to_string(),
        })
        .unwrap();
        assert_eq!(result["type"], "tool_result");
        assert_eq!(result["toolName"], "check_deployments");
        assert_eq!(result["content"], "ok");

        let error = serde_json::to_value(ClientEvent::Error {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(error["type"], "error");
        assert_eq!(error["error"], "boom");
    }
}
