use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use super::super::{ApiError, AppState, new_request_id, resolve_org};
use crate::core::agent::AgentRunRequest;
use crate::core::credentials::Credentials;
use crate::core::error::Error;
use crate::core::relay::{ClientEvent, relay};

#[derive(Deserialize)]
pub struct ChatRequest {
    message: String,
    #[serde(default, rename = "threadId")]
    thread_id: Option<String>,
}

/// Ad hoc investigation chat. The response is an SSE stream of
/// `token` / `tool_call` / `tool_result` events, finished by exactly one
/// `done` or `error`.
pub async fn chat_stream(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    Json(payload): Json<ChatRequest>,
) -> Response {
    let request_id = new_request_id();

    if payload.message.trim().is_empty() {
        return ApiError::new(Error::Validation("message must not be empty".into()), &request_id)
            .into_response();
    }

    // Chat runs without an org too; it just gets no integration credentials.
    let credentials = match params.get("org") {
        Some(slug) => match resolve_org(&state, Some(slug), &request_id).await {
            Ok(org) => state.resolver.resolve(&org.id).await,
            Err(e) => return e.into_response(),
        },
        None => Credentials::default(),
    };

    let request = AgentRunRequest::chat(payload.message, payload.thread_id, credentials);
    let (tx, rx) = tokio::sync::mpsc::channel::<ClientEvent>(32);
    let runtime = state.runtime.clone();
    let relay_request_id = request_id.clone();

    tokio::spawn(async move {
        match runtime.run(request).await {
            Ok(events) => {
                relay(events, Some(tx), &relay_request_id).await;
            }
            Err(e) => {
                let _ = tx.send(ClientEvent::Error { error: e.to_string() }).await;
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event)
            .unwrap_or_else(|_| r#"{"type":"error","error":"serialization failure"}"#.to_string());
        Ok::<_, Infallible>(Event::default().data(data))
    });

    let mut response = Sse::new(stream).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    response
}
