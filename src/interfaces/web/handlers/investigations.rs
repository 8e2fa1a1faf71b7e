use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use super::super::{ApiError, AppState, new_request_id, resolve_org};
use crate::core::error::Error;
use crate::core::store::types::FeedbackRating;

const DEFAULT_LIST_LIMIT: i64 = 50;

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let request_id = new_request_id();
    let org = match resolve_org(&state, params.get("org").map(String::as_str), &request_id).await {
        Ok(org) => org,
        Err(e) => return e.into_response(),
    };
    let limit = params
        .get("limit")
        .and_then(|l| l.parse::<i64>().ok())
        .filter(|l| (1..=500).contains(l))
        .unwrap_or(DEFAULT_LIST_LIMIT);

    match state.investigations.list(&org.id, limit).await {
        Ok(investigations) => (
            StatusCode::OK,
            Json(json!({
                "investigations": investigations,
                "requestId": request_id,
            })),
        )
            .into_response(),
        Err(e) => ApiError::new(e, &request_id).into_response(),
    }
}

/// Single investigation, enriched with similar recent ones. The similarity
/// lookup is best-effort and never fails the read.
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let request_id = new_request_id();
    let investigation = match state.investigations.get(&id).await {
        Ok(investigation) => investigation,
        Err(e) => return ApiError::new(e, &request_id).into_response(),
    };
    let similar = state.investigations.find_similar(&investigation).await;

    (
        StatusCode::OK,
        Json(json!({
            "investigation": investigation,
            "similar": similar,
            "requestId": request_id,
        })),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct FeedbackRequest {
    rating: String,
    #[serde(default)]
    comment: Option<String>,
}

pub async fn feedback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FeedbackRequest>,
) -> Response {
    let request_id = new_request_id();
    let Some(rating) = FeedbackRating::parse(&payload.rating) else {
        return ApiError::new(
            Error::Validation(format!(
                "rating must be helpful or not_helpful, got {}",
                payload.rating
            )),
            &request_id,
        )
        .into_response();
    };

    match state
        .investigations
        .record_feedback(&id, rating, payload.comment.as_deref())
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "recorded",
                "investigation_id": id,
                "requestId": request_id,
            })),
        )
            .into_response(),
        Err(e) => ApiError::new(e, &request_id).into_response(),
    }
}
