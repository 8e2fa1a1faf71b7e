use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use super::super::{ApiError, AppState, new_request_id, resolve_org};
use crate::core::error::Error;
use crate::core::store::types::{IntegrationStatus, Provider};
use crate::core::vault::secret_key;

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let request_id = new_request_id();
    let org = match resolve_org(&state, params.get("org").map(String::as_str), &request_id).await {
        Ok(org) => org,
        Err(e) => return e.into_response(),
    };
    match state.store.list_integrations(&org.id).await {
        Ok(integrations) => (
            StatusCode::OK,
            Json(json!({"integrations": integrations, "requestId": request_id})),
        )
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}

#[derive(Deserialize)]
pub struct ConnectRequest {
    /// Secret values land in the vault, never in the integrations row.
    secrets: BTreeMap<String, String>,
    #[serde(default)]
    metadata: Option<Value>,
}

pub async fn connect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(payload): Json<ConnectRequest>,
) -> Response {
    let request_id = new_request_id();
    let Some(provider) = Provider::parse(&provider) else {
        return ApiError::new(
            Error::Validation(format!("unknown provider: {provider}")),
            &request_id,
        )
        .into_response();
    };
    let org = match resolve_org(&state, params.get("org").map(String::as_str), &request_id).await {
        Ok(org) => org,
        Err(e) => return e.into_response(),
    };
    if payload.secrets.is_empty() {
        return ApiError::new(
            Error::Validation("at least one secret is required to connect".into()),
            &request_id,
        )
        .into_response();
    }

    for (field, value) in &payload.secrets {
        if let Err(e) = state
            .vault
            .set_secret(&secret_key(&org.id, provider.as_str(), field), value)
            .await
        {
            return ApiError::new(Error::persistence(e), &request_id).into_response();
        }
    }

    let metadata = payload.metadata.unwrap_or_else(|| json!({}));
    match state
        .store
        .upsert_integration(
            &org.id,
            provider,
            IntegrationStatus::Connected,
            &metadata,
            &chrono::Utc::now().to_rfc3339(),
        )
        .await
    {
        Ok(integration) => (
            StatusCode::OK,
            Json(json!({"integration": integration, "requestId": request_id})),
        )
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}

pub async fn disconnect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let request_id = new_request_id();
    let Some(provider) = Provider::parse(&provider) else {
        return ApiError::new(
            Error::Validation(format!("unknown provider: {provider}")),
            &request_id,
        )
        .into_response();
    };
    let org = match resolve_org(&state, params.get("org").map(String::as_str), &request_id).await {
        Ok(org) => org,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = state
        .vault
        .remove_provider_secrets(&org.id, provider.as_str())
        .await
    {
        warn!("failed to purge {} secrets for org {}: {e}", provider.as_str(), org.id);
    }
    match state
        .store
        .set_integration_status(
            &org.id,
            provider,
            IntegrationStatus::Disconnected,
            &chrono::Utc::now().to_rfc3339(),
        )
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"status": "disconnected", "requestId": request_id})),
        )
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}
