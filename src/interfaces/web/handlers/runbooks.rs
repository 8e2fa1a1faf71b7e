use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};

use super::super::{ApiError, AppState, new_request_id, resolve_org};
use crate::core::error::Error;
use crate::core::runbook::templates;
use crate::core::store::types::{
    NewRunbook, RunbookPatch, RunbookStep, RunbookTrigger, TriggerConfig,
};

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let request_id = new_request_id();
    let org = match resolve_org(&state, params.get("org").map(String::as_str), &request_id).await {
        Ok(org) => org,
        Err(e) => return e.into_response(),
    };
    match state.store.list_runbooks(&org.id, false).await {
        Ok(runbooks) => (
            StatusCode::OK,
            Json(json!({"runbooks": runbooks, "requestId": request_id})),
        )
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}

/// The fixed pre-built catalog, usable as creation seeds. Read-only.
pub async fn list_templates() -> Response {
    (
        StatusCode::OK,
        Json(json!({"templates": templates::catalog()})),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct CreateRunbookRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    trigger_type: String,
    #[serde(default)]
    trigger_config: TriggerConfig,
    investigation_steps: Vec<RunbookStep>,
    #[serde(default)]
    if_found_actions: BTreeMap<String, String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default = "default_priority")]
    priority: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i64 {
    100
}

fn validate_pattern(pattern: Option<&str>) -> Result<(), Error> {
    if let Some(pattern) = pattern.filter(|p| !p.is_empty())
        && RegexBuilder::new(pattern).case_insensitive(true).build().is_err()
    {
        return Err(Error::Validation(format!(
            "trigger pattern does not compile: {pattern}"
        )));
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    Json(payload): Json<CreateRunbookRequest>,
) -> Response {
    let request_id = new_request_id();
    let org = match resolve_org(&state, params.get("org").map(String::as_str), &request_id).await {
        Ok(org) => org,
        Err(e) => return e.into_response(),
    };

    if payload.name.trim().is_empty() {
        return ApiError::new(Error::Validation("name is required".into()), &request_id)
            .into_response();
    }
    let Some(trigger_type) = RunbookTrigger::parse(&payload.trigger_type) else {
        return ApiError::new(
            Error::Validation(format!("unknown trigger_type: {}", payload.trigger_type)),
            &request_id,
        )
        .into_response();
    };
    if let Err(e) = validate_pattern(payload.trigger_config.pattern.as_deref()) {
        return ApiError::new(e, &request_id).into_response();
    }
    if payload.enabled && payload.investigation_steps.is_empty() {
        return ApiError::new(
            Error::Validation("an enabled runbook needs at least one investigation step".into()),
            &request_id,
        )
        .into_response();
    }

    let new = NewRunbook {
        org_id: org.id,
        name: payload.name.trim().to_string(),
        description: payload.description,
        trigger_type,
        trigger_config: payload.trigger_config,
        investigation_steps: payload.investigation_steps,
        if_found_actions: payload.if_found_actions,
        enabled: payload.enabled,
        priority: payload.priority,
    };
    match state
        .store
        .insert_runbook(new, &chrono::Utc::now().to_rfc3339())
        .await
    {
        Ok(runbook) => (
            StatusCode::OK,
            Json(json!({"runbook": runbook, "requestId": request_id})),
        )
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}

#[derive(Deserialize)]
pub struct UpdateRunbookRequest {
    #[serde(default)]
    name: Option<String>,
    // Absent field leaves the description alone; explicit null clears it.
    #[serde(default, deserialize_with = "double_option")]
    description: Option<Option<String>>,
    #[serde(default)]
    trigger_type: Option<String>,
    #[serde(default)]
    trigger_config: Option<TriggerConfig>,
    #[serde(default)]
    investigation_steps: Option<Vec<RunbookStep>>,
    #[serde(default)]
    if_found_actions: Option<BTreeMap<String, String>>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    priority: Option<i64>,
}

fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;
    Ok(Some(Option::<String>::deserialize(deserializer)?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateRunbookRequest>,
) -> Response {
    let request_id = new_request_id();

    let trigger_type = match payload.trigger_type.as_deref() {
        Some(raw) => match RunbookTrigger::parse(raw) {
            Some(t) => Some(t),
            None => {
                return ApiError::new(
                    Error::Validation(format!("unknown trigger_type: {raw}")),
                    &request_id,
                )
                .into_response();
            }
        },
        None => None,
    };
    if let Some(config) = &payload.trigger_config
        && let Err(e) = validate_pattern(config.pattern.as_deref())
    {
        return ApiError::new(e, &request_id).into_response();
    }
    if payload
        .investigation_steps
        .as_ref()
        .is_some_and(Vec::is_empty)
        && payload.enabled != Some(false)
    {
        return ApiError::new(
            Error::Validation("an enabled runbook needs at least one investigation step".into()),
            &request_id,
        )
        .into_response();
    }

    let patch = RunbookPatch {
        name: payload.name,
        description: payload.description,
        trigger_type,
        trigger_config: payload.trigger_config,
        investigation_steps: payload.investigation_steps,
        if_found_actions: payload.if_found_actions,
        enabled: payload.enabled,
        priority: payload.priority,
    };
    match state.store.update_runbook(&id, patch).await {
        Ok(Some(runbook)) => (
            StatusCode::OK,
            Json(json!({"runbook": runbook, "requestId": request_id})),
        )
            .into_response(),
        Ok(None) => {
            ApiError::new(Error::NotFound(format!("runbook {id}")), &request_id).into_response()
        }
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let request_id = new_request_id();
    match state.store.delete_runbook(&id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({"status": "deleted", "requestId": request_id})),
        )
            .into_response(),
        Ok(false) => {
            ApiError::new(Error::NotFound(format!("runbook {id}")), &request_id).into_response()
        }
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}

/// Flip the enabled flag and report the new state.
pub async fn toggle(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let request_id = new_request_id();
    let runbook = match state.store.get_runbook(&id).await {
        Ok(Some(runbook)) => runbook,
        Ok(None) => {
            return ApiError::new(Error::NotFound(format!("runbook {id}")), &request_id)
                .into_response();
        }
        Err(e) => return ApiError::new(Error::persistence(e), &request_id).into_response(),
    };

    let enabled = !runbook.enabled;
    match state.store.set_runbook_enabled(&id, enabled).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({"id": id, "enabled": enabled, "requestId": request_id})),
        )
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}
