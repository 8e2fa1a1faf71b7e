use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;

use super::super::{ApiError, AppState, new_request_id, resolve_org};
use crate::core::error::Error;
use crate::core::store::types::{JobType, MonitoringJobPatch, NewMonitoringJob, NotifyPolicy};

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let request_id = new_request_id();
    let org = match resolve_org(&state, params.get("org").map(String::as_str), &request_id).await {
        Ok(org) => org,
        Err(e) => return e.into_response(),
    };
    match state.store.list_monitoring_jobs(&org.id).await {
        Ok(jobs) => (
            StatusCode::OK,
            Json(json!({"jobs": jobs, "requestId": request_id})),
        )
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}

#[derive(Deserialize)]
pub struct CreateJobRequest {
    name: String,
    job_type: String,
    schedule_interval_minutes: i64,
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    notify_on: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub async fn create(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    Json(payload): Json<CreateJobRequest>,
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
    let Some(job_type) = JobType::parse(&payload.job_type) else {
        return ApiError::new(
            Error::Validation(format!("unknown job_type: {}", payload.job_type)),
            &request_id,
        )
        .into_response();
    };
    if payload.schedule_interval_minutes < 1 {
        return ApiError::new(
            Error::Validation("schedule_interval_minutes must be at least 1".into()),
            &request_id,
        )
        .into_response();
    }
    let notify_on = match payload.notify_on.as_deref() {
        Some(raw) => match NotifyPolicy::parse(raw) {
            Some(policy) => policy,
            None => {
                return ApiError::new(
                    Error::Validation(format!("unknown notify_on policy: {raw}")),
                    &request_id,
                )
                .into_response();
            }
        },
        None => NotifyPolicy::Issues,
    };

    let new = NewMonitoringJob {
        org_id: org.id,
        name: payload.name.trim().to_string(),
        job_type,
        schedule_interval_minutes: payload.schedule_interval_minutes,
        enabled: payload.enabled,
        config: payload.config.unwrap_or_else(|| json!({})),
        notify_on,
    };
    match state
        .store
        .insert_monitoring_job(new, &chrono::Utc::now().to_rfc3339())
        .await
    {
        Ok(job) => (
            StatusCode::OK,
            Json(json!({"job": job, "requestId": request_id})),
        )
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}

#[derive(Deserialize)]
pub struct UpdateJobRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    schedule_interval_minutes: Option<i64>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    config: Option<Value>,
    #[serde(default)]
    notify_on: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateJobRequest>,
) -> Response {
    let request_id = new_request_id();

    if payload.schedule_interval_minutes.is_some_and(|m| m < 1) {
        return ApiError::new(
            Error::Validation("schedule_interval_minutes must be at least 1".into()),
            &request_id,
        )
        .into_response();
    }
    let notify_on = match payload.notify_on.as_deref() {
        Some(raw) => match NotifyPolicy::parse(raw) {
            Some(policy) => Some(policy),
            None => {
                return ApiError::new(
                    Error::Validation(format!("unknown notify_on policy: {raw}")),
                    &request_id,
                )
                .into_response();
            }
        },
        None => None,
    };

    let patch = MonitoringJobPatch {
        name: payload.name,
        schedule_interval_minutes: payload.schedule_interval_minutes,
        enabled: payload.enabled,
        config: payload.config,
        notify_on,
    };
    match state.store.update_monitoring_job(&id, patch).await {
        Ok(Some(job)) => (
            StatusCode::OK,
            Json(json!({"job": job, "requestId": request_id})),
        )
            .into_response(),
        Ok(None) => ApiError::new(Error::NotFound(format!("monitoring job {id}")), &request_id)
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let request_id = new_request_id();
    match state.store.delete_monitoring_job(&id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({"status": "deleted", "requestId": request_id})),
        )
            .into_response(),
        Ok(false) => ApiError::new(Error::NotFound(format!("monitoring job {id}")), &request_id)
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}

/// Manual run-now. A run already in flight is reported, not doubled.
pub async fn run_now(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let request_id = new_request_id();
    match state.monitor.run_now(&id).await {
        Ok(Some(run)) => (
            StatusCode::OK,
            Json(json!({"run": run, "requestId": request_id})),
        )
            .into_response(),
        Ok(None) => (
            StatusCode::CONFLICT,
            Json(json!({
                "status": "skipped",
                "reason": "already_running",
                "requestId": request_id,
            })),
        )
            .into_response(),
        Err(e) => ApiError::new(e, &request_id).into_response(),
    }
}

pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let request_id = new_request_id();
    let limit = params
        .get("limit")
        .and_then(|l| l.parse::<i64>().ok())
        .filter(|l| (1..=200).contains(l))
        .unwrap_or(20);
    match state.store.list_job_runs(&id, limit).await {
        Ok(runs) => (
            StatusCode::OK,
            Json(json!({"runs": runs, "requestId": request_id})),
        )
            .into_response(),
        Err(e) => ApiError::new(Error::persistence(e), &request_id).into_response(),
    }
}
