use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

use super::super::{ApiError, AppState, is_valid_slug, new_request_id, resolve_org};
use crate::core::error::Error;
use crate::core::investigation;
use crate::core::runbook::AlertContext;
use crate::core::store::types::{NewInvestigation, Severity, TriggerType};

const ORG_TAG_PREFIX: &str = "sre_agent_org:";

/// Inbound Datadog-style alert webhook. Responds as soon as the `queued`
/// investigation row exists; the run itself is a detached task.
pub async fn datadog_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request_id = new_request_id();
    let received = Instant::now();

    if let Some(secret) = &state.webhook_secret
        && !verify_signature(&headers, &body, secret)
    {
        return ApiError::new(
            Error::Validation("webhook signature verification failed".into()),
            &request_id,
        )
        .into_response();
    }

    let payload: Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => {
            return ApiError::new(
                Error::Validation("request body is not valid JSON".into()),
                &request_id,
            )
            .into_response();
        }
    };

    let alert = match AlertPayload::extract(&payload) {
        Ok(alert) => alert,
        Err(e) => return ApiError::new(e, &request_id).into_response(),
    };

    // Org comes from the query param, or a sre_agent_org:<slug> tag.
    let slug = params
        .get("org")
        .cloned()
        .or_else(|| alert.org_tag.clone());
    if slug.as_deref().is_some_and(|s| !is_valid_slug(s)) {
        return ApiError::new(
            Error::Validation(format!("invalid org slug: {}", slug.unwrap_or_default())),
            &request_id,
        )
        .into_response();
    }
    let org = match resolve_org(&state, slug.as_deref(), &request_id).await {
        Ok(org) => org,
        Err(e) => return e.into_response(),
    };

    // Audit the raw payload verbatim, off the request path.
    {
        let store = state.store.clone();
        let org_id = org.id.clone();
        let raw = body.clone();
        tokio::spawn(async move {
            if let Err(e) = store.record_audit(Some(&org_id), "webhook:datadog", &raw).await {
                warn!("audit log write failed: {e}");
            }
        });
    }

    // Recovery transitions are acknowledged but investigate nothing.
    if alert.is_recovery {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "skipped",
                "reason": "recovery",
                "requestId": request_id,
            })),
        )
            .into_response();
    }

    let new = NewInvestigation {
        org_id: org.id.clone(),
        trigger_type: TriggerType::Webhook,
        trigger_payload: payload,
        alert_id: alert.alert_id.clone(),
        alert_name: alert.name.clone(),
        service: alert.service.clone(),
        environment: alert.environment.clone(),
        severity: alert.severity,
    };
    let created = match state.investigations.create(new).await {
        Ok(investigation) => investigation,
        Err(e) => return ApiError::new(e, &request_id).into_response(),
    };
    info!(
        "investigation {} queued for alert '{}' (org {})",
        created.id, alert.name, org.slug
    );

    // Playbook selection is best-effort: a matcher failure costs the
    // playbook, never the investigation.
    let context = AlertContext {
        name: alert.name.clone(),
        service: alert.service.clone(),
        severity: alert.severity,
        tags: alert.tags.clone(),
    };
    let runbook = match state.matcher.match_alert(&org.id, &context).await {
        Ok(runbook) => runbook,
        Err(e) => {
            warn!("runbook matching failed for investigation {}: {e}", created.id);
            None
        }
    };

    let investigation_id = created.id.clone();
    tokio::spawn(investigation::execute(
        state.investigations.clone(),
        state.resolver.clone(),
        state.runtime.clone(),
        created,
        runbook,
        None,
        request_id.clone(),
    ));

    (
        StatusCode::OK,
        Json(json!({
            "status": "queued",
            "investigation_id": investigation_id,
            "requestId": request_id,
            "duration_ms": received.elapsed().as_millis() as u64,
        })),
    )
        .into_response()
}

/// Normalized alert fields pulled out of the provider payload.
#[derive(Debug)]
struct AlertPayload {
    alert_id: Option<String>,
    name: String,
    is_recovery: bool,
    service: Option<String>,
    environment: Option<String>,
    severity: Option<Severity>,
    org_tag: Option<String>,
    tags: Vec<String>,
}

impl AlertPayload {
    fn extract(payload: &Value) -> Result<Self, Error> {
        let name = payload
            .get("alert_title")
            .or_else(|| payload.get("title"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Validation("alert_title is required".into()))?;

        let alert_id = match payload.get("alert_id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let transition = payload
            .get("alert_transition")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();
        let is_recovery = matches!(transition.as_str(), "recovered" | "recovery" | "resolved");

        let tags: Vec<String> = payload
            .get("tags")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let tag_value = |prefix: &str| -> Option<String> {
            tags.iter()
                .find_map(|t| t.strip_prefix(prefix))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        // An explicit severity field wins over a severity:<level> tag;
        // unknown levels are treated as absent, never rejected.
        let severity = payload
            .get("severity")
            .and_then(Value::as_str)
            .and_then(Severity::parse)
            .or_else(|| tag_value("severity:").as_deref().and_then(Severity::parse));

        Ok(Self {
            alert_id,
            name: name.to_string(),
            is_recovery,
            service: tag_value("service:"),
            environment: tag_value("env:").or_else(|| tag_value("environment:")),
            severity,
            org_tag: tag_value(ORG_TAG_PREFIX),
            tags,
        })
    }
}

/// HMAC-SHA256 signature check over the raw body (`X-Signature: <hex>`).
/// Only enforced when a webhook secret is configured; fails closed when the
/// header is missing.
fn verify_signature(headers: &HeaderMap, body: &str, secret: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let Some(signature) = headers.get("x-signature").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(signature.as_bytes(), expected.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}
