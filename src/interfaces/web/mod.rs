mod handlers;
mod router;

use anyhow::Result;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::agent::AgentRuntime;
use crate::core::credentials::CredentialResolver;
use crate::core::error::Error;
use crate::core::investigation::InvestigationService;
use crate::core::monitor::MonitorScheduler;
use crate::core::runbook::RunbookMatcher;
use crate::core::store::Store;
use crate::core::store::types::OrgRecord;
use crate::core::vault::SecretsVault;

/// Process-wide state, built exactly once at startup and shared by every
/// handler. Nothing here is constructed per request.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub vault: Arc<SecretsVault>,
    pub resolver: Arc<CredentialResolver>,
    pub matcher: Arc<RunbookMatcher>,
    pub investigations: Arc<InvestigationService>,
    pub runtime: Arc<dyn AgentRuntime>,
    pub monitor: Arc<MonitorScheduler>,
    pub webhook_secret: Option<String>,
}

pub struct ApiServer {
    state: AppState,
    addr: String,
}

impl ApiServer {
    pub fn new(state: AppState, host: &str, port: u16) -> Self {
        Self {
            state,
            addr: format!("{host}:{port}"),
        }
    }

    pub async fn serve(self) -> Result<()> {
        let app = router::build_api_router(self.state);
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("API server listening at http://{}", self.addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Stable correlation id attached to every response, success or error.
pub(crate) fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Error type flowing out of handlers: the taxonomy error plus the request's
/// correlation id, rendered as the standard error body.
pub(crate) struct ApiError {
    pub error: Error,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: Error, request_id: &str) -> Self {
        Self {
            error,
            request_id: request_id.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.error.status_code(),
            Json(self.error.body(&self.request_id)),
        )
            .into_response()
    }
}

/// Resolve the `org` query parameter to an organization row. Missing or
/// malformed slugs are validation errors; a well-formed slug with no row is
/// not-found.
pub(crate) async fn resolve_org(
    state: &AppState,
    slug: Option<&str>,
    request_id: &str,
) -> Result<OrgRecord, ApiError> {
    let Some(slug) = slug.map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(ApiError::new(
            Error::Validation("org identifier is required".into()),
            request_id,
        ));
    };
    if !is_valid_slug(slug) {
        return Err(ApiError::new(
            Error::Validation(format!("invalid org slug: {slug}")),
            request_id,
        ));
    }
    match state.store.org_by_slug(slug).await {
        Ok(Some(org)) => Ok(org),
        Ok(None) => Err(ApiError::new(
            Error::NotFound(format!("organization {slug}")),
            request_id,
        )),
        Err(e) => Err(ApiError::new(Error::persistence(e), request_id)),
    }
}

/// Org slugs are lowercase alphanumerics and hyphens.
pub(crate) fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub(crate) async fn ping() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}
