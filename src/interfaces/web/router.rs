use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{chat, integrations, investigations, monitoring, runbooks, webhooks};

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ping", get(super::ping))
        .route("/api/webhooks/datadog", post(webhooks::datadog_webhook))
        .route("/api/chat", post(chat::chat_stream))
        .route("/api/investigations", get(investigations::list))
        .route("/api/investigations/{id}", get(investigations::get))
        .route(
            "/api/investigations/{id}/feedback",
            post(investigations::feedback),
        )
        .route(
            "/api/runbooks",
            get(runbooks::list).post(runbooks::create),
        )
        .route("/api/runbooks/templates", get(runbooks::list_templates))
        .route(
            "/api/runbooks/{id}",
            patch(runbooks::update).delete(runbooks::delete),
        )
        .route("/api/runbooks/{id}/toggle", post(runbooks::toggle))
        .route(
            "/api/monitoring/jobs",
            get(monitoring::list).post(monitoring::create),
        )
        .route(
            "/api/monitoring/jobs/{id}",
            patch(monitoring::update).delete(monitoring::delete),
        )
        .route("/api/monitoring/jobs/{id}/run", post(monitoring::run_now))
        .route("/api/monitoring/jobs/{id}/runs", get(monitoring::list_runs))
        .route(
            "/api/integrations",
            get(integrations::list),
        )
        .route(
            "/api/integrations/{provider}",
            post(integrations::connect).delete(integrations::disconnect),
        )
        .layer(middleware::from_fn(security_headers))
        .layer(build_cors())
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );
    response
}
