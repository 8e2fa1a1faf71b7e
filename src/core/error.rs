use axum::http::StatusCode;

/// Error taxonomy for the investigation daemon. Boundary handlers map each
/// class to an HTTP status; best-effort side channels never surface these to
/// callers at all.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Unknown org / investigation / runbook / job.
    #[error("not found: {0}")]
    NotFound(String),

    /// One provider's credential or API call failed. Captured per provider,
    /// never escalated to fail a whole resolve.
    #[error("{provider} integration error: {message}")]
    UpstreamIntegration { provider: String, message: String },

    /// Store unavailable. The one class the caller should retry.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Failure mid-stream from the agent runtime.
    #[error("stream failure: {0}")]
    Streaming(String),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::UpstreamIntegration { .. } => StatusCode::BAD_GATEWAY,
            Error::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Streaming(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, Error::Persistence(_))
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Error::Persistence(err.to_string())
    }

    /// JSON body for an error response. Every error response carries a stable
    /// requestId for support correlation.
    pub fn body(&self, request_id: &str) -> serde_json::Value {
        serde_json::json!({
            "error": self.to_string(),
            "requestId": request_id,
            "retryable": self.retryable(),
        })
    }
}
