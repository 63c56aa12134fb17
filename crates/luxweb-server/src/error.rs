//! Server-level error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use luxweb_kernel::config::ConfigError;
use luxweb_kernel::session::SessionError;
use luxweb_plugins::LoadError;

/// Errors raised while assembling or running the web system.
///
/// Per-request failures never surface here; they are converted to structured
/// JSON responses inside the dispatcher. `WebError` covers startup and
/// rebuild paths.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WebError {
    #[error("initialization failed: {0}")]
    Init(String),

    /// SSL certificate or key path missing or unreadable. The server refuses
    /// to start without them unless insecure mode is explicitly enabled.
    #[error("no usable SSL certificate configured: {0}")]
    NoSsl(String),

    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),

    /// Endpoint module re-evaluation failed. The previous route table stays
    /// active.
    #[error("endpoint rebuild failed: {0}")]
    Rebuild(#[from] LoadError),

    #[error("socket layer error: {0}")]
    Socket(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::Rebuild(_) | WebError::Socket(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
