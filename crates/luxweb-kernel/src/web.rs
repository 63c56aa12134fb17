//! Core request/response model shared across the LuxWeb crates.
//!
//! These types are deliberately free of axum/hyper so plugin handlers,
//! endpoint-module invocation, and the middleware pipeline can all be tested
//! without an HTTP stack.

use crate::session::Session;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP primitives
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP methods an endpoint module or plugin may register handlers for.
///
/// `All` matches every inbound method, mirroring the catch-all registration
/// the endpoint DSL supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    All,
}

impl HttpMethod {
    /// Case-insensitive parse from the method strings the registration
    /// surface accepts. Anything else (including `use`) is `None`.
    pub fn from_str_ci(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "get" => Some(HttpMethod::Get),
            "post" => Some(HttpMethod::Post),
            "put" => Some(HttpMethod::Put),
            "patch" => Some(HttpMethod::Patch),
            "delete" => Some(HttpMethod::Delete),
            "all" => Some(HttpMethod::All),
            _ => None,
        }
    }

    /// Lowercase string form, matching the registration surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "get",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
            HttpMethod::Patch => "patch",
            HttpMethod::Delete => "delete",
            HttpMethod::All => "all",
        }
    }

    /// Whether a registered method accepts a concrete inbound method.
    pub fn accepts(&self, inbound: &HttpMethod) -> bool {
        matches!(self, HttpMethod::All) || self == inbound
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response
// ─────────────────────────────────────────────────────────────────────────────

/// An inbound API request flowing through the middleware pipeline into a
/// route handler.
///
/// All fields use owned types so the struct can be sent across async task
/// boundaries without lifetime complications.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Unique identifier for correlating this request across logs.
    pub id: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// Request path relative to the endpoint mount, e.g. `/items`.
    pub path: String,
    /// Path parameters extracted by the route matcher.
    pub params: HashMap<String, String>,
    /// Query string parameters.
    pub query: HashMap<String, String>,
    /// HTTP headers (header names lowercased).
    pub headers: HashMap<String, String>,
    /// Parsed JSON body; `Value::Null` when the body was empty or not JSON.
    pub body: Value,
    /// Client address after header normalization (`x-forwarded-for` wins
    /// over the socket peer address).
    pub remote_addr: String,
    /// Session handle, attached only when sessions are enabled.
    pub session: Option<Session>,
}

impl ApiRequest {
    pub fn new(id: impl Into<String>, method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method,
            path: path.into(),
            params: HashMap::new(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: Value::Null,
            remote_addr: String::new(),
            session: None,
        }
    }

    /// Builder helper: attach a header (name lowercased).
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_lowercase(), value.into());
        self
    }

    /// Builder helper: set the JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }
}

/// An outbound API response produced by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// JSON body.
    pub body: Value,
}

impl ApiResponse {
    /// A `200 OK` JSON response.
    pub fn json(body: Value) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body,
        }
    }

    /// A JSON response with an explicit status code.
    pub fn with_status(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
        }
    }

    /// The structured `500` body every wrapped handler converts failures to.
    pub fn internal_error(env_name: &str) -> Self {
        Self::with_status(
            500,
            json!({
                "error": 500,
                "info": format!("{env_name} API"),
                "message": "Internal server error",
            }),
        )
    }

    /// The structured `400` fallback for unmatched endpoint paths.
    pub fn no_endpoint(env_name: &str) -> Self {
        Self::with_status(
            400,
            json!({
                "info": format!("{env_name} API"),
                "message": "No endpoint specified",
            }),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler signatures
// ─────────────────────────────────────────────────────────────────────────────

/// Error raised inside a user or plugin handler body.
///
/// Caught per-request/per-invocation and converted to a structured error
/// response; never propagates to the process level.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A boxed async HTTP route handler, as registered by plugins.
pub type ApiHandler =
    Arc<dyn Fn(ApiRequest) -> BoxFuture<'static, Result<ApiResponse, HandlerError>> + Send + Sync>;

/// A boxed async socket command handler, as registered by plugins.
///
/// Receives the arguments the remote caller sent; the resolved value is
/// delivered back through the acknowledgment callback exactly once.
pub type SocketHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a middleware step.
#[derive(Debug, Clone)]
pub enum MiddlewareAction {
    /// Hand the request to the next middleware (or the route handler).
    Continue,
    /// Short-circuit with this response; the handler never runs.
    Respond(ApiResponse),
}

/// One step in the request middleware pipeline.
///
/// Global middlewares, plugin middlewares, and the built-in header
/// normalization step all implement this; ordering is fixed per table
/// generation (see `luxweb-server::middleware`).
#[async_trait::async_trait]
pub trait RequestMiddleware: Send + Sync {
    async fn handle(&self, req: &mut ApiRequest) -> Result<MiddlewareAction, HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parse_is_case_insensitive() {
        assert_eq!(HttpMethod::from_str_ci("GET"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::from_str_ci("Delete"), Some(HttpMethod::Delete));
        assert_eq!(HttpMethod::from_str_ci("all"), Some(HttpMethod::All));
        assert_eq!(HttpMethod::from_str_ci("use"), None);
        assert_eq!(HttpMethod::from_str_ci("TRACE"), None);
    }

    #[test]
    fn all_accepts_every_method() {
        assert!(HttpMethod::All.accepts(&HttpMethod::Get));
        assert!(HttpMethod::All.accepts(&HttpMethod::Patch));
        assert!(HttpMethod::Get.accepts(&HttpMethod::Get));
        assert!(!HttpMethod::Get.accepts(&HttpMethod::Post));
    }

    #[test]
    fn internal_error_body_shape() {
        let resp = ApiResponse::internal_error("LUX Web Application");
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body["error"], 500);
        assert_eq!(resp.body["message"], "Internal server error");
    }

    #[test]
    fn no_endpoint_is_400() {
        let resp = ApiResponse::no_endpoint("Test");
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["info"], "Test API");
    }
}
