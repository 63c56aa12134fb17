//! Request dispatch for the dynamic endpoint surface and the plugin surface.
//!
//! Both surfaces share the same shape: normalize → session → middleware
//! pipeline → resolve → invoke → persist session. Endpoint handlers come
//! from the current route-table snapshot and run on blocking threads;
//! plugin handlers are async and already error-wrapped at registration
//! time.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::middleware::{attach_session, normalize, persist_session, run_full_pipeline};
use crate::router::RoutePattern;
use crate::state::AppState;
use luxweb_kernel::web::{ApiRequest, ApiResponse, HandlerError, HttpMethod};
use luxweb_plugins::{EndpointDefinition, RouteOutcome};

// ─────────────────────────────────────────────────────────────────────────────
// Request / response plumbing
// ─────────────────────────────────────────────────────────────────────────────

fn build_request(method: HttpMethod, uri: &Uri, body: &Bytes) -> ApiRequest {
    let mut req = ApiRequest::new(Uuid::new_v4().to_string(), method, uri.path());
    if let Some(raw) = uri.query() {
        req.query = parse_query(raw);
    }
    if !body.is_empty() {
        if let Ok(parsed) = serde_json::from_slice::<Value>(body) {
            req.body = parsed;
        }
    }
    req
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

fn to_http_response(resp: ApiResponse, set_cookie: Option<String>) -> Response {
    let status =
        StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let headers = resp.headers;
    let mut response = (status, Json(resp.body)).into_response();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    if let Some(cookie) = set_cookie {
        if let Ok(value) = HeaderValue::try_from(cookie) {
            response.headers_mut().insert("set-cookie", value);
        }
    }
    response
}

fn apply_session_updates(req: &ApiRequest, updates: Vec<(String, Value)>) {
    if let Some(session) = &req.session {
        for (key, value) in updates {
            session.set(key, value);
        }
    }
}

/// Invoke a script handler on a blocking thread.
async fn invoke_script(
    definition: Arc<EndpointDefinition>,
    script_index: usize,
    req: ApiRequest,
) -> Result<Option<RouteOutcome>, HandlerError> {
    tokio::task::spawn_blocking(move || {
        let route = &definition.routes[script_index];
        definition.invoke_route(route, &req)
    })
    .await
    .map_err(|e| HandlerError::new(e.to_string()))?
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint surface
// ─────────────────────────────────────────────────────────────────────────────

/// Handler for the bare endpoint prefix, which `nest` leaves uncovered: no
/// endpoint was named.
pub async fn dispatch_endpoint_root(State(state): State<AppState>) -> Response {
    to_http_response(ApiResponse::no_endpoint(&state.env_name), None)
}

/// Fallback handler for the endpoint prefix. Serves everything the current
/// `api.rhai` evaluation declares, 400 otherwise.
pub async fn dispatch_endpoint(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(method) = HttpMethod::from_str_ci(method.as_str()) else {
        return to_http_response(ApiResponse::no_endpoint(&state.env_name), None);
    };
    let mut req = build_request(method, &uri, &body);
    normalize(&mut req, &headers, None);
    if let Some(layer) = &state.sessions {
        attach_session(layer, &mut req).await;
    }

    let resp = run_endpoint(&state, &mut req).await;

    let mut set_cookie = None;
    if let (Some(layer), Some(session)) = (&state.sessions, &req.session) {
        set_cookie = persist_session(layer, session).await;
    }
    to_http_response(resp, set_cookie)
}

async fn run_endpoint(state: &AppState, req: &mut ApiRequest) -> ApiResponse {
    if let Some(resp) = run_full_pipeline(state, req).await {
        return resp;
    }

    // One snapshot for the whole request.
    let table = state.router.snapshot().await;
    let Some(definition) = table.definition.clone() else {
        return ApiResponse::no_endpoint(&state.env_name);
    };

    // Mount-level `use` handlers run before matching.
    for entry in table.middleware_entries() {
        match invoke_script(definition.clone(), entry.script_index, req.clone()).await {
            Ok(None) => {}
            Ok(Some(outcome)) => {
                apply_session_updates(req, outcome.session_updates);
                return outcome.response;
            }
            Err(err) => {
                error!(path = %req.path, error = %err, "endpoint middleware failed");
                return ApiResponse::internal_error(&state.env_name);
            }
        }
    }

    let Some((entry, params)) = table.resolve(req.method, &req.path) else {
        debug!(path = %req.path, "no endpoint matched");
        return ApiResponse::no_endpoint(&state.env_name);
    };
    req.params = params;

    let resp = match invoke_script(definition.clone(), entry.script_index, req.clone()).await {
        Ok(Some(outcome)) => {
            apply_session_updates(req, outcome.session_updates);
            outcome.response
        }
        Ok(None) => ApiResponse::json(Value::Null),
        Err(err) => {
            error!(path = %req.path, error = %err, "endpoint handler failed");
            ApiResponse::internal_error(&state.env_name)
        }
    };

    // After-callbacks observe the response; they run off the request path
    // and their failures are logged inside run_after.
    if definition.has_after_callbacks() {
        let req = req.clone();
        let resp_copy = resp.clone();
        tokio::task::spawn_blocking(move || definition.run_after(&req, &resp_copy));
    }

    resp
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin surface
// ─────────────────────────────────────────────────────────────────────────────

/// Fallback handler for `<prefix>/@`. Resolves against the shared plugin
/// route table; plugin handlers are already wrapped to convert failures to
/// structured 500s.
pub async fn dispatch_plugin(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(method) = HttpMethod::from_str_ci(method.as_str()) else {
        return to_http_response(ApiResponse::no_endpoint(&state.env_name), None);
    };
    let mut req = build_request(method, &uri, &body);
    normalize(&mut req, &headers, None);
    if let Some(layer) = &state.sessions {
        attach_session(layer, &mut req).await;
    }

    let resp = run_plugin(&state, &mut req).await;

    let mut set_cookie = None;
    if let (Some(layer), Some(session)) = (&state.sessions, &req.session) {
        set_cookie = persist_session(layer, session).await;
    }
    to_http_response(resp, set_cookie)
}

async fn run_plugin(state: &AppState, req: &mut ApiRequest) -> ApiResponse {
    if let Some(resp) = run_full_pipeline(state, req).await {
        return resp;
    }

    let matched = {
        let registry = state.registry.read().await;
        registry.api_routes().iter().find_map(|route| {
            if !route.method.accepts(&req.method) {
                return None;
            }
            RoutePattern::parse(&route.path)
                .matches(&req.path)
                .map(|params| (route.handler.clone(), params))
        })
    };

    let Some((handler, params)) = matched else {
        debug!(path = %req.path, "no plugin route matched");
        return ApiResponse::no_endpoint(&state.env_name);
    };
    req.params = params;

    match handler(req.clone()).await {
        Ok(resp) => resp,
        Err(err) => {
            // Registration wraps handlers, so this is unreachable in
            // practice; kept as a guard.
            error!(path = %req.path, error = %err, "plugin handler failed");
            ApiResponse::internal_error(&state.env_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsed_into_pairs() {
        let q = parse_query("a=1&b=two&flag");
        assert_eq!(q["a"], "1");
        assert_eq!(q["b"], "two");
        assert_eq!(q["flag"], "");
    }

    #[test]
    fn structured_headers_survive_conversion() {
        let mut resp = ApiResponse::json(serde_json::json!({"ok": true}));
        resp.headers.insert("x-custom".into(), "yes".into());
        let http = to_http_response(resp, Some("GSESS=abc; Path=/".into()));
        assert_eq!(http.status(), StatusCode::OK);
        assert_eq!(http.headers()["x-custom"], "yes");
        assert!(http.headers()["set-cookie"]
            .to_str()
            .unwrap()
            .starts_with("GSESS=abc"));
    }
}
