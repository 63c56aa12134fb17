//! Request pre-processing: header normalization, session attachment, and
//! the registered middleware pipeline.
//!
//! Order per request: normalization → session load → global middlewares →
//! plugin middlewares → script `use` handlers → route dispatch.

use axum::http::HeaderMap;
use std::sync::Arc;
use tracing::warn;

use crate::state::{AppState, SessionLayer};
use luxweb_kernel::session::{SESSION_COOKIE, Session};
use luxweb_kernel::web::{ApiRequest, ApiResponse, MiddlewareAction, RequestMiddleware};

/// Copy HTTP headers into the request (names lowercased) and resolve the
/// effective client address: `x-forwarded-for` wins over the transport peer.
pub fn normalize(req: &mut ApiRequest, headers: &HeaderMap, peer: Option<&str>) {
    for (name, value) in headers {
        if let Ok(v) = value.to_str() {
            req.headers
                .insert(name.as_str().to_lowercase(), v.to_string());
        }
    }
    let forwarded = req
        .headers
        .get("x-forwarded-for")
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string());
    req.remote_addr = forwarded
        .or_else(|| peer.map(str::to_string))
        .unwrap_or_default();
}

/// Extract the session cookie value from an already-normalized request.
pub fn session_cookie(req: &ApiRequest) -> Option<String> {
    let cookies = req.headers.get("cookie")?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}

/// Load (or create) the session for this request and attach it.
pub async fn attach_session(layer: &SessionLayer, req: &mut ApiRequest) {
    let id = session_cookie(req);
    match layer.store.load(id.as_deref()).await {
        Ok(session) => req.session = Some(session),
        Err(err) => warn!(error = %err, "session load failed, continuing without session"),
    }
}

/// Persist a dirty or fresh session. Returns the `Set-Cookie` value when the
/// client needs the cookie (re)issued.
pub async fn persist_session(layer: &SessionLayer, session: &Session) -> Option<String> {
    if session.is_dirty() || session.is_fresh() {
        if let Err(err) = layer.store.save(session).await {
            warn!(error = %err, "session save failed");
            return None;
        }
    }
    if !session.is_fresh() {
        return None;
    }
    let mut cookie = format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.id(),
        layer.expiry_secs
    );
    if let Some(domain) = &layer.domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    Some(cookie)
}

/// Run registered middlewares in order. The first `Respond` short-circuits;
/// a middleware error is logged and converted to a 500.
pub async fn run_pipeline(
    middlewares: &[Arc<dyn RequestMiddleware>],
    env_name: &str,
    req: &mut ApiRequest,
) -> Option<ApiResponse> {
    for middleware in middlewares {
        match middleware.handle(req).await {
            Ok(MiddlewareAction::Continue) => {}
            Ok(MiddlewareAction::Respond(resp)) => return Some(resp),
            Err(err) => {
                warn!(path = %req.path, error = %err, "middleware failed");
                return Some(ApiResponse::internal_error(env_name));
            }
        }
    }
    None
}

/// Convenience: global middlewares followed by the plugin pipeline.
pub async fn run_full_pipeline(state: &AppState, req: &mut ApiRequest) -> Option<ApiResponse> {
    if let Some(resp) = run_pipeline(&state.middlewares, &state.env_name, req).await {
        return Some(resp);
    }
    let plugin_middlewares: Vec<_> = {
        let registry = state.registry.read().await;
        registry.middlewares().to_vec()
    };
    run_pipeline(&plugin_middlewares, &state.env_name, req).await
}
