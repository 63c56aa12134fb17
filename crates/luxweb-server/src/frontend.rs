//! Static frontend service.
//!
//! Serves the workspace `frontend/` tree under the configured frontend
//! prefix. File paths are kind-prefixed: `js:app.js` maps to
//! `frontend/js/app.js`, likewise `css:` and `img:`. Anything else is
//! treated as a page name resolved against `frontend/html/<name>.html`,
//! falling back to `index.html`. Plugin assets are exposed under
//! `@<plugin>/<file>` from each plugin's registered file list, and the
//! plugin manifest string is served at `plugins`.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use luxweb_plugins::PluginRegistry;

#[derive(Clone)]
pub struct FrontendState {
    pub dir: PathBuf,
    pub registry: Arc<RwLock<PluginRegistry>>,
    pub env_name: String,
}

pub fn frontend_router(state: FrontendState) -> Router {
    Router::new().fallback(serve).with_state(state)
}

/// Landing page, mounted at the bare frontend prefix which `nest` leaves
/// uncovered.
pub async fn serve_index(State(state): State<FrontendState>) -> Response {
    serve_file(state.dir.join("html/index.html"), &state.env_name).await
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "js" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "html" => "text/html; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

fn not_found(env_name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "info": format!("{env_name} frontend"), "message": "File not found" })),
    )
        .into_response()
}

async fn serve_file(path: PathBuf, env_name: &str) -> Response {
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type_for(&path))],
            bytes,
        )
            .into_response(),
        Err(_) => {
            debug!(path = %path.display(), "frontend file missing");
            not_found(env_name)
        }
    }
}

fn safe_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains('/') && !name.contains('\\')
}

async fn serve(State(state): State<FrontendState>, uri: Uri) -> Response {
    let request = uri.path().trim_matches('/').to_string();

    // Landing page.
    if request.is_empty() {
        return serve_file(state.dir.join("html/index.html"), &state.env_name).await;
    }

    // Plugin asset manifest.
    if request == "plugins" {
        let manifest = state.registry.read().await.frontend_manifest().to_string();
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            manifest,
        )
            .into_response();
    }

    // Plugin assets: @<plugin>/<file>, matched by registered file name.
    if let Some(rest) = request.strip_prefix('@') {
        let Some((plugin, file)) = rest.split_once('/') else {
            return not_found(&state.env_name);
        };
        let path = {
            let registry = state.registry.read().await;
            registry.plugin(plugin).and_then(|reg| {
                reg.frontend_files
                    .scripts
                    .iter()
                    .chain(reg.frontend_files.styles.iter())
                    .find(|p| p.file_name().and_then(|n| n.to_str()) == Some(file))
                    .cloned()
            })
        };
        return match path {
            Some(path) => serve_file(path, &state.env_name).await,
            None => not_found(&state.env_name),
        };
    }

    // Kind-prefixed asset paths.
    for (prefix, subdir) in [("js:", "js"), ("css:", "css"), ("img:", "img")] {
        if let Some(name) = request.strip_prefix(prefix) {
            if !safe_name(name) {
                return not_found(&state.env_name);
            }
            return serve_file(state.dir.join(subdir).join(name), &state.env_name).await;
        }
    }

    // Page names resolve to html/<name>.html, falling back to index.html.
    if safe_name(&request) && !request.contains('.') {
        let page = state.dir.join("html").join(format!("{request}.html"));
        if page.exists() {
            return serve_file(page, &state.env_name).await;
        }
        return serve_file(state.dir.join("html/index.html"), &state.env_name).await;
    }

    not_found(&state.env_name)
}
