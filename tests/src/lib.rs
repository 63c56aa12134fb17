//! Integration test harness.
//!
//! Stands up a full [`LuxWebApplication`] in a temporary workspace and
//! exposes one-shot request helpers so integration tests exercise the real
//! axum application without binding a port.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use luxweb_plugins::EndpointKind;
use luxweb_server::state::AppState;
use luxweb_server::{AppOptions, LuxWebApplication, SessionOptions};

/// An application under construction: plugins may still be registered and
/// endpoint modules replaced before [`build`](TestHarness::build).
pub struct TestHarness {
    pub workspace: TempDir,
    pub app: LuxWebApplication,
}

/// The built axum application plus the handles tests poke at directly.
pub struct BuiltApp {
    pub router: Router,
    pub state: AppState,
    pub workspace: TempDir,
}

impl TestHarness {
    /// New application in a scaffolded temp workspace, sessions enabled,
    /// insecure mode (no certificates in tests).
    pub fn new() -> Self {
        Self::new_with(|options| options)
    }

    /// Like [`new`](Self::new), with a hook to adjust the options (extra
    /// collaborators, prefixes) before init.
    pub fn new_with(customize: impl FnOnce(AppOptions) -> AppOptions) -> Self {
        let workspace = tempfile::tempdir().expect("temp workspace");
        let options = customize(
            AppOptions::new("Test", workspace.path())
                .with_insecure(true)
                .with_sessions(SessionOptions::default()),
        );
        let app = LuxWebApplication::init(options).expect("application init");
        Self { workspace, app }
    }

    /// Replace `endpoints/api.rhai` and drop the cached evaluation.
    pub fn write_api_module(&self, script: &str) {
        let path = self.workspace.path().join("endpoints/api.rhai");
        std::fs::write(path, script).expect("write api module");
        self.app
            .system()
            .state()
            .loader
            .invalidate(EndpointKind::Api);
    }

    /// Replace `endpoints/socket.rhai`; connections evaluate it fresh, so
    /// no invalidation is needed.
    pub fn write_socket_module(&self, script: &str) {
        let path = self.workspace.path().join("endpoints/socket.rhai");
        std::fs::write(path, script).expect("write socket module");
    }

    /// Build the route table and the axum application.
    pub async fn build(self) -> BuiltApp {
        let state = self.app.system().state().clone();
        state.router.rebuild().await.expect("route table build");
        let (mut system, _config, _query) = self.app.into_parts();
        BuiltApp {
            router: system.build_app(),
            state,
            workspace: self.workspace,
        }
    }

    /// Like [`build`](Self::build) but tolerates a broken endpoint module.
    pub async fn build_lenient(self) -> BuiltApp {
        let state = self.app.system().state().clone();
        let _ = state.router.rebuild().await;
        let (mut system, _config, _query) = self.app.into_parts();
        BuiltApp {
            router: system.build_app(),
            state,
            workspace: self.workspace,
        }
    }
}

impl BuiltApp {
    /// Swap the api module on disk and rebuild, as the hot-reload task
    /// would after a watcher event.
    pub async fn hot_swap_api(&self, script: &str) {
        let path = self.workspace.path().join("endpoints/api.rhai");
        std::fs::write(path, script).expect("write api module");
        self.state.loader.invalidate(EndpointKind::Api);
        self.state.router.rebuild().await.expect("rebuild");
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.request("POST", path, Some(body)).await
    }

    /// One-shot request against the real application.
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.raw_request(method, path, body).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Plain-text exchange, for wire-level protocols layered over the
    /// router (the Socket.IO polling transport in particular).
    pub async fn text_request(
        &self,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> (StatusCode, String) {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(text) => builder
                .header("content-type", "text/plain;charset=UTF-8")
                .body(Body::from(text.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("dispatch request");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// One-shot request returning the raw response (for header checks).
    pub async fn raw_request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("dispatch request")
    }
}
