//! Web system assembly.
//!
//! [`WebSystem`] wires the dynamic endpoint dispatcher, plugin dispatcher,
//! Socket.IO layer, and frontend file service into one axum application,
//! scaffolds the workspace on first run, and serves it.
//!
//! # Surfaces
//!
//! | Path | Description |
//! |------|-------------|
//! | `<endpoint_prefix>/...` | Dynamic JSON API from `endpoints/api.rhai`. |
//! | `<endpoint_prefix>/@/@<plugin><path>` | Namespaced plugin routes. |
//! | `<endpoint_prefix>/socket.io/` | Socket.IO transport. |
//! | `<frontend_prefix>/...` | Static frontend tree + plugin assets. |
//! | anything else | Redirect to the frontend prefix. |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use axum::Router;
use axum::http::HeaderValue;
use axum::response::Redirect;
use axum::routing::{any, get};
use socketioxide::SocketIo;
use socketioxide::layer::SocketIoLayer;
use tokio::sync::RwLock;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tracing::{error, info, warn};

use crate::dispatch::{dispatch_endpoint, dispatch_endpoint_root, dispatch_plugin};
use crate::error::WebError;
use crate::frontend::{self, FrontendState, frontend_router};
use crate::reload::spawn_reload_task;
use crate::router::DynamicRouter;
use crate::socket;
use crate::state::{AppState, SessionLayer};
use luxweb_kernel::config::ConfigTree;
use luxweb_kernel::sql::QueryExecutor;
use luxweb_kernel::web::RequestMiddleware;
use luxweb_plugins::{EndpointHost, PluginRegistry, RhaiEndpointLoader};

const TPL_API: &str = include_str!("../resources/endpoint.api.rhai");
const TPL_SOCKET: &str = include_str!("../resources/endpoint.socket.rhai");
const TPL_INDEX: &str = include_str!("../resources/index.html");

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Certificate and private-key paths. TLS termination itself is a
/// collaborator concern; the paths are validated at startup so the process
/// refuses to come up half-configured.
#[derive(Debug, Clone)]
pub struct SslPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Runtime configuration for [`WebSystem`].
#[derive(Debug, Clone)]
pub struct WebSystemConfig {
    /// Environment name, echoed in error bodies and log lines.
    pub env_name: String,
    /// Workspace directory holding `endpoints/`, `frontend/`, and `data/`.
    pub workspace: PathBuf,
    /// TCP port to listen on (default: 8443).
    pub port: u16,
    /// Mount point of the JSON API (default: `/api`).
    pub endpoint_prefix: String,
    /// Mount point of the frontend file service (default: `/web`).
    pub frontend_prefix: String,
    /// Exact origin allowed by CORS; no CORS layer when unset.
    pub cors_origin: Option<String>,
    /// Certificate paths; required unless `insecure` is set.
    pub ssl: Option<SslPaths>,
    /// Allow starting without certificates (development only).
    pub insecure: bool,
    /// Total timeout for `emit` round-trips from endpoint modules.
    pub remote_timeout: Duration,
}

impl WebSystemConfig {
    pub fn new(env_name: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            env_name: env_name.into(),
            workspace: workspace.into(),
            port: 8443,
            endpoint_prefix: "/api".to_string(),
            frontend_prefix: "/web".to_string(),
            cors_origin: None,
            ssl: None,
            insecure: false,
            remote_timeout: Duration::from_secs(30),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSystem
// ─────────────────────────────────────────────────────────────────────────────

/// The assembled web system: shared state, socket handle, and the tower
/// layer waiting to be applied at [`build_app`](Self::build_app).
pub struct WebSystem {
    config: WebSystemConfig,
    state: AppState,
    io: SocketIo,
    socket_layer: Option<SocketIoLayer>,
}

impl WebSystem {
    /// Scaffold the workspace and assemble the shared state.
    ///
    /// Must be called from within a tokio runtime; endpoint modules bridge
    /// into async collaborators through the current runtime handle.
    pub fn new(
        config: WebSystemConfig,
        tree: ConfigTree,
        query: Arc<dyn QueryExecutor>,
        registry: Arc<RwLock<PluginRegistry>>,
        sessions: Option<SessionLayer>,
        middlewares: Vec<Arc<dyn RequestMiddleware>>,
    ) -> Result<Self, WebError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| WebError::Init("web system must be created inside a tokio runtime".into()))?;

        scaffold_workspace(&config.workspace)?;

        let socket_count = Arc::new(AtomicUsize::new(0));
        let (socket_layer, io) = SocketIo::builder()
            .req_path(format!("{}/socket.io", config.endpoint_prefix))
            .build_layer();

        let loader = Arc::new(RhaiEndpointLoader::new(
            config.workspace.join("endpoints"),
            EndpointHost {
                env_name: config.env_name.clone(),
                config: tree.clone(),
                query,
                remote: socket::remote_emit(io.clone(), socket_count.clone(), config.remote_timeout),
                runtime,
            },
        ));

        let state = AppState {
            env_name: config.env_name.clone(),
            config: tree,
            router: Arc::new(DynamicRouter::new(loader.clone())),
            loader,
            registry,
            middlewares: Arc::new(middlewares),
            sessions,
            socket_count,
        };

        socket::register_namespace(&io, state.clone());

        Ok(Self {
            config,
            state,
            io,
            socket_layer: Some(socket_layer),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn io(&self) -> &SocketIo {
        &self.io
    }

    /// Build the axum application. Consumes the socket layer; callable once.
    pub fn build_app(&mut self) -> Router {
        let api = Router::new()
            .nest(
                "/@",
                Router::new()
                    .fallback(dispatch_plugin)
                    .with_state(self.state.clone()),
            )
            .fallback(dispatch_endpoint)
            .with_state(self.state.clone());

        let frontend_state = FrontendState {
            dir: self.config.workspace.join("frontend"),
            registry: self.state.registry.clone(),
            env_name: self.config.env_name.clone(),
        };
        let frontend = frontend_router(frontend_state.clone());

        // `nest` only claims paths under the prefix: the bare prefix and
        // its trailing-slash form need their own routes, or they would fall
        // through to the redirect below.
        let api_root = any(dispatch_endpoint_root).with_state(self.state.clone());
        let frontend_root = get(frontend::serve_index).with_state(frontend_state);

        let redirect_to = self.config.frontend_prefix.clone();
        let mut app = Router::new()
            .route(&self.config.endpoint_prefix, api_root.clone())
            .route(&format!("{}/", self.config.endpoint_prefix), api_root)
            .nest(&self.config.endpoint_prefix, api)
            .route(&self.config.frontend_prefix, frontend_root.clone())
            .route(&format!("{}/", self.config.frontend_prefix), frontend_root)
            .nest(&self.config.frontend_prefix, frontend)
            .fallback(move || {
                let to = redirect_to.clone();
                async move { Redirect::temporary(&to) }
            });

        if let Some(layer) = self.socket_layer.take() {
            app = app.layer(layer);
        }
        if let Some(cors) = self.cors_layer() {
            app = app.layer(cors);
        }
        app
    }

    fn cors_layer(&self) -> Option<CorsLayer> {
        let origin = self.config.cors_origin.as_ref()?;
        match origin.parse::<HeaderValue>() {
            Ok(origin) => Some(
                CorsLayer::new()
                    .allow_origin(origin)
                    .allow_methods(AllowMethods::mirror_request())
                    .allow_headers(AllowHeaders::mirror_request())
                    .allow_credentials(true),
            ),
            Err(_) => {
                warn!(origin = %origin, "invalid CORS origin ignored");
                None
            }
        }
    }

    /// Build the initial route table, start the hot-reload watcher, bind,
    /// and serve until the process exits.
    pub async fn start(mut self) -> Result<(), WebError> {
        check_ssl(&self.config.ssl, self.config.insecure)?;

        // A broken seed module is not fatal: the fallback 400 serves until
        // the module is fixed and hot-reloaded.
        if let Err(err) = self.state.router.rebuild().await {
            error!(error = %err, "initial endpoint evaluation failed");
        }

        let endpoints_dir = self.config.workspace.join("endpoints");
        spawn_reload_task(self.state.clone(), &endpoints_dir)
            .map_err(|e| WebError::Init(format!("endpoint watcher failed: {e}")))?;

        let app = self.build_app();
        let addr = format!("0.0.0.0:{}", self.config.port);
        info!(
            addr = %addr,
            env = %self.config.env_name,
            api = %self.config.endpoint_prefix,
            web = %self.config.frontend_prefix,
            "web system starting"
        );
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn check_ssl(ssl: &Option<SslPaths>, insecure: bool) -> Result<(), WebError> {
    match (ssl, insecure) {
        (Some(paths), _) => {
            for (label, path) in [("certificate", &paths.cert), ("key", &paths.key)] {
                if !path.exists() {
                    return Err(WebError::NoSsl(format!(
                        "{label} file not found: {}",
                        path.display()
                    )));
                }
            }
            Ok(())
        }
        (None, true) => {
            warn!("starting without SSL certificates (insecure mode)");
            Ok(())
        }
        (None, false) => Err(WebError::NoSsl(
            "configure certificate paths or enable insecure mode".into(),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Workspace scaffolding
// ─────────────────────────────────────────────────────────────────────────────

/// Create the workspace directory tree and seed the default endpoint
/// modules and landing page. Existing files are never overwritten.
fn scaffold_workspace(workspace: &Path) -> Result<(), WebError> {
    for dir in [
        "endpoints",
        "frontend/html",
        "frontend/js",
        "frontend/css",
        "frontend/img",
        "data",
    ] {
        std::fs::create_dir_all(workspace.join(dir))?;
    }
    for (path, contents) in [
        ("endpoints/api.rhai", TPL_API),
        ("endpoints/socket.rhai", TPL_SOCKET),
        ("frontend/html/index.html", TPL_INDEX),
    ] {
        let path = workspace.join(path);
        if !path.exists() {
            info!(file = %path.display(), "seeding workspace file");
            std::fs::write(&path, contents)?;
        }
    }
    Ok(())
}
