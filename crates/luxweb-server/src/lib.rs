//! `luxweb-server` — the assembled web application.
//!
//! One initialization call stands up the whole system: configuration tree,
//! optional SQL executor, session layer, plugin registry, dynamic endpoint
//! router with hot reload, Socket.IO layer, and the static frontend.
//!
//! ```no_run
//! use luxweb_server::{AppOptions, LuxWebApplication};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), luxweb_server::WebError> {
//!     luxweb_server::init_tracing();
//!     let app = LuxWebApplication::init(
//!         AppOptions::new("Shopfront", "./workspace")
//!             .with_config_names(["main", "mail"])
//!             .with_insecure(true),
//!     )?;
//!     app.start().await
//! }
//! ```

pub mod dispatch;
pub mod error;
pub mod frontend;
pub mod middleware;
pub mod reload;
pub mod router;
pub mod server;
pub mod socket;
pub mod state;

pub use error::WebError;
pub use router::{DynamicRouter, RouteTable};
pub use server::{SslPaths, WebSystem, WebSystemConfig};
pub use state::{AppState, SessionLayer};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

use luxweb_kernel::config::ConfigTree;
use luxweb_kernel::session::{MemorySessionStore, SessionStore};
use luxweb_kernel::sql::{NullQueryExecutor, QueryExecutor};
use luxweb_kernel::web::RequestMiddleware;
use luxweb_plugins::{PluginError, PluginPermissions, PluginRegistry, RegistryDeps};

/// Install the default `tracing` subscriber (env-filtered, compact).
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .compact()
        .try_init();
}

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Session layer options.
#[derive(Clone)]
pub struct SessionOptions {
    /// Backing store; defaults to the in-memory store.
    pub store: Arc<dyn SessionStore>,
    /// Cookie lifetime in seconds (default: 30 days).
    pub expiry_secs: u64,
    /// Optional cookie domain attribute.
    pub domain: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            store: Arc::new(MemorySessionStore::new()),
            expiry_secs: 60 * 60 * 24 * 30,
            domain: None,
        }
    }
}

/// Everything [`LuxWebApplication::init`] needs, with builder-style setters.
pub struct AppOptions {
    /// Environment name, echoed in error bodies and log lines.
    pub name: String,
    /// Named configuration sections to link under `<workspace>/data/`.
    pub config_names: Vec<String>,
    /// Workspace directory; scaffolded on first run.
    pub workspace: PathBuf,
    pub port: u16,
    pub endpoint_prefix: String,
    pub frontend_prefix: String,
    pub cors_origin: Option<String>,
    pub ssl: Option<SslPaths>,
    /// Allow starting without certificates (development only).
    pub insecure: bool,
    pub sessions: Option<SessionOptions>,
    /// SQL executor; a no-op stub is installed when absent.
    pub sql: Option<Arc<dyn QueryExecutor>>,
    /// Global middlewares, run before plugin middlewares.
    pub middlewares: Vec<Arc<dyn RequestMiddleware>>,
    /// Total timeout for `emit` round-trips from endpoint modules.
    pub remote_timeout: Duration,
}

impl AppOptions {
    pub fn new(name: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            config_names: vec!["main".to_string()],
            workspace: workspace.into(),
            port: 8443,
            endpoint_prefix: "/api".to_string(),
            frontend_prefix: "/web".to_string(),
            cors_origin: None,
            ssl: None,
            insecure: false,
            sessions: None,
            sql: None,
            middlewares: Vec::new(),
            remote_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_config_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_endpoint_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.endpoint_prefix = prefix.into();
        self
    }

    pub fn with_frontend_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.frontend_prefix = prefix.into();
        self
    }

    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = Some(origin.into());
        self
    }

    pub fn with_ssl(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.ssl = Some(SslPaths {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn with_sessions(mut self, options: SessionOptions) -> Self {
        self.sessions = Some(options);
        self
    }

    pub fn with_sql(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.sql = Some(executor);
        self
    }

    pub fn with_middleware<M>(mut self, middleware: M) -> Self
    where
        M: RequestMiddleware + 'static,
    {
        self.middlewares.push(Arc::new(middleware));
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application
// ─────────────────────────────────────────────────────────────────────────────

/// The assembled application: a [`WebSystem`] plus the handles an embedding
/// program keeps after initialization.
pub struct LuxWebApplication {
    system: WebSystem,
    config: ConfigTree,
    query: Arc<dyn QueryExecutor>,
    registry: Arc<RwLock<PluginRegistry>>,
}

impl LuxWebApplication {
    /// Stand the system up. Must be called inside a tokio runtime.
    pub fn init(options: AppOptions) -> Result<Self, WebError> {
        let names: Vec<&str> = options.config_names.iter().map(String::as_str).collect();
        let config = ConfigTree::build(&names, options.workspace.join("data"))?;

        let query: Arc<dyn QueryExecutor> = options
            .sql
            .unwrap_or_else(|| Arc::new(NullQueryExecutor));

        let registry = Arc::new(RwLock::new(PluginRegistry::new(RegistryDeps {
            env_name: options.name.clone(),
            config: config.clone(),
            query: query.clone(),
            workspace: options.workspace.clone(),
        })));

        let sessions = options.sessions.map(|s| SessionLayer {
            store: s.store,
            expiry_secs: s.expiry_secs,
            domain: s.domain,
        });

        let mut system_config = WebSystemConfig::new(&options.name, &options.workspace);
        system_config.port = options.port;
        system_config.endpoint_prefix = options.endpoint_prefix;
        system_config.frontend_prefix = options.frontend_prefix;
        system_config.cors_origin = options.cors_origin;
        system_config.ssl = options.ssl;
        system_config.insecure = options.insecure;
        system_config.remote_timeout = options.remote_timeout;

        let system = WebSystem::new(
            system_config,
            config.clone(),
            query.clone(),
            registry.clone(),
            sessions,
            options.middlewares,
        )?;

        Ok(Self {
            system,
            config,
            query,
            registry,
        })
    }

    /// Register a plugin. Call before [`start`](Self::start) so the routes
    /// and commands are in place for the first connection.
    ///
    /// Returns the locked plugin name, or `None` when registration failed
    /// (the failure is logged, never fatal).
    pub async fn use_plugin<F>(&self, init: F, permissions: PluginPermissions) -> Option<String>
    where
        F: FnOnce(&mut luxweb_plugins::PluginApi<'_>) -> Result<(), PluginError>,
    {
        self.registry.write().await.register(init, permissions)
    }

    /// The configuration tree (cheap to clone, shared with the system).
    pub fn config(&self) -> ConfigTree {
        self.config.clone()
    }

    /// The shared SQL executor.
    pub fn query(&self) -> Arc<dyn QueryExecutor> {
        self.query.clone()
    }

    /// Access the underlying web system (state, socket handle).
    pub fn system(&self) -> &WebSystem {
        &self.system
    }

    /// Build the axum application without serving, for embedding or tests.
    /// The route table must be built first via the system state's router.
    pub fn into_parts(self) -> (WebSystem, ConfigTree, Arc<dyn QueryExecutor>) {
        (self.system, self.config, self.query)
    }

    /// Serve until the process exits.
    pub async fn start(self) -> Result<(), WebError> {
        self.system.start().await
    }
}
