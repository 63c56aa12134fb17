//! Shared application state injected into every axum handler.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tokio::sync::RwLock;

use crate::router::DynamicRouter;
use luxweb_kernel::config::ConfigTree;
use luxweb_kernel::session::SessionStore;
use luxweb_kernel::web::RequestMiddleware;
use luxweb_plugins::{EndpointLoader, PluginRegistry};

/// Session layer settings, present only when sessions are enabled.
#[derive(Clone)]
pub struct SessionLayer {
    pub store: Arc<dyn SessionStore>,
    /// Cookie lifetime in seconds.
    pub expiry_secs: u64,
    /// Optional cookie domain attribute.
    pub domain: Option<String>,
}

/// State shared by the endpoint, plugin, frontend, and socket surfaces.
#[derive(Clone)]
pub struct AppState {
    /// Environment name, echoed in error bodies and log lines.
    pub env_name: String,
    pub config: ConfigTree,
    pub router: Arc<DynamicRouter>,
    pub loader: Arc<dyn EndpointLoader>,
    pub registry: Arc<RwLock<PluginRegistry>>,
    /// Global middlewares, fixed at startup. Plugin middlewares live in the
    /// registry and run after these.
    pub middlewares: Arc<Vec<Arc<dyn RequestMiddleware>>>,
    pub sessions: Option<SessionLayer>,
    /// Connected socket count, maintained by the socket layer and polled by
    /// `remote_invoke`.
    pub socket_count: Arc<AtomicUsize>,
}
