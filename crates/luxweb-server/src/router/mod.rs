//! Dynamic API route table.
//!
//! The endpoint module `api.rhai` is evaluated into an immutable
//! [`RouteTable`] snapshot. Snapshots are swapped wholesale behind an
//! `Arc<RwLock<Arc<RouteTable>>>`: a request clones the inner `Arc` once at
//! dispatch and sees one consistent table for its whole lifetime, while a
//! rebuild replaces the inner `Arc` without touching in-flight requests.
//! Old snapshots are dropped when the last in-flight request releases its
//! clone.

pub mod pattern;

pub use pattern::RoutePattern;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tracing::{error, info};

use crate::error::WebError;
use luxweb_kernel::web::HttpMethod;
use luxweb_plugins::{EndpointDefinition, EndpointKind, EndpointLoader};

/// One route from the endpoint module, resolved against its definition by
/// index.
pub struct RouteEntry {
    pub method: HttpMethod,
    pub pattern: RoutePattern,
    /// A `use` registration: runs before route matching.
    pub middleware: bool,
    /// Index into the owning definition's `routes`.
    pub script_index: usize,
}

/// An immutable snapshot of the dynamic route table.
pub struct RouteTable {
    /// Monotonic rebuild counter, for logs and tests.
    pub generation: u64,
    pub entries: Vec<RouteEntry>,
    /// The module evaluation the entries point into. `None` only for the
    /// empty boot table.
    pub definition: Option<Arc<EndpointDefinition>>,
}

impl RouteTable {
    fn empty(generation: u64) -> Self {
        Self {
            generation,
            entries: Vec::new(),
            definition: None,
        }
    }

    fn from_definition(generation: u64, definition: Arc<EndpointDefinition>) -> Self {
        let entries = definition
            .routes
            .iter()
            .enumerate()
            .map(|(script_index, route)| RouteEntry {
                method: route.method,
                pattern: RoutePattern::parse(&route.path),
                middleware: route.middleware,
                script_index,
            })
            .collect();
        Self {
            generation,
            entries,
            definition: Some(definition),
        }
    }

    /// Mount-level middleware entries, in registration order.
    pub fn middleware_entries(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter().filter(|e| e.middleware)
    }

    /// First non-middleware entry matching method and path.
    pub fn resolve(
        &self,
        method: HttpMethod,
        path: &str,
    ) -> Option<(&RouteEntry, HashMap<String, String>)> {
        self.entries
            .iter()
            .filter(|e| !e.middleware && e.method.accepts(&method))
            .find_map(|e| e.pattern.matches(path).map(|params| (e, params)))
    }
}

/// Owner of the current snapshot; rebuilds swap it atomically.
pub struct DynamicRouter {
    table: Arc<RwLock<Arc<RouteTable>>>,
    generation: AtomicU64,
    loader: Arc<dyn EndpointLoader>,
}

impl DynamicRouter {
    /// Starts with an empty table; call [`rebuild`](Self::rebuild) once the
    /// endpoint directory is scaffolded.
    pub fn new(loader: Arc<dyn EndpointLoader>) -> Self {
        Self {
            table: Arc::new(RwLock::new(Arc::new(RouteTable::empty(0)))),
            generation: AtomicU64::new(0),
            loader,
        }
    }

    /// The current snapshot. Requests call this exactly once at dispatch.
    pub async fn snapshot(&self) -> Arc<RouteTable> {
        self.table.read().await.clone()
    }

    /// Re-evaluate `api.rhai` and swap in a fresh table.
    ///
    /// On evaluation failure the previous table stays active and the error
    /// is returned for logging; requests keep being served against the last
    /// good snapshot.
    pub async fn rebuild(&self) -> Result<(), WebError> {
        // Evaluation runs script code that may block on the async bridges
        // (`query`, `emit`, `wait`); keep it off the runtime threads.
        let loader = self.loader.clone();
        let definition =
            match tokio::task::spawn_blocking(move || loader.load(EndpointKind::Api)).await {
                Ok(Ok(def)) => def,
                Ok(Err(err)) => {
                    error!(error = %err, "endpoint rebuild failed, keeping previous route table");
                    return Err(WebError::Rebuild(err));
                }
                Err(err) => {
                    error!(error = %err, "endpoint evaluation panicked, keeping previous route table");
                    return Err(WebError::Init(format!("endpoint evaluation panicked: {err}")));
                }
            };
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let table = Arc::new(RouteTable::from_definition(generation, definition));
        info!(
            generation,
            routes = table.entries.len(),
            "route table rebuilt"
        );
        *self.table.write().await = table;
        Ok(())
    }
}
