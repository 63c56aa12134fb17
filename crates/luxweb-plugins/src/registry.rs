//! Capability-scoped plugin registry.
//!
//! The registry owns every process-wide table plugins write into: the
//! namespaced API route table, the namespaced socket-command table, the
//! merged middleware list, and the frontend asset manifest. It is populated
//! during startup (before the first router build) and read-only afterwards.
//!
//! Registration is all-or-nothing at the logging level only: if an
//! initializer fails, the plugin is treated as unregistered, but capability
//! calls that already mutated shared tables are not rolled back. That
//! matches the historical behavior and is documented as a known gap.

use crate::capability::{PluginApi, PluginPermissions};
use crate::error::PluginError;
use luxweb_kernel::config::ConfigTree;
use luxweb_kernel::sql::QueryExecutor;
use luxweb_kernel::web::{ApiHandler, HttpMethod, RequestMiddleware, SocketHandler};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Frontend asset kinds a plugin may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Script,
    Style,
}

impl AssetKind {
    /// Manifest bitmask: bit 1 = script, bit 2 = style.
    pub fn bit(&self) -> u8 {
        match self {
            AssetKind::Script => 1,
            AssetKind::Style => 2,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "js" => Some(AssetKind::Script),
            "css" => Some(AssetKind::Style),
            _ => None,
        }
    }
}

/// Declared frontend assets of one plugin, ordered per kind.
#[derive(Debug, Default, Clone)]
pub struct FrontendFiles {
    pub scripts: Vec<PathBuf>,
    pub styles: Vec<PathBuf>,
}

/// One successfully begun plugin.
///
/// `middlewares` is drained into the process-wide pipeline once the
/// initializer returns; afterwards it stays empty (ownership transfers).
pub struct PluginRegistration {
    pub name: String,
    pub middlewares: Vec<Arc<dyn RequestMiddleware>>,
    pub frontend_files: FrontendFiles,
}

/// A namespaced plugin API route (`/@<name><path>`).
#[derive(Clone)]
pub struct PluginRoute {
    pub plugin: String,
    pub method: HttpMethod,
    pub path: String,
    pub handler: ApiHandler,
}

/// External collaborators the registry hands to capability objects.
#[derive(Clone)]
pub struct RegistryDeps {
    pub env_name: String,
    pub config: ConfigTree,
    pub query: Arc<dyn QueryExecutor>,
    pub workspace: PathBuf,
}

/// The process-wide plugin registry.
pub struct PluginRegistry {
    deps: RegistryDeps,
    plugins: HashMap<String, PluginRegistration>,
    /// Names whose registration is complete and immutable.
    locks: HashSet<String>,
    /// Middlewares merged across plugins, in registration order.
    middlewares: Vec<Arc<dyn RequestMiddleware>>,
    api_routes: Vec<PluginRoute>,
    socket_commands: Vec<(String, SocketHandler)>,
    /// `(name, bitmask)` in registration order; source of the manifest.
    frontend_bits: Vec<(String, u8)>,
    manifest: String,
}

impl PluginRegistry {
    pub fn new(deps: RegistryDeps) -> Self {
        Self {
            deps,
            plugins: HashMap::new(),
            locks: HashSet::new(),
            middlewares: Vec::new(),
            api_routes: Vec::new(),
            socket_commands: Vec::new(),
            frontend_bits: Vec::new(),
            manifest: String::new(),
        }
    }

    /// Invoke a plugin initializer exactly once with a fresh capability
    /// object carrying the granted permission set.
    ///
    /// On success the plugin's pending middlewares are merged into the
    /// process-wide list, the asset manifest is recomputed, and the name is
    /// permanently locked. On failure the error is logged and the plugin is
    /// treated as unregistered.
    ///
    /// Returns the locked plugin name, or `None` when registration failed.
    pub fn register<F>(&mut self, init: F, permissions: PluginPermissions) -> Option<String>
    where
        F: FnOnce(&mut PluginApi<'_>) -> Result<(), PluginError>,
    {
        let mut api = PluginApi::new(self, permissions);
        let result = init(&mut api);
        let name = api.take_name();

        match (result, name) {
            (Ok(()), Some(name)) => {
                self.finish_registration(&name);
                info!(plugin = %name, "plugin registered successfully");
                Some(name)
            }
            (Ok(()), None) => {
                error!("failed to initialize plugin: initializer never called begin()");
                None
            }
            (Err(err), _) => {
                error!(error = %err, "failed to initialize plugin");
                None
            }
        }
    }

    fn finish_registration(&mut self, name: &str) {
        if let Some(reg) = self.plugins.get_mut(name) {
            let pending = std::mem::take(&mut reg.middlewares);
            if !pending.is_empty() {
                info!(plugin = %name, count = pending.len(), "registered plugin middlewares");
                self.middlewares.extend(pending);
            }
        }
        self.recompute_manifest();
        self.locks.insert(name.to_string());
    }

    fn recompute_manifest(&mut self) {
        self.manifest = self
            .frontend_bits
            .iter()
            .map(|(name, bits)| format!("'{name}':{bits}"))
            .collect::<Vec<_>>()
            .join(",");
    }

    // ── accessors used by capability objects ────────────────────────────────

    pub(crate) fn deps(&self) -> &RegistryDeps {
        &self.deps
    }

    pub(crate) fn is_locked(&self, name: &str) -> bool {
        self.locks.contains(name)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub(crate) fn insert_registration(&mut self, reg: PluginRegistration) {
        self.plugins.insert(reg.name.clone(), reg);
    }

    pub(crate) fn registration_mut(&mut self, name: &str) -> Option<&mut PluginRegistration> {
        self.plugins.get_mut(name)
    }

    pub(crate) fn push_api_route(&mut self, route: PluginRoute) {
        self.api_routes.push(route);
    }

    pub(crate) fn push_socket_command(
        &mut self,
        command: String,
        handler: SocketHandler,
    ) -> Result<(), PluginError> {
        if self.socket_commands.iter().any(|(name, _)| *name == command) {
            return Err(PluginError::DuplicateCommand(command));
        }
        self.socket_commands.push((command, handler));
        Ok(())
    }

    pub(crate) fn mark_frontend(&mut self, name: &str, kind: AssetKind) {
        match self.frontend_bits.iter_mut().find(|(n, _)| n == name) {
            Some((_, bits)) => *bits |= kind.bit(),
            None => self.frontend_bits.push((name.to_string(), kind.bit())),
        }
    }

    // ── read surface consumed by the server ─────────────────────────────────

    /// All registered plugins by name.
    pub fn plugin(&self, name: &str) -> Option<&PluginRegistration> {
        self.plugins.get(name)
    }

    /// Middlewares merged across plugins, in registration order.
    pub fn middlewares(&self) -> &[Arc<dyn RequestMiddleware>] {
        &self.middlewares
    }

    /// The namespaced plugin API route table.
    pub fn api_routes(&self) -> &[PluginRoute] {
        &self.api_routes
    }

    /// The namespaced socket command table, in registration order.
    pub fn socket_commands(&self) -> &[(String, SocketHandler)] {
        &self.socket_commands
    }

    /// The exported frontend asset manifest string:
    /// comma-separated `'<name>':<bitmask>` (bit 1 = script, bit 2 = style).
    pub fn frontend_manifest(&self) -> &str {
        &self.manifest
    }
}
