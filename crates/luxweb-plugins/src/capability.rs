//! The capability object handed to plugin initializers.
//!
//! A [`PluginApi`] is constructed fresh per plugin with the granted
//! [`PluginPermissions`] baked in at construction time; there are no runtime
//! permission flags sprinkled through the registry. Every method except
//! [`begin`](PluginApi::begin) fails with a taxonomy error until `begin`
//! succeeds, and with [`PluginError::Locked`] once the name is locked.

use crate::error::PluginError;
use crate::registry::{AssetKind, FrontendFiles, PluginRegistration, PluginRegistry, PluginRoute};
use futures::future::BoxFuture;
use luxweb_kernel::config::ConfigSection;
use luxweb_kernel::sql::QueryError;
use luxweb_kernel::web::{
    ApiHandler, ApiRequest, ApiResponse, HandlerError, HttpMethod, RequestMiddleware,
    SocketHandler,
};
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Permission set granted to a plugin at registration time.
#[derive(Debug, Default, Clone, Copy)]
pub struct PluginPermissions {
    /// Whether the plugin may proxy SQL queries through the shared executor.
    pub sql: bool,
}

impl PluginPermissions {
    pub fn with_sql() -> Self {
        Self { sql: true }
    }
}

/// Case-fold and validate a plugin name: `[a-z0-9_-]+` after folding.
fn fold_name(name: &str) -> Result<String, PluginError> {
    let folded = name.to_lowercase();
    let id: String = folded
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_'))
        .collect();
    if id.is_empty() || id.chars().count() != name.chars().count() {
        return Err(PluginError::InvalidName(name.to_string()));
    }
    Ok(id)
}

/// The capability object. Lives only for the duration of one
/// `PluginRegistry::register` call.
pub struct PluginApi<'r> {
    registry: &'r mut PluginRegistry,
    permissions: PluginPermissions,
    name: Option<String>,
    /// Scoped `@plugin.<name>` config section, linked at `begin`.
    conf: Option<ConfigSection>,
}

impl<'r> PluginApi<'r> {
    pub(crate) fn new(registry: &'r mut PluginRegistry, permissions: PluginPermissions) -> Self {
        Self {
            registry,
            permissions,
            name: None,
            conf: None,
        }
    }

    pub(crate) fn take_name(&mut self) -> Option<String> {
        self.name.take()
    }

    /// Identity + lock validation shared by every post-`begin` method.
    fn validate(&self) -> Result<String, PluginError> {
        match &self.name {
            Some(name) if self.registry.is_locked(name) => Err(PluginError::Locked),
            Some(name) if self.registry.contains(name) => Ok(name.clone()),
            _ => Err(PluginError::NotBegun),
        }
    }

    /// Declare the plugin's identity. Must be called before any other
    /// capability method; fails if called twice, if the name is invalid, or
    /// if the name is already registered.
    pub fn begin(&mut self, name: &str) -> Result<(), PluginError> {
        if self.name.is_some() {
            return Err(PluginError::BeginTwice);
        }
        let id = fold_name(name)?;
        if self.registry.contains(&id) || self.registry.is_locked(&id) {
            return Err(PluginError::DuplicateName(id));
        }

        info!(plugin = %id, "beginning plugin registration");
        let conf = self
            .registry
            .deps()
            .config
            .scoped(&format!("@plugin.{id}"))
            .map_err(|e| PluginError::Config(e.to_string()))?;

        self.registry.insert_registration(PluginRegistration {
            name: id.clone(),
            middlewares: Vec::new(),
            frontend_files: FrontendFiles::default(),
        });
        self.conf = Some(conf);
        self.name = Some(id);
        Ok(())
    }

    /// The plugin's scoped configuration section (available after `begin`).
    pub fn conf(&self) -> Result<&ConfigSection, PluginError> {
        self.validate()?;
        self.conf.as_ref().ok_or(PluginError::NotBegun)
    }

    /// The workspace directory the host application runs in.
    pub fn workspace_path(&self) -> &Path {
        &self.registry.deps().workspace
    }

    /// Proxy a SQL query through the shared executor.
    ///
    /// Fails immediately with [`PluginError::Forbidden`] unless the granted
    /// permission set includes SQL access; otherwise returns a future that
    /// resolves with the rows.
    pub fn query(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<BoxFuture<'static, Result<Vec<Value>, QueryError>>, PluginError> {
        self.validate()?;
        if !self.permissions.sql {
            return Err(PluginError::Forbidden);
        }
        let executor = self.registry.deps().query.clone();
        let sql = sql.to_string();
        Ok(Box::pin(async move { executor.query(&sql, &params).await }))
    }

    /// Register a static frontend asset. The file must exist and be a
    /// `.js` (script) or `.css` (style) file.
    pub fn frontend_file(&mut self, path: impl AsRef<Path>) -> Result<(), PluginError> {
        let name = self.validate()?;
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let kind = AssetKind::from_extension(ext)
            .ok_or_else(|| PluginError::AssetKind(path.display().to_string()))?;
        if !path.exists() {
            return Err(PluginError::AssetMissing(path.display().to_string()));
        }

        self.registry.mark_frontend(&name, kind);
        if let Some(reg) = self.registry.registration_mut(&name) {
            match kind {
                AssetKind::Script => reg.frontend_files.scripts.push(path.to_path_buf()),
                AssetKind::Style => reg.frontend_files.styles.push(path.to_path_buf()),
            }
        }
        info!(plugin = %name, file = %path.display(), "frontend file added");
        Ok(())
    }

    /// Append a request middleware to this plugin's pending list. Pending
    /// middlewares are merged into the process-wide pipeline when the
    /// initializer returns successfully.
    pub fn middleware<M>(&mut self, middleware: M)
    where
        M: RequestMiddleware + 'static,
    {
        let Ok(name) = self.validate() else {
            // Matches the taxonomy of the other methods, but middleware
            // registration is infallible by signature; log and drop.
            error!("plugin middleware registered before begin(); dropped");
            return;
        };
        if let Some(reg) = self.registry.registration_mut(&name) {
            reg.middlewares.push(Arc::new(middleware));
        }
    }

    /// Register a namespaced HTTP route at `/@<name><path>`.
    ///
    /// The handler is wrapped so an error raised inside it is caught,
    /// logged, and converted to a structured 500 response; route
    /// registration itself never crashes the server.
    pub fn api<H, Fut>(&mut self, method: &str, path: &str, handler: H) -> Result<(), PluginError>
    where
        H: Fn(ApiRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse, HandlerError>> + Send + 'static,
    {
        let name = self.validate()?;
        if method.eq_ignore_ascii_case("use") {
            return Err(PluginError::MethodNotAllowed(method.to_string()));
        }
        let method = HttpMethod::from_str_ci(method)
            .ok_or_else(|| PluginError::MethodNotAllowed(method.to_string()))?;

        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let full_path = format!("/@{name}{path}");

        let env_name = self.registry.deps().env_name.clone();
        let plugin = name.clone();
        let handler = Arc::new(handler);
        let wrapped: ApiHandler = Arc::new(move |req: ApiRequest| {
            let handler = handler.clone();
            let env_name = env_name.clone();
            let plugin = plugin.clone();
            Box::pin(async move {
                match handler(req).await {
                    Ok(resp) => Ok(resp),
                    Err(err) => {
                        error!(plugin = %plugin, error = %err, "failed to execute plugin API handler");
                        Ok(ApiResponse::internal_error(&env_name))
                    }
                }
            })
        });

        self.registry.push_api_route(PluginRoute {
            plugin: name.clone(),
            method,
            path: full_path.clone(),
            handler: wrapped,
        });
        info!(plugin = %name, method = method.as_str(), path = %full_path, "registered plugin API endpoint");
        Ok(())
    }

    /// Register a namespaced real-time command `@<name>:<command>`.
    /// Fails when the fully-qualified command name is already registered.
    pub fn socket<H, Fut>(&mut self, command: &str, handler: H) -> Result<(), PluginError>
    where
        H: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let name = self.validate()?;
        let full = format!("@{name}:{command}");
        let handler = Arc::new(handler);
        let boxed: SocketHandler = Arc::new(move |args: Vec<Value>| {
            let handler = handler.clone();
            Box::pin(async move { handler(args).await })
        });
        self.registry.push_socket_command(full.clone(), boxed)?;
        info!(plugin = %name, command = %full, "registered socket command listener");
        Ok(())
    }
}
