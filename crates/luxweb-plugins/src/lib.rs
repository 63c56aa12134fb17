//! `luxweb-plugins` — plugin registration and endpoint hot-reload.
//!
//! Two subsystems live here:
//!
//! - **Plugin registry** ([`registry`], [`capability`]): plugins are
//!   initializer closures invoked exactly once with a capability object
//!   scoped to their granted [`PluginPermissions`]. Routes land in a shared
//!   namespaced route table (`/@<name>/...`), socket commands in a shared
//!   command table (`@<name>:<cmd>`), middlewares in the process-wide
//!   pipeline.
//! - **Hot-reload** ([`hot_reload`]): a `notify`-driven directory watcher
//!   with debounce and duplicate-change suppression, plus the Rhai endpoint
//!   loader that (re)evaluates the user's `api.rhai` / `socket.rhai`
//!   modules into route and command definitions.

pub mod capability;
pub mod error;
pub mod hot_reload;
pub mod registry;

pub use capability::{PluginApi, PluginPermissions};
pub use error::PluginError;
pub use hot_reload::{
    EndpointDefinition, EndpointHost, EndpointKind, EndpointLoader, EndpointWatcher, LoadError,
    ReloadAction, RemoteEmit, RhaiEndpointLoader, RouteOutcome, ScriptCommand, ScriptRoute,
    WatchConfig, WatchDebouncer, WatchKind,
};
pub use registry::{
    AssetKind, FrontendFiles, PluginRegistration, PluginRegistry, PluginRoute, RegistryDeps,
};
