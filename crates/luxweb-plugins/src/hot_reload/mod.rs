//! Endpoint module hot-reload
//!
//! Watches the workspace `endpoints/` directory for edits to the dynamic
//! endpoint modules (`api.rhai`, `socket.rhai`), debounces the raw
//! notifications, and tells the host which module to re-evaluate.

pub mod loader;
pub mod watcher;

pub use loader::{
    EndpointDefinition, EndpointHost, EndpointKind, EndpointLoader, LoadError, RemoteEmit,
    RhaiEndpointLoader, RouteOutcome, ScriptCommand, ScriptRoute,
};
pub use watcher::{EndpointWatcher, ReloadAction, WatchConfig, WatchDebouncer, WatchKind};
