//! Hot-reload wiring: watcher events → loader invalidation → route rebuild.

use std::path::Path;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::state::AppState;
use luxweb_plugins::{EndpointWatcher, ReloadAction, WatchConfig};

/// Watch the endpoint directory and react to accepted edits for the life of
/// the process.
///
/// An `api.rhai` edit invalidates the cached module and rebuilds the route
/// table; a failed rebuild keeps the previous table and is only logged. A
/// `socket.rhai` edit needs no action here since connections evaluate it
/// fresh.
pub fn spawn_reload_task(
    state: AppState,
    endpoints_dir: &Path,
) -> Result<JoinHandle<()>, notify::Error> {
    let config = WatchConfig::new(endpoints_dir);
    let settle = config.window;
    let mut watcher = EndpointWatcher::start(config)?;
    Ok(tokio::spawn(async move {
        while let Some(action) = watcher.next().await {
            // An accepted edit may still be mid-write; wait out the
            // debounce window before re-reading the module.
            tokio::time::sleep(settle).await;
            state.loader.invalidate(action.kind());
            match action {
                ReloadAction::Api => {
                    info!("api endpoint module changed, rebuilding routes");
                    if let Err(err) = state.router.rebuild().await {
                        error!(error = %err, "hot reload rebuild failed");
                    }
                }
                ReloadAction::Socket => {
                    debug!("socket endpoint module changed, new connections will pick it up");
                }
            }
        }
        debug!("endpoint watcher stopped");
    }))
}
