//! File system watcher for endpoint module changes
//!
//! Monitors the endpoint directory and emits a [`ReloadAction`] once per
//! accepted edit. Editors fire bursts of notifications per save, and data
//! writes arrive as two separate `change` notifications, so acceptance goes
//! through a [`WatchDebouncer`] state machine before anything is emitted.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::loader::EndpointKind;

/// How a raw notification classifies for debouncing purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// A data-modification notification. Arrives twice per save, so the
    /// debouncer only accepts it on the second observation.
    Change,
    /// Anything else (create, remove, rename). Accepted immediately.
    Other,
}

/// Which endpoint module an accepted edit affects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadAction {
    /// `api.rhai` changed: invalidate the cached module and rebuild the
    /// route table.
    Api,
    /// `socket.rhai` changed: nothing cached, new connections pick it up.
    Socket,
}

impl ReloadAction {
    pub fn kind(&self) -> EndpointKind {
        match self {
            ReloadAction::Api => EndpointKind::Api,
            ReloadAction::Socket => EndpointKind::Socket,
        }
    }
}

/// Watch configuration
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Directory holding the endpoint modules. Watched non-recursively.
    pub dir: PathBuf,
    /// Debounce window after an accepted event.
    pub window: Duration,
}

impl WatchConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            window: Duration::from_millis(200),
        }
    }

    /// Set the debounce window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Debounce state machine, separated from the actual watcher so the timing
/// rules are testable with an injected clock.
///
/// Rules, in order:
/// 1. filenames not matching `(socket|api)\..*rhai` are ignored;
/// 2. any event inside the window after the last accepted one is dropped;
/// 3. a `change` event needs two observations of the same filename before
///    it is accepted; other kinds are accepted on the first.
pub struct WatchDebouncer {
    window: Duration,
    filter: Regex,
    last_accept: Option<Instant>,
    pending_changes: HashSet<String>,
}

impl WatchDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            // Static pattern, cannot fail to compile.
            filter: Regex::new(r"^(socket|api)\..*rhai$").unwrap(),
            last_accept: None,
            pending_changes: HashSet::new(),
        }
    }

    fn classify(&self, filename: &str) -> Option<ReloadAction> {
        if !self.filter.is_match(filename) {
            return None;
        }
        if filename.starts_with("socket.") {
            Some(ReloadAction::Socket)
        } else {
            Some(ReloadAction::Api)
        }
    }

    /// Feed one raw notification through the state machine.
    pub fn observe(&mut self, filename: &str, kind: WatchKind, now: Instant) -> Option<ReloadAction> {
        let action = self.classify(filename)?;

        if let Some(last) = self.last_accept {
            if now.duration_since(last) < self.window {
                debug!(file = filename, "debounced endpoint notification");
                return None;
            }
        }

        if kind == WatchKind::Change && !self.pending_changes.remove(filename) {
            self.pending_changes.insert(filename.to_string());
            return None;
        }

        self.last_accept = Some(now);
        self.pending_changes.clear();
        Some(action)
    }
}

/// Watches the endpoint directory and forwards accepted edits as
/// [`ReloadAction`] values.
pub struct EndpointWatcher {
    // Keeps the OS watch alive; dropping it stops notifications.
    _watcher: RecommendedWatcher,
    rx: mpsc::UnboundedReceiver<ReloadAction>,
}

impl EndpointWatcher {
    /// Start watching. The directory must already exist.
    pub fn start(config: WatchConfig) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = WatchDebouncer::new(config.window);

        let mut watcher =
            notify::recommended_watcher(move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(error = %err, "endpoint watcher notification error");
                        return;
                    }
                };
                let kind = match event.kind {
                    EventKind::Modify(_) => WatchKind::Change,
                    _ => WatchKind::Other,
                };
                for path in &event.paths {
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if let Some(action) = debouncer.observe(name, kind, Instant::now()) {
                        debug!(file = name, ?action, "endpoint module changed");
                        let _ = tx.send(action);
                    }
                }
            })?;

        watcher.watch(&config.dir, RecursiveMode::NonRecursive)?;
        info!(dir = %config.dir.display(), "watching endpoint modules");

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Next accepted edit. `None` once the watcher backend has shut down.
    pub async fn next(&mut self) -> Option<ReloadAction> {
        self.rx.recv().await
    }
}
