//! Dynamic endpoint module evaluation
//!
//! Endpoint modules are Rhai scripts living in the workspace `endpoints/`
//! directory: `api.rhai` declares HTTP routes, `socket.rhai` declares
//! real-time commands. Each evaluation gets a fresh engine with the host
//! surface registered (`on`, `after`, `log`, `conf`, `query`, `emit`, plus
//! the utility namespace), runs the script once to collect registrations,
//! and the resulting [`EndpointDefinition`] keeps the engine and AST alive
//! so collected handlers can be invoked later.
//!
//! The API module is cached until [`EndpointLoader::invalidate`]; the socket
//! module is evaluated fresh for every connection so new connections always
//! see the latest script.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{AST, Dynamic, Engine, EvalAltResult, FnPtr};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{info, warn};

use luxweb_kernel::config::ConfigTree;
use luxweb_kernel::sql::QueryExecutor;
use luxweb_kernel::utils;
use luxweb_kernel::web::{ApiRequest, ApiResponse, HandlerError, HttpMethod};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// The two dynamic endpoint modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Api,
    Socket,
}

impl EndpointKind {
    pub fn filename(&self) -> &'static str {
        match self {
            EndpointKind::Api => "api.rhai",
            EndpointKind::Socket => "socket.rhai",
        }
    }
}

/// Endpoint module evaluation failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("endpoint module {0} not found")]
    Missing(String),
    #[error("failed to read endpoint module: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to evaluate endpoint module: {0}")]
    Eval(String),
}

/// Host-provided callback that delivers a real-time event to connected
/// clients and resolves with the first acknowledgment.
pub type RemoteEmit =
    Arc<dyn Fn(String, Vec<Value>) -> BoxFuture<'static, Result<Value, HandlerError>> + Send + Sync>;

/// Collaborators injected into every endpoint module evaluation.
#[derive(Clone)]
pub struct EndpointHost {
    /// Environment name, used in log lines and error bodies.
    pub env_name: String,
    /// Read access to the configuration tree (`conf` host function).
    pub config: ConfigTree,
    /// Shared SQL executor (`query` host function).
    pub query: Arc<dyn QueryExecutor>,
    /// Real-time emit bridge (`emit` host function).
    pub remote: RemoteEmit,
    /// Runtime handle for bridging async collaborators into the synchronous
    /// script world. Handlers always run on blocking threads.
    pub runtime: tokio::runtime::Handle,
}

/// An HTTP route declared by `api.rhai`.
pub struct ScriptRoute {
    pub method: HttpMethod,
    pub path: String,
    /// A `use` registration: runs before route matching, a unit return
    /// means "continue".
    pub middleware: bool,
    handler: FnPtr,
}

/// A real-time command declared by `socket.rhai`.
pub struct ScriptCommand {
    pub name: String,
    handler: FnPtr,
}

/// What a route handler produced.
#[derive(Debug)]
pub struct RouteOutcome {
    pub response: ApiResponse,
    /// Session keys the handler wants persisted, applied by the dispatcher.
    pub session_updates: Vec<(String, Value)>,
}

// Registrations collected while the script body runs.
#[derive(Default)]
struct Sinks {
    routes: Vec<ScriptRoute>,
    commands: Vec<ScriptCommand>,
    after: Vec<FnPtr>,
}

// ─────────────────────────────────────────────────────────────────────────────
// EndpointDefinition
// ─────────────────────────────────────────────────────────────────────────────

/// One evaluated endpoint module. Owns the engine and AST its handler
/// pointers were compiled against.
pub struct EndpointDefinition {
    engine: Engine,
    ast: AST,
    pub routes: Vec<ScriptRoute>,
    pub commands: Vec<ScriptCommand>,
    after: Vec<FnPtr>,
}

impl EndpointDefinition {
    /// Invoke a route handler with the request. `Ok(None)` means the
    /// handler returned unit (a middleware letting the request continue).
    ///
    /// Blocking: call from a blocking thread, never directly on the
    /// runtime.
    pub fn invoke_route(
        &self,
        route: &ScriptRoute,
        req: &ApiRequest,
    ) -> Result<Option<RouteOutcome>, HandlerError> {
        let arg = request_to_dynamic(req)?;
        let out: Dynamic = route
            .handler
            .call(&self.engine, &self.ast, (arg,))
            .map_err(|e| HandlerError::new(e.to_string()))?;
        if out.is_unit() {
            return Ok(None);
        }
        let value: Value = from_dynamic(&out).map_err(|e| HandlerError::new(e.to_string()))?;
        Ok(Some(outcome_from_value(value)))
    }

    /// Invoke a command handler with the caller's arguments. The resolved
    /// value becomes the acknowledgment payload.
    pub fn invoke_command(
        &self,
        command: &ScriptCommand,
        args: Vec<Value>,
    ) -> Result<Value, HandlerError> {
        let arg = to_dynamic(args).map_err(|e| HandlerError::new(e.to_string()))?;
        let out: Dynamic = command
            .handler
            .call(&self.engine, &self.ast, (arg,))
            .map_err(|e| HandlerError::new(e.to_string()))?;
        if out.is_unit() {
            return Ok(Value::Null);
        }
        from_dynamic(&out).map_err(|e| HandlerError::new(e.to_string()))
    }

    pub fn has_after_callbacks(&self) -> bool {
        !self.after.is_empty()
    }

    /// Run the module's `after` callbacks in registration order. Each
    /// callback's failure is logged and does not stop the remaining ones.
    pub fn run_after(&self, req: &ApiRequest, resp: &ApiResponse) {
        if self.after.is_empty() {
            return;
        }
        let Ok(req_arg) = request_to_dynamic(req) else {
            return;
        };
        let resp_arg = to_dynamic(json!({
            "status": resp.status,
            "body": resp.body,
        }))
        .unwrap_or(Dynamic::UNIT);

        for callback in &self.after {
            if let Err(err) =
                callback.call::<Dynamic>(&self.engine, &self.ast, (req_arg.clone(), resp_arg.clone()))
            {
                warn!(path = %req.path, error = %err, "after-callback failed");
            }
        }
    }
}

fn request_to_dynamic(req: &ApiRequest) -> Result<Dynamic, HandlerError> {
    let session = req
        .session
        .as_ref()
        .map(|s| Value::Object(s.values().into_iter().collect()))
        .unwrap_or(Value::Null);
    to_dynamic(json!({
        "id": req.id,
        "method": req.method.as_str(),
        "path": req.path,
        "params": req.params,
        "query": req.query,
        "headers": req.headers,
        "body": req.body,
        "remote_addr": req.remote_addr,
        "session": session,
    }))
    .map_err(|e| HandlerError::new(e.to_string()))
}

/// A handler return value that is a map with a `body` key is a structured
/// response (`status`, `headers`, `session` optional); anything else is the
/// body of a plain `200`.
fn outcome_from_value(value: Value) -> RouteOutcome {
    let Value::Object(mut map) = value else {
        return RouteOutcome {
            response: ApiResponse::json(value),
            session_updates: Vec::new(),
        };
    };
    if !map.contains_key("body") {
        return RouteOutcome {
            response: ApiResponse::json(Value::Object(map)),
            session_updates: Vec::new(),
        };
    }

    let status = map
        .get("status")
        .and_then(Value::as_u64)
        .map(|s| s as u16)
        .unwrap_or(200);
    let body = map.remove("body").unwrap_or(Value::Null);
    let mut response = ApiResponse::with_status(status, body);
    if let Some(Value::Object(headers)) = map.remove("headers") {
        for (k, v) in headers {
            if let Value::String(v) = v {
                response.headers.insert(k.to_lowercase(), v);
            }
        }
    }
    let session_updates = match map.remove("session") {
        Some(Value::Object(updates)) => updates.into_iter().collect(),
        _ => Vec::new(),
    };
    RouteOutcome {
        response,
        session_updates,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loader
// ─────────────────────────────────────────────────────────────────────────────

/// Loads endpoint modules on demand.
pub trait EndpointLoader: Send + Sync {
    fn load(&self, kind: EndpointKind) -> Result<Arc<EndpointDefinition>, LoadError>;

    /// Drop any cached evaluation of the module so the next `load` re-reads
    /// the file.
    fn invalidate(&self, kind: EndpointKind);
}

/// The Rhai-backed loader.
pub struct RhaiEndpointLoader {
    dir: PathBuf,
    host: EndpointHost,
    cached_api: Mutex<Option<Arc<EndpointDefinition>>>,
}

impl RhaiEndpointLoader {
    pub fn new(dir: impl Into<PathBuf>, host: EndpointHost) -> Self {
        Self {
            dir: dir.into(),
            host,
            cached_api: Mutex::new(None),
        }
    }

    fn evaluate(&self, kind: EndpointKind) -> Result<Arc<EndpointDefinition>, LoadError> {
        let path = self.dir.join(kind.filename());
        if !path.exists() {
            return Err(LoadError::Missing(kind.filename().to_string()));
        }
        let source = std::fs::read_to_string(&path)?;

        let sinks = Arc::new(Mutex::new(Sinks::default()));
        let engine = build_engine(kind, &self.host, sinks.clone());
        let ast = engine
            .compile(&source)
            .map_err(|e| LoadError::Eval(e.to_string()))?;
        engine
            .run_ast(&ast)
            .map_err(|e| LoadError::Eval(e.to_string()))?;

        let collected = std::mem::take(&mut *sinks.lock());
        info!(
            module = kind.filename(),
            routes = collected.routes.len(),
            commands = collected.commands.len(),
            "evaluated endpoint module"
        );
        Ok(Arc::new(EndpointDefinition {
            engine,
            ast,
            routes: collected.routes,
            commands: collected.commands,
            after: collected.after,
        }))
    }
}

impl EndpointLoader for RhaiEndpointLoader {
    fn load(&self, kind: EndpointKind) -> Result<Arc<EndpointDefinition>, LoadError> {
        match kind {
            EndpointKind::Api => {
                if let Some(cached) = self.cached_api.lock().clone() {
                    return Ok(cached);
                }
                let def = self.evaluate(kind)?;
                *self.cached_api.lock() = Some(def.clone());
                Ok(def)
            }
            // Fresh evaluation per connection.
            EndpointKind::Socket => self.evaluate(kind),
        }
    }

    fn invalidate(&self, kind: EndpointKind) {
        if kind == EndpointKind::Api {
            *self.cached_api.lock() = None;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host surface
// ─────────────────────────────────────────────────────────────────────────────

fn to_script_err(msg: impl std::fmt::Display) -> Box<EvalAltResult> {
    msg.to_string().into()
}

fn build_engine(kind: EndpointKind, host: &EndpointHost, sinks: Arc<Mutex<Sinks>>) -> Engine {
    let mut engine = Engine::new();

    match kind {
        EndpointKind::Api => {
            let route_sinks = sinks.clone();
            engine.register_fn("on", move |method: &str, path: &str, handler: FnPtr| -> bool {
                let Some(method) = HttpMethod::from_str_ci(method) else {
                    warn!(method, path, "unsupported method in endpoint module");
                    return false;
                };
                let path = if path.starts_with('/') {
                    path.to_string()
                } else {
                    format!("/{path}")
                };
                route_sinks.lock().routes.push(ScriptRoute {
                    method,
                    path,
                    middleware: false,
                    handler,
                });
                true
            });
            // Bare `use` handler: mount-level middleware.
            let mw_sinks = sinks.clone();
            engine.register_fn("on", move |kind: &str, handler: FnPtr| -> bool {
                if !kind.eq_ignore_ascii_case("use") {
                    warn!(kind, "two-argument registration is only valid for \"use\"");
                    return false;
                }
                mw_sinks.lock().routes.push(ScriptRoute {
                    method: HttpMethod::All,
                    path: String::from("/"),
                    middleware: true,
                    handler,
                });
                true
            });
            let after_sinks = sinks;
            engine.register_fn("after", move |handler: FnPtr| {
                after_sinks.lock().after.push(handler);
            });
        }
        EndpointKind::Socket => {
            engine.register_fn("on", move |command: &str, handler: FnPtr| -> bool {
                sinks.lock().commands.push(ScriptCommand {
                    name: command.to_string(),
                    handler,
                });
                true
            });
        }
    }

    let env_name = host.env_name.clone();
    let module = kind.filename();
    engine.register_fn("log", move |msg: Dynamic| {
        info!(env = %env_name, module, "{msg}");
    });

    let config = host.config.clone();
    engine.register_fn(
        "conf",
        move |path: &str, default: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            let default: Value = from_dynamic(&default)?;
            let default = serde_yaml::to_value(&default).map_err(to_script_err)?;
            let value = config.get(path, default);
            let value: Value = serde_json::to_value(&value).map_err(to_script_err)?;
            to_dynamic(value)
        },
    );

    let executor = host.query.clone();
    let handle = host.runtime.clone();
    engine.register_fn(
        "query",
        move |sql: &str, params: rhai::Array| -> Result<Dynamic, Box<EvalAltResult>> {
            let params: Vec<Value> = params
                .iter()
                .map(from_dynamic)
                .collect::<Result<_, _>>()?;
            let rows = handle
                .block_on(executor.query(sql, &params))
                .map_err(to_script_err)?;
            to_dynamic(rows)
        },
    );

    let remote = host.remote.clone();
    let handle = host.runtime.clone();
    engine.register_fn(
        "emit",
        move |event: &str, args: rhai::Array| -> Result<Dynamic, Box<EvalAltResult>> {
            let args: Vec<Value> = args.iter().map(from_dynamic).collect::<Result<_, _>>()?;
            let ack = handle
                .block_on(remote(event.to_string(), args))
                .map_err(to_script_err)?;
            to_dynamic(ack)
        },
    );

    // Utility namespace.
    let handle = host.runtime.clone();
    engine.register_fn("wait", move |ms: i64| {
        handle.block_on(utils::wait(ms.max(0) as u64));
    });
    engine.register_fn("uid", |len: i64| utils::uid(len.max(0) as usize, utils::CHSET_FULL));
    engine.register_fn("unix_time", || utils::unix_time());
    engine.register_fn("daystamp", || utils::daystamp());

    engine
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
