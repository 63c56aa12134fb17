//! Dynamic Socket.IO layer.
//!
//! Every connection gets its own command table: plugin commands from the
//! shared registry are bound first (`@<name>:<cmd>`), then the commands a
//! fresh `socket.rhai` evaluation declares (bare names, which may shadow).
//! Handler return values are delivered through the acknowledgment callback
//! exactly once; a handler failure is acknowledged with an explicit
//! `{error: <msg>}` object instead of being dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use socketioxide::SocketIo;
use socketioxide::extract::{AckSender, Data, SocketRef};
use tracing::{debug, info, warn};

use crate::state::AppState;
use luxweb_kernel::web::HandlerError;
use luxweb_plugins::{EndpointDefinition, EndpointKind, RemoteEmit};

/// Poll interval while waiting for a connected client.
const READY_POLL: Duration = Duration::from_millis(500);
/// Per-emit acknowledgment timeout.
const ACK_TIMEOUT: Duration = Duration::from_secs(5);

fn ack_payload(result: Result<Value, HandlerError>) -> Value {
    match result {
        Ok(value) => value,
        Err(err) => json!({ "error": err.to_string() }),
    }
}

fn args_from_payload(data: Value) -> Vec<Value> {
    match data {
        Value::Array(args) => args,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}

/// Register the root namespace connection handler.
///
/// Called after state assembly; the layer itself is built earlier so the
/// `SocketIo` handle can back the endpoint modules' `emit` bridge.
pub fn register_namespace(io: &SocketIo, state: AppState) {
    io.ns("/", move |socket: SocketRef| {
        let state = state.clone();
        async move {
            info!(socket_id = %socket.id, "socket client connected");
            state.socket_count.fetch_add(1, Ordering::Relaxed);

            bind_plugin_commands(&socket, &state).await;
            let disconnect = bind_script_commands(&socket, &state).await;

            // The transport keeps a single disconnect callback (a later
            // registration replaces an earlier one), so the counter
            // decrement and the module's `disconnect` handler share it.
            let count = state.socket_count.clone();
            socket.on_disconnect(move |socket: SocketRef| async move {
                count.fetch_sub(1, Ordering::Relaxed);
                info!(socket_id = %socket.id, "socket client disconnected");
                if let Some((def, index)) = disconnect {
                    run_script_command(def, index, Vec::new(), &socket).await;
                }
            });
        }
    });
}

/// Bind the shared plugin command table (`@<name>:<cmd>`).
async fn bind_plugin_commands(socket: &SocketRef, state: &AppState) {
    let commands: Vec<_> = {
        let registry = state.registry.read().await;
        registry.socket_commands().to_vec()
    };
    for (name, handler) in commands {
        socket.on(name, move |Data(data): Data<Value>, ack: AckSender| {
            let handler = handler.clone();
            async move {
                let result = handler(args_from_payload(data)).await;
                let _ = ack.send(&ack_payload(result));
            }
        });
    }
}

/// Evaluate `socket.rhai` fresh for this connection and bind its commands.
/// A `disconnect` command is not bound here: it is returned to the caller,
/// which runs it from the connection's transport-level disconnect callback
/// without ack wrapping.
async fn bind_script_commands(
    socket: &SocketRef,
    state: &AppState,
) -> Option<(Arc<EndpointDefinition>, usize)> {
    let loader = state.loader.clone();
    let definition =
        match tokio::task::spawn_blocking(move || loader.load(EndpointKind::Socket)).await {
            Ok(Ok(def)) => def,
            Ok(Err(err)) => {
                warn!(socket_id = %socket.id, error = %err, "socket module load failed");
                return None;
            }
            Err(err) => {
                warn!(socket_id = %socket.id, error = %err, "socket module load panicked");
                return None;
            }
        };

    let mut disconnect = None;
    for (index, command) in definition.commands.iter().enumerate() {
        if command.name == "disconnect" {
            disconnect = Some((definition.clone(), index));
            continue;
        }

        let def = definition.clone();
        socket.on(
            command.name.clone(),
            move |socket: SocketRef, Data(data): Data<Value>, ack: AckSender| {
                let def = def.clone();
                async move {
                    let result = invoke_script_command(def, index, args_from_payload(data)).await;
                    if let Err(err) = &result {
                        debug!(socket_id = %socket.id, error = %err, "socket command failed");
                    }
                    let _ = ack.send(&ack_payload(result));
                }
            },
        );
    }
    disconnect
}

async fn invoke_script_command(
    definition: Arc<EndpointDefinition>,
    index: usize,
    args: Vec<Value>,
) -> Result<Value, HandlerError> {
    tokio::task::spawn_blocking(move || {
        let command = &definition.commands[index];
        definition.invoke_command(command, args)
    })
    .await
    .map_err(|e| HandlerError::new(e.to_string()))?
}

async fn run_script_command(
    definition: Arc<EndpointDefinition>,
    index: usize,
    args: Vec<Value>,
    socket: &SocketRef,
) {
    if let Err(err) = invoke_script_command(definition, index, args).await {
        debug!(socket_id = %socket.id, error = %err, "disconnect handler failed");
    }
}

/// Build the `emit` bridge handed to endpoint modules.
///
/// Polls until at least one client is connected, broadcasts the event, and
/// resolves with the first acknowledgment. Gives up after `timeout` instead
/// of waiting forever.
pub fn remote_emit(io: SocketIo, count: Arc<AtomicUsize>, timeout: Duration) -> RemoteEmit {
    Arc::new(move |event: String, args: Vec<Value>| {
        let io = io.clone();
        let count = count.clone();
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                if tokio::time::Instant::now() >= deadline {
                    return Err(HandlerError::new(format!(
                        "remote invoke of '{event}' timed out"
                    )));
                }
                if count.load(Ordering::Relaxed) == 0 {
                    tokio::time::sleep(READY_POLL).await;
                    continue;
                }

                let Some(ns) = io.of("/") else {
                    return Err(HandlerError::new("socket namespace not available"));
                };
                let acks = ns
                    .timeout(ACK_TIMEOUT)
                    .emit_with_ack::<Vec<Value>, Value>(event.clone(), &args)
                    .map_err(|e| HandlerError::new(e.to_string()))?;

                // Broadcast ack streams yield one (sid, result) pair per
                // client and are not Unpin.
                futures::pin_mut!(acks);
                match acks.next().await {
                    Some((_sid, Ok(value))) => return Ok::<Value, HandlerError>(value),
                    Some((_sid, Err(err))) => {
                        warn!(event = %event, error = %err, "remote invoke ack failed");
                        tokio::time::sleep(READY_POLL).await;
                    }
                    None => {
                        tokio::time::sleep(READY_POLL).await;
                    }
                }
            }
        })
    })
}
