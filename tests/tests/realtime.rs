//! Wire-level tests for the Socket.IO surface.
//!
//! Drives the real application through the engine.io polling transport
//! with hand-rolled frames: open handshake, namespace connect, events with
//! ack ids, and the disconnect packet. No listener is bound; every frame
//! goes through the same tower service the HTTP tests use.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use luxweb_kernel::sql::{QueryError, QueryExecutor};
use luxweb_plugins::PluginPermissions;
use luxweb_testing::{BuiltApp, TestHarness};

const EIO_BASE: &str = "/api/socket.io/?EIO=4&transport=polling";

/// A minimal Socket.IO client over the polling transport.
struct PollingClient<'a> {
    app: &'a BuiltApp,
    sid: String,
}

impl<'a> PollingClient<'a> {
    /// Engine.io open handshake plus the `/` namespace connect.
    async fn connect(app: &'a BuiltApp) -> PollingClient<'a> {
        let (status, body) = app.text_request("GET", EIO_BASE, None).await;
        assert_eq!(status, StatusCode::OK);
        let open = body.strip_prefix('0').expect("engine.io open packet");
        let open: Value = serde_json::from_str(open).expect("open payload");
        let sid = open["sid"].as_str().expect("transport sid").to_string();

        let client = PollingClient { app, sid };
        client.send("40").await;
        let packets = client.poll().await;
        assert!(
            packets.iter().any(|p| p.starts_with("40")),
            "namespace connect not acknowledged: {packets:?}"
        );
        // Command binding runs on the connection task after the connect
        // packet goes out; give it a moment to finish.
        tokio::time::sleep(Duration::from_millis(300)).await;
        client
    }

    fn url(&self) -> String {
        format!("{EIO_BASE}&sid={}", self.sid)
    }

    async fn send(&self, payload: &str) {
        let (status, _) = self.app.text_request("POST", &self.url(), Some(payload)).await;
        assert_eq!(status, StatusCode::OK);
    }

    /// One long-poll cycle, split into engine.io packets.
    async fn poll(&self) -> Vec<String> {
        let (status, body) = self.app.text_request("GET", &self.url(), None).await;
        assert_eq!(status, StatusCode::OK);
        body.split('\u{1e}').map(str::to_string).collect()
    }

    /// Emit `event` with an ack id and wait for the matching ack payload
    /// (the raw argument array).
    async fn emit_with_ack(&self, ack_id: u32, event: &str, args: &[Value]) -> Value {
        let mut frame = vec![json!(event)];
        frame.extend_from_slice(args);
        self.send(&format!("42{ack_id}{}", Value::Array(frame))).await;
        self.wait_for_ack(ack_id).await
    }

    async fn wait_for_ack(&self, ack_id: u32) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            let Ok(packets) = tokio::time::timeout(Duration::from_secs(1), self.poll()).await
            else {
                continue;
            };
            if let Some(value) = find_ack(&packets, ack_id) {
                return value;
            }
        }
        panic!("no ack for id {ack_id}");
    }

    /// True when one poll window passes without an ack for `ack_id`.
    async fn no_ack_within(&self, ack_id: u32, window: Duration) -> bool {
        match tokio::time::timeout(window, self.poll()).await {
            Ok(packets) => find_ack(&packets, ack_id).is_none(),
            Err(_) => true,
        }
    }
}

fn find_ack(packets: &[String], ack_id: u32) -> Option<Value> {
    let prefix = format!("43{ack_id}");
    packets.iter().find_map(|p| {
        let rest = p.strip_prefix(&prefix)?;
        if !rest.starts_with('[') {
            return None;
        }
        serde_json::from_str(rest).ok()
    })
}

/// Parse a server-initiated event packet: `42<ack id>["event", args...]`.
fn parse_event(packet: &str) -> Option<(String, Value)> {
    let rest = packet.strip_prefix("42")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let payload: Value = serde_json::from_str(&rest[digits.len()..]).ok()?;
    Some((digits, payload))
}

async fn get_json(router: Router, path: String) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(path)
                .body(Body::empty())
                .expect("build request"),
        )
        .await
        .expect("dispatch request");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[derive(Default)]
struct RecordingExecutor {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<Vec<Value>, QueryError> {
        self.calls.lock().unwrap().push(sql.to_string());
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn script_command_acks_exactly_once() {
    let harness = TestHarness::new();
    harness.write_socket_module(r#"on("ping", |args| "pong");"#);
    let app = harness.build().await;

    let client = PollingClient::connect(&app).await;
    let ack = client.emit_with_ack(1, "ping", &[]).await;
    assert_eq!(ack, json!(["pong"]));

    // The same id is never acknowledged a second time.
    assert!(client.no_ack_within(1, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn failing_command_acks_error_and_unknown_is_dropped() {
    let harness = TestHarness::new();
    harness.write_socket_module(r#"on("boom", |args| { throw "kaboom"; });"#);
    let app = harness.build().await;

    let client = PollingClient::connect(&app).await;
    let ack = client.emit_with_ack(1, "boom", &[]).await;
    let message = ack[0]["error"].as_str().expect("error ack object");
    assert!(message.contains("kaboom"));

    // Nothing is bound for an unknown command, so no ack comes back.
    client.send("422[\"no-such-command\"]").await;
    assert!(client.no_ack_within(2, Duration::from_secs(1)).await);
}

#[tokio::test]
async fn plugin_commands_bound_for_each_connection() {
    let harness = TestHarness::new();
    harness.write_socket_module(r#"on("ping", |args| "pong");"#);
    harness
        .app
        .use_plugin(
            |api| {
                api.begin("chat")?;
                api.socket("send", |args| async move { Ok(json!({ "echo": args })) })?;
                Ok(())
            },
            PluginPermissions::default(),
        )
        .await
        .expect("plugin registration");
    let app = harness.build().await;

    let client = PollingClient::connect(&app).await;
    let ack = client.emit_with_ack(1, "@chat:send", &[json!("hi")]).await;
    assert_eq!(ack, json!([{ "echo": ["hi"] }]));
}

#[tokio::test]
async fn disconnect_runs_module_handler_and_drops_count() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let executor = RecordingExecutor {
        calls: calls.clone(),
    };
    let harness = TestHarness::new_with(move |options| options.with_sql(Arc::new(executor)));
    harness.write_socket_module(
        r#"
            on("ping", |args| "pong");
            on("disconnect", |args| { query("disconnect-mark", []); });
        "#,
    );
    let app = harness.build().await;
    assert_eq!(app.state.socket_count.load(Ordering::Relaxed), 0);

    let client = PollingClient::connect(&app).await;
    assert_eq!(app.state.socket_count.load(Ordering::Relaxed), 1);

    // Namespace disconnect. Both halves of the shared disconnect callback
    // must run: the counter decrement and the module's handler.
    client.send("41").await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let count = app.state.socket_count.load(Ordering::Relaxed);
        let marked = calls.lock().unwrap().iter().any(|s| s == "disconnect-mark");
        if count == 0 && marked {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "disconnect not fully handled: count={count}, marked={marked}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn remote_invoke_resolves_with_client_ack() {
    let harness = TestHarness::new();
    harness.write_api_module(r#"on("get", "/nudge", |req| #{ body: emit("nudge", [7]) });"#);
    let app = harness.build().await;

    let client = PollingClient::connect(&app).await;
    let request = tokio::spawn(get_json(app.router.clone(), "/api/nudge".to_string()));

    // Receive the broadcast event and acknowledge it.
    let mut answered = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !answered {
        assert!(
            tokio::time::Instant::now() < deadline,
            "server event never arrived"
        );
        let Ok(packets) = tokio::time::timeout(Duration::from_secs(1), client.poll()).await
        else {
            continue;
        };
        for packet in packets {
            if let Some((id, payload)) = parse_event(&packet) {
                assert_eq!(payload[0], json!("nudge"));
                assert_eq!(payload[1], json!(7));
                client.send(&format!("43{id}[\"answer\"]")).await;
                answered = true;
            }
        }
    }

    let (status, body) = request.await.expect("request task");
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("answer"));
}
