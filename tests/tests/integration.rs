//! End-to-end tests against the assembled axum application.

use axum::http::StatusCode;
use luxweb_plugins::PluginPermissions;
use luxweb_testing::TestHarness;
use serde_json::json;

#[tokio::test]
async fn seeded_workspace_serves_ping() {
    let app = TestHarness::new().build().await;
    let (status, body) = app.get("/api/ping").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pong"], json!(true));
}

#[tokio::test]
async fn unmatched_endpoint_falls_back_to_400() {
    let app = TestHarness::new().build().await;
    let (status, body) = app.get("/api/definitely/not/here").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["info"], json!("Test API"));
    assert_eq!(body["message"], json!("No endpoint specified"));
}

#[tokio::test]
async fn endpoint_module_routes_with_params_and_body() {
    let harness = TestHarness::new();
    harness.write_api_module(
        r#"
            on("post", "/echo/{name}", |req| #{
                body: #{ name: req.params.name, sent: req.body.value },
            });
        "#,
    );
    let app = harness.build().await;

    let (status, body) = app.post("/api/echo/ada", json!({ "value": 7 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], json!("ada"));
    assert_eq!(body["sent"], json!(7));

    // The method matters.
    let (status, _) = app.get("/api/echo/ada").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn throwing_handler_yields_structured_500_and_recovers() {
    let harness = TestHarness::new();
    harness.write_api_module(
        r#"
            on("get", "/boom", |req| { throw "kaboom"; });
            on("get", "/fine", |req| #{ body: #{ ok: true } });
        "#,
    );
    let app = harness.build().await;

    let (status, body) = app.get("/api/boom").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], json!(500));
    assert_eq!(body["info"], json!("Test API"));
    assert_eq!(body["message"], json!("Internal server error"));

    // The evaluation keeps serving other routes afterwards.
    let (status, body) = app.get("/api/fine").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
}

#[tokio::test]
async fn hot_swap_replaces_routes() {
    let harness = TestHarness::new();
    harness.write_api_module(r#"on("get", "/v1", |req| #{ body: 1 });"#);
    let app = harness.build().await;

    let (status, _) = app.get("/api/v1").await;
    assert_eq!(status, StatusCode::OK);

    app.hot_swap_api(r#"on("get", "/v2", |req| #{ body: 2 });"#).await;

    let (status, _) = app.get("/api/v1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = app.get("/api/v2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(2));
}

#[tokio::test]
async fn broken_module_serves_fallback_until_fixed() {
    let harness = TestHarness::new();
    harness.write_api_module("not valid rhai ][");
    let app = harness.build_lenient().await;

    let (status, _) = app.get("/api/anything").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.hot_swap_api(r#"on("get", "/fixed", |req| #{ body: true });"#).await;
    let (status, _) = app.get("/api/fixed").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn plugin_routes_live_under_their_namespace() {
    let harness = TestHarness::new();
    harness
        .app
        .use_plugin(
            |api| {
                api.begin("shop")?;
                api.api("get", "/items", |_req| async {
                    Ok(luxweb_kernel::web::ApiResponse::json(json!([
                        { "id": 1, "name": "wrench" }
                    ])))
                })?;
                Ok(())
            },
            PluginPermissions::default(),
        )
        .await
        .expect("plugin registration");
    let app = harness.build().await;

    let (status, body) = app.get("/api/@/@shop/items").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], json!("wrench"));

    // Not mounted on the bare endpoint surface.
    let (status, _) = app.get("/api/items").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failed_plugin_leaves_no_manifest_entry() {
    let harness = TestHarness::new();
    let registered = harness
        .app
        .use_plugin(
            |api| {
                api.begin("shop")?;
                // No SQL permission granted.
                api.query("SELECT 1", vec![])?;
                Ok(())
            },
            PluginPermissions::default(),
        )
        .await;
    assert!(registered.is_none());
    let app = harness.build().await;

    let response = app.raw_request("GET", "/web/plugins", None).await;
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn frontend_serves_manifest_and_landing_page() {
    let harness = TestHarness::new();
    let js = harness.workspace.path().join("widget.js");
    std::fs::write(&js, "// widget").unwrap();
    harness
        .app
        .use_plugin(
            move |api| {
                api.begin("widget")?;
                api.frontend_file(&js)?;
                Ok(())
            },
            PluginPermissions::default(),
        )
        .await
        .expect("plugin registration");
    let app = harness.build().await;

    let response = app.raw_request("GET", "/web/plugins", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"'widget':1");

    let response = app.raw_request("GET", "/web/", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/html; charset=utf-8"
    );

    // Registered plugin asset served by file name.
    let response = app.raw_request("GET", "/web/@widget/widget.js", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bare_prefixes_serve_their_surfaces() {
    let app = TestHarness::new().build().await;

    // The frontend prefix itself is the landing page, never a redirect
    // back to itself.
    for path in ["/web", "/web/"] {
        let response = app.raw_request("GET", path, None).await;
        assert_eq!(response.status(), StatusCode::OK, "GET {path}");
        assert_eq!(
            response.headers()["content-type"],
            "text/html; charset=utf-8"
        );
    }

    // The bare endpoint prefix names no endpoint.
    for path in ["/api", "/api/"] {
        let (status, body) = app.request("GET", path, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "GET {path}");
        assert_eq!(body["message"], json!("No endpoint specified"));
    }
}

#[tokio::test]
async fn root_redirects_to_frontend() {
    let app = TestHarness::new().build().await;
    let response = app.raw_request("GET", "/", None).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()["location"], "/web");
}

#[tokio::test]
async fn session_cookie_issued_and_roundtripped() {
    let harness = TestHarness::new();
    harness.write_api_module(
        r#"
            on("post", "/login", |req| #{
                body: #{ ok: true },
                session: #{ user: "ada" },
            });
            on("get", "/whoami", |req| #{ body: req.session });
        "#,
    );
    let app = harness.build().await;

    let response = app.raw_request("POST", "/api/login", Some(json!({}))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers()["set-cookie"]
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("GSESS="));
    let pair = cookie.split(';').next().unwrap().to_string();

    // Replay the cookie: the session values persist.
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/api/whoami")
        .header("cookie", &pair)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["user"], json!("ada"));
}

#[tokio::test]
async fn plugin_middleware_runs_on_endpoint_surface() {
    use async_trait::async_trait;
    use luxweb_kernel::web::{
        ApiRequest, ApiResponse, HandlerError, MiddlewareAction, RequestMiddleware,
    };

    struct Deny;
    #[async_trait]
    impl RequestMiddleware for Deny {
        async fn handle(&self, req: &mut ApiRequest) -> Result<MiddlewareAction, HandlerError> {
            if req.headers.contains_key("x-deny") {
                return Ok(MiddlewareAction::Respond(ApiResponse::with_status(
                    403,
                    json!({ "denied": true }),
                )));
            }
            Ok(MiddlewareAction::Continue)
        }
    }

    let harness = TestHarness::new();
    harness
        .app
        .use_plugin(
            |api| {
                api.begin("guard")?;
                api.middleware(Deny);
                Ok(())
            },
            PluginPermissions::default(),
        )
        .await
        .expect("plugin registration");
    let app = harness.build().await;

    let (status, _) = app.get("/api/ping").await;
    assert_eq!(status, StatusCode::OK);

    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/api/ping")
        .header("x-deny", "1")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
