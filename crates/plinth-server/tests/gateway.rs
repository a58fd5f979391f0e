//! Integration tests for the axum gateway serving the demo application.

use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use plinth_core::types::{CloseFrame, FanoutCommand};
use plinth_core::{App, AppConfig, ConnectionHandle, LifespanHook, Shutdown};
use plinth_server::{demo, gateway};
use serde_json::{Value, json};
use tower::ServiceExt;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.fanout.poll_interval_ms = 10;
    config
}

fn create_test_app() -> (Router, App) {
    let app = demo::build(test_config()).unwrap();
    (gateway::router(app.clone()), app)
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_transport_and_headers() {
    let (router, _app) = create_test_app();
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, headers, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "fanout": "local"}));
    assert_eq!(headers.get("content-type").unwrap(), "application/json");
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
    assert!(
        headers
            .get("server")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("plinth/")
    );
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let (router, _app) = create_test_app();
    let request = Request::builder()
        .uri("/nowhere")
        .body(Body::empty())
        .unwrap();

    let (status, headers, body) = send(router, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"detail": "Not Found"}));
    // No middleware runs for unresolved paths.
    assert!(headers.get("server").is_none());
}

#[tokio::test]
async fn test_health_rejects_other_methods() {
    let (router, _app) = create_test_app();
    let (status, _, body) = send(router, post_json("/health", json!({}))).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, json!({"detail": "Method Not Allowed"}));
}

#[tokio::test]
async fn test_echo_validates_body() {
    let (router, _app) = create_test_app();

    let (status, _, body) = send(router.clone(), post_json("/echo", json!({"repeat": 2}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"message": "field required"}));

    let (status, _, body) = send(
        router,
        post_json("/echo", json!({"message": "hi", "extra": true})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"extra": "extra fields not permitted"}));
}

#[tokio::test]
async fn test_echo_post_and_get() {
    let (router, _app) = create_test_app();

    let (status, _, body) = send(
        router.clone(),
        post_json("/echo", json!({"message": "ab", "repeat": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "ababab"}));

    let request = Request::builder()
        .uri("/echo?name=plinth")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"query": "name=plinth"}));
}

#[tokio::test]
async fn test_invalid_json_body_is_400() {
    let (router, _app) = create_test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"detail": "Invalid JSON body"}));
}

#[tokio::test]
async fn test_oversized_body_is_413() {
    let mut config = test_config();
    config.max_body_size = 8;
    let app = demo::build(config).unwrap();
    let router = gateway::router(app);

    let (status, _, _) = send(router, post_json("/echo", json!({"message": "far too long"}))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_notify_reaches_registered_connection() {
    let (router, app) = create_test_app();
    let (handle, mut inbox) = ConnectionHandle::channel();
    app.registry().register("conn-1", handle);

    let shutdown = Shutdown::new();
    let bridge = app.spawn_fanout_bridge(shutdown.clone()).unwrap();

    let (status, _, body) = send(
        router.clone(),
        post_json("/notify/conn-1", json!({"msg": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({"published": "conn-1"}));

    let command = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .expect("fanout delivery timed out")
        .unwrap();
    assert_eq!(command, FanoutCommand::Send(json!({"msg": "hi"})));

    let request = Request::builder()
        .method("DELETE")
        .uri("/notify/conn-1")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(router, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let command = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
        .await
        .expect("fanout delivery timed out")
        .unwrap();
    assert_eq!(
        command,
        FanoutCommand::Close(CloseFrame {
            code: 1000,
            reason: "closed by server".into()
        })
    );

    shutdown.trigger();
    tokio::task::spawn_blocking(move || bridge.stop())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_lifespan_round_trip() {
    let (_router, app) = create_test_app();
    let lifespan = gateway::run_lifespan(&app).await.unwrap();
    lifespan.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lifespan_reports_startup_failure() {
    let app = App::builder(test_config())
        .resolver(demo::RouteTable::new())
        .on_startup(LifespanHook::blocking(|| anyhow::bail!("database unreachable")))
        .build()
        .unwrap();

    let err = gateway::run_lifespan(&app).await.unwrap_err();
    assert!(err.to_string().contains("database unreachable"));
}
