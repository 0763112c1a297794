use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use axum_email_2fa::axum_api::router;
use axum_email_2fa::TwoFactorConfig;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower::util::ServiceExt; // for oneshot

mod common;
use common::{spawn_app, spawn_app_with, TestApp};

const PEER: ([u8; 4], u16) = ([192, 0, 2, 44], 51000);

fn post(uri: &str, origin: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", origin)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn with_peer(app: &TestApp) -> Router {
    router(app.service.clone()).layer(MockConnectInfo(SocketAddr::from(PEER)))
}

fn app_router() -> (Router, TestApp) {
    let app = spawn_app();
    (with_peer(&app), app)
}

#[tokio::test]
async fn test_send_code_success() {
    let (router, app) = app_router();
    let email = "http@example.com";

    let response = router
        .oneshot(post("/send-code", "203.0.113.5", json!({ "email": email })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.notifier.last_code_for(email).is_some());
}

#[tokio::test]
async fn test_send_code_twice_is_429() {
    let (router, _) = app_router();
    let body = json!({ "email": "twice@example.com" });

    let first = router
        .clone()
        .oneshot(post("/send-code", "203.0.113.5", body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router
        .oneshot(post("/send-code", "203.0.113.5", body))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_verify_code_roundtrip() {
    let (router, app) = app_router();
    let email = "roundtrip@example.com";
    let code = app.issue("203.0.113.5", email).await;
    app.next_window();

    let wrong = router
        .clone()
        .oneshot(post(
            "/verify-code",
            "203.0.113.5",
            json!({ "email": email, "code": "000000" }),
        ))
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);

    app.next_window();
    let right = router
        .oneshot(post(
            "/verify-code",
            "203.0.113.5",
            json!({ "email": email, "code": code }),
        ))
        .await
        .unwrap();
    assert_eq!(right.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_blocked_has_retry_after() {
    let (router, app) = app_router();
    let email = "locked@example.com";
    app.issue("203.0.113.5", email).await;
    for _ in 0..5 {
        let _ = app.submit(email, "000000").await;
    }
    app.next_window();

    let response = router
        .oneshot(post(
            "/verify-code",
            "203.0.113.5",
            json!({ "email": email, "code": "000000" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn test_monitor_lists_active_windows() {
    let (router, app) = app_router();
    app.issue("203.0.113.9", "watched@example.com").await;

    let response = router
        .oneshot(
            Request::builder()
                .uri("/monitor")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let stats: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(stats["origin_rate_limits"]["203.0.113.9"].is_string());
    assert!(stats["subject_rate_limits"]["watched@example.com"].is_string());
}

#[tokio::test]
async fn test_rotating_forwarded_header_keeps_origin_window() {
    let (router, app) = app_router();

    let mut accepted = 0;
    for i in 0..10 {
        let response = router
            .clone()
            .oneshot(post(
                "/send-code",
                &format!("10.9.9.{}", i),
                json!({ "email": format!("rotate{}@example.com", i) }),
            ))
            .await
            .unwrap();
        if response.status() == StatusCode::OK {
            accepted += 1;
        } else {
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }
    }
    assert_eq!(accepted, 1);

    let stats = app.service.stats().await;
    assert_eq!(stats.origin_rate_limits.len(), 1);
    assert!(stats.origin_rate_limits.contains_key("192.0.2.44"));
}

#[tokio::test]
async fn test_trusted_proxy_header_names_origin() {
    let app = spawn_app_with(TwoFactorConfig {
        trust_forwarded_for: true,
        ..TwoFactorConfig::default()
    });
    let router = with_peer(&app);

    for (origin, email) in [
        ("203.0.113.20", "first@example.com"),
        ("203.0.113.21", "second@example.com"),
    ] {
        let response = router
            .clone()
            .oneshot(post("/send-code", origin, json!({ "email": email })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let stats = app.service.stats().await;
    assert!(stats.origin_rate_limits.contains_key("203.0.113.20"));
    assert!(stats.origin_rate_limits.contains_key("203.0.113.21"));
    assert!(!stats.origin_rate_limits.contains_key("192.0.2.44"));
}
