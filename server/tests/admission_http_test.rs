//! HTTP-Level Admission Tests
//!
//! Drives the router with `oneshot` requests. Admission state lives in the
//! controller shared by every clone of the router, so counts persist across
//! calls without a real server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header::RETRY_AFTER, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use syncguard_server::api::{create_router, AppState};
use syncguard_server::config::Config;
use syncguard_server::ratelimit::{
    AdmissionConfig, AdmissionController, ChannelTuning, NoopAuditSink, ParameterSnapshot,
    SharedParameters,
};

/// Create a test app with a tiny window: 1s, capacity 3..5.
fn create_test_app(admission: AdmissionConfig, params: ParameterSnapshot) -> Router {
    let mut config = Config::default_for_test();
    config.admission = admission.clone();
    let parameters = SharedParameters::new(params);
    let controller = AdmissionController::new(
        admission,
        Arc::new(parameters.clone()),
        Arc::new(NoopAuditSink),
    );
    create_router(AppState::new(config, controller, parameters))
}

fn small_admission() -> AdmissionConfig {
    AdmissionConfig {
        default_channel: ChannelTuning {
            window_ms: 1000,
            min: 3,
            max: 5,
            base_gamma: 2.5,
        },
        ..Default::default()
    }
}

fn request(method: &str, uri: &str, peer: &str) -> Request<Body> {
    let addr: SocketAddr = format!("{peer}:40000").parse().unwrap();
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Test that requests under the limit pass and over-limit returns 429.
#[tokio::test]
async fn test_reads_limited_with_retry_after() {
    let app = create_test_app(small_admission(), ParameterSnapshot::default());

    for i in 1..=5 {
        let response = app
            .clone()
            .oneshot(request("GET", "/api/chat/messages", "203.0.113.70"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i} should pass");
    }

    let response = app
        .clone()
        .oneshot(request("GET", "/api/chat/messages", "203.0.113.70"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[RETRY_AFTER], "1");

    let body = body_json(response).await;
    assert_eq!(body["error"], "rate_limited");
    assert_eq!(body["retry_after"], 1);
}

/// Test that a throttled write burst is rejected while reads from the same caller pass.
#[tokio::test]
async fn test_write_burst_rejected_reads_pass() {
    let app = create_test_app(small_admission(), ParameterSnapshot::default());

    let first = app
        .clone()
        .oneshot(request("POST", "/api/chat/messages", "203.0.113.71"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .clone()
        .oneshot(request("POST", "/api/chat/messages", "203.0.113.71"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let read = app
        .clone()
        .oneshot(request("GET", "/api/chat/messages", "203.0.113.71"))
        .await
        .unwrap();
    assert_eq!(read.status(), StatusCode::OK);

    // Other route groups have their own bucket.
    let other = app
        .clone()
        .oneshot(request("POST", "/api/members", "203.0.113.71"))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

/// Test that the first forwarded-for hop identifies the caller.
#[tokio::test]
async fn test_forwarded_for_identifies_caller() {
    let mut admission = small_admission();
    admission.trust_proxy = true;
    admission.default_channel.max = 1;
    admission.default_channel.min = 1;
    let app = create_test_app(admission, ParameterSnapshot::default());

    let forwarded = |hop: &str| {
        let mut req = request("GET", "/api/friends", "10.0.0.2");
        req.headers_mut()
            .insert("X-Forwarded-For", format!("{hop}, 10.0.0.2").parse().unwrap());
        req
    };

    assert_eq!(
        app.clone().oneshot(forwarded("198.51.100.1")).await.unwrap().status(),
        StatusCode::OK
    );
    assert_eq!(
        app.clone().oneshot(forwarded("198.51.100.1")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        app.clone().oneshot(forwarded("198.51.100.2")).await.unwrap().status(),
        StatusCode::OK
    );
}

/// Test that a forged loopback header from a public peer does not bypass limiting.
#[tokio::test]
async fn test_spoofed_loopback_header_still_limited() {
    let app = create_test_app(small_admission(), ParameterSnapshot::default());

    let spoofed = || {
        let mut req = request("POST", "/api/chat/messages", "203.0.113.99");
        req.headers_mut()
            .insert("X-Forwarded-For", "127.0.0.1".parse().unwrap());
        req.headers_mut()
            .insert("X-Real-IP", "10.0.0.1".parse().unwrap());
        req
    };

    let mut admitted = 0;
    for _ in 0..10 {
        if app.clone().oneshot(spoofed()).await.unwrap().status() == StatusCode::OK {
            admitted += 1;
        }
    }
    // Only the first write of the burst gets through; the rest hit the throttle.
    assert_eq!(admitted, 1);

    // Headers are ignored, so a rotated value lands on the same peer key.
    let mut rotated = request("POST", "/api/chat/messages", "203.0.113.99");
    rotated
        .headers_mut()
        .insert("X-Forwarded-For", "198.51.100.200".parse().unwrap());
    assert_eq!(
        app.clone().oneshot(rotated).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

/// Test that loopback callers and the health check are never limited.
#[tokio::test]
async fn test_loopback_and_health_bypass() {
    let mut admission = small_admission();
    admission.default_channel.max = 1;
    admission.default_channel.min = 1;
    let app = create_test_app(admission, ParameterSnapshot::default());

    for _ in 0..5 {
        let response = app
            .clone()
            .oneshot(request("POST", "/api/chat", "127.0.0.1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("GET", "/health", "203.0.113.72"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

/// Test that the placeholder handler reports what it accepted.
#[tokio::test]
async fn test_accepted_request_reaches_handler() {
    let app = create_test_app(small_admission(), ParameterSnapshot::default());
    let response = app
        .oneshot(request("DELETE", "/api/api-tokens/9", "203.0.113.73"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["method"], "DELETE");
    assert_eq!(body["path"], "/api/api-tokens/9");
}

/// Test that the admin endpoints expose tracked keys and live parameters.
#[tokio::test]
async fn test_admin_admission_endpoints() {
    let params = ParameterSnapshot {
        ab_test_group: "B".to_string(),
        ..Default::default()
    };
    let app = create_test_app(small_admission(), params);

    app.clone()
        .oneshot(request("GET", "/api/chat", "203.0.113.74"))
        .await
        .unwrap();

    let stats = app
        .clone()
        .oneshot(request("GET", "/api/admin/admission", "203.0.113.74"))
        .await
        .unwrap();
    assert_eq!(stats.status(), StatusCode::OK);
    let body = body_json(stats).await;
    // The stats request itself created the admin bucket.
    assert_eq!(body["tracked_keys"], 2);
    assert_eq!(body["damped"], true);

    let parameters = app
        .oneshot(request("GET", "/api/admin/admission/parameters", "203.0.113.74"))
        .await
        .unwrap();
    let body = body_json(parameters).await;
    assert_eq!(body["ab_test_group"], "B");
    assert_eq!(body["entropy_crit"], 2.0);
}
