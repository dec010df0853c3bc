use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use pileup::{
    core::store::{PileupStore, StoreConfig},
    runtime::handle::{PileupHandle, RuntimeConfig, spawn_pileup},
    server::{AppState, build_router},
};

const ADMIN_TOKEN: &str = "test-admin-token";

fn test_app(admin_token: Option<&str>) -> (Router, PileupHandle) {
    let store = PileupStore::new(StoreConfig {
        queue_max: 4,
        worked_ttl_ms: 3_600_000,
    });
    let handle = spawn_pileup(store, None, None, RuntimeConfig::default());
    let state = AppState {
        handle: handle.clone(),
        admin_token: admin_token.map(str::to_string),
        keepalive_interval: Duration::from_secs(30),
    };
    (build_router(state), handle)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_live() {
    let (app, _handle) = test_app(None);
    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_on_inactive_system_is_unavailable() {
    let (app, _handle) = test_app(None);
    let resp = app
        .oneshot(json_request(
            "POST",
            "/api/queue",
            json!({"callsign": "EI6LF"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(resp).await;
    assert_eq!(body["error"], "system_inactive");
}

#[tokio::test]
async fn register_validates_and_deduplicates() {
    let (app, handle) = test_app(None);
    handle.set_active(true).await.unwrap();

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/queue",
            json!({"callsign": "ei6lf"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = body_json(resp).await;
    assert_eq!(body["callsign"], "EI6LF");

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/queue",
            json!({"callsign": "EI6LF/P"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/queue",
            json!({"callsign": "not a call"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let resp = app
        .oneshot(Request::builder().uri("/api/queue").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["entries"][0]["position"], 1);
}

#[tokio::test]
async fn leave_queue_then_404() {
    let (app, handle) = test_app(None);
    handle.set_active(true).await.unwrap();
    handle.register("EI6LF").await.unwrap();

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/queue/EI6LF")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/queue/EI6LF")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_surface_requires_the_configured_token() {
    let (app, handle) = test_app(Some(ADMIN_TOKEN));
    handle.set_active(true).await.unwrap();
    handle.register("EI6LF").await.unwrap();

    // No credentials.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/promote")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Wrong credentials.
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/admin/promote")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Right credentials promote the head.
    let resp = app
        .oneshot(admin_request("POST", "/api/admin/promote", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["callsign"], "EI6LF");
}

#[tokio::test]
async fn admin_surface_is_closed_when_no_token_is_configured() {
    let (app, _handle) = test_app(None);

    let resp = app
        .oneshot(admin_request("POST", "/api/admin/promote", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn contact_lifecycle_over_the_admin_surface() {
    let (app, handle) = test_app(Some(ADMIN_TOKEN));
    handle.set_active(true).await.unwrap();
    handle.register("EI6LF").await.unwrap();

    let resp = app
        .clone()
        .oneshot(admin_request("POST", "/api/admin/promote", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(admin_request("POST", "/api/admin/complete", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["callsign"], "EI6LF");
    assert_eq!(body["disposition"], "completed");

    // Nothing left to complete.
    let resp = app
        .clone()
        .oneshot(admin_request("POST", "/api/admin/complete", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "nothing_active");

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/worked")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn direct_start_reports_queue_removal() {
    let (app, handle) = test_app(Some(ADMIN_TOKEN));
    handle.set_active(true).await.unwrap();
    handle.register("W1ABC").await.unwrap();
    handle.register("W2DEF").await.unwrap();

    let resp = app
        .oneshot(admin_request(
            "POST",
            "/api/admin/direct-start",
            Some(json!({"callsign": "W2DEF", "frequency_display": "14.195", "mode": "SSB"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["was_in_queue"], true);
    assert_eq!(body["contact"]["callsign"], "W2DEF");
    assert_eq!(body["contact"]["origin"], "direct_start");
    assert_eq!(body["contact"]["channel_meta"]["frequency_display"], "14.195");
}

#[tokio::test]
async fn state_snapshot_is_consistent() {
    let (app, handle) = test_app(Some(ADMIN_TOKEN));
    handle.set_active(true).await.unwrap();
    handle.register("EI6LF").await.unwrap();
    handle.set_frequency(Some("14.195".to_string())).await.unwrap();

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/state")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["settings"]["active"], true);
    assert_eq!(body["settings"]["frequency_display"], "14.195");
    assert_eq!(body["queue"]["total"], 1);
    assert_eq!(body["current"], Value::Null);
    assert!(body["server_time_ms"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn stream_endpoint_speaks_sse() {
    let (app, _handle) = test_app(None);

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("text/event-stream"));
}
