//! End-to-end tests driving the HTTP surface.
//!
//! Covers the full register / renew / query / delete / subscribe lifecycle
//! against an in-memory context, including batched push delivery to a
//! local subscriber endpoint.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

use slsd::api::ServiceContext;
use slsd::config::{ServiceConfig, StorageBackend};
use slsd::maintenance::MaintenanceScheduler;
use slsd::subscribe::run_flushers;

fn memory_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config
}

fn app_with(config: ServiceConfig) -> (Router, Arc<ServiceContext>, mpsc::Receiver<String>) {
    let (ctx, flush_rx) = ServiceContext::from_config(config).unwrap();
    (slsd::http::router(Arc::clone(&ctx)), ctx, flush_rx)
}

fn app() -> Router {
    app_with(memory_config()).0
}

async fn send(app: &Router, method: Method, uri: &str, body: &str) -> Response {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    app.clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn register(app: &Router, body: &str) -> serde_json::Value {
    let response = send(app, Method::POST, "/lookup/records", body).await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

// =============================================================================
// S1: Register + Get
// =============================================================================

#[tokio::test]
async fn test_register_then_get_roundtrip() {
    let app = app();

    let stored = register(
        &app,
        r#"{"type":["service"],"service-name":["alpha"],"record-ttl":["PT1H"]}"#,
    )
    .await;

    let uri = stored["record-uri"].as_str().unwrap();
    assert!(uri.starts_with("lookup/records/"));
    assert_eq!(stored["record-state"], "register");
    assert_eq!(stored["service-name"][0], "alpha");

    let response = send(&app, Method::GET, &format!("/{uri}"), "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = json_body(response).await;
    assert_eq!(fetched, stored);
}

// =============================================================================
// S2: Renew extends expiry
// =============================================================================

#[tokio::test]
async fn test_renew_extends_expiry() {
    let app = app();

    let stored = register(
        &app,
        r#"{"type":["service"],"service-name":["alpha"],"record-ttl":["PT1H"]}"#,
    )
    .await;
    let uri = stored["record-uri"].as_str().unwrap().to_string();

    let response = send(
        &app,
        Method::POST,
        &format!("/{uri}"),
        r#"{"record-ttl":["PT2H"]}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let renewed = json_body(response).await;
    assert_eq!(renewed["record-state"], "renew");

    let expires = chrono::DateTime::parse_from_rfc3339(renewed["record-expires"].as_str().unwrap())
        .unwrap()
        .with_timezone(&Utc);
    let delta = expires - Utc::now() - Duration::hours(2);
    assert!(
        delta.num_seconds().abs() <= 5,
        "expiry should sit about two hours out, off by {delta}"
    );

    // GET confirms the renewed state.
    let fetched = json_body(send(&app, Method::GET, &format!("/{uri}"), "").await).await;
    assert_eq!(fetched, renewed);
}

// =============================================================================
// S3: Query all vs any
// =============================================================================

#[tokio::test]
async fn test_query_all_vs_any() {
    let app = app();

    register(&app, r#"{"type":["service"],"loc":["east"]}"#).await;
    register(&app, r#"{"type":["service"],"loc":["west"]}"#).await;

    let response = send(&app, Method::GET, "/lookup/records?type=service&loc=east", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let results = json_body(response).await;
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["loc"][0], "east");

    let response = send(
        &app,
        Method::GET,
        "/lookup/records?type=service&loc=east,west&record-operator=any",
        "",
    )
    .await;
    let results = json_body(response).await;
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["loc"][0], "east");
    assert_eq!(results[1]["loc"][0], "west");
}

// =============================================================================
// S4: Delete then query; archive keeps the tombstone
// =============================================================================

#[tokio::test]
async fn test_delete_then_query_and_archive() {
    let app = app();

    let a = register(&app, r#"{"type":["service"],"loc":["east"]}"#).await;
    register(&app, r#"{"type":["service"],"loc":["west"]}"#).await;
    let a_uri = a["record-uri"].as_str().unwrap().to_string();

    let response = send(&app, Method::DELETE, &format!("/{a_uri}"), "").await;
    assert_eq!(response.status(), StatusCode::OK);

    let results = json_body(send(&app, Method::GET, "/lookup/records?type=service", "").await).await;
    let results = results.as_array().unwrap().clone();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["loc"][0], "west");

    let archive_url = format!("/lookup/services/archive?record-uri={a_uri}");
    let archived = json_body(send(&app, Method::GET, &archive_url, "").await).await;
    let archived = archived.as_array().unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0]["record-state"], "delete");
}

// =============================================================================
// S5: Lease denial at capacity
// =============================================================================

#[tokio::test]
async fn test_lease_capacity_denial() {
    let mut config = memory_config();
    config.lease.capacity = 1;
    let (app, _ctx, _rx) = app_with(config);

    register(&app, r#"{"type":["service"],"loc":["east"]}"#).await;

    let response = send(
        &app,
        Method::POST,
        "/lookup/records",
        r#"{"type":["service"],"loc":["west"]}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// =============================================================================
// S6: Subscription flush by size, then by interval
// =============================================================================

/// Local subscriber endpoint collecting push envelopes.
async fn start_subscriber() -> (SocketAddr, mpsc::UnboundedReceiver<serde_json::Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = Router::new().route(
        "/push",
        post(move |Json(envelope): Json<serde_json::Value>| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(envelope);
                StatusCode::OK
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, sink).await;
    });
    (addr, rx)
}

#[tokio::test]
async fn test_subscription_flush_by_size_then_interval() {
    let mut config = memory_config();
    config.maintenance.flush_check_secs = 1;
    let (app, ctx, flush_rx) = app_with(config);

    // Background machinery: flush workers plus the time-driven sweep.
    let _flusher = run_flushers(Arc::clone(&ctx.subscriptions), flush_rx);
    let scheduler = MaintenanceScheduler::start(Arc::clone(&ctx));

    let (addr, mut pushes) = start_subscriber().await;

    let subscribe_body = format!(
        r#"{{"endpoint":"http://{addr}/push","query":{{"type":["service"]}},"max_push_events":2,"push_interval_secs":1}}"#
    );
    let response = send(&app, Method::POST, "/lookup/subscribe", &subscribe_body).await;
    assert_eq!(response.status(), StatusCode::OK);
    let sub = json_body(response).await;
    let sub_id = sub["subscription-id"].as_str().unwrap().to_string();

    for name in ["one", "two", "three"] {
        register(
            &app,
            &format!(r#"{{"type":["service"],"service-name":["{name}"]}}"#),
        )
        .await;
    }

    // First batch: size-triggered with exactly two records.
    let first = tokio::time::timeout(std::time::Duration::from_secs(10), pushes.recv())
        .await
        .expect("first batch within deadline")
        .unwrap();
    assert_eq!(first["subscription-id"], sub_id.as_str());
    assert_eq!(first["batch"].as_array().unwrap().len(), 2);
    assert_eq!(first["batch"][0]["service-name"][0], "one");
    assert_eq!(first["batch"][1]["service-name"][0], "two");

    // Second batch: interval-driven with the remaining record.
    let second = tokio::time::timeout(std::time::Duration::from_secs(10), pushes.recv())
        .await
        .expect("second batch within deadline")
        .unwrap();
    assert_eq!(second["batch"].as_array().unwrap().len(), 1);
    assert_eq!(second["batch"][0]["service-name"][0], "three");

    scheduler.shutdown().await;
}

// =============================================================================
// Boundaries
// =============================================================================

#[tokio::test]
async fn test_query_paging_boundaries() {
    let app = app();
    for loc in ["a", "b", "c"] {
        register(&app, &format!(r#"{{"type":["service"],"loc":["{loc}"]}}"#)).await;
    }

    // skip past the result count returns an empty page.
    let empty = json_body(
        send(
            &app,
            Method::GET,
            "/lookup/records?type=service&record-skip=5",
            "",
        )
        .await,
    )
    .await;
    assert!(empty.as_array().unwrap().is_empty());

    // max-results=0 means no cap.
    let all = json_body(
        send(
            &app,
            Method::GET,
            "/lookup/records?type=service&record-max-results=0",
            "",
        )
        .await,
    )
    .await;
    assert_eq!(all.as_array().unwrap().len(), 3);

    // An empty query matches every record.
    let everything = json_body(send(&app, Method::GET, "/lookup/records", "").await).await;
    assert_eq!(everything.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_access_token_protects_edits() {
    let app = app();

    let stored = register(
        &app,
        r#"{"type":["service"],"service-name":["alpha"],"client-uuid":"secret"}"#,
    )
    .await;
    let uri = stored["record-uri"].as_str().unwrap().to_string();

    let response = send(&app, Method::DELETE, &format!("/{uri}"), "").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = send(
        &app,
        Method::DELETE,
        &format!("/{uri}"),
        r#"{"client-uuid":"secret"}"#,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unsubscribe_stops_fanout() {
    let (app, ctx, _rx) = app_with(memory_config());

    let body = r#"{"endpoint":"http://127.0.0.1:9/push","query":{"type":["service"]}}"#;
    let sub = json_body(send(&app, Method::POST, "/lookup/subscribe", body).await).await;
    let sub_id = sub["subscription-id"].as_str().unwrap();
    assert_eq!(ctx.subscriptions.count(), 1);

    let response = send(
        &app,
        Method::DELETE,
        &format!("/lookup/subscribe/{sub_id}"),
        "",
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(ctx.subscriptions.count(), 0);

    let response = send(
        &app,
        Method::DELETE,
        &format!("/lookup/subscribe/{sub_id}"),
        "",
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
