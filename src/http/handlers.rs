//! HTTP handlers for the lookup service REST surface.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query as HttpQuery, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use std::sync::Arc;

use super::{AppError, check_namespace};
use crate::api::{self, ServiceContext};
use crate::http::types::{HealthResponse, SubscribeResponse, VersionResponse};
use crate::metrics;
use crate::query::Query;
use crate::record::Record;
use crate::subscribe::SubscriptionSpec;

type Ctx = State<Arc<ServiceContext>>;

/// POST /{sls}/records - Register a record.
pub(crate) async fn register_record(
    State(ctx): Ctx,
    Path(sls): Path<String>,
    body: Bytes,
) -> Result<Json<Record>, AppError> {
    check_namespace(&sls)?;
    let record = Record::from_json(&body)?;
    let stored = api::register::register(&ctx, record)?;
    Ok(Json(stored))
}

/// GET /{sls}/records - Query the live store.
///
/// Reads are open to any namespace; only writes are guarded.
pub(crate) async fn query_records(
    State(ctx): Ctx,
    Path(_sls): Path<String>,
    HttpQuery(params): HttpQuery<Vec<(String, String)>>,
) -> Result<Json<Vec<Record>>, AppError> {
    let query = Query::from_params(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    let results = api::query::query_live(&ctx, &query)?;
    Ok(Json(results))
}

/// GET /{sls}/records/{id} - Fetch one record by URI.
pub(crate) async fn get_record(
    State(ctx): Ctx,
    Path((sls, id)): Path<(String, String)>,
) -> Result<Json<Record>, AppError> {
    let uri = record_uri(&sls, &id);
    let record = api::query::get_record(&ctx, &uri)?;
    Ok(Json(record))
}

/// POST /{sls}/records/{id} - Renew a record.
///
/// The body may be empty (a plain heartbeat), or carry a new TTL and the
/// access token.
pub(crate) async fn renew_record(
    State(ctx): Ctx,
    Path((sls, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Record>, AppError> {
    check_namespace(&sls)?;
    let delta = parse_optional_body(&body)?;
    let uri = record_uri(&sls, &id);
    let renewed = api::edit::renew(&ctx, &uri, &delta)?;
    Ok(Json(renewed))
}

/// DELETE /{sls}/records/{id} - Delete a record.
///
/// The optional body carries the access token for protected records.
pub(crate) async fn delete_record(
    State(ctx): Ctx,
    Path((sls, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Record>, AppError> {
    check_namespace(&sls)?;
    let delta = parse_optional_body(&body)?;
    let uri = record_uri(&sls, &id);
    let removed = api::edit::delete(&ctx, &uri, &delta)?;
    Ok(Json(removed))
}

/// POST /{sls}/subscribe - Create a subscription.
pub(crate) async fn create_subscription(
    State(ctx): Ctx,
    Path(sls): Path<String>,
    Json(spec): Json<SubscriptionSpec>,
) -> Result<Json<SubscribeResponse>, AppError> {
    check_namespace(&sls)?;
    let sub = ctx.subscriptions.subscribe(spec)?;
    metrics::set_subscriptions(ctx.subscriptions.count());
    Ok(Json(SubscribeResponse {
        subscription_id: sub.id().to_string(),
        endpoint: sub.endpoint().to_string(),
        query: sub.query_doc().clone(),
    }))
}

/// DELETE /{sls}/subscribe/{id} - Remove a subscription.
pub(crate) async fn remove_subscription(
    State(ctx): Ctx,
    Path((sls, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    check_namespace(&sls)?;
    if ctx.subscriptions.unsubscribe(&id)? {
        metrics::set_subscriptions(ctx.subscriptions.count());
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(crate::error::Error::NotFound(format!("subscription {id}")).into())
    }
}

/// GET /lookup/services/archive - Query historical and tombstoned records.
pub(crate) async fn query_archive(
    State(ctx): Ctx,
    HttpQuery(params): HttpQuery<Vec<(String, String)>>,
) -> Result<Json<Vec<Record>>, AppError> {
    let query = Query::from_params(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    let results = api::query::query_archive(&ctx, &query)?;
    Ok(Json(results))
}

/// GET /health - Health check.
pub(crate) async fn health(State(ctx): Ctx) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        records: ctx.store.len().unwrap_or(0),
        active_leases: ctx.leases.active_count(),
        subscriptions: ctx.subscriptions.count(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /version - Version info.
pub(crate) async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /metrics - Prometheus metrics endpoint.
pub(crate) async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics::render_metrics(),
    )
}

fn record_uri(sls: &str, id: &str) -> String {
    format!("{sls}/records/{id}")
}

/// An absent or empty edit body is a valid empty delta.
fn parse_optional_body(body: &Bytes) -> Result<Record, AppError> {
    if body.is_empty() {
        Ok(Record::new())
    } else {
        Ok(Record::from_json(body)?)
    }
}
