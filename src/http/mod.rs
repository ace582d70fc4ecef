//! HTTP API server for the lookup service.
//!
//! ## Endpoints
//!
//! ### Records
//! - `POST /{sls}/records` - Register a record
//! - `GET /{sls}/records?…` - Query the live store
//! - `GET /{sls}/records/{id}` - Fetch a record by URI
//! - `POST /{sls}/records/{id}` - Renew (empty body = heartbeat)
//! - `DELETE /{sls}/records/{id}` - Delete (optional auth body)
//!
//! ### Subscriptions
//! - `POST /{sls}/subscribe` - Create a subscription
//! - `DELETE /{sls}/subscribe/{id}` - Remove a subscription
//!
//! ### Archive
//! - `GET /lookup/services/archive?…` - Query historical/tombstoned records
//!
//! ### Observability
//! - `GET /health` - Health check
//! - `GET /version` - Version info
//! - `GET /metrics` - Prometheus metrics
//!
//! Query-string convention: every parameter is a match clause except
//! `record-operator`, `record-skip` and `record-max-results`; a value
//! containing commas is split into a list of strings.
//!
//! Only the `lookup` namespace accepts writes; the archive namespace is
//! read-only.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::api::{LOOKUP_PREFIX, ServiceContext};
use crate::error::Error;
use crate::maintenance::MaintenanceScheduler;
use crate::metrics;
use crate::subscribe;

pub mod handlers;
pub mod types;

use handlers::{
    create_subscription, delete_record, get_record, health, metrics_endpoint, query_archive,
    query_records, register_record, remove_subscription, renew_record, version,
};
use types::ErrorResponse;

/// Request body size limit (1 MB): records are small documents.
const MAX_BODY_BYTES: usize = 1024 * 1024;

// =============================================================================
// HTTP API Server
// =============================================================================

/// Starts the HTTP API and the background machinery (flush workers and
/// maintenance scheduler), serving until SIGINT/SIGTERM.
pub async fn serve(ctx: Arc<ServiceContext>, flush_rx: mpsc::Receiver<String>) -> Result<()> {
    if metrics::init_metrics().is_some() {
        tracing::info!("Prometheus metrics initialized");
    }

    let flusher = subscribe::run_flushers(Arc::clone(&ctx.subscriptions), flush_rx);
    let scheduler = MaintenanceScheduler::start(Arc::clone(&ctx));

    let addr: SocketAddr = format!("{}:{}", ctx.config.service.host, ctx.config.service.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                ctx.config.service.host, ctx.config.service.port
            )
        })?;

    let app = router(Arc::clone(&ctx));

    tracing::info!("Starting lookup service HTTP API on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    scheduler.shutdown().await;
    flusher.abort();
    tracing::info!("Graceful shutdown complete");

    Ok(())
}

/// Builds the service router over the given context.
pub fn router(ctx: Arc<ServiceContext>) -> Router {
    let deadline = Duration::from_secs(ctx.config.service.request_timeout_secs.max(1));

    Router::new()
        // Records
        .route("/{sls}/records", post(register_record).get(query_records))
        .route(
            "/{sls}/records/{id}",
            get(get_record).post(renew_record).delete(delete_record),
        )
        // Subscriptions
        .route("/{sls}/subscribe", post(create_subscription))
        .route("/{sls}/subscribe/{id}", delete(remove_subscription))
        // Archive namespace (read-only)
        .route("/lookup/services/archive", get(query_archive))
        // Observability
        .route("/metrics", get(metrics_endpoint))
        // System endpoints
        .route("/health", get(health))
        .route("/version", get(version))
        .with_state(ctx)
        // Records are small; reject oversized payloads early
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        // Caller-supplied deadline for every request
        .layer(middleware::from_fn_with_state(deadline, deadline_middleware))
        // Metrics middleware - records HTTP request metrics
        .layer(middleware::from_fn(metrics_middleware))
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping service...");
}

/// Middleware enforcing the per-request deadline.
///
/// Exceeding it aborts downstream work best-effort: the handler future is
/// dropped and the client receives a timeout error.
async fn deadline_middleware(
    State(deadline): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => AppError(Error::Timeout("request deadline exceeded".to_string()))
            .into_response(),
    }
}

/// Middleware to record HTTP request metrics.
async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    metrics::record_http_request(&method, &path, response.status().as_u16(), duration);

    response
}

// =============================================================================
// Error Handling
// =============================================================================

/// Adapter from service errors to HTTP responses.
///
/// Internal errors are logged with full context and surfaced opaque.
pub(crate) struct AppError(pub(crate) Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if matches!(self.0, Error::Internal(_)) {
            tracing::error!(error = %self.0, "Internal error serving request");
        }
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorResponse {
                error: self.0.client_message(),
            }),
        )
            .into_response()
    }
}

/// Writes are accepted on the `lookup` namespace only.
pub(crate) fn check_namespace(sls: &str) -> Result<(), AppError> {
    if sls.eq_ignore_ascii_case(LOOKUP_PREFIX) {
        Ok(())
    } else {
        Err(AppError(Error::NotSupported(format!(
            "namespace '{sls}' is not served by this cache"
        ))))
    }
}
