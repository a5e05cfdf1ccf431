//! HTTP Endpoint
//!
//! Health checks, Prometheus metrics and point-in-time conversion queries.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status with connection states and queue stats
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (at least one connection up)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /convert?from=BTC&to=USDT&amount=1&timestamp=<ms>` - Conversion

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{BoundedQueue, ConversionEngine};
use crate::domain::conversion::{ConversionError, ConversionRequest};
use crate::domain::market::{Quote, Timestamp};
use crate::infrastructure::exchange::{ConnectionRegistry, ConnectionState, ConnectionStatus};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Exchange streamed from.
    pub exchange: &'static str,
    /// Per-slot connection states.
    pub connections: Vec<ConnectionState>,
    /// Transport queue statistics.
    pub queue: QueueStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every connection is up.
    Healthy,
    /// Some connections are up.
    Degraded,
    /// No connection is up.
    Unhealthy,
}

/// Transport queue statistics.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Quotes waiting for the next flush.
    pub depth: usize,
    /// Queue capacity.
    pub capacity: usize,
    /// Quotes evicted since start.
    pub dropped: u64,
}

/// Error body for failed conversions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
pub struct HttpState {
    version: String,
    started_at: Instant,
    exchange: &'static str,
    registry: Arc<ConnectionRegistry>,
    queue: Arc<BoundedQueue<Quote>>,
    engine: Arc<ConversionEngine>,
}

impl HttpState {
    /// Create server state.
    #[must_use]
    pub fn new(
        version: String,
        exchange: &'static str,
        registry: Arc<ConnectionRegistry>,
        queue: Arc<BoundedQueue<Quote>>,
        engine: Arc<ConversionEngine>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            exchange,
            registry,
            queue,
            engine,
        }
    }
}

/// Build the router with all endpoints.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/convert", get(convert_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Server
// =============================================================================

/// HTTP server for health, metrics and conversion queries.
pub struct HttpServer {
    port: u16,
    state: Arc<HttpState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HttpState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    if state.registry.connected() > 0 {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

/// Raw query parameters. Parsed by hand so every failure gets a JSON body.
#[derive(Debug, Deserialize)]
struct ConvertParams {
    from: Option<String>,
    to: Option<String>,
    amount: Option<String>,
    timestamp: Option<String>,
}

async fn convert_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<ConvertParams>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let request = match parse_convert_params(&params) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(%request_id, error = %e, "Rejected conversion request");
            return error_response(&e);
        }
    };

    match state.engine.convert(&request).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            if matches!(e, ConversionError::Storage(_)) {
                tracing::warn!(%request_id, error = %e, "Conversion failed on storage");
            }
            error_response(&e)
        }
    }
}

fn parse_convert_params(params: &ConvertParams) -> Result<ConversionRequest, ConversionError> {
    let from = params
        .from
        .as_deref()
        .ok_or_else(|| ConversionError::InvalidAsset("missing 'from'".to_string()))?;
    let to = params
        .to
        .as_deref()
        .ok_or_else(|| ConversionError::InvalidAsset("missing 'to'".to_string()))?;
    let raw_amount = params
        .amount
        .as_deref()
        .ok_or_else(|| ConversionError::InvalidAmount("missing 'amount'".to_string()))?;
    let amount = Decimal::from_str(raw_amount.trim())
        .map_err(|_| ConversionError::InvalidAmount(raw_amount.to_string()))?;
    let at = params
        .timestamp
        .as_deref()
        .map(|raw| {
            raw.trim()
                .parse::<i64>()
                .map(Timestamp::from_millis)
                .map_err(|_| ConversionError::InvalidAmount(format!("invalid timestamp {raw:?}")))
        })
        .transpose()?;

    ConversionRequest::new(amount, from, to, at)
}

const fn status_for(error: &ConversionError) -> StatusCode {
    match error {
        ConversionError::InvalidAmount(_) | ConversionError::InvalidAsset(_) => {
            StatusCode::BAD_REQUEST
        }
        ConversionError::NoQuoteAvailable { .. } => StatusCode::NOT_FOUND,
        ConversionError::StaleQuote { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ConversionError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(error: &ConversionError) -> Response {
    let body = ErrorBody {
        code: error.code().to_string(),
        message: error.to_string(),
    };
    (status_for(error), Json(body)).into_response()
}

fn build_health_response(state: &HttpState) -> HealthResponse {
    let connections = state.registry.snapshot();
    let status = determine_health_status(&connections);

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        exchange: state.exchange,
        connections,
        queue: QueueStatus {
            depth: state.queue.len(),
            capacity: state.queue.capacity(),
            dropped: state.queue.dropped(),
        },
    }
}

fn determine_health_status(connections: &[ConnectionState]) -> HealthStatus {
    let connected = connections
        .iter()
        .filter(|c| c.status == ConnectionStatus::Connected)
        .count();

    match connected {
        0 => HealthStatus::Unhealthy,
        n if n == connections.len() => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
