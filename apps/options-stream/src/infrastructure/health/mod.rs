//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, live-update status reporting, and
//! Prometheus metrics. Runs on its own port next to the client-facing server.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (fails once shutdown begins)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::ClockPort;
use crate::application::services::{RegistryStats, SubscriptionRegistry};
use crate::domain::market_hours::MarketHoursGate;
use crate::domain::subscription::Topic;
use crate::infrastructure::hub::ConnectionHub;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Market hours gate state.
    pub market: MarketStatus,
    /// Connected clients.
    pub clients: ClientStatus,
    /// Live worker counts.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving live updates.
    Healthy,
    /// Up, but polling is suspended because the market is closed.
    Degraded,
    /// Shutting down.
    Unhealthy,
}

/// Market hours gate state.
#[derive(Debug, Clone, Serialize)]
pub struct MarketStatus {
    /// Whether polling is allowed right now.
    pub open: bool,
    /// Exchange timezone.
    pub timezone: String,
}

/// Connected client counts.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Open connections.
    pub total: usize,
    /// Members of the indexes room.
    pub indexes_audience: usize,
}

/// Live worker counts.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// All live workers.
    pub active: usize,
    /// Per-connection chain workers.
    pub single_symbol: usize,
    /// Shared index workers.
    pub indexes: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: Arc<SubscriptionRegistry>,
    hub: Arc<ConnectionHub>,
    gate: MarketHoursGate,
    clock: Arc<dyn ClockPort>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        registry: Arc<SubscriptionRegistry>,
        hub: Arc<ConnectionHub>,
        gate: MarketHoursGate,
        clock: Arc<dyn ClockPort>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            hub,
            gate,
            clock,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Routes served by the health server.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
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

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.registry.is_closing() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
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
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let now = state.clock.now();
    let market_open = state.gate.is_open(now);
    let stats = state.registry.stats();

    HealthResponse {
        status: determine_health_status(&stats, market_open),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: now,
        market: MarketStatus {
            open: market_open,
            timezone: state.gate.window().timezone().name().to_string(),
        },
        clients: ClientStatus {
            total: state.hub.connection_count(),
            indexes_audience: state.hub.room_size(Topic::Indexes),
        },
        subscriptions: SubscriptionStatus {
            active: stats.total,
            single_symbol: stats.single_symbol,
            indexes: stats.indexes,
        },
    }
}

const fn determine_health_status(stats: &RegistryStats, market_open: bool) -> HealthStatus {
    if stats.closing {
        HealthStatus::Unhealthy
    } else if market_open {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
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
