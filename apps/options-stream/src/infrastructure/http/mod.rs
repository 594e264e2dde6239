//! Client-Facing HTTP Server
//!
//! One axum router serving the REST snapshot endpoints and the two
//! WebSocket namespaces.
//!
//! # Endpoints
//!
//! - `GET /` - Liveness banner
//! - `GET /stock-data?symbol=&expirationDate=` - One normalized chain snapshot
//! - `GET /indexes-data` - Index quotes keyed by symbol
//! - `GET /watch-list-data?watch_list=A,B` - Quotes for a watch list
//! - `GET /ws/stock` - Per-connection option chain updates
//! - `GET /ws/indexes` - Shared index quote updates

mod rest;
mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::application::ports::MarketDataPort;
use crate::application::services::LiveUpdateDispatcher;
use crate::infrastructure::hub::ConnectionHub;

// =============================================================================
// Origin Policy
// =============================================================================

/// Browser origins allowed to call the API and open sockets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OriginPolicy {
    origins: Vec<String>,
}

impl OriginPolicy {
    /// Allow only the listed origins; an empty list allows any.
    #[must_use]
    pub fn new(origins: impl IntoIterator<Item = String>) -> Self {
        Self {
            origins: origins
                .into_iter()
                .map(|origin| origin.trim_end_matches('/').to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        }
    }

    /// Whether every origin is allowed.
    #[must_use]
    pub fn allows_any(&self) -> bool {
        self.origins.is_empty()
    }

    /// Whether a request carrying this `Origin` header is allowed.
    ///
    /// Requests without an `Origin` header are not browser cross-origin
    /// requests and are always allowed.
    #[must_use]
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.allows_any() => true,
            Some(origin) => {
                let origin = origin.trim_end_matches('/');
                self.origins.iter().any(|allowed| allowed == origin)
            }
        }
    }

    /// CORS layer matching this policy.
    #[must_use]
    pub fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        if self.allows_any() {
            return layer.allow_origin(Any);
        }

        let origins: Vec<HeaderValue> = self
            .origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

// =============================================================================
// State and Router
// =============================================================================

/// Shared state for every client-facing handler.
#[derive(Clone)]
pub struct AppState {
    /// Live update dispatcher.
    pub dispatcher: Arc<LiveUpdateDispatcher>,
    /// Outbound connection hub.
    pub hub: Arc<ConnectionHub>,
    /// Provider used by the REST snapshot endpoints.
    pub provider: Arc<dyn MarketDataPort>,
    /// Allowed origins.
    pub origins: OriginPolicy,
    /// Symbols served by `/indexes-data`.
    pub index_symbols: Arc<[String]>,
    /// Reject REST data requests while the market is closed.
    pub rest_market_gate: bool,
    /// Fires when the service is shutting down.
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("origins", &self.origins)
            .field("index_symbols", &self.index_symbols)
            .field("rest_market_gate", &self.rest_market_gate)
            .finish_non_exhaustive()
    }
}

/// Build the client-facing router.
pub fn router(state: AppState) -> Router {
    let cors = state.origins.cors_layer();

    Router::new()
        .route("/", get(rest::index_handler))
        .route("/stock-data", get(rest::stock_data_handler))
        .route("/indexes-data", get(rest::indexes_data_handler))
        .route("/watch-list-data", get(rest::watch_list_handler))
        .route("/ws/stock", get(websocket::stock_socket_handler))
        .route("/ws/indexes", get(websocket::indexes_socket_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// Client-facing HTTP + WebSocket server.
pub struct HttpServer {
    port: u16,
    state: AppState,
}

impl HttpServer {
    /// Create a new server. It stops when `state.shutdown` fires.
    #[must_use]
    pub const fn new(port: u16, state: AppState) -> Self {
        Self { port, state }
    }

    /// Run until the shutdown token fires.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server encounters
    /// a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let shutdown = self.state.shutdown.clone();
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

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
