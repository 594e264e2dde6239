//! Options Stream Binary
//!
//! Starts the live option chain dispatcher.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin options-stream
//! ```
//!
//! # Environment Variables
//!
//! All optional.
//! - `PORT`: HTTP + WebSocket port (default: 8080)
//! - `HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `SITE_URL`: Public site origin, always allowed
//! - `ALLOWED_ORIGINS`: Comma-separated origins (default: any)
//! - `POLL_INTERVAL_SECS`: Wait between provider calls (default: 15)
//! - `OUTBOUND_CAPACITY`: Per-connection event buffer (default: 256)
//! - `INDEX_SYMBOLS`: Symbols on the indexes topic (default: DIA,QQQ,SPY)
//! - `REST_MARKET_GATE`: Reject REST snapshots while closed (default: false)
//! - `MARKET_TIMEZONE`, `MARKET_OPEN`, `MARKET_CLOSE`, `MARKET_DAYS`,
//!   `MARKET_HOLIDAYS`: Session window (default: NYSE 09:30-16:00 Mon-Fri)
//! - `PROVIDER_BASE_URL`, `PROVIDER_TIMEOUT_SECS`, `PROVIDER_USER_AGENT`
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log filter (default: `options_stream=info`)

use std::sync::Arc;
use std::time::Duration;

use options_stream::application::ports::{ClockPort, MarketDataPort, TransportPort};
use options_stream::infrastructure::health::{HealthServer, HealthServerState};
use options_stream::infrastructure::http::{AppState, HttpServer, OriginPolicy};
use options_stream::infrastructure::telemetry;
use options_stream::{
    ConnectionHub, LiveUpdateDispatcher, MarketHoursGate, ServiceConfig, SubscriptionRegistry,
    SystemClock, YahooFinanceClient, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// How long servers get to finish after shutdown begins.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv_from_ancestors();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting options stream");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed, /metrics disabled");
    }

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let provider: Arc<dyn MarketDataPort> = Arc::new(YahooFinanceClient::new(&config.provider)?);
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);
    let gate = MarketHoursGate::new(config.market_hours.clone());
    let hub = Arc::new(ConnectionHub::new(config.polling.outbound_capacity));
    let registry = Arc::new(SubscriptionRegistry::new());

    let transport: Arc<dyn TransportPort> = hub.clone();
    let dispatcher = Arc::new(LiveUpdateDispatcher::new(
        Arc::clone(&provider),
        transport,
        Arc::clone(&clock),
        gate.clone(),
        Arc::clone(&registry),
        config.polling.dispatcher_config(),
    ));

    let state = AppState {
        dispatcher: Arc::clone(&dispatcher),
        hub: Arc::clone(&hub),
        provider,
        origins: OriginPolicy::new(config.server.origins()),
        index_symbols: config.polling.index_symbols.clone().into(),
        rest_market_gate: config.polling.rest_market_gate,
        shutdown: shutdown_token.clone(),
    };

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&registry),
        Arc::clone(&hub),
        gate,
        clock,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let http_server = HttpServer::new(config.server.port, state);
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Options stream ready");

    await_shutdown().await;

    let stopped = dispatcher.shutdown().await;
    tracing::info!(stopped, "Live update workers stopped");

    shutdown_token.cancel();

    let joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(http_task, health_task);
    })
    .await;
    if joined.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Servers did not stop before timeout"
        );
    }

    tracing::info!("Options stream stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        port = config.server.port,
        health_port = config.server.health_port,
        poll_interval_secs = config.polling.poll_interval.as_secs(),
        index_symbols = ?config.polling.index_symbols,
        timezone = %config.market_hours.timezone(),
        "Configuration loaded"
    );
    tracing::debug!(
        provider = %config.provider.base_url,
        origins = ?config.server.origins(),
        rest_market_gate = config.polling.rest_market_gate,
        "Adapter settings"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv_from_ancestors() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
