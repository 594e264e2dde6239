#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Options Stream - Live Option Chain Dispatcher
//!
//! A WebSocket service that polls a market data provider on behalf of
//! connected clients and pushes normalized option chains and index quotes
//! only to the clients that asked for them. Nothing is polled without a
//! subscriber, and nothing is polled while the market is closed.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `market_data`: Provider-agnostic quotes and contracts
//!   - `option_chain`: Strike alignment and mark pricing
//!   - `market_hours`: Exchange session window and gate
//!   - `subscription`: Connection, topic and parameter vocabulary
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Provider, transport and clock interfaces
//!   - `services`: Subscription registry and live update dispatcher
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `yahoo`: REST market data provider
//!   - `hub`: Per-connection outbound queues and topic rooms
//!   - `http`: REST snapshots and WebSocket namespaces
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                ┌────────────┐  subscribe   ┌──────────────┐
//! Client 1 ─────►│  /ws/stock │─────────────►│  Dispatcher  │
//! Client 2 ─────►│ /ws/indexes│              │  + Registry  │
//!                └────────────┘              └──────┬───────┘
//!                      ▲                            │ spawn
//!                      │ frames              ┌──────▼───────┐    poll    ┌──────────┐
//!                ┌─────┴──────┐   emit /     │ Poll workers │──────────►│ Provider │
//!                │    Hub     │◄─broadcast───│ (one per key)│◄──────────│  (REST)  │
//!                └────────────┘              └──────────────┘            └──────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data types and rules with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market_data::{OptionChainData, OptionContract, QuoteInfo};
pub use domain::market_hours::{MarketHoursGate, MarketHoursWindow};
pub use domain::option_chain::{NormalizedContract, OptionChainSnapshot, StrikeLevel, normalize};
pub use domain::subscription::{
    ChainRequest, ConnectionId, SubscriptionKey, SubscriptionOwner, SubscriptionParams, Topic,
    ValidationError,
};

// Ports
pub use application::ports::{
    ChainUpdate, ClockPort, IndexesUpdate, MarketDataError, MarketDataPort, ServerEvent,
    SystemClock, TransportPort, UpdatePayload,
};

// Services
pub use application::services::{
    DispatchError, DispatcherConfig, LiveUpdateDispatcher, RegistryError, SubscriptionHandle,
    SubscriptionRegistry,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, PollingSettings, ProviderSettings, ServerSettings, ServiceConfig,
};

// Servers (for integration tests)
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, OriginPolicy, router};
pub use infrastructure::hub::ConnectionHub;

// Provider
pub use infrastructure::yahoo::YahooFinanceClient;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
