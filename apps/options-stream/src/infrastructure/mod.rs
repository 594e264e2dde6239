//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the servers that expose them.

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Outbound connection hub (per-connection queues and topic rooms).
pub mod hub;

/// Client-facing REST and WebSocket server.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Yahoo Finance market data adapter.
pub mod yahoo;
