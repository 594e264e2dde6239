//! Domain Layer - Core types and pure business logic.
//!
//! This layer contains the market data records, the option chain
//! normalizer, the market hours gate and the subscription vocabulary.
//! Nothing here performs I/O or reads the clock.

/// Provider-agnostic quote and option contract records.
pub mod market_data;

/// Market hours window and gate.
pub mod market_hours;

/// Option chain strike alignment and mark pricing.
pub mod option_chain;

/// Subscription identity, parameters and audiences.
pub mod subscription;
