//! Application Layer - Use cases and port definitions.
//!
//! This layer owns the live-update lifecycle: which workers exist, who they
//! poll for, and where their results go. It talks to the outside world only
//! through the ports.

/// Port interfaces for the provider, the transport and the clock.
pub mod ports;

/// Subscription registry and live update dispatcher.
pub mod services;
