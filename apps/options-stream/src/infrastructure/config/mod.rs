//! Configuration Module
//!
//! Configuration loading for the options stream service.

mod settings;

pub use settings::{ConfigError, PollingSettings, ProviderSettings, ServerSettings, ServiceConfig};
