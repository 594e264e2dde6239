//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionRegistry`: Owns live polling workers, one per key
//! - `LiveUpdateDispatcher`: Routes client intents and runs the pollers

mod dispatcher;
mod registry;

pub use dispatcher::{DEFAULT_POLL_INTERVAL, DispatchError, DispatcherConfig, LiveUpdateDispatcher};
pub use registry::{
    RegistryError, RegistryStats, SubscriptionHandle, SubscriptionRegistry, WorkerContext,
};
