//! Port Interfaces
//!
//! Contracts between the dispatcher and the outside world, following the
//! Hexagonal Architecture pattern. Infrastructure adapters implement these.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketDataPort`: Upstream quote and option chain provider
//! - `TransportPort`: Delivery of events to connected clients
//! - `ClockPort`: Source of the current instant

mod clock_port;
mod market_data_port;
mod transport_port;

pub use clock_port::{ClockPort, SystemClock};
pub use market_data_port::{MarketDataError, MarketDataPort};
pub use transport_port::{
    ChainUpdate, ErrorNotice, IndexesUpdate, MARKET_CLOSED_NOTICE, MessageNotice, ServerEvent,
    TransportPort, UpdatePayload,
};
