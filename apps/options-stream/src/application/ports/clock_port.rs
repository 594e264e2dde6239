//! Clock Port (Driven Port)
//!
//! Time source injected into the dispatcher so market-hours decisions can be
//! driven from tests.

use chrono::{DateTime, Utc};

/// Source of the current instant.
pub trait ClockPort: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockPort for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
