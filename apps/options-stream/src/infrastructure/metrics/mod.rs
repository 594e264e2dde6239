//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Connections**: Open client connections
//! - **Subscriptions**: Live workers and their start/stop reasons
//! - **Polling**: Provider call outcomes and latency
//! - **Events**: Server events delivered to and dropped for clients
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until `init_metrics` installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::subscription::Topic;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Connections
    describe_gauge!(
        "options_stream_connections",
        "Number of open client connections"
    );
    describe_counter!(
        "options_stream_client_events_total",
        "Client events received by name"
    );

    // Subscriptions
    describe_gauge!(
        "options_stream_subscriptions_active",
        "Number of live polling workers"
    );
    describe_counter!(
        "options_stream_workers_started_total",
        "Polling workers started by topic"
    );
    describe_counter!(
        "options_stream_workers_stopped_total",
        "Polling workers stopped by topic and reason"
    );

    // Polling
    describe_counter!(
        "options_stream_polls_total",
        "Provider calls by topic and outcome"
    );
    describe_histogram!(
        "options_stream_poll_duration_seconds",
        "Provider call latency by topic"
    );

    // Events
    describe_counter!(
        "options_stream_events_sent_total",
        "Server events delivered to clients"
    );
    describe_counter!(
        "options_stream_events_dropped_total",
        "Server events dropped for slow or closed clients"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why a polling worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Cancelled by replace, unsubscribe, disconnect, drain or shutdown.
    Cancelled,
    /// The market hours gate reported closed.
    MarketClosed,
    /// The provider call failed.
    ProviderError,
    /// The worker task panicked.
    Panicked,
}

impl StopReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::MarketClosed => "market_closed",
            Self::ProviderError => "provider_error",
            Self::Panicked => "panicked",
        }
    }
}

/// Update the open connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections(count: usize) {
    gauge!("options_stream_connections").set(count as f64);
}

/// Record a client event.
pub fn record_client_event(event: &'static str) {
    counter!("options_stream_client_events_total", "event" => event).increment(1);
}

/// Update the live worker count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_subscriptions(count: usize) {
    gauge!("options_stream_subscriptions_active").set(count as f64);
}

/// Record a worker start.
pub fn record_worker_started(topic: Topic) {
    counter!("options_stream_workers_started_total", "topic" => topic.as_str()).increment(1);
}

/// Record a worker stop.
pub fn record_worker_stopped(topic: Topic, reason: StopReason) {
    counter!(
        "options_stream_workers_stopped_total",
        "topic" => topic.as_str(),
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a provider call and its latency.
pub fn record_poll(topic: Topic, outcome: &'static str, duration: Duration) {
    counter!(
        "options_stream_polls_total",
        "topic" => topic.as_str(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "options_stream_poll_duration_seconds",
        "topic" => topic.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record events delivered to clients.
pub fn record_events_sent(event: &'static str, count: u64) {
    counter!("options_stream_events_sent_total", "event" => event).increment(count);
}

/// Record an event dropped for a client.
pub fn record_event_dropped(event: &'static str) {
    counter!("options_stream_events_dropped_total", "event" => event).increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_as_str() {
        assert_eq!(StopReason::Cancelled.as_str(), "cancelled");
        assert_eq!(StopReason::MarketClosed.as_str(), "market_closed");
        assert_eq!(StopReason::ProviderError.as_str(), "provider_error");
        assert_eq!(StopReason::Panicked.as_str(), "panicked");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        set_connections(3);
        record_worker_started(Topic::Indexes);
        record_poll(Topic::Indexes, "ok", Duration::from_millis(5));
        record_event_dropped("data");
    }
}
