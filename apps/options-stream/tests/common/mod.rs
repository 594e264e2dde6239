//! Shared fixtures for the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::mpsc;

use options_stream::application::ports::{ClockPort, MarketDataError, MarketDataPort};
use options_stream::{
    AppState, ConnectionHub, ConnectionId, DispatcherConfig, LiveUpdateDispatcher,
    MarketHoursGate, OptionChainData, OptionContract, OriginPolicy, QuoteInfo,
    SubscriptionRegistry,
};
use tokio_util::sync::CancellationToken;

/// Poll interval used by every harness.
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Tuesday 10:00 New York.
pub fn open_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 20, 14, 0, 0).unwrap()
}

/// Saturday 10:00 New York.
pub fn closed_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 24, 14, 0, 0).unwrap()
}

// =============================================================================
// Clock
// =============================================================================

/// Clock pinned to a settable instant.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock() = now;
    }
}

impl ClockPort for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Canned provider that records every call.
#[derive(Default)]
pub struct FakeProvider {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeProvider {
    /// Make chain requests for `symbol` fail with `SymbolNotFound`.
    pub fn fail(&self, symbol: &str) {
        self.failing.lock().insert(symbol.to_string());
    }

    /// Delay every response.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Every call so far: chain calls by symbol, quote calls as `quotes:A,B`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, symbol: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == symbol).count()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Three call strikes and two put strikes, so one put row is synthesized.
pub fn sample_chain(symbol: &str) -> OptionChainData {
    let contract = |side: char, strike: i64| {
        OptionContract::new(format!("{symbol}261023{side}{strike:05}000"), Decimal::new(strike, 0))
            .with_quote(Some(Decimal::new(200, 2)), Some(Decimal::new(210, 2)))
    };

    OptionChainData {
        info: QuoteInfo::new(symbol).with_price(Decimal::new(100, 0)),
        expiration_dates: vec![
            NaiveDate::from_ymd_opt(2026, 10, 23).unwrap(),
            NaiveDate::from_ymd_opt(2026, 10, 30).unwrap(),
        ],
        calls: vec![contract('C', 95), contract('C', 100), contract('C', 105)],
        puts: vec![contract('P', 95), contract('P', 100)],
    }
}

#[async_trait]
impl MarketDataPort for FakeProvider {
    async fn get_quote(&self, symbol: &str) -> Result<QuoteInfo, MarketDataError> {
        self.calls.lock().push(format!("quote:{symbol}"));
        self.pause().await;
        Ok(QuoteInfo::new(symbol).with_price(Decimal::new(500, 0)))
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteInfo>, MarketDataError> {
        self.calls.lock().push(format!("quotes:{}", symbols.join(",")));
        self.pause().await;
        Ok(symbols
            .iter()
            .map(|symbol| QuoteInfo::new(symbol.as_str()).with_price(Decimal::new(500, 0)))
            .collect())
    }

    async fn get_option_chain(
        &self,
        symbol: &str,
        _expiration: Option<NaiveDate>,
    ) -> Result<OptionChainData, MarketDataError> {
        self.calls.lock().push(symbol.to_string());
        self.pause().await;
        if self.failing.lock().contains(symbol) {
            return Err(MarketDataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        Ok(sample_chain(symbol))
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A dispatcher wired to the in-process hub, a fake provider and a manual clock.
pub struct Harness {
    pub provider: Arc<FakeProvider>,
    pub clock: Arc<ManualClock>,
    pub hub: Arc<ConnectionHub>,
    pub registry: Arc<SubscriptionRegistry>,
    pub dispatcher: Arc<LiveUpdateDispatcher>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        let provider = Arc::new(FakeProvider::default());
        let clock = Arc::new(ManualClock::new(now));
        let hub = Arc::new(ConnectionHub::default());
        let registry = Arc::new(SubscriptionRegistry::new());

        let dispatcher = Arc::new(LiveUpdateDispatcher::new(
            provider.clone(),
            hub.clone(),
            clock.clone(),
            MarketHoursGate::default(),
            Arc::clone(&registry),
            DispatcherConfig {
                poll_interval: POLL_INTERVAL,
                ..DispatcherConfig::default()
            },
        ));

        Self {
            provider,
            clock,
            hub,
            registry,
            dispatcher,
        }
    }

    /// Client-facing server state over this harness.
    pub fn app_state(&self, origins: OriginPolicy, rest_market_gate: bool) -> AppState {
        AppState {
            dispatcher: Arc::clone(&self.dispatcher),
            hub: Arc::clone(&self.hub),
            provider: self.provider.clone(),
            origins,
            index_symbols: DispatcherConfig::default().index_symbols.into(),
            rest_market_gate,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register a connection with the hub.
    pub fn client(&self) -> TestClient {
        let id = ConnectionId::new_v4();
        let rx = self.hub.register(id);
        TestClient { id, rx }
    }
}

/// Receiving end of one registered connection.
pub struct TestClient {
    pub id: ConnectionId,
    rx: mpsc::Receiver<String>,
}

impl TestClient {
    /// Every frame queued so far.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    /// Wait for the first frame matching `predicate`, returning every frame
    /// received up to and including it.
    pub async fn wait_for(&mut self, predicate: impl Fn(&Value) -> bool) -> Vec<Value> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let frame = tokio::time::timeout_at(deadline, self.rx.recv())
                .await
                .unwrap_or_else(|_| panic!("no matching frame, saw {seen:?}"))
                .expect("hub dropped the connection");
            let frame: Value = serde_json::from_str(&frame).unwrap();
            let matched = predicate(&frame);
            seen.push(frame);
            if matched {
                return seen;
            }
        }
    }
}

// =============================================================================
// Frame Predicates
// =============================================================================

pub fn is_message(frame: &Value, text: &str) -> bool {
    frame["event"] == "message" && frame["data"]["message"] == text
}

pub fn is_error(frame: &Value, text: &str) -> bool {
    frame["event"] == "error" && frame["data"]["error"] == text
}

pub fn is_chain_for(frame: &Value, symbol: &str) -> bool {
    frame["event"] == "data" && frame["data"]["info"]["symbol"] == symbol
}

pub fn is_data(frame: &Value) -> bool {
    frame["event"] == "data"
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
