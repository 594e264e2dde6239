//! Transport Port (Driven Port)
//!
//! Outbound side of the client transport: unicast to one connection,
//! broadcast to a topic room, and room membership. Also defines the
//! server-to-client event envelope every adapter must serialize as
//! `{"event": ..., "data": ...}`.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::market_data::{OptionChainData, QuoteInfo};
use crate::domain::option_chain::{NormalizedContract, StrikeLevel, normalize};
use crate::domain::subscription::{ConnectionId, SubscriptionParams, Topic};

/// Notice sent when polling stops because the market is closed.
pub const MARKET_CLOSED_NOTICE: &str =
    "Stock Market Closed. Live updates resume at the next session open.";

// =============================================================================
// Payloads
// =============================================================================

/// One normalized option chain snapshot for a single symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainUpdate {
    /// Underlying quote.
    pub info: QuoteInfo,
    /// Every listed expiration.
    pub dates: Vec<NaiveDate>,
    /// Calls aligned with `strikes`.
    pub calls: Vec<NormalizedContract>,
    /// Puts aligned with `strikes`.
    pub puts: Vec<NormalizedContract>,
    /// Strike grid.
    pub strikes: Vec<StrikeLevel>,
    /// Parameters that produced this snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<SubscriptionParams>,
}

impl ChainUpdate {
    /// Normalize raw provider data into an update.
    #[must_use]
    pub fn from_chain(data: OptionChainData, request: Option<SubscriptionParams>) -> Self {
        let (strikes, calls, puts) = normalize(&data.calls, &data.puts).into_parts();
        Self {
            info: data.info,
            dates: data.expiration_dates,
            calls,
            puts,
            strikes,
            request,
        }
    }
}

/// Index quotes keyed by symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IndexesUpdate(pub BTreeMap<String, QuoteInfo>);

impl IndexesUpdate {
    /// Key quotes by their symbol.
    #[must_use]
    pub fn from_quotes(quotes: impl IntoIterator<Item = QuoteInfo>) -> Self {
        Self(
            quotes
                .into_iter()
                .map(|quote| (quote.symbol.clone(), quote))
                .collect(),
        )
    }
}

/// Body of a `data` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpdatePayload {
    /// Single-symbol chain.
    Chain(Box<ChainUpdate>),
    /// Index quotes.
    Indexes(IndexesUpdate),
}

// =============================================================================
// Envelope
// =============================================================================

/// `{"error": ...}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorNotice {
    /// Human-readable error.
    pub error: String,
}

/// `{"message": ...}` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageNotice {
    /// Human-readable message.
    pub message: String,
}

/// Server-to-client event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Data update.
    Data(UpdatePayload),
    /// Error notice.
    Error(ErrorNotice),
    /// Informational notice or acknowledgement.
    Message(MessageNotice),
}

impl ServerEvent {
    /// Wrap a chain update.
    #[must_use]
    pub fn chain(update: ChainUpdate) -> Self {
        Self::Data(UpdatePayload::Chain(Box::new(update)))
    }

    /// Wrap index quotes.
    #[must_use]
    pub const fn indexes(update: IndexesUpdate) -> Self {
        Self::Data(UpdatePayload::Indexes(update))
    }

    /// Error notice.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error(ErrorNotice {
            error: error.into(),
        })
    }

    /// Informational notice.
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(MessageNotice {
            message: message.into(),
        })
    }

    /// The market-closed error notice.
    #[must_use]
    pub fn market_closed() -> Self {
        Self::error(MARKET_CLOSED_NOTICE)
    }

    /// Event name label used in metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::Error(_) => "error",
            Self::Message(_) => "message",
        }
    }
}

// =============================================================================
// Port
// =============================================================================

/// Port for delivering events to connected clients.
///
/// Delivery is fire-and-forget: adapters must not block the caller on a
/// slow client.
pub trait TransportPort: Send + Sync {
    /// Send to one connection. Returns `false` if it was not delivered.
    fn emit(&self, connection: ConnectionId, event: ServerEvent) -> bool;

    /// Send to every member of a topic room. Returns the number of
    /// connections it was delivered to.
    fn broadcast(&self, topic: Topic, event: ServerEvent) -> usize;

    /// Add a connection to a topic room.
    fn join(&self, connection: ConnectionId, topic: Topic);

    /// Remove a connection from a topic room.
    fn leave(&self, connection: ConnectionId, topic: Topic);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market_data::OptionContract;
    use rust_decimal::Decimal;
    use serde_json::json;

    #[test]
    fn error_envelope_shape() {
        let json = serde_json::to_value(ServerEvent::error("Missing Symbol")).unwrap();
        assert_eq!(json, json!({"event": "error", "data": {"error": "Missing Symbol"}}));
    }

    #[test]
    fn message_envelope_shape() {
        let json = serde_json::to_value(ServerEvent::message("Subscribed to AAPL")).unwrap();
        assert_eq!(
            json,
            json!({"event": "message", "data": {"message": "Subscribed to AAPL"}})
        );
    }

    #[test]
    fn market_closed_notice_prefix() {
        let json = serde_json::to_value(ServerEvent::market_closed()).unwrap();
        let text = json["data"]["error"].as_str().unwrap();
        assert!(text.starts_with("Stock Market Closed"));
    }

    #[test]
    fn chain_update_is_normalized() {
        let data = OptionChainData {
            info: QuoteInfo::new("AAPL"),
            expiration_dates: vec![NaiveDate::from_ymd_opt(2026, 10, 23).unwrap()],
            calls: vec![
                OptionContract::new("C150", Decimal::new(150, 0))
                    .with_quote(Some(Decimal::new(4, 0)), Some(Decimal::new(5, 0))),
            ],
            puts: vec![OptionContract::new("P155", Decimal::new(155, 0))],
        };

        let update = ChainUpdate::from_chain(data, Some(SubscriptionParams::for_symbol("AAPL")));
        assert_eq!(update.strikes.len(), 2);
        assert_eq!(update.calls.len(), 2);
        assert_eq!(update.puts.len(), 2);
        assert!(update.calls[1].is_placeholder());
        assert!(update.puts[0].is_placeholder());

        let json = serde_json::to_value(ServerEvent::chain(update)).unwrap();
        assert_eq!(json["event"], "data");
        assert_eq!(json["data"]["info"]["symbol"], "AAPL");
        assert_eq!(json["data"]["dates"][0], "2026-10-23");
        assert_eq!(json["data"]["calls"][0]["mark"], json!(4.5));
        assert_eq!(json["data"]["request"]["symbol"], "AAPL");
    }

    #[test]
    fn indexes_update_is_keyed_by_symbol() {
        let update = IndexesUpdate::from_quotes([QuoteInfo::new("SPY"), QuoteInfo::new("DIA")]);
        let json = serde_json::to_value(ServerEvent::indexes(update)).unwrap();

        assert_eq!(json["data"]["SPY"]["symbol"], "SPY");
        assert_eq!(json["data"]["DIA"]["symbol"], "DIA");
    }
}
