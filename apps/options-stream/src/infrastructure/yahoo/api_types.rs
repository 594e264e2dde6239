//! Yahoo Finance API response types.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::market_data::{OptionContract, QuoteInfo};

/// `GET /v7/finance/quote` envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    /// Response body.
    pub quote_response: QuoteResult,
}

/// Quote result list.
#[derive(Debug, Deserialize)]
pub struct QuoteResult {
    /// Quotes; unknown symbols are simply absent.
    #[serde(default)]
    pub result: Vec<QuoteInfo>,
    /// Upstream error, if any.
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

/// `GET /v7/finance/options/{symbol}` envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionChainResponse {
    /// Response body.
    pub option_chain: OptionChainResult,
}

/// Option chain result list.
#[derive(Debug, Deserialize)]
pub struct OptionChainResult {
    /// At most one entry for the requested underlying.
    #[serde(default)]
    pub result: Vec<OptionChainEntry>,
    /// Upstream error, if any.
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

/// Chain for one underlying.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionChainEntry {
    /// Underlying symbol.
    pub underlying_symbol: String,
    /// Listed expirations, unix seconds at 00:00 UTC.
    #[serde(default)]
    pub expiration_dates: Vec<i64>,
    /// Underlying quote.
    #[serde(default)]
    pub quote: Option<QuoteInfo>,
    /// Contracts for the selected expiration.
    #[serde(default)]
    pub options: Vec<OptionSet>,
}

impl OptionChainEntry {
    /// Listed expirations as calendar dates.
    #[must_use]
    pub fn expiration_days(&self) -> Vec<NaiveDate> {
        self.expiration_dates
            .iter()
            .filter_map(|secs| unix_to_utc(*secs))
            .map(|dt| dt.date_naive())
            .collect()
    }
}

/// Calls and puts of one expiration.
#[derive(Debug, Default, Deserialize)]
pub struct OptionSet {
    /// Call contracts.
    #[serde(default)]
    pub calls: Vec<ApiOptionContract>,
    /// Put contracts.
    #[serde(default)]
    pub puts: Vec<ApiOptionContract>,
}

/// Upstream contract record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiOptionContract {
    /// OCC contract symbol.
    pub contract_symbol: String,
    /// Strike price.
    pub strike: Decimal,
    /// Last traded price.
    #[serde(default)]
    pub last_price: Option<Decimal>,
    /// Absolute change.
    #[serde(default)]
    pub change: Option<Decimal>,
    /// Percent change.
    #[serde(default)]
    pub percent_change: Option<Decimal>,
    /// Contracts traded.
    #[serde(default)]
    pub volume: Option<u64>,
    /// Open interest.
    #[serde(default)]
    pub open_interest: Option<u64>,
    /// Best bid.
    #[serde(default)]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(default)]
    pub ask: Option<Decimal>,
    /// Implied volatility as a fraction.
    #[serde(default)]
    pub implied_volatility: Option<f64>,
    /// In the money.
    #[serde(default)]
    pub in_the_money: bool,
    /// Expiration, unix seconds.
    #[serde(default)]
    pub expiration: Option<i64>,
    /// Last trade time, unix seconds.
    #[serde(default)]
    pub last_trade_date: Option<i64>,
}

impl From<ApiOptionContract> for OptionContract {
    fn from(api: ApiOptionContract) -> Self {
        Self {
            contract_symbol: api.contract_symbol,
            strike: api.strike,
            last_price: api.last_price,
            bid: api.bid,
            ask: api.ask,
            change: api.change,
            percent_change: api.percent_change,
            volume: api.volume,
            open_interest: api.open_interest,
            implied_volatility: api.implied_volatility,
            in_the_money: api.in_the_money,
            expiration: api.expiration.and_then(unix_to_utc),
            last_trade_date: api.last_trade_date.and_then(unix_to_utc),
        }
    }
}

/// Upstream error body.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    /// Error code, e.g. `Not Found`.
    #[serde(default)]
    pub code: Option<String>,
    /// Error description.
    #[serde(default)]
    pub description: Option<String>,
}

impl std::fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.code, &self.description) {
            (Some(code), Some(description)) => write!(f, "{code}: {description}"),
            (Some(text), None) | (None, Some(text)) => f.write_str(text),
            (None, None) => f.write_str("unknown error"),
        }
    }
}

fn unix_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Unix seconds at 00:00 UTC of a date, as upstream keys expirations.
#[must_use]
pub fn date_to_unix(date: NaiveDate) -> i64 {
    date.and_time(chrono::NaiveTime::MIN).and_utc().timestamp()
}
