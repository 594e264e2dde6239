//! Market Data Records
//!
//! Provider-agnostic quote and option contract records. These are the
//! canonical internal representation handed over by the market data
//! provider adapter; field names follow the camelCase shape clients already
//! consume.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Quote and descriptive info for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteInfo {
    /// Ticker symbol.
    pub symbol: String,
    /// Short display name.
    #[serde(default)]
    pub short_name: Option<String>,
    /// Long display name.
    #[serde(default)]
    pub long_name: Option<String>,
    /// Quote currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Exchange session state as reported upstream (REGULAR, CLOSED, ...).
    #[serde(default)]
    pub market_state: Option<String>,
    /// Last regular-session price.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub regular_market_price: Option<Decimal>,
    /// Absolute change on the session.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub regular_market_change: Option<Decimal>,
    /// Percent change on the session.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub regular_market_change_percent: Option<Decimal>,
    /// Previous session close.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub regular_market_previous_close: Option<Decimal>,
    /// Session open.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub regular_market_open: Option<Decimal>,
    /// Session high.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub regular_market_day_high: Option<Decimal>,
    /// Session low.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub regular_market_day_low: Option<Decimal>,
    /// Session volume.
    #[serde(default)]
    pub regular_market_volume: Option<u64>,
    /// Best bid.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub ask: Option<Decimal>,
}

impl QuoteInfo {
    /// Bare record carrying only a symbol.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Self::default()
        }
    }

    /// Set the regular-session price.
    #[must_use]
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.regular_market_price = Some(price);
        self
    }
}

/// One call or put contract as returned by the provider.
///
/// Any numeric field may be missing upstream; normalization decides how
/// absent values are filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionContract {
    /// OCC contract symbol.
    pub contract_symbol: String,
    /// Strike price.
    #[serde(with = "rust_decimal::serde::float")]
    pub strike: Decimal,
    /// Last traded price.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub last_price: Option<Decimal>,
    /// Best bid.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub ask: Option<Decimal>,
    /// Absolute change on the session.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub change: Option<Decimal>,
    /// Percent change on the session.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub percent_change: Option<Decimal>,
    /// Contracts traded.
    #[serde(default)]
    pub volume: Option<u64>,
    /// Open interest.
    #[serde(default)]
    pub open_interest: Option<u64>,
    /// Implied volatility (fraction, not percent).
    #[serde(default)]
    pub implied_volatility: Option<f64>,
    /// Whether the contract is in the money.
    #[serde(default)]
    pub in_the_money: bool,
    /// Contract expiration.
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    /// Time of the last trade.
    #[serde(default)]
    pub last_trade_date: Option<DateTime<Utc>>,
}

impl OptionContract {
    /// Contract with only a symbol and strike; every market field absent.
    #[must_use]
    pub fn new(contract_symbol: impl Into<String>, strike: Decimal) -> Self {
        Self {
            contract_symbol: contract_symbol.into(),
            strike,
            last_price: None,
            bid: None,
            ask: None,
            change: None,
            percent_change: None,
            volume: None,
            open_interest: None,
            implied_volatility: None,
            in_the_money: false,
            expiration: None,
            last_trade_date: None,
        }
    }

    /// Set bid and ask.
    #[must_use]
    pub fn with_quote(mut self, bid: Option<Decimal>, ask: Option<Decimal>) -> Self {
        self.bid = bid;
        self.ask = ask;
        self
    }
}

/// Quote plus option chain for one underlying and one expiration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChainData {
    /// Underlying quote.
    pub info: QuoteInfo,
    /// Every expiration the provider lists for the underlying.
    pub expiration_dates: Vec<NaiveDate>,
    /// Call contracts for the selected expiration.
    pub calls: Vec<OptionContract>,
    /// Put contracts for the selected expiration.
    pub puts: Vec<OptionContract>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_info_serializes_numbers_as_json_numbers() {
        let info = QuoteInfo::new("SPY").with_price(Decimal::new(5_835, 1));
        let json = serde_json::to_value(&info).unwrap();

        assert_eq!(json["symbol"], "SPY");
        assert_eq!(json["regularMarketPrice"], serde_json::json!(583.5));
        assert!(json["bid"].is_null());
    }

    #[test]
    fn contract_builder_leaves_market_fields_absent() {
        let contract = OptionContract::new("AAPL261120C00150000", Decimal::new(150, 0))
            .with_quote(Some(Decimal::new(505, 2)), None);

        assert_eq!(contract.bid, Some(Decimal::new(505, 2)));
        assert_eq!(contract.ask, None);
        assert_eq!(contract.volume, None);
        assert!(!contract.in_the_money);
    }
}
