//! Yahoo Finance Adapter
//!
//! REST implementation of `MarketDataPort`. Quotes come from
//! `/v7/finance/quote`, chains from `/v7/finance/options/{symbol}` with the
//! expiration passed as unix seconds at 00:00 UTC.

pub mod api_types;
mod client;

pub use client::YahooFinanceClient;
