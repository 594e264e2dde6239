//! Option Chain Normalization
//!
//! Reconciles the call and put sides of a chain into one strike grid.
//!
//! Providers list calls and puts independently and their strike coverage
//! often differs. Normalization performs a full outer join on strike:
//! - the grid is the union of both sides, deduplicated and ascending
//! - a side missing at a strike gets a zero-filled placeholder row
//! - `mark = (bid + ask) / 2` per side, with an absent bid or ask counted
//!   as zero before averaging
//!
//! The three output sequences are always the same length and index-aligned.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market_data::OptionContract;

// =============================================================================
// Normalized Rows
// =============================================================================

/// One side of a chain row with every numeric field present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedContract {
    /// OCC contract symbol, empty for placeholder rows.
    pub contract_symbol: String,
    /// Strike price.
    #[serde(with = "rust_decimal::serde::float")]
    pub strike: Decimal,
    /// Last traded price.
    #[serde(with = "rust_decimal::serde::float")]
    pub last_price: Decimal,
    /// Best bid.
    #[serde(with = "rust_decimal::serde::float")]
    pub bid: Decimal,
    /// Best ask.
    #[serde(with = "rust_decimal::serde::float")]
    pub ask: Decimal,
    /// Midpoint of bid and ask.
    #[serde(with = "rust_decimal::serde::float")]
    pub mark: Decimal,
    /// Absolute change on the session.
    #[serde(with = "rust_decimal::serde::float")]
    pub change: Decimal,
    /// Percent change on the session.
    #[serde(with = "rust_decimal::serde::float")]
    pub percent_change: Decimal,
    /// Contracts traded.
    pub volume: u64,
    /// Open interest.
    pub open_interest: u64,
    /// Implied volatility.
    pub implied_volatility: f64,
    /// Whether the contract is in the money.
    pub in_the_money: bool,
    /// Contract expiration, if known.
    pub expiration: Option<DateTime<Utc>>,
    /// Time of the last trade, if any.
    pub last_trade_date: Option<DateTime<Utc>>,
}

impl NormalizedContract {
    /// Zero-filled row standing in for a side with no contract at `strike`.
    ///
    /// The strike is kept so every sequence stays positionally aligned;
    /// every other numeric field is zero.
    #[must_use]
    pub const fn placeholder(strike: Decimal) -> Self {
        Self {
            contract_symbol: String::new(),
            strike,
            last_price: Decimal::ZERO,
            bid: Decimal::ZERO,
            ask: Decimal::ZERO,
            mark: Decimal::ZERO,
            change: Decimal::ZERO,
            percent_change: Decimal::ZERO,
            volume: 0,
            open_interest: 0,
            implied_volatility: 0.0,
            in_the_money: false,
            expiration: None,
            last_trade_date: None,
        }
    }

    /// Whether this row was synthesized rather than listed by the provider.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.contract_symbol.is_empty()
    }
}

impl From<&OptionContract> for NormalizedContract {
    fn from(contract: &OptionContract) -> Self {
        Self {
            contract_symbol: contract.contract_symbol.clone(),
            strike: contract.strike,
            last_price: contract.last_price.unwrap_or_default(),
            bid: contract.bid.unwrap_or_default(),
            ask: contract.ask.unwrap_or_default(),
            mark: mark_price(contract.bid, contract.ask),
            change: contract.change.unwrap_or_default(),
            percent_change: contract.percent_change.unwrap_or_default(),
            volume: contract.volume.unwrap_or_default(),
            open_interest: contract.open_interest.unwrap_or_default(),
            implied_volatility: contract
                .implied_volatility
                .filter(|iv| iv.is_finite())
                .unwrap_or_default(),
            in_the_money: contract.in_the_money,
            expiration: contract.expiration,
            last_trade_date: contract.last_trade_date,
        }
    }
}

/// Strike grid entry, serialized as `{"strike": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StrikeLevel {
    /// Strike price.
    #[serde(with = "rust_decimal::serde::float")]
    pub strike: Decimal,
}

/// Midpoint of bid and ask; an absent side counts as zero.
///
/// Never panics: when `bid + ask` overflows the halves are added instead,
/// saturating at the `Decimal` bounds.
#[must_use]
pub fn mark_price(bid: Option<Decimal>, ask: Option<Decimal>) -> Decimal {
    let bid = bid.unwrap_or_default();
    let ask = ask.unwrap_or_default();
    bid.checked_add(ask).map_or_else(
        || (bid / Decimal::TWO).saturating_add(ask / Decimal::TWO),
        |sum| sum / Decimal::TWO,
    )
}

// =============================================================================
// Snapshot
// =============================================================================

/// Strike-aligned option chain.
///
/// Constructed only through [`normalize`], which guarantees
/// `strikes.len() == calls.len() == puts.len()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionChainSnapshot {
    strikes: Vec<StrikeLevel>,
    calls: Vec<NormalizedContract>,
    puts: Vec<NormalizedContract>,
}

/// One aligned row of a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ChainRow<'a> {
    /// Strike of the row.
    pub strike: Decimal,
    /// Call side (possibly a placeholder).
    pub call: &'a NormalizedContract,
    /// Put side (possibly a placeholder).
    pub put: &'a NormalizedContract,
}

impl OptionChainSnapshot {
    /// Ascending strike grid.
    #[must_use]
    pub fn strikes(&self) -> &[StrikeLevel] {
        &self.strikes
    }

    /// Call side, aligned with `strikes`.
    #[must_use]
    pub fn calls(&self) -> &[NormalizedContract] {
        &self.calls
    }

    /// Put side, aligned with `strikes`.
    #[must_use]
    pub fn puts(&self) -> &[NormalizedContract] {
        &self.puts
    }

    /// Number of strikes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strikes.len()
    }

    /// Whether the chain has no strikes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }

    /// Iterate aligned rows.
    pub fn rows(&self) -> impl Iterator<Item = ChainRow<'_>> {
        self.strikes
            .iter()
            .zip(self.calls.iter().zip(self.puts.iter()))
            .map(|(level, (call, put))| ChainRow {
                strike: level.strike,
                call,
                put,
            })
    }

    /// Split into `(strikes, calls, puts)`.
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        Vec<StrikeLevel>,
        Vec<NormalizedContract>,
        Vec<NormalizedContract>,
    ) {
        (self.strikes, self.calls, self.puts)
    }
}

/// Join calls and puts on strike into an aligned snapshot.
///
/// Never fails: missing quotes become zero and missing sides become
/// placeholder rows. When one side lists the same strike twice the first
/// row wins.
#[must_use]
pub fn normalize(calls: &[OptionContract], puts: &[OptionContract]) -> OptionChainSnapshot {
    let call_side = index_by_strike(calls);
    let put_side = index_by_strike(puts);

    let mut grid: Vec<Decimal> = call_side.keys().chain(put_side.keys()).copied().collect();
    grid.sort_unstable();
    grid.dedup();

    let mut snapshot = OptionChainSnapshot {
        strikes: Vec::with_capacity(grid.len()),
        calls: Vec::with_capacity(grid.len()),
        puts: Vec::with_capacity(grid.len()),
    };

    for strike in grid {
        snapshot.strikes.push(StrikeLevel { strike });
        snapshot.calls.push(
            call_side
                .get(&strike)
                .map_or_else(|| NormalizedContract::placeholder(strike), |c| (*c).into()),
        );
        snapshot.puts.push(
            put_side
                .get(&strike)
                .map_or_else(|| NormalizedContract::placeholder(strike), |p| (*p).into()),
        );
    }

    snapshot
}

/// Index one side by normalized strike, keeping the first row per strike.
fn index_by_strike(contracts: &[OptionContract]) -> BTreeMap<Decimal, &OptionContract> {
    let mut side = BTreeMap::new();
    for contract in contracts {
        side.entry(contract.strike.normalize()).or_insert(contract);
    }
    side
}

// =============================================================================
// Tests
// =============================================================================
