//! Market Data Port (Driven Port)
//!
//! Interface to the upstream quote and option chain provider.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::domain::market_data::{OptionChainData, QuoteInfo};

/// Market data provider error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketDataError {
    /// Transport failure reaching the provider.
    #[error("Market data connection error: {message}")]
    ConnectionError {
        /// Error details.
        message: String,
    },

    /// The provider does not know the symbol.
    #[error("Symbol not found: {symbol}")]
    SymbolNotFound {
        /// The unknown symbol.
        symbol: String,
    },

    /// The provider returned no data for a known symbol.
    #[error("Market data unavailable: {message}")]
    DataUnavailable {
        /// Error details.
        message: String,
    },

    /// Too many requests.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Unexpected status or malformed payload.
    #[error("Market data API error: {message}")]
    ApiError {
        /// Error details.
        message: String,
    },
}

impl MarketDataError {
    /// Label used in metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionError { .. } => "connection",
            Self::SymbolNotFound { .. } => "symbol_not_found",
            Self::DataUnavailable { .. } => "data_unavailable",
            Self::RateLimited { .. } => "rate_limited",
            Self::ApiError { .. } => "api",
        }
    }
}

/// Port for fetching quotes and option chains.
///
/// Implementations must be safe to call concurrently from many pollers.
#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Quote and info for one symbol.
    async fn get_quote(&self, symbol: &str) -> Result<QuoteInfo, MarketDataError>;

    /// Quotes for several symbols in one request.
    ///
    /// Symbols the provider does not know are omitted from the result.
    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteInfo>, MarketDataError>;

    /// Quote, expiration list and chain for one expiration.
    ///
    /// `None` selects the nearest expiration.
    async fn get_option_chain(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
    ) -> Result<OptionChainData, MarketDataError>;
}
