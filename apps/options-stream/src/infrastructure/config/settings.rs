//! Service Configuration Settings
//!
//! Configuration types for the options stream, loaded from environment
//! variables. Everything has a default; malformed market-hours values are
//! rejected at startup rather than silently replaced.

use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Weekday};
use chrono_tz::Tz;

use crate::application::services::{DEFAULT_POLL_INTERVAL, DispatcherConfig};
use crate::domain::market_hours::{DEFAULT_TIMEZONE, MarketHoursWindow};

/// Server port and origin settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// HTTP + WebSocket port.
    pub port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Public site URL, always an allowed origin when set.
    pub site_url: Option<String>,
    /// Allowed browser origins; empty allows any.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            health_port: 8082,
            site_url: None,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerSettings {
    /// Allowed origins including the site URL, deduplicated.
    #[must_use]
    pub fn origins(&self) -> Vec<String> {
        let mut origins = self.allowed_origins.clone();
        if let Some(site) = &self.site_url
            && !origins.contains(site)
        {
            origins.push(site.clone());
        }
        origins
    }
}

/// Polling and fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingSettings {
    /// Wait between provider calls.
    pub poll_interval: Duration,
    /// Per-connection outbound buffer, in events.
    pub outbound_capacity: usize,
    /// Symbols served on the indexes topic.
    pub index_symbols: Vec<String>,
    /// Reject REST data requests while the market is closed.
    pub rest_market_gate: bool,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            outbound_capacity: 256,
            index_symbols: DispatcherConfig::default().index_symbols,
            rest_market_gate: false,
        }
    }
}

impl PollingSettings {
    /// Dispatcher view of these settings.
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: self.poll_interval,
            index_symbols: self.index_symbols.clone(),
        }
    }
}

/// Upstream provider settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Base URL of the quote/options API.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent sent upstream.
    pub user_agent: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://query2.finance.yahoo.com".to_string(),
            timeout: Duration::from_secs(10),
            user_agent: concat!("options-stream/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Polling settings.
    pub polling: PollingSettings,
    /// Market hours window.
    pub market_hours: MarketHoursWindow,
    /// Provider settings.
    pub provider: ProviderSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a market-hours variable is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a market-hours variable is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup(&lookup);
        let defaults = Self::default();

        let server = ServerSettings {
            port: env.parse_or("PORT", defaults.server.port),
            health_port: env.parse_or("HEALTH_PORT", defaults.server.health_port),
            site_url: env.non_empty("SITE_URL"),
            allowed_origins: env.list("ALLOWED_ORIGINS").unwrap_or_default(),
        };

        let polling = PollingSettings {
            poll_interval: env
                .parse::<u64>("POLL_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map_or(defaults.polling.poll_interval, Duration::from_secs),
            outbound_capacity: env
                .parse::<usize>("OUTBOUND_CAPACITY")
                .filter(|cap| *cap > 0)
                .unwrap_or(defaults.polling.outbound_capacity),
            index_symbols: env
                .list("INDEX_SYMBOLS")
                .map(|symbols| symbols.iter().map(|s| s.to_uppercase()).collect())
                .unwrap_or(defaults.polling.index_symbols),
            rest_market_gate: env
                .non_empty("REST_MARKET_GATE")
                .map_or(defaults.polling.rest_market_gate, |v| parse_bool(&v)),
        };

        let market_hours = market_hours_from(&env)?;

        let provider = ProviderSettings {
            base_url: env
                .non_empty("PROVIDER_BASE_URL")
                .map_or(defaults.provider.base_url, |url| {
                    url.trim_end_matches('/').to_string()
                }),
            timeout: env
                .parse::<u64>("PROVIDER_TIMEOUT_SECS")
                .map_or(defaults.provider.timeout, Duration::from_secs),
            user_agent: env
                .non_empty("PROVIDER_USER_AGENT")
                .unwrap_or(defaults.provider.user_agent),
        };

        Ok(Self {
            server,
            polling,
            market_hours,
            provider,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable holds a value that cannot be parsed.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Parsing Helpers
// =============================================================================

struct Lookup<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn non_empty(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.non_empty(key).and_then(|v| v.parse().ok())
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.parse(key).unwrap_or(default)
    }

    /// Comma-separated list; `None` when unset or blank.
    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.non_empty(key).map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(ToString::to_string)
                .collect()
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_time(key: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| ConfigError::invalid(key, value, e.to_string()))
}

fn market_hours_from<F: Fn(&str) -> Option<String>>(
    env: &Lookup<'_, F>,
) -> Result<MarketHoursWindow, ConfigError> {
    let mut window = MarketHoursWindow::default();

    let timezone = match env.non_empty("MARKET_TIMEZONE") {
        Some(raw) => raw
            .parse::<Tz>()
            .map_err(|e| ConfigError::invalid("MARKET_TIMEZONE", &raw, e.to_string()))?,
        None => DEFAULT_TIMEZONE,
    };
    window = window.with_timezone(timezone);

    let open = match env.non_empty("MARKET_OPEN") {
        Some(raw) => parse_time("MARKET_OPEN", &raw)?,
        None => window.open(),
    };
    let close = match env.non_empty("MARKET_CLOSE") {
        Some(raw) => parse_time("MARKET_CLOSE", &raw)?,
        None => window.close(),
    };
    if open >= close {
        return Err(ConfigError::invalid(
            "MARKET_CLOSE",
            &close.to_string(),
            "must be after MARKET_OPEN",
        ));
    }
    window = window.with_session(open, close);

    if let Some(days) = env.list("MARKET_DAYS") {
        let parsed = days
            .iter()
            .map(|day| {
                day.parse::<Weekday>()
                    .map_err(|_| ConfigError::invalid("MARKET_DAYS", day, "unknown weekday"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        window = window.with_trading_days(parsed);
    }

    if let Some(holidays) = env.list("MARKET_HOLIDAYS") {
        let parsed = holidays
            .iter()
            .map(|day| {
                NaiveDate::parse_from_str(day, "%Y-%m-%d")
                    .map_err(|e| ConfigError::invalid("MARKET_HOLIDAYS", day, e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        window = window.with_holidays(parsed);
    }

    Ok(window)
}
