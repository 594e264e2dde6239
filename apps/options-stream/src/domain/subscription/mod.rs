//! Subscription Types
//!
//! Domain types describing who is subscribed to what: connection identity,
//! topics, client-supplied parameters and their validated form, and the
//! registry key that identifies one live subscription.
//!
//! # Design
//!
//! A subscription is keyed by `(owner, topic)`. Single-symbol chains are
//! owned by the connection that asked for them. The indexes feed carries no
//! per-client parameters, so one shared worker serves every connection that
//! joined the indexes audience:
//! - `TopicAudience` counts members the way upstream symbols are
//!   reference counted, reporting when the first member joins and the last
//!   one leaves

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identity
// =============================================================================

/// Unique identifier for one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random connection id.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Monotonic identifier for one installed worker generation.
pub type SubscriptionId = u64;

/// Subscription category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Shared feed of index ETF quotes.
    Indexes,
    /// Option chain for one symbol, per connection.
    SingleSymbol,
}

impl Topic {
    /// All topics.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Indexes, Self::SingleSymbol]
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Indexes => "indexes",
            Self::SingleSymbol => "single_symbol",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who owns a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionOwner {
    /// A single client connection.
    Connection(ConnectionId),
    /// The shared worker of a broadcast topic.
    Shared,
}

/// Registry key: at most one live worker exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    /// Owner of the worker.
    pub owner: SubscriptionOwner,
    /// Topic the worker serves.
    pub topic: Topic,
}

impl SubscriptionKey {
    /// Key for a worker owned by one connection.
    #[must_use]
    pub const fn connection(connection: ConnectionId, topic: Topic) -> Self {
        Self {
            owner: SubscriptionOwner::Connection(connection),
            topic,
        }
    }

    /// Key for the shared worker of a broadcast topic.
    #[must_use]
    pub const fn shared(topic: Topic) -> Self {
        Self {
            owner: SubscriptionOwner::Shared,
            topic,
        }
    }

    /// Whether this key belongs to the given connection.
    #[must_use]
    pub fn is_owned_by(&self, connection: ConnectionId) -> bool {
        self.owner == SubscriptionOwner::Connection(connection)
    }

    /// Connection that owns this key, if any.
    #[must_use]
    pub const fn connection_id(&self) -> Option<ConnectionId> {
        match self.owner {
            SubscriptionOwner::Connection(id) => Some(id),
            SubscriptionOwner::Shared => None,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner {
            SubscriptionOwner::Connection(id) => write!(f, "{id}/{}", self.topic),
            SubscriptionOwner::Shared => write!(f, "shared/{}", self.topic),
        }
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// Parameters as sent by the client on `subscribe` / `update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionParams {
    /// Underlying symbol (required for single-symbol chains).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Expiration date, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    /// Display hint: price the client centers its strike window on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub near_price: Option<f64>,
    /// Display hint: number of strikes the client shows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_strikes: Option<u32>,
}

impl SubscriptionParams {
    /// Parameters for a symbol with no expiration or hints.
    #[must_use]
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            ..Self::default()
        }
    }

    /// Validate into a chain request.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when the symbol is missing or blank, or the
    /// expiration date is not a `YYYY-MM-DD` calendar date.
    pub fn to_chain_request(&self) -> Result<ChainRequest, ValidationError> {
        let symbol = self
            .symbol
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingSymbol)?
            .to_uppercase();

        let expiration = match self.expiration_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| ValidationError::InvalidExpiration(raw.to_string()))?,
            ),
        };

        Ok(ChainRequest {
            symbol,
            expiration,
            near_price: self.near_price,
            total_strikes: self.total_strikes,
        })
    }
}

/// Validated single-symbol request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRequest {
    /// Upper-cased underlying symbol.
    pub symbol: String,
    /// Requested expiration; provider default (nearest) when absent.
    pub expiration: Option<NaiveDate>,
    /// Display hint, echoed back.
    pub near_price: Option<f64>,
    /// Display hint, echoed back.
    pub total_strikes: Option<u32>,
}

/// Client parameter validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// `symbol` absent or blank.
    #[error("Missing Symbol")]
    MissingSymbol,
    /// `expirationDate` not parseable.
    #[error("Invalid expirationDate: {0}")]
    InvalidExpiration(String),
}

// =============================================================================
// Topic Audience
// =============================================================================

/// Members of a broadcast topic, tracked so the shared worker runs only
/// while someone is listening.
#[derive(Debug, Default)]
pub struct TopicAudience {
    members: HashSet<ConnectionId>,
}

impl TopicAudience {
    /// Add a member.
    ///
    /// Returns `true` if this is the first member (count went 0→1).
    pub fn join(&mut self, connection: ConnectionId) -> bool {
        self.members.insert(connection) && self.members.len() == 1
    }

    /// Remove a member.
    ///
    /// Returns `true` if the last member left (count went 1→0). Removing a
    /// connection that never joined returns `false`.
    pub fn leave(&mut self, connection: ConnectionId) -> bool {
        self.members.remove(&connection) && self.members.is_empty()
    }

    /// Whether the connection is a member.
    #[must_use]
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.members.contains(&connection)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
