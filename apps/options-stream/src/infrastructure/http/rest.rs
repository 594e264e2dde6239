//! REST snapshot handlers.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::AppState;
use crate::application::ports::{ChainUpdate, IndexesUpdate, MARKET_CLOSED_NOTICE, MarketDataError};
use crate::domain::subscription::SubscriptionParams;

/// JSON error response `{"error": ...}`.
#[derive(Debug)]
pub(super) struct RestError {
    status: StatusCode,
    message: String,
}

impl RestError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn market_closed() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: MARKET_CLOSED_NOTICE.to_string(),
        }
    }
}

impl From<MarketDataError> for RestError {
    fn from(e: MarketDataError) -> Self {
        warn!(error = %e, "Snapshot request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

fn check_gate(state: &AppState) -> Result<(), RestError> {
    if state.rest_market_gate && !state.dispatcher.market_is_open() {
        return Err(RestError::market_closed());
    }
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

pub(super) async fn index_handler() -> &'static str {
    "Options Project API"
}

#[derive(Debug, Deserialize)]
pub(super) struct StockDataQuery {
    symbol: Option<String>,
    #[serde(rename = "expirationDate")]
    expiration_date: Option<String>,
}

pub(super) async fn stock_data_handler(
    State(state): State<AppState>,
    Query(query): Query<StockDataQuery>,
) -> Result<Json<ChainUpdate>, RestError> {
    check_gate(&state)?;

    let params = SubscriptionParams {
        symbol: query.symbol,
        expiration_date: query.expiration_date,
        ..SubscriptionParams::default()
    };
    let request = params
        .to_chain_request()
        .map_err(|e| RestError::bad_request(e.to_string()))?;

    let chain = state
        .provider
        .get_option_chain(&request.symbol, request.expiration)
        .await?;

    Ok(Json(ChainUpdate::from_chain(chain, None)))
}

pub(super) async fn indexes_data_handler(
    State(state): State<AppState>,
) -> Result<Json<IndexesUpdate>, RestError> {
    check_gate(&state)?;

    let quotes = state.provider.get_quotes(&state.index_symbols).await?;
    Ok(Json(IndexesUpdate::from_quotes(quotes)))
}

#[derive(Debug, Deserialize)]
pub(super) struct WatchListQuery {
    watch_list: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WatchListResponse {
    watch_list: IndexesUpdate,
}

pub(super) async fn watch_list_handler(
    State(state): State<AppState>,
    Query(query): Query<WatchListQuery>,
) -> Result<Json<WatchListResponse>, RestError> {
    check_gate(&state)?;

    let symbols: Vec<String> = query
        .watch_list
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_uppercase)
        .collect();
    if symbols.is_empty() {
        return Err(RestError::bad_request("Missing watch_list"));
    }

    let quotes = state.provider.get_quotes(&symbols).await?;
    Ok(Json(WatchListResponse {
        watch_list: IndexesUpdate::from_quotes(quotes),
    }))
}
