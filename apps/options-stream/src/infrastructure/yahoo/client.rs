//! Yahoo Finance HTTP client implementing `MarketDataPort`.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::api_types::{OptionChainResponse, OptionSet, QuoteResponse, date_to_unix};
use crate::application::ports::{MarketDataError, MarketDataPort};
use crate::domain::market_data::{OptionChainData, OptionContract, QuoteInfo};
use crate::infrastructure::config::ProviderSettings;

/// Fallback wait when a 429 carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Quote and option chain client.
#[derive(Debug, Clone)]
pub struct YahooFinanceClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl YahooFinanceClient {
    /// Create a client from provider settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &ProviderSettings) -> Result<Self, MarketDataError> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| MarketDataError::ConnectionError {
                message: e.to_string(),
            })?;

        Ok(Self {
            http_client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        symbol: &str,
    ) -> Result<T, MarketDataError> {
        let response = self
            .http_client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| MarketDataError::ConnectionError {
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(MarketDataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(MarketDataError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::ApiError {
                message: format!("{status}: {body}"),
            });
        }

        response
            .json()
            .await
            .map_err(|e| MarketDataError::ApiError {
                message: format!("Failed to parse response: {e}"),
            })
    }
}

#[async_trait]
impl MarketDataPort for YahooFinanceClient {
    async fn get_quote(&self, symbol: &str) -> Result<QuoteInfo, MarketDataError> {
        let symbol = symbol.to_uppercase();
        self.get_quotes(std::slice::from_ref(&symbol))
            .await?
            .into_iter()
            .find(|quote| quote.symbol.eq_ignore_ascii_case(&symbol))
            .ok_or(MarketDataError::SymbolNotFound { symbol })
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<QuoteInfo>, MarketDataError> {
        if symbols.is_empty() {
            return Ok(vec![]);
        }

        let joined = symbols
            .iter()
            .map(|s| s.to_uppercase())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/v7/finance/quote", self.base_url);
        debug!(symbols = %joined, "Fetching quotes");

        let response: QuoteResponse = self
            .get_json(&url, &[("symbols", joined.clone())], &joined)
            .await?;

        if let Some(error) = response.quote_response.error {
            return Err(MarketDataError::ApiError {
                message: error.to_string(),
            });
        }

        Ok(response.quote_response.result)
    }

    async fn get_option_chain(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
    ) -> Result<OptionChainData, MarketDataError> {
        let symbol = symbol.to_uppercase();
        let url = format!("{}/v7/finance/options/{symbol}", self.base_url);
        let query: Vec<(&str, String)> = expiration
            .map(|date| ("date", date_to_unix(date).to_string()))
            .into_iter()
            .collect();
        debug!(symbol = %symbol, ?expiration, "Fetching option chain");

        let response: OptionChainResponse = self.get_json(&url, &query, &symbol).await?;

        if let Some(error) = response.option_chain.error {
            return Err(MarketDataError::ApiError {
                message: error.to_string(),
            });
        }

        let entry = response
            .option_chain
            .result
            .into_iter()
            .next()
            .ok_or_else(|| MarketDataError::SymbolNotFound {
                symbol: symbol.clone(),
            })?;

        let expiration_dates = entry.expiration_days();
        let info = entry
            .quote
            .unwrap_or_else(|| QuoteInfo::new(entry.underlying_symbol.clone()));
        let OptionSet { calls, puts } = entry.options.into_iter().next().unwrap_or_default();

        Ok(OptionChainData {
            info,
            expiration_dates,
            calls: calls.into_iter().map(OptionContract::from).collect(),
            puts: puts.into_iter().map(OptionContract::from).collect(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> YahooFinanceClient {
        YahooFinanceClient::new(&ProviderSettings {
            base_url: server.uri(),
            timeout: Duration::from_secs(2),
            user_agent: "options-stream-test".to_string(),
        })
        .unwrap()
    }

    fn chain_body() -> serde_json::Value {
        json!({
            "optionChain": {
                "result": [{
                    "underlyingSymbol": "AAPL",
                    "expirationDates": [1_792_713_600_i64, 1_795_132_800_i64],
                    "strikes": [150.0, 155.0],
                    "quote": {
                        "symbol": "AAPL",
                        "shortName": "Apple Inc.",
                        "regularMarketPrice": 152.5,
                        "marketState": "REGULAR"
                    },
                    "options": [{
                        "expirationDate": 1_792_713_600_i64,
                        "calls": [
                            {"contractSymbol": "AAPL261023C00150000", "strike": 150.0, "bid": 3.1, "ask": 3.3, "volume": 120, "openInterest": 900, "impliedVolatility": 0.31, "inTheMoney": true}
                        ],
                        "puts": [
                            {"contractSymbol": "AAPL261023P00155000", "strike": 155.0, "bid": 2.9, "ask": 3.0, "inTheMoney": true}
                        ]
                    }]
                }],
                "error": null
            }
        })
    }

    #[tokio::test]
    async fn option_chain_is_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/options/AAPL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chain_body()))
            .mount(&server)
            .await;

        let chain = client_for(&server)
            .get_option_chain("aapl", None)
            .await
            .unwrap();

        assert_eq!(chain.info.symbol, "AAPL");
        assert_eq!(chain.info.short_name.as_deref(), Some("Apple Inc."));
        assert_eq!(chain.expiration_dates.len(), 2);
        assert_eq!(
            chain.expiration_dates[0],
            NaiveDate::from_ymd_opt(2026, 10, 23).unwrap()
        );
        assert_eq!(chain.calls.len(), 1);
        assert_eq!(chain.calls[0].strike, Decimal::new(150, 0));
        assert_eq!(chain.calls[0].open_interest, Some(900));
        assert_eq!(chain.puts[0].ask, Some(Decimal::new(3, 0)));
    }

    #[tokio::test]
    async fn expiration_is_sent_as_unix_midnight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/options/AAPL"))
            .and(query_param("date", "1795132800"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chain_body()))
            .expect(1)
            .mount(&server)
            .await;

        let expiration = NaiveDate::from_ymd_opt(2026, 11, 20);
        client_for(&server)
            .get_option_chain("AAPL", expiration)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_chain_result_is_symbol_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/options/ZZZZ"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"optionChain": {"result": [], "error": null}})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .get_option_chain("ZZZZ", None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MarketDataError::SymbolNotFound {
                symbol: "ZZZZ".to_string()
            }
        );
    }

    #[tokio::test]
    async fn not_found_status_maps_to_symbol_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/options/NOPE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .get_option_chain("NOPE", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::SymbolNotFound { .. }));
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/quote"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .get_quotes(&["SPY".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err, MarketDataError::RateLimited { retry_after_secs: 7 });
    }

    #[tokio::test]
    async fn server_error_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/quote"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .get_quotes(&["SPY".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, MarketDataError::ApiError { .. }));
    }

    #[tokio::test]
    async fn quotes_are_requested_in_one_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/quote"))
            .and(query_param("symbols", "DIA,QQQ,SPY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "quoteResponse": {
                    "result": [
                        {"symbol": "DIA", "regularMarketPrice": 430.5},
                        {"symbol": "QQQ", "regularMarketPrice": 480.25},
                        {"symbol": "SPY", "regularMarketPrice": 583.5}
                    ],
                    "error": null
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let quotes = client_for(&server)
            .get_quotes(&["dia".to_string(), "QQQ".to_string(), "SPY".to_string()])
            .await
            .unwrap();

        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes[2].regular_market_price, Some(Decimal::new(5_835, 1)));
    }

    #[tokio::test]
    async fn single_quote_missing_is_symbol_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "quoteResponse": {"result": [], "error": null}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).get_quote("zzzz").await.unwrap_err();
        assert_eq!(
            err,
            MarketDataError::SymbolNotFound {
                symbol: "ZZZZ".to_string()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_provider_is_connection_error() {
        let client = YahooFinanceClient::new(&ProviderSettings {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_millis(500),
            user_agent: "options-stream-test".to_string(),
        })
        .unwrap();

        let err = client.get_quotes(&["SPY".to_string()]).await.unwrap_err();
        assert!(matches!(err, MarketDataError::ConnectionError { .. }));
    }
}
