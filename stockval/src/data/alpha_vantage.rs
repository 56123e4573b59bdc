//! Alpha Vantage quote adapter (`GLOBAL_QUOTE`).
//!
//! Quotes only. The free tier answers throttled calls with HTTP 200 and a
//! `Note` or `Information` field, which is mapped to a rate-limit error.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use stockval_common::config::AlphaVantageConfig;
use tracing::debug;

use super::provider::{DataCapabilities, DataProvider, ProviderError};
use super::symbol::with_exchange_suffix;
use super::MarketData;

const NAME: &str = "alpha_vantage";

#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<HashMap<String, String>>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
}

/// Alpha Vantage adapter
pub struct AlphaVantageProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AlphaVantageProvider {
    pub fn new(config: &AlphaVantageConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            client,
        }
    }
}

fn parse_quote(symbol: &str, body: GlobalQuoteResponse) -> Result<MarketData, ProviderError> {
    if let Some(message) = body.error_message {
        return Err(ProviderError::DataNotAvailable(format!(
            "Alpha Vantage API 错误: {message}"
        )));
    }
    if body.note.is_some() || body.information.is_some() {
        return Err(ProviderError::RateLimited {
            retry_after_secs: None,
        });
    }

    let quote = body
        .global_quote
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ProviderError::DataNotAvailable(format!("Alpha Vantage 无报价: {symbol}")))?;

    let price = quote
        .get("05. price")
        .and_then(|p| p.trim().parse::<f64>().ok())
        .ok_or_else(|| ProviderError::InvalidData(format!("Alpha Vantage 价格字段无效: {symbol}")))?;
    let volume = quote
        .get("06. volume")
        .and_then(|v| v.trim().parse::<f64>().ok());

    Ok(MarketData {
        source: NAME.to_string(),
        symbol: symbol.to_string(),
        price,
        // GLOBAL_QUOTE carries no PE
        pe_ratio: None,
        volume,
        currency: None,
        fetched_at: Utc::now(),
    })
}

#[async_trait]
impl DataProvider for AlphaVantageProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities::quotes_only()
    }

    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    async fn fetch_market_data(&self, symbol: &str) -> Result<MarketData, ProviderError> {
        let av_symbol = with_exchange_suffix(symbol, "TYO");
        debug!(symbol = %av_symbol, "Alpha Vantage GLOBAL_QUOTE");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", av_symbol.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(NAME, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(NAME, status, &body));
        }

        let body: GlobalQuoteResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(NAME, &e))?;

        parse_quote(symbol, body)
    }
}
