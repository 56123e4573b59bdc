//! Yahoo Finance quote adapter (v8 chart endpoint, `meta` block only).

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::time::Duration;
use stockval_common::config::YahooConfig;
use tracing::debug;

use super::provider::{DataCapabilities, DataProvider, ProviderError};
use super::symbol::with_exchange_suffix;
use super::MarketData;

const NAME: &str = "yahoo";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    currency: Option<String>,
    regular_market_price: Option<f64>,
    regular_market_volume: Option<f64>,
    #[serde(rename = "trailingPE")]
    trailing_pe: Option<f64>,
}

/// Yahoo Finance adapter. Needs no credentials.
pub struct YahooProvider {
    base_url: String,
    client: reqwest::Client,
}

impl YahooProvider {
    pub fn new(config: &YahooConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent(concat!("stockval/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

fn parse_chart(symbol: &str, body: ChartResponse) -> Result<MarketData, ProviderError> {
    if let Some(err) = body.chart.error {
        return Err(ProviderError::DataNotAvailable(format!(
            "Yahoo: {} {}",
            err.code.unwrap_or_default(),
            err.description.unwrap_or_default()
        )));
    }

    let meta = body
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .map(|r| r.meta)
        .ok_or_else(|| ProviderError::DataNotAvailable(format!("Yahoo 无报价: {symbol}")))?;

    let price = meta
        .regular_market_price
        .ok_or_else(|| ProviderError::DataNotAvailable(format!("Yahoo 报价缺少价格: {symbol}")))?;

    Ok(MarketData {
        source: NAME.to_string(),
        symbol: symbol.to_string(),
        price,
        pe_ratio: meta.trailing_pe,
        volume: meta.regular_market_volume,
        currency: meta.currency,
        fetched_at: Utc::now(),
    })
}

#[async_trait]
impl DataProvider for YahooProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities::quotes_only()
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn fetch_market_data(&self, symbol: &str) -> Result<MarketData, ProviderError> {
        let yahoo_symbol = with_exchange_suffix(symbol, "T");
        let url = format!("{}/v8/finance/chart/{}", self.base_url, yahoo_symbol);
        debug!(symbol = %yahoo_symbol, "Yahoo chart request");

        let response = self
            .client
            .get(&url)
            .query(&[("interval", "1d"), ("range", "1d")])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(NAME, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(NAME, status, &body));
        }

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(NAME, &e))?;

        parse_chart(symbol, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<MarketData, ProviderError> {
        parse_chart("TYO:7203", serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_parse_chart_meta() {
        let data = parse(
            r#"{"chart": {"result": [{"meta": {"currency": "JPY", "symbol": "7203.T",
                "regularMarketPrice": 2850.5, "regularMarketVolume": 1200000}}], "error": null}}"#,
        )
        .unwrap();
        assert_eq!(data.price, 2850.5);
        assert_eq!(data.currency.as_deref(), Some("JPY"));
        assert_eq!(data.symbol, "TYO:7203");
        assert_eq!(data.source, "yahoo");
    }

    #[test]
    fn test_parse_chart_error() {
        let err = parse(
            r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::DataNotAvailable(_)));
        assert!(err.to_string().contains("delisted"));
    }

    #[test]
    fn test_parse_chart_missing_price() {
        assert!(parse(r#"{"chart": {"result": [{"meta": {"currency": "USD"}}], "error": null}}"#).is_err());
    }
}
