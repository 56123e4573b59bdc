//! Financial Modeling Prep adapter.
//!
//! # Endpoints
//! - `stock/full/real-time-price/{symbol}`: last price (`fmpLast`)
//! - `ratios-ttm/{symbol}`: trailing PE (`priceEarningsRatioTTM`)
//! - `cash-flow-statement/{symbol}?period=`: free cash flow
//! - `income-statement/{symbol}?period=`: EPS, revenue, net income, currency, date
//! - `profile/{symbol}`: market cap and price (shares = mktCap / price)

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use stockval_common::config::{FmpConfig, ReportingPeriod};
use tracing::{debug, error, warn};

use super::provider::{DataCapabilities, DataProvider, ProviderError};
use super::retry::RetryPolicy;
use super::{Financials, MarketData};

const NAME: &str = "fmp";

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct RealTimePrice {
    #[serde(rename = "fmpLast")]
    fmp_last: Option<f64>,
    #[serde(rename = "lastSalePrice")]
    last_sale_price: Option<f64>,
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RatiosTtm {
    #[serde(rename = "priceEarningsRatioTTM")]
    pe_ratio_ttm: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CashFlowStatement {
    #[serde(rename = "freeCashFlow")]
    free_cash_flow: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct IncomeStatement {
    date: Option<String>,
    #[serde(rename = "reportedCurrency")]
    reported_currency: Option<String>,
    eps: Option<f64>,
    revenue: Option<f64>,
    #[serde(rename = "netIncome")]
    net_income: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    price: Option<f64>,
    #[serde(rename = "mktCap")]
    market_cap: Option<f64>,
    currency: Option<String>,
}

// ============================================================================
// Provider
// ============================================================================

/// FMP REST adapter
pub struct FmpProvider {
    api_key: String,
    base_url: String,
    period: ReportingPeriod,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl FmpProvider {
    /// Create from the `fmp` config section
    pub fn new(config: &FmpConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            period: config.period,
            client,
            retry: RetryPolicy::fmp_http(),
        }
    }

    /// Override the per-request retry schedule
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn masked_url(&self, path: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!("{}/{}?apikey=HIDE", self.base_url, path);
        for (k, v) in params {
            url.push_str(&format!("&{k}={v}"));
        }
        url
    }

    /// GET an endpoint that returns a JSON list, retrying transient failures.
    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>, ProviderError> {
        self.retry
            .run(
                path,
                |_| self.get_once(path, params),
                ProviderError::is_recoverable,
            )
            .await
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %self.masked_url(path, params), "FMP request");

        let response = self
            .client
            .get(&url)
            .query(&[("apikey", self.api_key.as_str())])
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(NAME, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::from_reqwest(NAME, &e))?;

        if status == reqwest::StatusCode::FORBIDDEN {
            error!("FMP API 认证失败: API密钥可能无效或已过期");
        }
        if !status.is_success() {
            error!(status = status.as_u16(), body = %body.chars().take(200).collect::<String>(), "FMP API请求失败");
            return Err(ProviderError::from_status(NAME, status, &body));
        }

        parse_list(path, &body)
    }
}

/// Decode an FMP body: a list, a single object, or an `Error Message` object.
fn parse_list<T: DeserializeOwned>(path: &str, body: &str) -> Result<Vec<T>, ProviderError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidData(format!("无效的API响应格式: {e}")))?;

    if let Some(message) = value.get("Error Message").and_then(Value::as_str) {
        let lower = message.to_ascii_lowercase();
        return Err(if lower.contains("api key") || lower.contains("apikey") {
            ProviderError::Auth(format!("API返回错误: {message}"))
        } else {
            ProviderError::Internal(format!("API返回错误: {message}"))
        });
    }

    let items = match value {
        Value::Array(items) => items,
        Value::Object(_) => vec![value],
        Value::Null => {
            return Err(ProviderError::DataNotAvailable(format!(
                "API返回空数据: {path}"
            )))
        }
        other => {
            return Err(ProviderError::InvalidData(format!(
                "意外的响应类型: {other}"
            )))
        }
    };

    if items.is_empty() {
        warn!(path, "API返回空列表，可能没有找到数据");
    }
    debug!(path, items = items.len(), "成功获取数据");

    items
        .into_iter()
        .map(|item| {
            serde_json::from_value(item)
                .map_err(|e| ProviderError::InvalidData(format!("{path} 字段解析失败: {e}")))
        })
        .collect()
}

fn first<T>(items: Vec<T>, what: &str, symbol: &str) -> Result<T, ProviderError> {
    items
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::DataNotAvailable(format!("{what} 无数据: {symbol}")))
}

#[async_trait]
impl DataProvider for FmpProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn capabilities(&self) -> DataCapabilities {
        DataCapabilities::full()
    }

    fn is_available(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn retries_internally(&self) -> bool {
        self.retry.max_retries > 0
    }

    async fn fetch_market_data(&self, symbol: &str) -> Result<MarketData, ProviderError> {
        let price_path = format!("stock/full/real-time-price/{symbol}");
        let ratio_path = format!("ratios-ttm/{symbol}");

        let (prices, ratios) = tokio::try_join!(
            self.get_list::<RealTimePrice>(&price_path, &[]),
            self.get_list::<RatiosTtm>(&ratio_path, &[]),
        )?;

        let quote = first(prices, "实时报价", symbol)?;
        let price = quote
            .fmp_last
            .or(quote.last_sale_price)
            .ok_or_else(|| ProviderError::DataNotAvailable(format!("实时报价缺少价格: {symbol}")))?;
        let pe_ratio = ratios.into_iter().next().and_then(|r| r.pe_ratio_ttm);

        let data = MarketData {
            source: NAME.to_string(),
            symbol: symbol.to_string(),
            price,
            pe_ratio,
            volume: quote.volume,
            currency: None,
            fetched_at: Utc::now(),
        };
        debug!(symbol, price, pe_ratio = ?pe_ratio, "市场数据");
        Ok(data)
    }

    async fn fetch_financials(&self, symbol: &str) -> Result<Financials, ProviderError> {
        let period = [("period", self.period.as_str())];
        let cash_flow_path = format!("cash-flow-statement/{symbol}");
        let income_path = format!("income-statement/{symbol}");
        let profile_path = format!("profile/{symbol}");

        let (cash_flows, incomes, profiles) = tokio::try_join!(
            self.get_list::<CashFlowStatement>(&cash_flow_path, &period),
            self.get_list::<IncomeStatement>(&income_path, &period),
            self.get_list::<Profile>(&profile_path, &[]),
        )?;

        let cash_flow = first(cash_flows, "现金流量表", symbol)?;
        let income = first(incomes, "利润表", symbol)?;
        let profile = first(profiles, "公司概况", symbol)?;

        let price = profile.price.unwrap_or(0.0);
        let market_cap = profile.market_cap.unwrap_or(0.0);
        let shares_outstanding = if price > 0.0 { market_cap / price } else { 0.0 };
        let currency = income
            .reported_currency
            .or(profile.currency)
            .unwrap_or_else(|| "USD".to_string());

        let data = Financials {
            source: NAME.to_string(),
            symbol: symbol.to_string(),
            market_cap,
            currency,
            eps: income.eps.unwrap_or(0.0),
            shares_outstanding,
            revenue: income.revenue.unwrap_or(0.0),
            free_cash_flow: cash_flow.free_cash_flow.unwrap_or(0.0),
            net_income: income.net_income.unwrap_or(0.0),
            report_date: income.date,
        };
        debug!(
            symbol,
            period = %self.period,
            eps = data.eps,
            free_cash_flow = data.free_cash_flow,
            shares = data.shares_outstanding,
            "财务数据"
        );
        Ok(data)
    }
}
