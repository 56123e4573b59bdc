//! Market and financial data acquisition.
//!
//! Providers (FMP, Alpha Vantage, Yahoo) implement [`DataProvider`]; the
//! [`DataService`] router tries them in configured priority order with
//! retry, caching, health tracking and failover.

mod alpha_vantage;
mod cache;
mod fmp;
mod health;
mod provider;
mod retry;
mod router;
pub mod symbol;
mod yahoo;

pub use alpha_vantage::AlphaVantageProvider;
pub use cache::{CacheStats, DataCache};
pub use fmp::FmpProvider;
pub use health::{HealthMonitor, HealthMonitorConfig, ProviderHealth};
pub use provider::{DataCapabilities, DataKind, DataProvider, ProviderError};
pub use retry::RetryPolicy;
pub use router::{DataService, RouterConfig};
pub use symbol::{format_stock_symbol, Market};
pub use yahoo::YahooProvider;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Domain Records
// ============================================================================

/// Current quote for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// Provider that produced the quote
    pub source: String,
    pub symbol: String,
    /// Last traded price
    pub price: f64,
    /// Trailing twelve month PE, when the provider reports one
    pub pe_ratio: Option<f64>,
    pub volume: Option<f64>,
    pub currency: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Latest reported fundamentals for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Financials {
    pub source: String,
    pub symbol: String,
    pub market_cap: f64,
    /// Reporting currency (ISO code)
    pub currency: String,
    /// Earnings per share
    pub eps: f64,
    pub shares_outstanding: f64,
    pub revenue: f64,
    pub free_cash_flow: f64,
    pub net_income: f64,
    /// Statement date as reported (`YYYY-MM-DD...`)
    pub report_date: Option<String>,
}

// ============================================================================
// Validation
// ============================================================================

/// Reject quotes without a usable price.
pub fn validate_market_data(data: &MarketData) -> Result<(), ProviderError> {
    if !data.price.is_finite() || data.price <= 0.0 {
        return Err(ProviderError::InvalidData(format!(
            "{} 返回的价格无效: {}",
            data.source, data.price
        )));
    }
    if let Some(pe) = data.pe_ratio {
        if !pe.is_finite() {
            return Err(ProviderError::InvalidData(format!(
                "{} 返回的市盈率无效: {pe}",
                data.source
            )));
        }
    }
    Ok(())
}

/// Reject statements whose core figures are not numbers.
pub fn validate_financials(data: &Financials) -> Result<(), ProviderError> {
    let fields = [
        ("revenue", data.revenue),
        ("net_income", data.net_income),
        ("free_cash_flow", data.free_cash_flow),
        ("eps", data.eps),
    ];
    for (field, value) in fields {
        if !value.is_finite() {
            return Err(ProviderError::InvalidData(format!(
                "{} 返回的 {field} 无效: {value}",
                data.source
            )));
        }
    }
    if data.shares_outstanding < 0.0 {
        return Err(ProviderError::InvalidData(format!(
            "{} 返回的流通股数为负: {}",
            data.source, data.shares_outstanding
        )));
    }
    Ok(())
}
