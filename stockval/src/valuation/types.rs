//! Valuation result types.

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::Market;

// ============================================================================
// Errors
// ============================================================================

/// Valuation failures.
#[derive(Debug, Error)]
pub enum ValuationError {
    #[error("市场价格必须大于0 (got {0})")]
    InvalidPrice(f64),

    #[error("折现率 {discount} 必须大于永续增长率 {terminal_growth}")]
    InvalidDiscountRate { discount: f64, terminal_growth: f64 },

    #[error("分布参数无效: {0}")]
    Distribution(String),

    #[error("模拟次数必须大于0")]
    NoSimulations,
}

// ============================================================================
// Results
// ============================================================================

/// Intrinsic value band from the simulated distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRange {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    /// Percentile (0-100) `low` was taken at
    pub low_percentile: f64,
    /// Percentile (0-100) `high` was taken at
    pub high_percentile: f64,
}

/// Share of simulations in each valuation bucket, rounded to 4 decimals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    /// Simulated value more than 10% below the price
    pub undervalued: f64,
    /// Simulated value more than 10% above the price
    pub overvalued: f64,
    pub fair_valued: f64,
}

/// Price band for one future quarter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterForecast {
    /// 1-based quarter offset from now
    pub quarter: u32,
    /// 25th percentile
    pub low: f64,
    pub median: f64,
    /// 75th percentile
    pub high: f64,
}

/// Summary of a Monte Carlo valuation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationResult {
    pub valuation_range: ValuationRange,
    pub probabilities: Probabilities,
    pub next_quarters: Vec<QuarterForecast>,
    /// Mean simulated value
    pub mean: f64,
    /// Population standard deviation of simulated values
    pub std_dev: f64,
    /// Drift used for the forecast, before clamping
    pub drift: f64,
    /// Relative volatility (std_dev / price), before clamping
    pub volatility: f64,
    pub simulations: u64,
}

// ============================================================================
// Report
// ============================================================================

/// Everything a valuation message needs, assembled by the analysis workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationReport {
    /// Provider-form symbol (`AAPL`, `TYO:7203`)
    pub symbol: String,
    pub market: Market,
    /// Financial report date, when the provider sent a parseable one
    pub date: Option<NaiveDate>,
    pub current_price: f64,
    pub currency: String,
    pub range: ValuationRange,
    pub probabilities: Probabilities,
    pub next_quarters: Vec<QuarterForecast>,
    pub generated_at: DateTime<Local>,
}
