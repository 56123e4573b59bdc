//! Monte Carlo valuation combining DCF and PE draws.
//!
//! Every simulation samples a growth rate, a discount rate and a PE multiple,
//! values the company with both models and blends them. The resulting
//! distribution drives the valuation band, the mispricing probabilities and
//! a quarterly price forecast.
//!
//! # Usage
//!
//! ```ignore
//! let valuator = MonteCarloValuator::new(&settings.model);
//! let result = valuator.run(&financials, &market)?;
//! println!("{:.2}..{:.2}", result.valuation_range.low, result.valuation_range.high);
//! ```

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal, Normal, StandardNormal};
use std::time::Instant;
use stockval_common::config::ModelConfig;
use tracing::{debug, info};

use super::dcf::DcfValuation;
use super::pe::{PeValuation, MARKET_AVERAGE_PE};
use super::stats;
use super::types::{Probabilities, QuarterForecast, ValuationError, ValuationRange, ValuationResult};
use crate::data::{Financials, MarketData};

// ============================================================================
// Model constants
// ============================================================================

const GROWTH_MEAN: f64 = 0.05;
const GROWTH_STD: f64 = 0.01;
const EQUITY_RISK_PREMIUM: f64 = 0.04;
const DISCOUNT_STD: f64 = 0.005;
const PE_LOG_STD: f64 = 0.15;
const MAX_PE: f64 = 50.0;
const TERMINAL_GROWTH: f64 = 0.02;
const DCF_WEIGHT: f64 = 0.7;
const PE_WEIGHT: f64 = 0.3;

/// Simulated values are clipped to this band around the market price.
const VALUE_FLOOR: f64 = 0.8;
const VALUE_CAP: f64 = 1.5;

/// Relative gap beyond which a stock counts as mispriced.
const MISPRICING_THRESHOLD: f64 = 0.10;

const FORECAST_QUARTERS: u32 = 4;
const DRIFT_LIMIT: f64 = 0.1;
const MIN_VOLATILITY: f64 = 0.05;
const MAX_VOLATILITY: f64 = 0.2;
const FORECAST_FLOOR: f64 = 0.8;
const FORECAST_CAP: f64 = 1.2;

// ============================================================================
// Valuator
// ============================================================================

/// Runs the simulation with parameters from the `model` config section.
#[derive(Debug, Clone)]
pub struct MonteCarloValuator {
    simulations: u64,
    risk_free_rate: f64,
    pe_percentile: f64,
    dcf_growth_years: u32,
    forecast_paths: u32,
    seed: Option<u64>,
}

impl MonteCarloValuator {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            simulations: config.monte_carlo_sims,
            risk_free_rate: config.risk_free_rate,
            pe_percentile: config.pe_percentile,
            dcf_growth_years: config.dcf_growth_years,
            forecast_paths: config.forecast_paths,
            seed: config.seed,
        }
    }

    /// Fix the RNG seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Value one company. CPU bound; call from a blocking context.
    pub fn run(
        &self,
        financials: &Financials,
        market: &MarketData,
    ) -> Result<ValuationResult, ValuationError> {
        let price = market.price;
        if !(price.is_finite() && price > 0.0) {
            return Err(ValuationError::InvalidPrice(price));
        }
        if self.simulations == 0 {
            return Err(ValuationError::NoSimulations);
        }

        let started = Instant::now();
        let mut rng = self.rng();

        let base_pe = market
            .pe_ratio
            .filter(|pe| pe.is_finite() && *pe > 0.0 && *pe <= MAX_PE)
            .unwrap_or(MARKET_AVERAGE_PE);

        let growth_dist = normal(GROWTH_MEAN, GROWTH_STD)?;
        let discount_dist = normal(self.risk_free_rate + EQUITY_RISK_PREMIUM, DISCOUNT_STD)?;
        let pe_dist = LogNormal::new(base_pe.ln(), PE_LOG_STD)
            .map_err(|e| ValuationError::Distribution(e.to_string()))?;

        let dcf = DcfValuation::new(financials.free_cash_flow, self.dcf_growth_years);
        let floor = price * VALUE_FLOOR;
        let cap = price * VALUE_CAP;

        let values: Vec<f64> = (0..self.simulations)
            .map(|_| {
                let growth = growth_dist.sample(&mut rng);
                let discount = discount_dist.sample(&mut rng);
                let pe = pe_dist.sample(&mut rng);

                let pe_value = PeValuation::per_share(pe, financials.eps);
                let value = match dcf.per_share(
                    financials.shares_outstanding,
                    growth,
                    discount,
                    TERMINAL_GROWTH,
                ) {
                    Some(dcf_value) => DCF_WEIGHT * dcf_value + PE_WEIGHT * pe_value,
                    None => pe_value,
                };

                if value.is_finite() {
                    value.clamp(floor, cap)
                } else {
                    floor
                }
            })
            .collect();

        let mean = stats::mean(&values);
        let std_dev = stats::population_std_dev(&values);

        let valuation_range = self.band(&values);
        let probabilities = probabilities(&values, price);

        let mu = mean / price - 1.0;
        let volatility = std_dev / price;
        let drift = if volatility > 0.0 {
            mu - 0.5 * volatility * volatility
        } else {
            mu
        };

        let next_quarters = self.forecast(&mut rng, price, drift, volatility);

        info!(
            symbol = %market.symbol,
            simulations = self.simulations,
            mean,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Monte Carlo valuation complete"
        );

        Ok(ValuationResult {
            valuation_range,
            probabilities,
            next_quarters,
            mean,
            std_dev,
            drift,
            volatility,
            simulations: self.simulations,
        })
    }

    fn band(&self, values: &[f64]) -> ValuationRange {
        let p = self.pe_percentile.clamp(0.0, 1.0);
        let low_q = p.min(1.0 - p);
        let high_q = p.max(1.0 - p);

        let sorted = stats::sorted(values);
        ValuationRange {
            low: stats::percentile(&sorted, low_q * 100.0),
            medium: stats::percentile(&sorted, 50.0),
            high: stats::percentile(&sorted, high_q * 100.0),
            low_percentile: round_to(low_q * 100.0, 2),
            high_percentile: round_to(high_q * 100.0, 2),
        }
    }

    /// Quarter-by-quarter price paths summarised as 25/50/75 percentiles.
    fn forecast(
        &self,
        rng: &mut StdRng,
        price: f64,
        drift: f64,
        volatility: f64,
    ) -> Vec<QuarterForecast> {
        let drift = drift.clamp(-DRIFT_LIMIT, DRIFT_LIMIT);
        let sigma = volatility.clamp(MIN_VOLATILITY, MAX_VOLATILITY);
        let floor = price * FORECAST_FLOOR;
        let cap = price * FORECAST_CAP;
        let paths = self.forecast_paths.max(1) as usize;

        let mut per_quarter = vec![Vec::with_capacity(paths); FORECAST_QUARTERS as usize];
        for _ in 0..paths {
            let mut current = price;
            for quarter in per_quarter.iter_mut() {
                let z: f64 = StandardNormal.sample(rng);
                current = (current * (1.0 + drift / 4.0 + sigma / 2.0 * z)).clamp(floor, cap);
                quarter.push(current);
            }
        }

        let forecast: Vec<QuarterForecast> = per_quarter
            .into_iter()
            .zip(1..)
            .map(|(prices, quarter)| {
                let sorted = stats::sorted(&prices);
                QuarterForecast {
                    quarter,
                    low: round_to(stats::percentile(&sorted, 25.0), 2),
                    median: round_to(stats::percentile(&sorted, 50.0), 2),
                    high: round_to(stats::percentile(&sorted, 75.0), 2),
                }
            })
            .collect();

        debug!(drift, sigma, paths, "Quarterly forecast generated");
        forecast
    }
}

fn normal(mean: f64, std_dev: f64) -> Result<Normal<f64>, ValuationError> {
    Normal::new(mean, std_dev).map_err(|e| ValuationError::Distribution(e.to_string()))
}

/// Share of simulated values more than 10% below the price (`undervalued`)
/// and more than 10% above it (`overvalued`).
fn probabilities(values: &[f64], price: f64) -> Probabilities {
    let n = values.len() as f64;
    let undervalued = values
        .iter()
        .filter(|v| (*v - price) / price < -MISPRICING_THRESHOLD)
        .count() as f64
        / n;
    let overvalued = values
        .iter()
        .filter(|v| (*v - price) / price > MISPRICING_THRESHOLD)
        .count() as f64
        / n;

    let undervalued = round_to(undervalued, 4);
    let overvalued = round_to(overvalued, 4);
    Probabilities {
        undervalued,
        overvalued,
        fair_valued: round_to(1.0 - undervalued - overvalued, 4),
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures;

    fn valuator(sims: u64) -> MonteCarloValuator {
        MonteCarloValuator::new(&ModelConfig {
            monte_carlo_sims: sims,
            forecast_paths: 500,
            ..ModelConfig::default()
        })
        .with_seed(42)
    }

    #[test]
    fn test_rejects_non_positive_price() {
        let financials = fixtures::financials("fmp", "AAPL");
        let mut market = fixtures::market("fmp", "AAPL", 0.0);
        assert!(matches!(
            valuator(100).run(&financials, &market),
            Err(ValuationError::InvalidPrice(_))
        ));
        market.price = -5.0;
        assert!(valuator(100).run(&financials, &market).is_err());
    }

    #[test]
    fn test_rejects_zero_simulations() {
        let financials = fixtures::financials("fmp", "AAPL");
        let market = fixtures::market("fmp", "AAPL", 190.0);
        assert!(matches!(
            valuator(0).run(&financials, &market),
            Err(ValuationError::NoSimulations)
        ));
    }

    #[test]
    fn test_result_shape() {
        let financials = fixtures::financials("fmp", "AAPL");
        let market = fixtures::market("fmp", "AAPL", 190.0);
        let result = valuator(2_000).run(&financials, &market).unwrap();

        let range = &result.valuation_range;
        assert!(range.low <= range.medium && range.medium <= range.high);
        assert!(range.low >= 190.0 * 0.8 - 1e-9);
        assert!(range.high <= 190.0 * 1.5 + 1e-9);
        assert_eq!(range.low_percentile, 20.0);
        assert_eq!(range.high_percentile, 80.0);

        let p = result.probabilities;
        assert!((p.undervalued + p.overvalued + p.fair_valued - 1.0).abs() < 1e-3);
        assert!(p.undervalued >= 0.0 && p.overvalued >= 0.0);

        assert_eq!(result.next_quarters.len(), 4);
        for (i, q) in result.next_quarters.iter().enumerate() {
            assert_eq!(q.quarter, i as u32 + 1);
            assert!(q.low <= q.median && q.median <= q.high);
            assert!(q.low >= 152.0 && q.high <= 228.0);
        }
        assert_eq!(result.simulations, 2_000);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let financials = fixtures::financials("fmp", "AAPL");
        let market = fixtures::market("fmp", "AAPL", 190.0);
        let a = valuator(500).run(&financials, &market).unwrap();
        let b = valuator(500).run(&financials, &market).unwrap();
        assert_eq!(a.valuation_range, b.valuation_range);
        assert_eq!(a.next_quarters, b.next_quarters);
    }

    #[test]
    fn test_values_above_price_count_as_overvalued() {
        // Fundamentals worth far more than a price of 10: every draw hits the cap
        let financials = fixtures::financials("fmp", "AAPL");
        let market = fixtures::market("fmp", "AAPL", 10.0);
        let result = valuator(1_000).run(&financials, &market).unwrap();
        assert_eq!(result.probabilities.overvalued, 1.0);
        assert_eq!(result.probabilities.undervalued, 0.0);
        assert!((result.valuation_range.medium - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_values_below_price_count_as_undervalued() {
        let financials = fixtures::financials("fmp", "AAPL");
        let market = fixtures::market("fmp", "AAPL", 100_000.0);
        let result = valuator(1_000).run(&financials, &market).unwrap();
        assert_eq!(result.probabilities.undervalued, 1.0);
        assert_eq!(result.probabilities.overvalued, 0.0);
        assert!((result.valuation_range.low - 80_000.0).abs() < 1e-6);
    }

    fn pe_only(eps: f64, price: f64, pe: f64) -> (Financials, MarketData) {
        let mut financials = fixtures::financials("fmp", "AAPL");
        financials.shares_outstanding = 0.0;
        financials.eps = eps;
        let mut market = fixtures::market("fmp", "AAPL", price);
        market.pe_ratio = Some(pe);
        (financials, market)
    }

    #[test]
    fn test_high_valid_pe_samples_are_not_reset() {
        // ln(0.9) / 0.15 ≈ -0.70σ and ln(1.1) / 0.15 ≈ 0.64σ
        let (financials, market) = pe_only(10.0, 450.0, 45.0);
        let result = valuator(4_000).run(&financials, &market).unwrap();
        let p = result.probabilities;
        assert!(p.undervalued > 0.18 && p.undervalued < 0.30, "{p:?}");
        assert!(p.overvalued > 0.20 && p.overvalued < 0.32, "{p:?}");
        assert!((result.valuation_range.medium - 450.0).abs() < 20.0);
        assert!(result.valuation_range.low > 0.8 * 450.0);
    }

    #[test]
    fn test_out_of_range_market_pe_falls_back_to_average() {
        // PE 80 is discarded up front, so draws centre on 15 × 10
        let (financials, market) = pe_only(10.0, 150.0, 80.0);
        let result = valuator(2_000).run(&financials, &market).unwrap();
        assert!((result.valuation_range.medium - 150.0).abs() < 10.0);
    }

    #[test]
    fn test_no_shares_uses_pe_only() {
        let mut financials = fixtures::financials("fmp", "AAPL");
        financials.shares_outstanding = 0.0;
        financials.eps = 10.0;
        let mut market = fixtures::market("fmp", "AAPL", 250.0);
        market.pe_ratio = Some(25.0);
        let result = valuator(2_000).run(&financials, &market).unwrap();
        // PE leg alone centres on 25 × 10 = price
        assert!((result.valuation_range.medium - 250.0).abs() < 15.0);
    }

    #[test]
    fn test_probabilities_rounding() {
        let values = [100.0, 115.0, 85.0];
        let p = probabilities(&values, 100.0);
        assert_eq!(p.undervalued, 0.3333);
        assert_eq!(p.overvalued, 0.3333);
        assert_eq!(p.fair_valued, 0.3334);

        let p = probabilities(&[80.0, 80.0, 120.0, 100.0], 100.0);
        assert_eq!(p.undervalued, 0.5);
        assert_eq!(p.overvalued, 0.25);
    }
}
