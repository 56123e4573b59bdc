//! Valuation models.
//!
//! Two deterministic models feed a Monte Carlo simulation:
//!
//! 1. **DCF**: three-stage discounted free cash flow (high growth, linear
//!    transition, Gordon terminal value)
//! 2. **PE**: earnings multiple, optionally adjusted for growth and industry
//!
//! The simulation blends 70% DCF per share with 30% PE × EPS for each draw
//! and summarises the distribution into a valuation band, mispricing
//! probabilities and a four-quarter price forecast.
//!
//! # Usage
//!
//! ```ignore
//! use stockval::valuation::MonteCarloValuator;
//!
//! let result = MonteCarloValuator::new(&settings.model).run(&financials, &market)?;
//! println!("低估概率: {:.1}%", result.probabilities.undervalued * 100.0);
//! ```

pub mod dcf;
pub mod monte_carlo;
pub mod pe;
mod stats;
pub mod types;

pub use dcf::DcfValuation;
pub use monte_carlo::MonteCarloValuator;
pub use pe::PeValuation;
pub use types::{
    Probabilities, QuarterForecast, ValuationError, ValuationRange, ValuationReport,
    ValuationResult,
};
