//! Three-stage discounted cash flow model.
//!
//! 1. High growth: `years` flows growing at `growth`.
//! 2. Transition: growth fades linearly towards the terminal rate over
//!    [`TRANSITION_YEARS`], continuing from the last high-growth flow.
//! 3. Terminal: Gordon growth value of the last flow, discounted one period
//!    after it.

use super::types::ValuationError;

/// Years over which growth fades to the terminal rate.
pub const TRANSITION_YEARS: u32 = 3;

/// DCF model for one company.
#[derive(Debug, Clone)]
pub struct DcfValuation {
    /// Latest annual free cash flow
    free_cash_flow: f64,
    /// Length of the high-growth stage
    high_growth_years: u32,
}

impl DcfValuation {
    pub fn new(free_cash_flow: f64, high_growth_years: u32) -> Self {
        Self {
            free_cash_flow,
            high_growth_years,
        }
    }

    /// Projected flows for the explicit stages (high growth then transition).
    pub fn project_cash_flows(&self, growth_rate: f64, terminal_growth: f64) -> Vec<f64> {
        let mut flows = Vec::with_capacity((self.high_growth_years + TRANSITION_YEARS) as usize);

        let mut fcf = self.free_cash_flow;
        for _ in 0..self.high_growth_years {
            fcf *= 1.0 + growth_rate;
            flows.push(fcf);
        }

        let decline = (growth_rate - terminal_growth) / f64::from(TRANSITION_YEARS + 1);
        let mut growth = growth_rate;
        for _ in 0..TRANSITION_YEARS {
            growth -= decline;
            fcf *= 1.0 + growth;
            flows.push(fcf);
        }

        flows
    }

    /// Present value of the whole business.
    pub fn calculate(
        &self,
        growth_rate: f64,
        discount_rate: f64,
        terminal_growth: f64,
    ) -> Result<f64, ValuationError> {
        if discount_rate <= terminal_growth || discount_rate <= -1.0 {
            return Err(ValuationError::InvalidDiscountRate {
                discount: discount_rate,
                terminal_growth,
            });
        }

        let flows = self.project_cash_flows(growth_rate, terminal_growth);
        let last = flows.last().copied().unwrap_or(self.free_cash_flow);
        let terminal_value = last * (1.0 + terminal_growth) / (discount_rate - terminal_growth);

        let base = 1.0 + discount_rate;
        let mut factor = 1.0;
        let mut present_value = 0.0;
        for flow in flows.iter().chain(std::iter::once(&terminal_value)) {
            factor /= base;
            present_value += flow * factor;
        }

        Ok(present_value)
    }

    /// Present value divided over the share count; `None` when there are no shares.
    pub fn per_share(
        &self,
        shares_outstanding: f64,
        growth_rate: f64,
        discount_rate: f64,
        terminal_growth: f64,
    ) -> Option<f64> {
        if !(shares_outstanding > 0.0) {
            return None;
        }
        self.calculate(growth_rate, discount_rate, terminal_growth)
            .ok()
            .map(|value| value / shares_outstanding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6 * expected.abs().max(1.0),
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_projection_stages() {
        let dcf = DcfValuation::new(100.0, 2);
        let flows = dcf.project_cash_flows(0.10, 0.02);
        assert_eq!(flows.len(), 5);
        assert_close(flows[0], 110.0);
        assert_close(flows[1], 121.0);
        // decline = 0.08 / 4 = 0.02 → growth 8%, 6%, 4%
        assert_close(flows[2], 121.0 * 1.08);
        assert_close(flows[3], 121.0 * 1.08 * 1.06);
        assert_close(flows[4], 121.0 * 1.08 * 1.06 * 1.04);
    }

    #[test]
    fn test_zero_growth_matches_closed_form() {
        // Flat flows at the terminal rate of 0: PV equals a perpetuity F / r
        let dcf = DcfValuation::new(100.0, 5);
        let value = dcf.calculate(0.0, 0.10, 0.0).unwrap();
        assert_close(value, 1000.0);
    }

    #[test]
    fn test_rejects_discount_below_terminal() {
        let dcf = DcfValuation::new(100.0, 5);
        assert!(matches!(
            dcf.calculate(0.05, 0.02, 0.02),
            Err(ValuationError::InvalidDiscountRate { .. })
        ));
        assert!(dcf.calculate(0.05, 0.01, 0.02).is_err());
    }

    #[test]
    fn test_higher_discount_lowers_value() {
        let dcf = DcfValuation::new(100.0, 5);
        let low = dcf.calculate(0.05, 0.06, 0.02).unwrap();
        let high = dcf.calculate(0.05, 0.10, 0.02).unwrap();
        assert!(low > high);
    }

    #[test]
    fn test_per_share() {
        let dcf = DcfValuation::new(100.0, 5);
        let total = dcf.calculate(0.0, 0.10, 0.0).unwrap();
        assert_close(dcf.per_share(10.0, 0.0, 0.10, 0.0).unwrap(), total / 10.0);
        assert!(dcf.per_share(0.0, 0.0, 0.10, 0.0).is_none());
        assert!(dcf.per_share(f64::NAN, 0.0, 0.10, 0.0).is_none());
    }
}
