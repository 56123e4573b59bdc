//! Price/earnings multiple valuation.

/// Market-wide PE used when no industry average is known.
pub const MARKET_AVERAGE_PE: f64 = 15.0;

/// PE model over a set of industry peer multiples.
#[derive(Debug, Clone, Default)]
pub struct PeValuation {
    industry_pe: Option<f64>,
}

impl PeValuation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the mean of peer multiples as the industry PE. Non-positive or
    /// non-finite entries are ignored.
    pub fn with_industry_peers(peers: &[f64]) -> Self {
        let valid: Vec<f64> = peers
            .iter()
            .copied()
            .filter(|pe| pe.is_finite() && *pe > 0.0)
            .collect();
        let industry_pe = (!valid.is_empty()).then(|| valid.iter().sum::<f64>() / valid.len() as f64);
        Self { industry_pe }
    }

    /// Industry PE relative to the market average (1.0 when unknown).
    pub fn industry_factor(&self) -> f64 {
        self.industry_pe
            .map(|pe| pe / MARKET_AVERAGE_PE)
            .unwrap_or(1.0)
    }

    /// PE adjusted for earnings growth (in percent) and the industry factor.
    pub fn adjusted_pe(&self, pe: f64, earnings_growth_pct: f64) -> f64 {
        pe * (1.0 + earnings_growth_pct / 100.0) * self.industry_factor()
    }

    /// Plain per-share value `pe × eps`.
    pub fn per_share(pe: f64, eps: f64) -> f64 {
        pe * eps
    }

    /// Company value from net income and the adjusted multiple.
    pub fn calculate(&self, net_income: f64, pe: f64, earnings_growth_pct: f64) -> f64 {
        net_income * self.adjusted_pe(pe, earnings_growth_pct)
    }
}
