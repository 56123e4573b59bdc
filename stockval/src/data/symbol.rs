//! Ticker normalisation across markets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ProviderError;

/// Prefix FMP uses for Tokyo Stock Exchange listings.
pub const TOKYO_PREFIX: &str = "TYO:";

/// Supported listing markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    /// NYSE / NASDAQ
    US,
    /// Tokyo Stock Exchange
    JP,
}

impl Market {
    pub fn code(&self) -> &'static str {
        match self {
            Self::US => "US",
            Self::JP => "JP",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Market {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(Self::US),
            "JP" => Ok(Self::JP),
            other => Err(ProviderError::InvalidRequest(format!("不支持的市场: {other}"))),
        }
    }
}

/// Turn user input such as `AAPL.US` or `5801.JP` into the form the data
/// providers expect: `AAPL` for US listings, `TYO:5801` for Tokyo.
pub fn format_stock_symbol(symbol: &str, country: &str) -> Result<String, ProviderError> {
    let market: Market = country.parse()?;
    let code = symbol.trim().split('.').next().unwrap_or_default();
    if code.is_empty() {
        return Err(ProviderError::InvalidRequest(format!(
            "股票代码为空: '{symbol}'"
        )));
    }

    Ok(match market {
        Market::JP => format!("{TOKYO_PREFIX}{code}"),
        Market::US => code.to_string(),
    })
}

/// Rewrite `TYO:7203` into a suffixed ticker (`7203.T`) for providers that
/// use exchange suffixes. US tickers pass through.
pub fn with_exchange_suffix(symbol: &str, tokyo_suffix: &str) -> String {
    match symbol.strip_prefix(TOKYO_PREFIX) {
        Some(code) => format!("{code}.{tokyo_suffix}"),
        None => symbol.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_us_symbol() {
        assert_eq!(format_stock_symbol("AAPL", "US").unwrap(), "AAPL");
        assert_eq!(format_stock_symbol("AAPL.US", "US").unwrap(), "AAPL");
        assert_eq!(format_stock_symbol("aapl.us", "us").unwrap(), "aapl");
    }

    #[test]
    fn test_format_jp_symbol() {
        assert_eq!(format_stock_symbol("5801.JP", "JP").unwrap(), "TYO:5801");
        assert_eq!(format_stock_symbol("7203", "JP").unwrap(), "TYO:7203");
    }

    #[test]
    fn test_unsupported_market() {
        let err = format_stock_symbol("0700.HK", "HK").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert!(err.to_string().contains("HK"));
    }

    #[test]
    fn test_empty_symbol_rejected() {
        assert!(format_stock_symbol(".US", "US").is_err());
        assert!(format_stock_symbol("  ", "US").is_err());
    }

    #[test]
    fn test_exchange_suffix() {
        assert_eq!(with_exchange_suffix("TYO:7203", "T"), "7203.T");
        assert_eq!(with_exchange_suffix("AAPL", "T"), "AAPL");
    }
}
