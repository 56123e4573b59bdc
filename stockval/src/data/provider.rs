//! Data provider abstraction for multi-source market data.
//!
//! Defines the `DataProvider` trait that every data source implements,
//! enabling automatic failover and health-based routing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Financials, MarketData};

// ============================================================================
// Provider Capabilities
// ============================================================================

/// Kind of data a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    MarketData,
    Financials,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarketData => write!(f, "market data"),
            Self::Financials => write!(f, "financials"),
        }
    }
}

/// Capabilities supported by a data provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCapabilities {
    /// Real-time or last-close quotes
    pub market_data: bool,
    /// Financial statements and company profile
    pub financials: bool,
}

impl DataCapabilities {
    /// Quotes only (Alpha Vantage, Yahoo)
    pub fn quotes_only() -> Self {
        Self {
            market_data: true,
            financials: false,
        }
    }

    /// Quotes and statements (FMP)
    pub fn full() -> Self {
        Self {
            market_data: true,
            financials: true,
        }
    }

    pub fn supports(&self, kind: DataKind) -> bool {
        match kind {
            DataKind::MarketData => self.market_data,
            DataKind::Financials => self.financials,
        }
    }
}

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network error (connection failed, timeout)
    Network(String),
    /// Authentication error (invalid or expired key)
    Auth(String),
    /// Rate limit exceeded
    RateLimited { retry_after_secs: Option<u64> },
    /// Data not available for the requested symbol
    DataNotAvailable(String),
    /// Provider is temporarily unavailable
    Unavailable(String),
    /// Invalid request parameters
    InvalidRequest(String),
    /// Response parsed but failed validation
    InvalidData(String),
    /// Internal provider error
    Internal(String),
    /// Every candidate provider failed
    AllFailed(Vec<(String, ProviderError)>),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::DataNotAvailable(msg) => write!(f, "Data not available: {}", msg),
            Self::Unavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
            Self::AllFailed(errors) => {
                write!(f, "所有数据源均不可用")?;
                if !errors.is_empty() {
                    write!(f, " (详细错误: ")?;
                    for (i, (name, err)) in errors.iter().enumerate() {
                        if i > 0 {
                            write!(f, "; ")?;
                        }
                        write!(f, "{}: {}", name, err)?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Check if the error is transient (worth retrying on the same provider)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Unavailable(_)
        )
    }

    /// Check if another provider could still serve the request
    pub fn should_failover(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_) | Self::AllFailed(_))
    }

    /// Map a transport error from reqwest.
    pub fn from_reqwest(provider: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Network(format!("{provider} 请求超时: {err}"))
        } else if err.is_connect() || err.is_request() {
            Self::Network(format!("{provider} 网络请求错误: {err}"))
        } else if err.is_decode() || err.is_body() {
            Self::InvalidData(format!("{provider} 无效的API响应格式: {err}"))
        } else {
            Self::Internal(format!("{provider}: {err}"))
        }
    }

    /// Map a non-success HTTP status.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let body: String = body.chars().take(200).collect();
        match status.as_u16() {
            401 | 403 => Self::Auth(format!("{provider} 认证失败，请检查API密钥 ({status})")),
            404 => Self::DataNotAvailable(format!("{provider} 未找到数据 ({status}): {body}")),
            429 => Self::RateLimited {
                retry_after_secs: None,
            },
            400 | 422 => Self::InvalidRequest(format!("{provider} 请求参数错误 ({status}): {body}")),
            500..=599 => Self::Unavailable(format!("{provider} 服务不可用 ({status})")),
            _ => Self::Internal(format!("{provider} API请求失败 ({status}): {body}")),
        }
    }
}

// ============================================================================
// Data Provider Trait
// ============================================================================

/// Trait for market and fundamentals data providers.
///
/// All data sources (FMP, Alpha Vantage, Yahoo) implement this trait
/// to provide a unified interface for the data router.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Provider name as used in `data_sources.priority`
    fn name(&self) -> &'static str;

    /// What this provider can serve
    fn capabilities(&self) -> DataCapabilities;

    /// Whether the provider is configured well enough to be tried
    fn is_available(&self) -> bool;

    /// Whether transient failures are already retried inside each request.
    ///
    /// The router tries such providers once and fails over on error.
    fn retries_internally(&self) -> bool {
        false
    }

    /// Fetch the current quote for an exchange-qualified symbol.
    async fn fetch_market_data(&self, symbol: &str) -> Result<MarketData, ProviderError>;

    /// Fetch the latest financial statements.
    ///
    /// Quote-only providers keep the default.
    async fn fetch_financials(&self, symbol: &str) -> Result<Financials, ProviderError> {
        Err(ProviderError::DataNotAvailable(format!(
            "{} 不提供财务数据: {}",
            self.name(),
            symbol
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities() {
        let quotes = DataCapabilities::quotes_only();
        assert!(quotes.supports(DataKind::MarketData));
        assert!(!quotes.supports(DataKind::Financials));
        assert!(DataCapabilities::full().supports(DataKind::Financials));
    }

    #[test]
    fn test_provider_error_recoverable() {
        assert!(ProviderError::Network("timeout".into()).is_recoverable());
        assert!(ProviderError::RateLimited { retry_after_secs: Some(60) }.is_recoverable());
        assert!(ProviderError::Unavailable("maintenance".into()).is_recoverable());
        assert!(!ProviderError::Auth("invalid key".into()).is_recoverable());
        assert!(!ProviderError::InvalidData("price 0".into()).is_recoverable());
    }

    #[test]
    fn test_provider_error_failover() {
        assert!(ProviderError::Auth("invalid key".into()).should_failover());
        assert!(ProviderError::DataNotAvailable("no data".into()).should_failover());
        assert!(ProviderError::InvalidData("price 0".into()).should_failover());
        assert!(!ProviderError::InvalidRequest("bad symbol".into()).should_failover());
    }

    #[test]
    fn test_status_mapping() {
        use reqwest::StatusCode;
        assert!(matches!(
            ProviderError::from_status("fmp", StatusCode::FORBIDDEN, ""),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status("fmp", StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status("fmp", StatusCode::BAD_GATEWAY, ""),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            ProviderError::from_status("fmp", StatusCode::NOT_FOUND, "missing"),
            ProviderError::DataNotAvailable(_)
        ));
    }

    #[test]
    fn test_all_failed_display_lists_providers() {
        let err = ProviderError::AllFailed(vec![
            ("fmp".into(), ProviderError::Auth("bad key".into())),
            ("yahoo".into(), ProviderError::Network("timeout".into())),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("fmp: Authentication error: bad key"));
        assert!(msg.contains("yahoo: Network error: timeout"));
    }

    #[test]
    fn test_rate_limited_display() {
        let err = ProviderError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert!(err.to_string().contains("30 seconds"));
    }
}
