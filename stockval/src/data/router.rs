//! Data service routing requests across providers.
//!
//! Providers are tried in configured priority order. Transient errors are
//! retried on the same provider with backoff, unless the provider already
//! retries internally; anything else fails over to the next one. Unhealthy providers are only tried after the healthy ones.

use std::sync::Arc;
use std::time::Duration;

use stockval_common::Settings;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::cache::DataCache;
use super::health::{HealthMonitor, HealthMonitorConfig, ProviderHealth};
use super::provider::{DataKind, DataProvider, ProviderError};
use super::retry::RetryPolicy;
use super::{
    validate_financials, validate_market_data, AlphaVantageProvider, Financials, FmpProvider,
    MarketData, YahooProvider,
};

// ============================================================================
// Router Configuration
// ============================================================================

/// Configuration for the data service router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Backoff applied to recoverable errors on one provider
    pub retry: RetryPolicy,
    /// Health monitor configuration
    pub health_config: HealthMonitorConfig,
    /// Result cache TTL in seconds
    pub cache_ttl_secs: i64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::provider(3),
            health_config: HealthMonitorConfig::default(),
            cache_ttl_secs: 300,
        }
    }
}

impl RouterConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retry: RetryPolicy::provider(settings.data_sources.max_retries),
            health_config: HealthMonitorConfig::default(),
            cache_ttl_secs: i64::try_from(settings.data_sources.cache_ttl_secs).unwrap_or(i64::MAX),
        }
    }
}

// ============================================================================
// Data Service
// ============================================================================

/// Routes data requests to available providers with automatic failover.
pub struct DataService {
    /// Registered providers in priority order
    providers: RwLock<Vec<Arc<dyn DataProvider>>>,
    health_monitor: Arc<HealthMonitor>,
    cache: DataCache,
    config: RouterConfig,
}

impl DataService {
    /// Create an empty service with default configuration
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create an empty service with custom configuration
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            health_monitor: Arc::new(HealthMonitor::with_config(config.health_config.clone())),
            cache: DataCache::with_ttl(config.cache_ttl_secs),
            config,
        }
    }

    /// Build the service with the providers listed in `data_sources.priority`.
    pub async fn from_settings(settings: &Settings) -> Self {
        let service = Self::with_config(RouterConfig::from_settings(settings));

        for name in &settings.data_sources.priority {
            let provider: Arc<dyn DataProvider> = match name.as_str() {
                "fmp" => Arc::new(FmpProvider::new(&settings.fmp)),
                "alpha_vantage" => match &settings.alpha_vantage {
                    Some(config) => Arc::new(AlphaVantageProvider::new(config)),
                    None => {
                        debug!("alpha_vantage not configured, skipping");
                        continue;
                    }
                },
                "yahoo" => Arc::new(YahooProvider::new(&settings.yahoo)),
                other => {
                    warn!(provider = other, "Unknown data provider in priority list");
                    continue;
                }
            };
            service.register(provider).await;
        }

        service
    }

    /// Register a provider after the ones already registered.
    pub async fn register(&self, provider: Arc<dyn DataProvider>) {
        let name = provider.name();
        self.health_monitor.register_provider(name).await;

        let mut providers = self.providers.write().await;
        let priority = providers.len();
        providers.push(provider);

        info!(provider = name, priority, "Registered data provider");
    }

    /// Names of registered providers in priority order
    pub async fn provider_names(&self) -> Vec<&'static str> {
        self.providers.read().await.iter().map(|p| p.name()).collect()
    }

    /// Get the health monitor for external access
    pub fn health_monitor(&self) -> Arc<HealthMonitor> {
        Arc::clone(&self.health_monitor)
    }

    /// Health snapshot of every provider
    pub async fn health_report(&self) -> Vec<ProviderHealth> {
        self.health_monitor.get_all_health().await
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    /// Providers able to serve `kind`, healthy ones first, each group in priority order.
    async fn candidates(&self, kind: DataKind) -> Vec<Arc<dyn DataProvider>> {
        let providers = self.providers.read().await;
        let mut healthy = Vec::new();
        let mut unhealthy = Vec::new();

        for provider in providers.iter() {
            let name = provider.name();
            if !provider.capabilities().supports(kind) {
                debug!(provider = name, kind = %kind, "Provider does not serve this data, skipping");
                continue;
            }
            if !provider.is_available() {
                debug!(provider = name, "Provider not configured, skipping");
                continue;
            }

            if self.health_monitor.is_healthy(name).await {
                healthy.push(Arc::clone(provider));
            } else {
                unhealthy.push(Arc::clone(provider));
            }
        }

        if healthy.is_empty() && !unhealthy.is_empty() {
            warn!("No healthy providers available, trying unhealthy providers");
        }
        healthy.extend(unhealthy);
        healthy
    }

    /// Execute a request with automatic failover.
    async fn execute_with_failover<T, F, Fut>(
        &self,
        kind: DataKind,
        request_fn: F,
    ) -> Result<T, ProviderError>
    where
        F: Fn(Arc<dyn DataProvider>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let candidates = self.candidates(kind).await;
        if candidates.is_empty() {
            return Err(ProviderError::Unavailable(format!(
                "没有可提供{}的数据源",
                match kind {
                    DataKind::MarketData => "市场数据",
                    DataKind::Financials => "财务数据",
                }
            )));
        }

        let mut failures = Vec::new();

        for provider in candidates {
            let name = provider.name();
            let max_retries = if provider.retries_internally() {
                0
            } else {
                self.config.retry.max_retries
            };
            debug!(provider = name, kind = %kind, max_retries, "Routing request to provider");

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    debug!(provider = name, attempt, "Retrying request");
                }

                match request_fn(Arc::clone(&provider)).await {
                    Ok(result) => {
                        self.health_monitor.record_success(name).await;
                        info!(provider = name, kind = %kind, "成功获取数据");
                        return Ok(result);
                    }
                    Err(e) => {
                        self.health_monitor.record_failure(name, &e.to_string()).await;

                        if !e.should_failover() {
                            warn!(provider = name, error = %e, "Request rejected, not failing over");
                            return Err(e);
                        }

                        if e.is_recoverable() && attempt < max_retries {
                            let delay = match &e {
                                ProviderError::RateLimited {
                                    retry_after_secs: Some(secs),
                                } => Duration::from_secs(*secs).min(self.config.retry.max_delay),
                                _ => self.config.retry.delay_for(attempt),
                            };
                            debug!(
                                provider = name,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "Transient error, backing off"
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }

                        warn!(
                            provider = name,
                            error = %e,
                            "数据源获取失败，切换到下一个数据源"
                        );
                        failures.push((name.to_string(), e));
                        break;
                    }
                }
            }
        }

        Err(ProviderError::AllFailed(failures))
    }

    // ========================================================================
    // Public Data Fetching Methods
    // ========================================================================

    /// Fetch a validated quote with failover and caching.
    pub async fn get_market_data(&self, symbol: &str) -> Result<MarketData, ProviderError> {
        if let Some(cached) = self.cache.get_market_data(symbol) {
            debug!(symbol, source = %cached.source, "Market data cache hit");
            return Ok(cached);
        }

        let owned = symbol.to_string();
        let data = self
            .execute_with_failover(DataKind::MarketData, move |provider| {
                let symbol = owned.clone();
                async move {
                    provider
                        .fetch_market_data(&symbol)
                        .await
                        .and_then(|data| validate_market_data(&data).map(|()| data))
                }
            })
            .await?;

        self.cache.set_market_data(symbol, data.clone());
        Ok(data)
    }

    /// Fetch validated financial statements with failover and caching.
    pub async fn get_financials(&self, symbol: &str) -> Result<Financials, ProviderError> {
        if let Some(cached) = self.cache.get_financials(symbol) {
            debug!(symbol, source = %cached.source, "Financials cache hit");
            return Ok(cached);
        }

        let owned = symbol.to_string();
        let data = self
            .execute_with_failover(DataKind::Financials, move |provider| {
                let symbol = owned.clone();
                async move {
                    provider
                        .fetch_financials(&symbol)
                        .await
                        .and_then(|data| validate_financials(&data).map(|()| data))
                }
            })
            .await?;

        self.cache.set_financials(symbol, data.clone());
        Ok(data)
    }

    /// Release cached data and log final provider health.
    pub async fn close(&self) {
        for health in self.health_report().await {
            debug!(
                provider = %health.name,
                healthy = health.healthy,
                requests = health.total_requests,
                errors = health.error_count(),
                "Provider health at shutdown"
            );
        }
        self.cache.clear_all();
    }
}

impl Default for DataService {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::{financials, market};
    use crate::data::DataCapabilities;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Mock provider for testing
    struct MockProvider {
        name: &'static str,
        capabilities: DataCapabilities,
        available: bool,
        error: Option<ProviderError>,
        price: f64,
        calls: AtomicU32,
    }

    impl MockProvider {
        fn ok(name: &'static str, price: f64) -> Self {
            Self {
                name,
                capabilities: DataCapabilities::full(),
                available: true,
                error: None,
                price,
                calls: AtomicU32::new(0),
            }
        }

        fn failing(name: &'static str, error: ProviderError) -> Self {
            Self {
                error: Some(error),
                ..Self::ok(name, 0.0)
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataProvider for MockProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn capabilities(&self) -> DataCapabilities {
            self.capabilities
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn fetch_market_data(&self, symbol: &str) -> Result<MarketData, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(market(self.name, symbol, self.price)),
            }
        }

        async fn fetch_financials(&self, symbol: &str) -> Result<Financials, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(financials(self.name, symbol)),
            }
        }
    }

    fn fast_service() -> DataService {
        DataService::with_config(RouterConfig {
            retry: RetryPolicy::immediate(2),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_register_keeps_priority_order() {
        let service = fast_service();
        service.register(Arc::new(MockProvider::ok("fmp", 1.0))).await;
        service.register(Arc::new(MockProvider::ok("yahoo", 1.0))).await;
        assert_eq!(service.provider_names().await, vec!["fmp", "yahoo"]);
    }

    #[tokio::test]
    async fn test_failover_on_auth_error() {
        let service = fast_service();
        let failing = Arc::new(MockProvider::failing(
            "fmp",
            ProviderError::Auth("bad key".into()),
        ));
        let working = Arc::new(MockProvider::ok("yahoo", 190.0));
        service.register(failing.clone()).await;
        service.register(working.clone()).await;

        let data = service.get_market_data("AAPL").await.unwrap();
        assert_eq!(data.source, "yahoo");
        // Auth errors are not retried
        assert_eq!(failing.calls(), 1);
        assert_eq!(working.calls(), 1);
    }

    #[tokio::test]
    async fn test_recoverable_error_is_retried() {
        let service = fast_service();
        let flaky = Arc::new(MockProvider::failing(
            "fmp",
            ProviderError::Network("timeout".into()),
        ));
        service.register(flaky.clone()).await;

        let err = service.get_market_data("AAPL").await.unwrap_err();
        assert_eq!(flaky.calls(), 3);
        match err {
            ProviderError::AllFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "fmp");
            }
            other => panic!("expected AllFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_price_fails_over() {
        let service = fast_service();
        let zero = Arc::new(MockProvider::ok("fmp", 0.0));
        let good = Arc::new(MockProvider::ok("yahoo", 190.0));
        service.register(zero.clone()).await;
        service.register(good).await;

        let data = service.get_market_data("AAPL").await.unwrap();
        assert_eq!(data.source, "yahoo");
        assert_eq!(zero.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_stops_routing() {
        let service = fast_service();
        let rejecting = Arc::new(MockProvider::failing(
            "fmp",
            ProviderError::InvalidRequest("bad symbol".into()),
        ));
        let fallback = Arc::new(MockProvider::ok("yahoo", 190.0));
        service.register(rejecting).await;
        service.register(fallback.clone()).await;

        let err = service.get_market_data("???").await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_financials_skip_quote_only_providers() {
        let service = fast_service();
        let quotes = Arc::new(MockProvider {
            capabilities: DataCapabilities::quotes_only(),
            ..MockProvider::ok("alpha_vantage", 190.0)
        });
        let full = Arc::new(MockProvider::ok("fmp", 190.0));
        service.register(quotes.clone()).await;
        service.register(full).await;

        let data = service.get_financials("AAPL").await.unwrap();
        assert_eq!(data.source, "fmp");
        assert_eq!(quotes.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_providers_skipped() {
        let service = fast_service();
        service
            .register(Arc::new(MockProvider {
                available: false,
                ..MockProvider::ok("fmp", 190.0)
            }))
            .await;

        let err = service.get_market_data("AAPL").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_results_are_cached() {
        let service = fast_service();
        let provider = Arc::new(MockProvider::ok("fmp", 190.0));
        service.register(provider.clone()).await;

        service.get_market_data("AAPL").await.unwrap();
        service.get_market_data("AAPL").await.unwrap();
        assert_eq!(provider.calls(), 1);

        service.close().await;
        service.get_market_data("AAPL").await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_unhealthy_provider_demoted() {
        let service = DataService::with_config(RouterConfig {
            retry: RetryPolicy::immediate(0),
            ..Default::default()
        });
        let first = Arc::new(MockProvider::ok("fmp", 190.0));
        let second = Arc::new(MockProvider::ok("yahoo", 191.0));
        service.register(first.clone()).await;
        service.register(second).await;

        for _ in 0..3 {
            service.health_monitor().record_failure("fmp", "timeout").await;
        }

        let data = service.get_market_data("AAPL").await.unwrap();
        assert_eq!(data.source, "yahoo");
        assert_eq!(first.calls(), 0);
    }
}
