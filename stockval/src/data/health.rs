//! Health tracking for data providers.
//!
//! Every routed request records its outcome here; the router consults the
//! resulting status to try healthy providers before unhealthy ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

// ============================================================================
// Health Status
// ============================================================================

/// Health status for a single provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Provider name
    pub name: String,
    /// Whether the provider is currently healthy
    pub healthy: bool,
    /// Number of consecutive failures
    pub consecutive_failures: u32,
    /// Total requests recorded
    pub total_requests: u64,
    /// Requests that succeeded
    pub successful_requests: u64,
    /// Last recorded request
    pub last_check: Option<DateTime<Utc>>,
    /// Last successful request
    pub last_success: Option<DateTime<Utc>>,
    /// Last error message
    pub last_error: Option<String>,
}

impl ProviderHealth {
    /// Create new health status for a provider
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true, // Assume healthy until proven otherwise
            consecutive_failures: 0,
            total_requests: 0,
            successful_requests: 0,
            last_check: None,
            last_success: None,
            last_error: None,
        }
    }

    /// Record a successful request
    pub fn record_success(&mut self, config: &HealthMonitorConfig) {
        let now = Utc::now();
        self.consecutive_failures = 0;
        self.total_requests += 1;
        self.successful_requests += 1;
        self.last_check = Some(now);
        self.last_success = Some(now);
        self.last_error = None;
        self.healthy = self.evaluate(config);
    }

    /// Record a failed request
    pub fn record_failure(&mut self, error: &str, config: &HealthMonitorConfig) {
        self.consecutive_failures += 1;
        self.total_requests += 1;
        self.last_check = Some(Utc::now());
        self.last_error = Some(error.to_string());

        let healthy = self.evaluate(config);
        if self.healthy && !healthy {
            warn!(
                provider = %self.name,
                failures = self.consecutive_failures,
                success_ratio = self.success_ratio(),
                "Provider marked unhealthy"
            );
        }
        self.healthy = healthy;
    }

    /// Fraction of requests that succeeded (1.0 when nothing recorded)
    pub fn success_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    /// Error count
    pub fn error_count(&self) -> u64 {
        self.total_requests - self.successful_requests
    }

    fn evaluate(&self, config: &HealthMonitorConfig) -> bool {
        if self.consecutive_failures >= config.unhealthy_threshold {
            return false;
        }
        if self.error_count() == 0 {
            return true;
        }
        self.total_requests < config.min_requests_for_ratio
            || self.success_ratio() > config.min_success_ratio
    }
}

// ============================================================================
// Health Monitor Configuration
// ============================================================================

/// Configuration for the health monitor.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Number of consecutive failures before marking unhealthy
    pub unhealthy_threshold: u32,
    /// Success ratio a provider must stay above
    pub min_success_ratio: f64,
    /// Requests needed before the ratio rule applies
    pub min_requests_for_ratio: u64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            min_success_ratio: 0.8,
            min_requests_for_ratio: 5,
        }
    }
}

// ============================================================================
// Health Monitor
// ============================================================================

/// Tracks health of multiple data providers.
#[derive(Default)]
pub struct HealthMonitor {
    /// Health status for each provider (keyed by name)
    health: RwLock<HashMap<String, ProviderHealth>>,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    /// Create a new health monitor with default config
    pub fn new() -> Self {
        Self::with_config(HealthMonitorConfig::default())
    }

    /// Create a new health monitor with custom config
    pub fn with_config(config: HealthMonitorConfig) -> Self {
        Self {
            health: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a provider for health tracking
    pub async fn register_provider(&self, name: &str) {
        let mut health = self.health.write().await;
        if !health.contains_key(name) {
            health.insert(name.to_string(), ProviderHealth::new(name));
            debug!(provider = name, "Registered provider for health monitoring");
        }
    }

    /// Check if a provider is currently healthy. Unknown providers are not.
    pub async fn is_healthy(&self, name: &str) -> bool {
        let health = self.health.read().await;
        health.get(name).map(|h| h.healthy).unwrap_or(false)
    }

    /// Get health status for a provider
    pub async fn get_health(&self, name: &str) -> Option<ProviderHealth> {
        let health = self.health.read().await;
        health.get(name).cloned()
    }

    /// Get health status for all providers, sorted by name
    pub async fn get_all_health(&self) -> Vec<ProviderHealth> {
        let health = self.health.read().await;
        let mut all: Vec<_> = health.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Record a successful request to a provider
    pub async fn record_success(&self, name: &str) {
        let mut health = self.health.write().await;
        let status = health
            .entry(name.to_string())
            .or_insert_with(|| ProviderHealth::new(name));
        if !status.healthy {
            info!(provider = name, "Provider recovered");
        }
        status.record_success(&self.config);
    }

    /// Record a failed request to a provider
    pub async fn record_failure(&self, name: &str, error: &str) {
        let mut health = self.health.write().await;
        health
            .entry(name.to_string())
            .or_insert_with(|| ProviderHealth::new(name))
            .record_failure(error, &self.config);
    }
}

// ============================================================================
// Tests
// ============================================================================
