//! Data cache for quotes and financial statements.
//!
//! In-memory TTL cache keyed `market:<symbol>` / `financials:<symbol>` so a
//! run does not hit the providers twice for the same record.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{Financials, MarketData};

/// Default TTL in seconds.
pub const DEFAULT_TTL_SECS: i64 = 300;

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    fn new(data: T, ttl_secs: i64) -> Self {
        Self {
            data,
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[derive(Debug, Clone)]
enum Cached {
    Market(MarketData),
    Financials(Financials),
}

/// Quote and fundamentals cache
pub struct DataCache {
    entries: RwLock<HashMap<String, CacheEntry<Cached>>>,
    ttl_secs: i64,
}

impl DataCache {
    /// Create a cache with the default 300s TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL_SECS)
    }

    /// Create with custom TTL
    pub fn with_ttl(ttl_secs: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_secs,
        }
    }

    fn market_key(symbol: &str) -> String {
        format!("market:{}", symbol)
    }

    fn financials_key(symbol: &str) -> String {
        format!("financials:{}", symbol)
    }

    fn get(&self, key: &str) -> Option<Cached> {
        let cache = self.entries.read().ok()?;
        cache
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.data.clone())
    }

    fn set(&self, key: String, value: Cached) {
        let entry = CacheEntry::new(value, self.ttl_secs);
        if let Ok(mut cache) = self.entries.write() {
            cache.insert(key, entry);
        }
    }

    /// Cached quote if not expired
    pub fn get_market_data(&self, symbol: &str) -> Option<MarketData> {
        match self.get(&Self::market_key(symbol))? {
            Cached::Market(data) => Some(data),
            Cached::Financials(_) => None,
        }
    }

    pub fn set_market_data(&self, symbol: &str, data: MarketData) {
        self.set(Self::market_key(symbol), Cached::Market(data));
    }

    /// Cached statements if not expired
    pub fn get_financials(&self, symbol: &str) -> Option<Financials> {
        match self.get(&Self::financials_key(symbol))? {
            Cached::Financials(data) => Some(data),
            Cached::Market(_) => None,
        }
    }

    pub fn set_financials(&self, symbol: &str, data: Financials) {
        self.set(Self::financials_key(symbol), Cached::Financials(data));
    }

    /// Drop every record for a symbol
    pub fn invalidate(&self, symbol: &str) {
        if let Ok(mut cache) = self.entries.write() {
            cache.remove(&Self::market_key(symbol));
            cache.remove(&Self::financials_key(symbol));
        }
    }

    /// Clear all expired entries
    pub fn clear_expired(&self) {
        if let Ok(mut cache) = self.entries.write() {
            cache.retain(|_, entry| !entry.is_expired());
        }
    }

    /// Clear all cache
    pub fn clear_all(&self) {
        if let Ok(mut cache) = self.entries.write() {
            cache.clear();
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let (total, expired) = self
            .entries
            .read()
            .map(|c| {
                let total = c.len();
                let expired = c.values().filter(|e| e.is_expired()).count();
                (total, expired)
            })
            .unwrap_or((0, 0));

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
        }
    }
}

impl Default for DataCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

// ============================================================================
// Tests
// ============================================================================
