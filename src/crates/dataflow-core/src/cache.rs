//! Cache Layer: memoizes compute results by fingerprint, with a
//! pluggable provider trait and an in-memory LRU default.
//!
//! Grounded on `langgraph_core::cache::Cache<K, V>`, which wraps a
//! `tokio::sync::RwLock<HashMap<K, V>>` behind an async get/put surface;
//! generalized here to add eviction and hit/miss statistics.

use crate::fingerprint::Fingerprint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Internal hit/miss/eviction counters, kept separate from the public
/// `CacheStats` projection so the provider can track raw counts without
/// recomputing a ratio on every touch.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheMetrics {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

/// Counters exposed via `ExecutableGraph::get_stats`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    pub hit_ratio: f64,
    pub size: usize,
    pub max_size: usize,
}

/// A pluggable cache backend. The default in-memory provider below is
/// sufficient for a single-process engine; callers needing a shared or
/// persistent cache implement this trait themselves.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn get(&self, key: Fingerprint) -> Option<serde_json::Value>;
    async fn put(&self, key: Fingerprint, value: serde_json::Value);
    async fn invalidate(&self, key: Fingerprint);
    async fn clear(&self);
    fn metrics(&self) -> &CacheMetrics;
    async fn stats(&self) -> CacheStats;
}

struct Entry {
    value: serde_json::Value,
    /// Monotonically increasing touch counter, used as the LRU clock.
    last_used: u64,
}

/// Default in-memory cache provider with capacity-bounded LRU eviction.
pub struct InMemoryCache {
    entries: RwLock<HashMap<Fingerprint, Entry>>,
    clock: AtomicU64,
    capacity: usize,
    metrics: CacheMetrics,
}

impl InMemoryCache {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            capacity,
            metrics: CacheMetrics::default(),
        })
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl CacheProvider for InMemoryCache {
    async fn get(&self, key: Fingerprint) -> Option<serde_json::Value> {
        let mut entries = self.entries.write().await;
        let tick = self.tick();
        if let Some(entry) = entries.get_mut(&key) {
            entry.last_used = tick;
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.value.clone())
        } else {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    async fn put(&self, key: Fingerprint, value: serde_json::Value) {
        let mut entries = self.entries.write().await;
        let tick = self.tick();
        if self.capacity > 0 && entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k)
            {
                entries.remove(&lru_key);
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        entries.insert(key, Entry { value, last_used: tick });
    }

    async fn invalidate(&self, key: Fingerprint) {
        self.entries.write().await.remove(&key);
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }

    fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    async fn stats(&self) -> CacheStats {
        let hits = self.metrics.hits();
        let misses = self.metrics.misses();
        let total = hits + misses;
        CacheStats {
            hit_ratio: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            size: self.entries.read().await.len(),
            max_size: self.capacity,
        }
    }
}

/// Config for the default in-memory cache, part of `EngineOptions`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_capacity() -> usize {
    1024
}
