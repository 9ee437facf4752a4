//! Bounded, TTL-evicted cache of "which repair rule worked for this
//! output shape" (spec §4.2). Grounded on the teacher's `Cache<K, V>`
//! trait shape (`cache/mod.rs`): get/set with an expiry, specialized
//! here to a synchronous `RwLock`-backed map since repair-rule lookups
//! never need to cross an await point, plus the bounded size and
//! age-based eviction spec §4.2 calls for explicitly.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::repair::RepairRule;

#[derive(Clone, Copy, Debug)]
pub struct PatternCacheConfig {
    pub ttl: Duration,
    pub max_size: usize,
}

impl Default for PatternCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_size: 100,
        }
    }
}

struct Entry {
    rule: RepairRule,
    inserted_at: Instant,
    hits: u64,
}

pub struct PatternCache {
    config: PatternCacheConfig,
    entries: RwLock<HashMap<String, Entry>>,
}

impl PatternCache {
    pub fn new(config: PatternCacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached rule for `key` if present and not expired.
    pub fn get(&self, key: &str) -> Option<RepairRule> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(key)?;
        if entry.inserted_at.elapsed() > self.config.ttl {
            return None;
        }
        Some(entry.rule)
    }

    /// Records a cache hit for metrics; does not refresh the entry's age.
    pub fn record_hit(&self, key: &str) {
        if let Some(entry) = self.entries.write().unwrap().get_mut(key) {
            entry.hits += 1;
        }
    }

    /// Inserts or replaces the rule for `key`, evicting expired and then
    /// oldest entries if the cache is at capacity.
    pub fn insert(&self, key: String, rule: RepairRule) {
        let mut entries = self.entries.write().unwrap();
        entries.retain(|_, e| e.inserted_at.elapsed() <= self.config.ttl);

        if entries.len() >= self.config.max_size && !entries.contains_key(&key) {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }

        entries.insert(
            key,
            Entry {
                rule,
                inserted_at: Instant::now(),
                hits: 0,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of cache occupancy and cumulative hit count (spec §6.1
    /// Output Cleaner API `get_stats`).
    pub fn stats(&self) -> PatternCacheStats {
        let entries = self.entries.read().unwrap();
        PatternCacheStats {
            size: entries.len(),
            max_size: self.config.max_size,
            total_hits: entries.values().map(|e| e.hits).sum(),
        }
    }

    /// Drops every cached repair pattern (spec §6.1 `clear_cache`).
    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PatternCacheStats {
    pub size: usize,
    pub max_size: usize,
    pub total_hits: u64,
}
