//! Per-session cache of the most recent observation per search.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use medcalc_core::CacheConfig;
use serde_json::Value;

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: DateTime<Utc>,
    observation: Value,
}

/// Observations keyed by the vendor query that produced them.
///
/// Query strings already carry the patient scope and the code, so one key
/// never mixes patients.
#[derive(Debug, Clone)]
pub struct ObservationCache {
    ttl: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl Default for ObservationCache {
    fn default() -> Self {
        Self::new(CacheConfig::default().ttl_seconds)
    }
}

impl ObservationCache {
    pub fn new(ttl_seconds: u64) -> Self {
        let ttl_seconds = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        Self {
            ttl: Duration::try_seconds(ttl_seconds).unwrap_or(Duration::MAX),
            entries: HashMap::new(),
        }
    }

    /// Cache built from configuration, `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config.enabled.then(|| Self::new(config.ttl_seconds))
    }

    /// Fresh entry for `key` as of `now`.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<&Value> {
        self.entries
            .get(key)
            .filter(|entry| now - entry.stored_at < self.ttl)
            .map(|entry| &entry.observation)
    }

    /// Store `observation`, dropping entries that expired by `now`.
    pub fn insert(&mut self, key: impl Into<String>, observation: Value, now: DateTime<Utc>) {
        self.prune(now);
        self.entries.insert(
            key.into(),
            CacheEntry {
                stored_at: now,
                observation,
            },
        );
    }

    /// Drop expired entries.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.stored_at < ttl);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
