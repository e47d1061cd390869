//! Serialized cache tier.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::CacheKey;
use crate::infrastructure::config::CacheConfig;

/// Byte-level cache shared by every kind. Implementations must be
/// thread-safe; a lost or expired entry is only ever a miss.
pub trait BackingCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Arc<[u8]>>;

    fn put(&self, key: CacheKey, bytes: Vec<u8>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory backing cache bounded by entry count and age.
pub struct MemoryBackingCache {
    entries: DashMap<CacheKey, (Instant, Arc<[u8]>)>,
    /// `None` keeps entries until they are pushed out by size.
    ttl: Option<Duration>,
    max_entries: usize,
}

impl MemoryBackingCache {
    #[must_use]
    pub fn new(max_entries: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        let ttl = (config.backing_ttl_secs > 0).then(|| Duration::from_secs(config.backing_ttl_secs));
        Self::new(config.backing_max_entries, ttl)
    }

    fn expired(&self, inserted: Instant, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.duration_since(inserted) >= ttl)
    }

    fn gc(&self) {
        let now = Instant::now();
        if self.ttl.is_some() {
            self.entries
                .retain(|_, (inserted, _)| !self.expired(*inserted, now));
        }

        if self.entries.len() > self.max_entries {
            let mut entries: Vec<(CacheKey, Instant)> = self
                .entries
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().0))
                .collect();
            entries.sort_by(|a, b| a.1.cmp(&b.1));
            let to_remove = entries.len().saturating_sub(self.max_entries);
            debug!(to_remove, "Trimming backing cache");
            for (key, _) in entries.into_iter().take(to_remove) {
                self.entries.remove(&key);
            }
        }
    }
}

impl BackingCache for MemoryBackingCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<[u8]>> {
        let now = Instant::now();
        let hit = self.entries.get(key).and_then(|entry| {
            let (inserted, bytes) = entry.value();
            (!self.expired(*inserted, now)).then(|| Arc::clone(bytes))
        });
        if hit.is_none() {
            self.entries
                .remove_if(key, |_, (inserted, _)| self.expired(*inserted, now));
        }
        hit
    }

    fn put(&self, key: CacheKey, bytes: Vec<u8>) {
        self.entries.insert(key, (Instant::now(), Arc::from(bytes)));
        if self.entries.len() > self.max_entries {
            self.gc();
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
