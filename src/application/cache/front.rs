//! Process-local de-duplicating cache tier.
//!
//! At most one live instance exists per key: [`FrontCache::put_if_absent`]
//! keeps whichever value reached the key first and hands it to every later
//! caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::CacheKey;
use crate::error::Result;
use crate::infrastructure::config::{CacheConfig, FrontRetention};

/// How long the front cache keeps a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Only while some caller still holds the value.
    Weak,
    /// Strongly, evicting the oldest entries beyond `max_entries`.
    Bounded { max_entries: usize },
}

impl From<&CacheConfig> for Retention {
    fn from(config: &CacheConfig) -> Self {
        match config.front_retention {
            FrontRetention::Weak => Self::Weak,
            FrontRetention::Bounded => Self::Bounded {
                max_entries: config.front_max_entries,
            },
        }
    }
}

enum Slot<V> {
    Weak(Weak<V>),
    Strong { value: Arc<V>, seq: u64 },
}

impl<V> Slot<V> {
    fn live(&self) -> Option<Arc<V>> {
        match self {
            Self::Weak(weak) => weak.upgrade(),
            Self::Strong { value, .. } => Some(Arc::clone(value)),
        }
    }
}

pub struct FrontCache<V> {
    entries: DashMap<CacheKey, Slot<V>>,
    retention: Retention,
    seq: AtomicU64,
}

impl<V> std::fmt::Debug for FrontCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrontCache")
            .field("entries", &self.entries.len())
            .field("retention", &self.retention)
            .finish()
    }
}

impl<V> FrontCache<V> {
    #[must_use]
    pub fn new(retention: Retention) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
            seq: AtomicU64::new(0),
        }
    }

    fn slot(&self, value: &Arc<V>) -> Slot<V> {
        match self.retention {
            Retention::Weak => Slot::Weak(Arc::downgrade(value)),
            Retention::Bounded { .. } => Slot::Strong {
                value: Arc::clone(value),
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
            },
        }
    }

    /// The live value under `key`. A reclaimed entry is dropped on the way.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<V>> {
        let live = self.entries.get(key).and_then(|slot| slot.live());
        if live.is_none() {
            self.entries.remove_if(key, |_, slot| slot.live().is_none());
        }
        live
    }

    /// Insert `value` unless a live value is already present, and return
    /// the value that ends up cached.
    pub fn put_if_absent(&self, key: CacheKey, value: Arc<V>) -> Arc<V> {
        let winner = match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => match occupied.get().live() {
                Some(existing) => {
                    trace!(key = %occupied.key(), "Front cache kept existing value");
                    return existing;
                }
                None => {
                    occupied.insert(self.slot(&value));
                    value
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(self.slot(&value));
                value
            }
        };
        if let Retention::Bounded { max_entries } = self.retention {
            if self.entries.len() > max_entries {
                self.evict_oldest(max_entries);
            }
        }
        winner
    }

    /// Cached value for `key`, computing and inserting it on a miss.
    ///
    /// Concurrent misses may each compute; all callers still receive the
    /// single value that won the insertion.
    ///
    /// # Errors
    /// Returns the error of `compute`; nothing is cached in that case.
    pub fn get_or_insert_with(
        &self,
        key: CacheKey,
        compute: impl FnOnce() -> Result<Arc<V>>,
    ) -> Result<Arc<V>> {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = compute()?;
        Ok(self.put_if_absent(key, value))
    }

    /// Drop entries whose values have been reclaimed. Returns how many went.
    pub fn purge(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.live().is_some());
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self, max_entries: usize) {
        let mut aged: Vec<(CacheKey, u64)> = self
            .entries
            .iter()
            .map(|entry| {
                let seq = match entry.value() {
                    Slot::Strong { seq, .. } => *seq,
                    Slot::Weak(_) => 0,
                };
                (entry.key().clone(), seq)
            })
            .collect();
        aged.sort_by_key(|(_, seq)| *seq);
        let surplus = aged.len().saturating_sub(max_entries);
        for (key, _) in aged.into_iter().take(surplus) {
            self.entries.remove(&key);
        }
    }
}
