//! The "CACHE" Engine - Session-Scoped Payload Store
//!
//! Keeps raw downloaded payloads (JSON documents, model bytes) for the lifetime
//! of one viewer session so that reloading an asset never costs a second
//! network round trip.
//!
//! Writes may fail when an optional byte quota is exhausted. A failed write
//! poisons its key: every later `get` of that key is a miss, and the system
//! keeps working without the speed-up.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use traverse_env::{AssetPayload, Timestamp};

/// Configuration for the SessionCache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum total payload size in bytes (default: unlimited)
    pub max_bytes: Option<usize>,
}

/// One stored payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Logical asset name
    pub key: String,

    /// Stored payload, returned verbatim by `get`
    pub payload: AssetPayload,

    /// Context time at which the payload was stored
    pub loaded_at: Timestamp,

    /// Footprint counted against the quota
    size_bytes: usize,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub failed_writes: u64,
}

/// Errors that can occur when writing to the cache.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("Quota exceeded storing {key}: {needed} bytes needed, {available} available")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    #[error("Key {0} is disabled after an earlier failed write")]
    Poisoned(String),
}

/// Session-scoped key/value store for raw payloads.
///
/// Created at viewer mount, cleared at unmount. Entries are only invalidated
/// mid-session when their consumer rejects them; a forced reload overwrites
/// them (last write wins).
#[derive(Debug, Default)]
pub struct SessionCache {
    config: CacheConfig,
    entries: HashMap<String, CacheEntry>,
    poisoned: HashSet<String>,
    used_bytes: usize,
    stats: CacheStats,
}

impl SessionCache {
    /// Creates an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Creates an unlimited cache.
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Looks up a payload.
    ///
    /// Returns exactly the payload stored by the last successful `put` of this
    /// key, or `None` on a miss (including poisoned keys).
    pub fn get(&mut self, key: &str) -> Option<AssetPayload> {
        if self.poisoned.contains(key) {
            self.stats.misses += 1;
            return None;
        }

        match self.entries.get(key) {
            Some(entry) => {
                self.stats.hits += 1;
                Some(entry.payload.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Returns the stored entry without touching the statistics.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        if self.poisoned.contains(key) {
            return None;
        }
        self.entries.get(key)
    }

    /// Stores a payload, replacing any previous value for `key`.
    ///
    /// On quota exhaustion the key is poisoned and any previous value for it
    /// is dropped, so the key reads as a miss from then on.
    pub fn put(
        &mut self,
        key: &str,
        payload: AssetPayload,
        loaded_at: Timestamp,
    ) -> Result<(), CacheError> {
        if self.poisoned.contains(key) {
            self.stats.failed_writes += 1;
            return Err(CacheError::Poisoned(key.to_string()));
        }

        let size_bytes = payload.size_bytes();
        let replaced = self.entries.get(key).map_or(0, |e| e.size_bytes);
        let used_without = self.used_bytes - replaced;

        if let Some(max_bytes) = self.config.max_bytes {
            if used_without + size_bytes > max_bytes {
                if let Some(old) = self.entries.remove(key) {
                    self.used_bytes -= old.size_bytes;
                }
                self.poisoned.insert(key.to_string());
                self.stats.failed_writes += 1;
                return Err(CacheError::QuotaExceeded {
                    key: key.to_string(),
                    needed: size_bytes,
                    available: max_bytes.saturating_sub(used_without),
                });
            }
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                payload,
                loaded_at,
                size_bytes,
            },
        );
        self.used_bytes = used_without + size_bytes;
        self.stats.writes += 1;
        Ok(())
    }

    /// Drops the entry for `key`, returning whether one was stored.
    ///
    /// Poisoned keys stay poisoned.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(old) => {
                self.used_bytes -= old.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Whether `key` currently holds a readable entry.
    pub fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    /// Whether `key` was disabled by a failed write.
    pub fn is_poisoned(&self, key: &str) -> bool {
        self.poisoned.contains(key)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total payload bytes counted against the quota.
    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drops every entry and forgets poisoned keys (viewer unmount).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.poisoned.clear();
        self.used_bytes = 0;
        self.stats = CacheStats::default();
    }
}
