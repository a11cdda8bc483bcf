//! Keyed cache store with optional write-through persistence.
//!
//! The store lives on the event-loop thread. Fetch workers never touch it;
//! they hand results back as messages and the loop calls [`CacheStore::put`].
//! A missing entry is a normal state, so `get`/`put`/`invalidate` never fail:
//! backing-store errors are reported on stderr and, after repeated failures,
//! the store degrades to memory-only.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::entry::{Entry, Payload};
use super::key::{CacheKey, SubjectId};
use crate::core::errors::Result;

/// Consecutive backing failures tolerated before persistence is disabled.
const MAX_BACKING_FAILURES: u32 = 3;

/// Persistent storage the cache reads and writes through.
pub trait BackingStore: Send {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;
    /// Persisted entry for `key`, if any.
    fn load(&self, key: &CacheKey) -> Result<Option<Entry>>;
    /// Insert or replace the entry for its key.
    fn store(&mut self, entry: &Entry) -> Result<()>;
    /// Remove `key`. Deleting a missing key is not an error.
    fn delete(&mut self, key: &CacheKey) -> Result<()>;
    /// Every persisted entry, used to warm the in-memory map at startup.
    fn load_all(&self) -> Result<Vec<Entry>>;
}

/// Process-wide map from [`CacheKey`] to the single live [`Entry`].
#[derive(Default)]
pub struct CacheStore {
    entries: HashMap<CacheKey, Entry>,
    backing: Option<Box<dyn BackingStore>>,
    backing_failures: u32,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("backing", &self.backing.as_ref().map(|b| b.name()))
            .finish()
    }
}

impl CacheStore {
    /// Memory-only store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by `backing`, warmed with everything it already holds so a
    /// restarted process can serve hits without a device round-trip.
    #[must_use]
    pub fn with_backing(backing: Box<dyn BackingStore>) -> Self {
        let mut entries = HashMap::new();
        match backing.load_all() {
            Ok(persisted) => {
                for entry in persisted {
                    entries.insert(entry.key.clone(), entry);
                }
            }
            Err(e) => {
                eprintln!(
                    "[DPC-CACHE] failed to warm cache from {} backing store: {e}",
                    backing.name()
                );
            }
        }
        Self {
            entries,
            backing: Some(backing),
            backing_failures: 0,
        }
    }

    /// Look up the live entry for `key`. `None` is a miss, never a fault.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Store `payload` for `key` stamped with `now`.
    ///
    /// Last-write-wins by `cached_at`: if the live entry is newer than `now`
    /// (clock skew, or a result that raced an earlier write), the live entry is
    /// kept and returned unchanged.
    pub fn put(&mut self, key: CacheKey, payload: Payload, now: DateTime<Utc>) -> Entry {
        if let Some(existing) = self.entries.get(&key)
            && existing.cached_at > now
        {
            return existing.clone();
        }
        let entry = Entry::new(key.clone(), payload, now);
        self.persist(&entry);
        self.entries.insert(key, entry.clone());
        entry
    }

    /// Remove the entry for `key`, forcing the next read to miss.
    /// Returns `true` if something was removed.
    pub fn invalidate(&mut self, key: &CacheKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        self.unpersist(key);
        removed
    }

    /// Remove every entry belonging to `subject`. Returns the number removed.
    pub fn evict_subject(&mut self, subject: &SubjectId) -> usize {
        let keys: Vec<CacheKey> = self
            .entries
            .keys()
            .filter(|k| &k.subject == subject)
            .cloned()
            .collect();
        for key in &keys {
            self.invalidate(key);
        }
        keys.len()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether write-through persistence is still active.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.backing.is_some()
    }

    fn persist(&mut self, entry: &Entry) {
        let outcome = match self.backing.as_mut() {
            Some(backing) => backing.store(entry),
            None => return,
        };
        self.record_backing_outcome(outcome, "store");
    }

    fn unpersist(&mut self, key: &CacheKey) {
        let outcome = match self.backing.as_mut() {
            Some(backing) => backing.delete(key),
            None => return,
        };
        self.record_backing_outcome(outcome, "delete");
    }

    fn record_backing_outcome(&mut self, outcome: Result<()>, op: &str) {
        match outcome {
            Ok(()) => self.backing_failures = 0,
            Err(e) => {
                self.backing_failures += 1;
                eprintln!("[DPC-CACHE] backing {op} failed: {e}");
                if self.backing_failures >= MAX_BACKING_FAILURES {
                    eprintln!(
                        "[DPC-CACHE] backing store failed {} times, continuing memory-only",
                        self.backing_failures
                    );
                    self.backing = None;
                }
            }
        }
    }
}
