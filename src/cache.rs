//! In-process caches: enrichment records per item, and provider lookups per
//! external identifier.
//!
//! Both live for the lifetime of the owning scheduler. Locks are never held
//! across an `.await`, so every read-modify-write is atomic with respect to
//! other tasks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

use crate::model::{EnrichmentRecord, Field, FieldPatch, ItemKey};

// ---------------------------------------------------------------------------
// Result cache
// ---------------------------------------------------------------------------

/// Best-known enrichment record per item key. No eviction.
#[derive(Default)]
pub struct ResultCache {
    records: Mutex<HashMap<ItemKey, EnrichmentRecord>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ItemKey) -> Option<EnrichmentRecord> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Store the primary record for a key, replacing nothing that exists.
    ///
    /// Returns the record now cached. If an entry already exists the primary
    /// stage lost a race it should not have been in; the existing entry wins.
    pub fn insert_primary(&self, key: &ItemKey, record: EnrichmentRecord) -> EnrichmentRecord {
        self.lock().entry(key.clone()).or_insert(record).clone()
    }

    /// Merge patches into the current record.
    ///
    /// Always operates on the record as it is now, never on a copy taken
    /// before a suspension point. Returns the updated record and the fields
    /// that actually changed, or `None` if the key is not cached.
    pub fn merge(&self, key: &ItemKey, patches: &[FieldPatch]) -> Option<(EnrichmentRecord, Vec<Field>)> {
        let mut records = self.lock();
        let record = records.get_mut(key)?;
        let mut changed = Vec::new();
        for patch in patches {
            if record.apply(patch) && !changed.contains(&patch.field()) {
                changed.push(patch.field());
            }
        }
        Some((record.clone(), changed))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ItemKey, EnrichmentRecord>> {
        // A poisoned map is still a consistent map: every mutation is a
        // single insert or field assignment.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Provider cache
// ---------------------------------------------------------------------------

/// Outcome of one remote lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    /// The provider answered with a value.
    Found(V),
    /// The provider answered, and there is nothing there.
    Miss,
    /// Network error, timeout, or malformed response.
    Failed,
}

impl<V> Lookup<V> {
    pub fn found(self) -> Option<V> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::Miss | Lookup::Failed => None,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Lookup::Found(_) => "found",
            Lookup::Miss => "miss",
            Lookup::Failed => "failed",
        }
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::Miss => Lookup::Miss,
            Lookup::Failed => Lookup::Failed,
        }
    }
}

/// A cached provider answer. Absence from the map means "not yet looked up".
#[derive(Debug, Clone, PartialEq)]
pub enum Cached<V> {
    Found(V),
    Miss,
}

/// Per-provider lookup cache keyed by `(provider, kind, external id)`.
pub struct ProviderCache<K, V> {
    entries: Mutex<HashMap<K, Cached<V>>>,
}

impl<K, V> Default for ProviderCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> ProviderCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<Cached<V>> {
        self.lock().get(key).cloned()
    }

    /// Record a lookup outcome. Failures are remembered as misses so the same
    /// identifier is not retried for the lifetime of the cache.
    pub fn record(&self, key: K, outcome: &Lookup<V>) {
        let cached = match outcome {
            Lookup::Found(v) => Cached::Found(v.clone()),
            Lookup::Miss | Lookup::Failed => Cached::Miss,
        };
        self.lock().insert(key, cached);
    }

    /// Record a value without going through a lookup (e.g. an embedded id).
    pub fn put(&self, key: K, value: V) {
        self.lock().insert(key, Cached::Found(value));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, Cached<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
