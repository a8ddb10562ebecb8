//! Caches used on the transformation path.
//!
//! [`ReadThroughCache`] fronts a store and is evicted entirely whenever the underlying data is
//! written. [`ReplaceOnMissCache`] holds derived values that never change for a key and is never
//! evicted; readers take an immutable snapshot and a miss swaps in an extended copy.

use dashmap::DashMap;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// A read-through cache with coarse "evict all" invalidation.
pub struct ReadThroughCache<K, V> {
    entries: DashMap<K, V>,
}

impl<K, V> ReadThroughCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns the cached value or loads and caches it.
    ///
    /// The loader runs without holding any shard lock, so two callers may load the same key
    /// concurrently; the later insert wins. Loader errors are not cached.
    pub fn get_or_load<E>(&self, key: &K, load: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        if let Some(entry) = self.entries.get(key) {
            return Ok(entry.value().clone());
        }
        let value = load()?;
        self.entries.insert(key.clone(), value.clone());
        Ok(value)
    }

    pub fn evict_all(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> Default for ReadThroughCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A cache of values that are computed once per key and never evicted.
pub struct ReplaceOnMissCache<K, V> {
    snapshot: RwLock<Arc<HashMap<K, V>>>,
}

impl<K, V> ReplaceOnMissCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    fn current(&self) -> Arc<HashMap<K, V>> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn get_or_insert_with(&self, key: &K, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.current().get(key) {
            return value.clone();
        }
        let value = compute();
        let mut guard = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = HashMap::clone(&guard);
        next.insert(key.clone(), value.clone());
        *guard = Arc::new(next);
        value
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }
}

impl<K, V> Default for ReplaceOnMissCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn read_through_loads_once_until_evicted() {
        let cache: ReadThroughCache<String, usize> = ReadThroughCache::new();
        let loads = Cell::new(0);
        let load = || -> Result<usize, ()> {
            loads.set(loads.get() + 1);
            Ok(42)
        };

        assert_eq!(cache.get_or_load(&"a".to_string(), load), Ok(42));
        assert_eq!(cache.get_or_load(&"a".to_string(), load), Ok(42));
        assert_eq!(loads.get(), 1);

        cache.evict_all();
        assert!(cache.is_empty());
        assert_eq!(cache.get_or_load(&"a".to_string(), load), Ok(42));
        assert_eq!(loads.get(), 2);
    }

    #[test]
    fn read_through_does_not_cache_errors() {
        let cache: ReadThroughCache<u8, u8> = ReadThroughCache::new();
        assert_eq!(cache.get_or_load(&1, || Err("down")), Err("down"));
        assert_eq!(cache.get_or_load(&1, || Ok::<_, &str>(7)), Ok(7));
    }

    #[test]
    fn replace_on_miss_keeps_earlier_snapshots_valid() {
        let cache: ReplaceOnMissCache<&str, Vec<&str>> = ReplaceOnMissCache::new();
        let before = cache.current();
        assert_eq!(cache.get_or_insert_with(&"Immunization", || vec!["vaccineCode"]), vec!["vaccineCode"]);
        assert_eq!(cache.get_or_insert_with(&"Immunization", || vec!["other"]), vec!["vaccineCode"]);
        assert!(before.is_empty());
        assert_eq!(cache.len(), 1);
    }
}
