use crate::error::Result;
use crate::kv::KvStore;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::hash::Hash;
use std::num::NonZeroUsize;

pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Write-through cache in front of another store.
///
/// Reads populate a bounded LRU on miss. `put`, `remove`, `clear` and `compute` hit the inner
/// store first and then the cache, all under an exclusive gate, so a reader never sees a
/// half-applied write and every write is visible to the next `get`.
pub struct CachedStore<K: Hash + Eq, V, S> {
    inner: S,
    cache: Mutex<LruCache<K, V>>,
    gate: RwLock<()>,
}

impl<K: Hash + Eq, V, S> CachedStore<K, V, S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
            gate: RwLock::new(()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }
}

impl<K, V, S> KvStore<K, V> for CachedStore<K, V, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
    S: KvStore<K, V>,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        let _read = self.gate.read();
        if let Some(value) = self.cache.lock().get(key) {
            return Ok(Some(value.clone()));
        }
        let value = self.inner.get(key)?;
        if let Some(value) = &value {
            self.cache.lock().put(key.clone(), value.clone());
        }
        Ok(value)
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        let _write = self.gate.write();
        self.inner.put(key.clone(), value.clone())?;
        self.cache.lock().put(key, value);
        Ok(())
    }

    fn contains(&self, key: &K) -> Result<bool> {
        let _read = self.gate.read();
        if self.cache.lock().contains(key) {
            return Ok(true);
        }
        self.inner.contains(key)
    }

    fn remove(&self, key: &K) -> Result<Option<V>> {
        let _write = self.gate.write();
        let previous = self.inner.remove(key)?;
        self.cache.lock().pop(key);
        Ok(previous)
    }

    fn clear(&self) -> Result<()> {
        let _write = self.gate.write();
        self.inner.clear()?;
        self.cache.lock().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<K>> {
        let _read = self.gate.read();
        self.inner.keys()
    }

    fn values(&self) -> Result<Vec<V>> {
        let _read = self.gate.read();
        self.inner.values()
    }

    fn entries(&self) -> Result<Vec<(K, V)>> {
        let _read = self.gate.read();
        self.inner.entries()
    }

    fn len(&self) -> Result<usize> {
        let _read = self.gate.read();
        self.inner.len()
    }

    fn compute(&self, key: &K, f: &mut dyn FnMut(Option<V>) -> Option<V>) -> Result<Option<V>> {
        let _write = self.gate.write();
        let updated = self.inner.compute(key, f)?;
        let mut cache = self.cache.lock();
        match &updated {
            Some(value) => {
                cache.put(key.clone(), value.clone());
            }
            None => {
                cache.pop(key);
            }
        }
        Ok(updated)
    }

    fn flush(&self) -> Result<()> {
        let _write = self.gate.write();
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn writes_reach_both_layers() {
        let store = CachedStore::new(MemoryStore::<String, u64>::new(), 2);
        store.put("a".into(), 1).unwrap();
        assert_eq!(store.inner().get(&"a".into()).unwrap(), Some(1));
        assert_eq!(store.get(&"a".into()).unwrap(), Some(1));

        store.remove(&"a".into()).unwrap();
        assert_eq!(store.get(&"a".into()).unwrap(), None);
        assert_eq!(store.inner().get(&"a".into()).unwrap(), None);
    }

    #[test]
    fn evicted_entries_are_reloaded_from_inner() {
        let store = CachedStore::new(MemoryStore::<String, u64>::new(), 2);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            store.put(key.to_string(), i as u64).unwrap();
        }
        assert_eq!(store.cached_len(), 2);
        assert_eq!(store.get(&"a".into()).unwrap(), Some(0));
        assert_eq!(store.len().unwrap(), 3);
    }

    #[test]
    fn clear_empties_cache() {
        let store = CachedStore::new(MemoryStore::<String, u64>::new(), 8);
        store.put("a".into(), 1).unwrap();
        store.clear().unwrap();
        assert_eq!(store.cached_len(), 0);
        assert_eq!(store.get(&"a".into()).unwrap(), None);
    }
}
