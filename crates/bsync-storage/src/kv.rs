use crate::error::Result;

/// Minimal associative-store capability shared by every backend and adapter.
///
/// Implementations must give read-after-write consistency on one instance: once `put`, `remove`
/// or `clear` returns, every subsequent `get` on the same store observes it. [`KvStore::compute`]
/// is the atomic read-modify-write primitive; concurrent calls on one key never lose an update.
pub trait KvStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Result<Option<V>>;

    fn put(&self, key: K, value: V) -> Result<()>;

    fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Remove `key`, returning the previous value.
    fn remove(&self, key: &K) -> Result<Option<V>>;

    fn clear(&self) -> Result<()>;

    fn keys(&self) -> Result<Vec<K>>;

    fn values(&self) -> Result<Vec<V>>;

    fn entries(&self) -> Result<Vec<(K, V)>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Atomically replace the value at `key` with `f(current)`.
    ///
    /// Returning `None` removes the entry. The returned value is what the store holds afterwards.
    fn compute(&self, key: &K, f: &mut dyn FnMut(Option<V>) -> Option<V>) -> Result<Option<V>>;

    /// Persist buffered writes. In-memory stores have nothing to do.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Convenience wrappers over [`KvStore::compute`].
pub trait KvStoreExt<K, V>: KvStore<K, V> {
    /// Update an existing or missing entry; the closure always produces a value.
    fn modify(&self, key: &K, f: impl FnOnce(Option<V>) -> V) -> Result<V> {
        let mut f = Some(f);
        let updated = self.compute(key, &mut |current| f.take().map(|f| f(current)))?;
        updated.ok_or_else(|| {
            crate::StorageError::Backend("compute dropped a value produced by modify".into())
        })
    }

    fn get_or_insert_with(&self, key: &K, f: impl FnOnce() -> V) -> Result<V> {
        self.modify(key, |current| current.unwrap_or_else(f))
    }
}

impl<K, V, S: KvStore<K, V> + ?Sized> KvStoreExt<K, V> for S {}

impl<K, V, S: KvStore<K, V> + ?Sized> KvStore<K, V> for std::sync::Arc<S> {
    fn get(&self, key: &K) -> Result<Option<V>> {
        (**self).get(key)
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        (**self).put(key, value)
    }

    fn contains(&self, key: &K) -> Result<bool> {
        (**self).contains(key)
    }

    fn remove(&self, key: &K) -> Result<Option<V>> {
        (**self).remove(key)
    }

    fn clear(&self) -> Result<()> {
        (**self).clear()
    }

    fn keys(&self) -> Result<Vec<K>> {
        (**self).keys()
    }

    fn values(&self) -> Result<Vec<V>> {
        (**self).values()
    }

    fn entries(&self) -> Result<Vec<(K, V)>> {
        (**self).entries()
    }

    fn len(&self) -> Result<usize> {
        (**self).len()
    }

    fn compute(&self, key: &K, f: &mut dyn FnMut(Option<V>) -> Option<V>) -> Result<Option<V>> {
        (**self).compute(key, f)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}
