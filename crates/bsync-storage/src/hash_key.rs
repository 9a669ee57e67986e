use crate::error::{Result, StorageError};
use crate::kv::KvStore;
use bsync_core::{Hash128, HashInto};
use std::marker::PhantomData;

/// Exposes a `KvStore<Hash128, V>` as a `KvStore<K, V>` by hashing every key.
///
/// Only the 128-bit hashes are retained, so [`KvStore::keys`] and [`KvStore::entries`] fail with
/// [`StorageError::Unsupported`] instead of handing out hashes in place of keys.
pub struct HashKeyStore<K: ?Sized, V, S> {
    inner: S,
    _marker: PhantomData<fn(&K) -> V>,
}

impl<K: ?Sized, V, S> HashKeyStore<K, V, S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<K, V, S> KvStore<K, V> for HashKeyStore<K, V, S>
where
    K: HashInto,
    S: KvStore<Hash128, V>,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        self.inner.get(&Hash128::of(key))
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        self.inner.put(Hash128::of(&key), value)
    }

    fn contains(&self, key: &K) -> Result<bool> {
        self.inner.contains(&Hash128::of(key))
    }

    fn remove(&self, key: &K) -> Result<Option<V>> {
        self.inner.remove(&Hash128::of(key))
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }

    fn keys(&self) -> Result<Vec<K>> {
        Err(StorageError::unsupported("keys"))
    }

    fn values(&self) -> Result<Vec<V>> {
        self.inner.values()
    }

    fn entries(&self) -> Result<Vec<(K, V)>> {
        Err(StorageError::unsupported("entries"))
    }

    fn len(&self) -> Result<usize> {
        self.inner.len()
    }

    fn compute(&self, key: &K, f: &mut dyn FnMut(Option<V>) -> Option<V>) -> Result<Option<V>> {
        self.inner.compute(&Hash128::of(key), f)
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}
