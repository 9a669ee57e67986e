use crate::error::Result;
use crate::kv::KvStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

/// Hash-map backed store. Nothing survives the process.
pub struct MemoryStore<K, V> {
    map: RwLock<HashMap<K, V>>,
}

impl<K, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for MemoryStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KvStore<K, V> for MemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        self.map.write().insert(key, value);
        Ok(())
    }

    fn contains(&self, key: &K) -> Result<bool> {
        Ok(self.map.read().contains_key(key))
    }

    fn remove(&self, key: &K) -> Result<Option<V>> {
        Ok(self.map.write().remove(key))
    }

    fn clear(&self) -> Result<()> {
        self.map.write().clear();
        Ok(())
    }

    fn keys(&self) -> Result<Vec<K>> {
        Ok(self.map.read().keys().cloned().collect())
    }

    fn values(&self) -> Result<Vec<V>> {
        Ok(self.map.read().values().cloned().collect())
    }

    fn entries(&self) -> Result<Vec<(K, V)>> {
        Ok(self
            .map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.map.read().len())
    }

    fn compute(&self, key: &K, f: &mut dyn FnMut(Option<V>) -> Option<V>) -> Result<Option<V>> {
        let mut map = self.map.write();
        // The stored value stays in place until `f` returns.
        let updated = f(map.get(key).cloned());
        match &updated {
            Some(value) => {
                map.insert(key.clone(), value.clone());
            }
            None => {
                map.remove(key);
            }
        }
        Ok(updated)
    }
}
