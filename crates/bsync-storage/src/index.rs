use crate::error::Result;
use crate::kv::KvStore;
use std::collections::BTreeSet;
use std::sync::Arc;

/// `K -> set<V>` index on top of a [`KvStore`].
pub struct OneToManyIndex<K, V> {
    store: Arc<dyn KvStore<K, BTreeSet<V>>>,
}

impl<K, V> Clone for OneToManyIndex<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<K, V: Ord + Clone> OneToManyIndex<K, V> {
    pub fn new(store: Arc<dyn KvStore<K, BTreeSet<V>>>) -> Self {
        Self { store }
    }

    /// Union `values` into the set stored at `key`.
    pub fn add(&self, key: &K, values: impl IntoIterator<Item = V>) -> Result<()> {
        let mut values: Option<Vec<V>> = Some(values.into_iter().collect());
        self.store.compute(key, &mut |current| {
            let mut set = current.unwrap_or_default();
            set.extend(values.take().unwrap_or_default());
            Some(set)
        })?;
        Ok(())
    }

    /// Values at `key`, in order; empty when absent.
    pub fn get(&self, key: &K) -> Result<Vec<V>> {
        Ok(self
            .store
            .get(key)?
            .map(|set| set.into_iter().collect())
            .unwrap_or_default())
    }

    /// Drop `key`, returning the set it held.
    pub fn invalidate(&self, key: &K) -> Result<BTreeSet<V>> {
        Ok(self.store.remove(key)?.unwrap_or_default())
    }

    /// Remove one value from the set at `key`; an emptied set removes the key.
    pub fn invalidate_value(&self, key: &K, value: &V) -> Result<()> {
        self.store.compute(key, &mut |current| {
            let mut set = current?;
            set.remove(value);
            (!set.is_empty()).then_some(set)
        })?;
        Ok(())
    }

    pub fn invalidate_all(&self) -> Result<()> {
        self.store.clear()
    }
}

/// `K -> V` index on top of a [`KvStore`].
pub struct OneToOneIndex<K, V> {
    store: Arc<dyn KvStore<K, V>>,
}

impl<K, V> Clone for OneToOneIndex<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<K, V> OneToOneIndex<K, V> {
    pub fn new(store: Arc<dyn KvStore<K, V>>) -> Self {
        Self { store }
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        self.store.get(key)
    }

    /// Store `value`, returning the previous one.
    pub fn set(&self, key: K, value: V) -> Result<Option<V>> {
        let mut value = Some(value);
        let mut previous = None;
        self.store.compute(&key, &mut |current| {
            previous = current;
            value.take()
        })?;
        Ok(previous)
    }

    pub fn invalidate(&self, key: &K) -> Result<Option<V>> {
        self.store.remove(key)
    }

    pub fn invalidate_all(&self) -> Result<()> {
        self.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn one_to_many() -> OneToManyIndex<String, u32> {
        OneToManyIndex::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn add_is_set_union() {
        let index = one_to_many();
        index.add(&"src/Main.java".into(), [3, 1]).unwrap();
        index.add(&"src/Main.java".into(), [2, 3]).unwrap();
        assert_eq!(index.get(&"src/Main.java".into()).unwrap(), vec![1, 2, 3]);
        assert!(index.get(&"missing".into()).unwrap().is_empty());
    }

    #[test]
    fn invalidation_variants() {
        let index = one_to_many();
        index.add(&"a".into(), [1, 2]).unwrap();
        index.add(&"b".into(), [9]).unwrap();

        index.invalidate_value(&"a".into(), &1).unwrap();
        assert_eq!(index.get(&"a".into()).unwrap(), vec![2]);

        index.invalidate_value(&"a".into(), &2).unwrap();
        assert!(index.get(&"a".into()).unwrap().is_empty());

        let removed = index.invalidate(&"b".into()).unwrap();
        assert_eq!(removed.into_iter().collect::<Vec<_>>(), vec![9]);

        index.add(&"c".into(), [5]).unwrap();
        index.invalidate_all().unwrap();
        assert!(index.get(&"c".into()).unwrap().is_empty());
    }

    #[test]
    fn one_to_one_returns_previous() {
        let index: OneToOneIndex<String, String> = OneToOneIndex::new(Arc::new(MemoryStore::new()));
        assert_eq!(index.set("k".into(), "v1".into()).unwrap(), None);
        assert_eq!(index.set("k".into(), "v2".into()).unwrap(), Some("v1".into()));
        assert_eq!(index.invalidate(&"k".into()).unwrap(), Some("v2".into()));
    }
}
