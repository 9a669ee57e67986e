use crate::cached::{CachedStore, DEFAULT_CACHE_CAPACITY};
use crate::codec::{Hash128Codec, StoreCodec};
use crate::codec_store::CodecStore;
use crate::error::{Result, StorageError};
use crate::flat::FlatStore;
use crate::hash_key::HashKeyStore;
use crate::kv::KvStore;
use crate::memory::MemoryStore;
use crate::paged::PagedStore;
use bsync_core::{Hash128, HashInto};
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hidden per-workspace directory holding every persisted store.
pub const STORAGE_DIR_NAME: &str = ".bazelbsp";

/// Backend selection for stores opened through a [`StorageContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageHints {
    InMemory,
    #[default]
    Paged,
    Redb,
}

/// Factory for named stores rooted in one directory.
#[derive(Debug, Clone)]
pub struct StorageContext {
    root: PathBuf,
    hints: StorageHints,
    cache_capacity: usize,
}

impl StorageContext {
    pub fn new(root: impl Into<PathBuf>, hints: StorageHints, cache_capacity: usize) -> Self {
        Self {
            root: root.into(),
            hints,
            cache_capacity,
        }
    }

    /// Paged stores under `<workspace_root>/.bazelbsp/`.
    pub fn for_workspace(workspace_root: &Path) -> Self {
        Self::new(
            workspace_root.join(STORAGE_DIR_NAME),
            StorageHints::Paged,
            DEFAULT_CACHE_CAPACITY,
        )
    }

    pub fn in_memory() -> Self {
        Self::new(PathBuf::new(), StorageHints::InMemory, DEFAULT_CACHE_CAPACITY)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hints(&self) -> StorageHints {
        self.hints
    }

    /// Open (or create) the store called `name`.
    ///
    /// Durable backends are wrapped in a write-through [`CachedStore`].
    pub fn open_kv<K, V>(
        &self,
        name: &str,
        key_codec: impl StoreCodec<K> + 'static,
        value_codec: impl StoreCodec<V> + 'static,
    ) -> Result<Arc<dyn KvStore<K, V>>>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        validate_name(name)?;
        let store: Arc<dyn KvStore<K, V>> = match self.hints {
            StorageHints::InMemory => Arc::new(MemoryStore::new()),
            StorageHints::Paged => {
                let backend = PagedStore::open(self.root.join(format!("{name}.kv")))?;
                Arc::new(CachedStore::new(
                    CodecStore::new(backend, key_codec, value_codec),
                    self.cache_capacity,
                ))
            }
            StorageHints::Redb => self.open_redb(name, key_codec, value_codec)?,
        };
        tracing::debug!(
            target = "bsync.storage",
            name,
            hints = ?self.hints,
            "opened key-value store"
        );
        Ok(store)
    }

    /// Like [`StorageContext::open_kv`], keyed by the 128-bit hash of `K`.
    pub fn open_hashed_kv<K, V>(
        &self,
        name: &str,
        value_codec: impl StoreCodec<V> + 'static,
    ) -> Result<Arc<dyn KvStore<K, V>>>
    where
        K: HashInto + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let inner = self.open_kv::<Hash128, V>(name, Hash128Codec, value_codec)?;
        Ok(Arc::new(HashKeyStore::<K, V, _>::new(inner)))
    }

    pub fn open_flat<T: Clone + Send + Sync + 'static>(
        &self,
        name: &str,
        codec: impl StoreCodec<T> + 'static,
    ) -> Result<FlatStore<T>> {
        validate_name(name)?;
        match self.hints {
            StorageHints::InMemory => Ok(FlatStore::in_memory(codec)),
            StorageHints::Paged | StorageHints::Redb => {
                FlatStore::open(self.root.join(format!("{name}.bin")), codec)
            }
        }
    }

    /// Delete every persisted store. Stores opened earlier must be dropped first.
    pub fn clear_all(&self) -> Result<()> {
        if self.hints == StorageHints::InMemory {
            return Ok(());
        }
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        tracing::info!(
            target = "bsync.storage",
            root = %self.root.display(),
            "cleared persisted sync state"
        );
        Ok(())
    }

    #[cfg(feature = "redb")]
    fn open_redb<K, V>(
        &self,
        name: &str,
        key_codec: impl StoreCodec<K> + 'static,
        value_codec: impl StoreCodec<V> + 'static,
    ) -> Result<Arc<dyn KvStore<K, V>>>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let backend = crate::redb_store::RedbStore::open(&self.root.join(format!("{name}.redb")))?;
        Ok(Arc::new(CachedStore::new(
            CodecStore::new(backend, key_codec, value_codec),
            self.cache_capacity,
        )))
    }

    #[cfg(not(feature = "redb"))]
    fn open_redb<K, V>(
        &self,
        _name: &str,
        _key_codec: impl StoreCodec<K> + 'static,
        _value_codec: impl StoreCodec<V> + 'static,
    ) -> Result<Arc<dyn KvStore<K, V>>> {
        Err(StorageError::Unsupported {
            operation: "redb backend (enable the `redb` feature)",
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_like_names() {
        let ctx = StorageContext::in_memory();
        for name in ["", "../escape", "a/b", ".hidden"] {
            match ctx.open_flat::<u64>(name, crate::codec::U64Codec) {
                Err(StorageError::InvalidName(_)) => {}
                other => panic!("expected invalid name for {name:?}, got {:?}", other.is_ok()),
            }
        }
    }

    #[test]
    fn workspace_context_lives_in_hidden_dir() {
        let ctx = StorageContext::for_workspace(Path::new("/ws"));
        assert_eq!(ctx.root(), Path::new("/ws/.bazelbsp"));
        assert_eq!(ctx.hints(), StorageHints::Paged);
    }
}
