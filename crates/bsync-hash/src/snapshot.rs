use crate::hasher::TargetHash;
use bsync_core::{Hash128, Label};
use bsync_storage::{Hash128Codec, KvStore, LabelCodec, Result, StorageContext};
use std::collections::BTreeMap;
use std::sync::Arc;

const SNAPSHOT_STORE: &str = "target_hashes";

/// Persisted `Label -> Hash128` map from the last successful sync.
#[derive(Clone)]
pub struct HashSnapshot {
    store: Arc<dyn KvStore<Label, Hash128>>,
}

impl HashSnapshot {
    pub fn open(ctx: &StorageContext) -> Result<Self> {
        Ok(Self {
            store: ctx.open_kv(SNAPSHOT_STORE, LabelCodec, Hash128Codec)?,
        })
    }

    pub fn from_store(store: Arc<dyn KvStore<Label, Hash128>>) -> Self {
        Self { store }
    }

    pub fn get(&self, label: &Label) -> Result<Option<Hash128>> {
        self.store.get(label)
    }

    pub fn load(&self) -> Result<BTreeMap<Label, Hash128>> {
        Ok(self.store.entries()?.into_iter().collect())
    }

    pub fn len(&self) -> Result<usize> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    /// Replace the whole snapshot. Used after a full sync.
    pub fn replace_all(&self, hashes: &[TargetHash]) -> Result<()> {
        self.store.clear()?;
        self.update(hashes, std::iter::empty::<&Label>())
    }

    /// Record fresh hashes for the synced targets and forget `removed`. Used after a partial sync.
    pub fn update<'a>(
        &self,
        hashes: &[TargetHash],
        removed: impl IntoIterator<Item = &'a Label>,
    ) -> Result<()> {
        for TargetHash { target, hash } in hashes {
            self.store.put(target.clone(), *hash)?;
        }
        for label in removed {
            self.store.remove(label)?;
        }
        self.store.flush()?;
        tracing::debug!(
            target = "bsync.hash",
            stored = hashes.len(),
            "updated hash snapshot"
        );
        Ok(())
    }
}

impl std::fmt::Debug for HashSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashSnapshot").finish_non_exhaustive()
    }
}
