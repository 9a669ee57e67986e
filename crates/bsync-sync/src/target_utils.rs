//! Persisted lookups over synced targets: per-target summary, file ownership and the set of
//! runnable targets.

use crate::diff::{ApplyContext, ProjectStructureDiff};
use crate::hooks::{Hook, HookContext, SyncEnv, SyncHook};
use async_trait::async_trait;
use bsync_core::{Label, TargetInfo};
use bsync_storage::{
    BincodeCodec, FlatStore, LabelCodec, OneToManyIndex, OneToOneIndex, Result, SetCodec,
    StorageContext, StringCodec,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const TARGET_UTILS_SYNC_HOOK_ID: &str = "bsync.target_utils";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub kind: String,
    pub language: String,
    pub executable: bool,
    pub manual: bool,
}

impl TargetSummary {
    pub fn of(target: &TargetInfo) -> Self {
        Self {
            kind: target.kind.clone(),
            language: target.language_id().to_string(),
            executable: target.is_executable(),
            manual: target.is_manual(),
        }
    }
}

/// Storage-backed target lookups.
pub struct TargetUtils {
    summaries: OneToOneIndex<Label, TargetSummary>,
    target_files: OneToOneIndex<Label, BTreeSet<String>>,
    file_targets: OneToManyIndex<String, Label>,
    executables: FlatStore<BTreeSet<Label>>,
}

impl std::fmt::Debug for TargetUtils {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetUtils").finish_non_exhaustive()
    }
}

impl TargetUtils {
    pub fn open(ctx: &StorageContext) -> Result<Self> {
        Ok(Self {
            summaries: OneToOneIndex::new(ctx.open_kv(
                "target_summaries",
                LabelCodec,
                BincodeCodec::<TargetSummary>::new(),
            )?),
            target_files: OneToOneIndex::new(ctx.open_kv(
                "target_files",
                LabelCodec,
                SetCodec(StringCodec),
            )?),
            file_targets: OneToManyIndex::new(
                ctx.open_hashed_kv::<String, BTreeSet<Label>>("file_targets", SetCodec(LabelCodec))?,
            ),
            executables: ctx.open_flat("executable_targets", SetCodec(LabelCodec))?,
        })
    }

    pub fn summary(&self, label: &Label) -> Result<Option<TargetSummary>> {
        self.summaries.get(label)
    }

    /// Targets listing `file` among their sources or resources.
    pub fn targets_for_file(&self, file: &str) -> Result<Vec<Label>> {
        self.file_targets.get(&file.to_string())
    }

    pub fn files_of(&self, label: &Label) -> Result<BTreeSet<String>> {
        Ok(self.target_files.get(label)?.unwrap_or_default())
    }

    pub fn executable_targets(&self) -> BTreeSet<Label> {
        self.executables.get().unwrap_or_default()
    }

    /// Store what is known about `label`, replacing any earlier record.
    pub fn record(&self, label: &Label, summary: TargetSummary, files: BTreeSet<String>) -> Result<()> {
        self.unlink_files(label)?;
        for file in &files {
            self.file_targets.add(file, [label.clone()])?;
        }
        let executable = summary.executable;
        self.target_files.set(label.clone(), files)?;
        self.summaries.set(label.clone(), summary)?;
        self.executables.modify(|current| {
            let mut set = current.unwrap_or_default();
            if executable {
                set.insert(label.clone());
            } else {
                set.remove(label);
            }
            set
        })?;
        Ok(())
    }

    pub fn forget(&self, label: &Label) -> Result<()> {
        self.unlink_files(label)?;
        self.target_files.invalidate(label)?;
        self.summaries.invalidate(label)?;
        self.executables.modify(|current| {
            let mut set = current.unwrap_or_default();
            set.remove(label);
            set
        })?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.summaries.invalidate_all()?;
        self.target_files.invalidate_all()?;
        self.file_targets.invalidate_all()?;
        self.executables.clear()
    }

    fn unlink_files(&self, label: &Label) -> Result<()> {
        if let Some(previous) = self.target_files.get(label)? {
            for file in previous {
                self.file_targets.invalidate_value(&file, label)?;
            }
        }
        Ok(())
    }
}

/// Pending [`TargetUtils`] updates.
pub struct TargetUtilsDiff {
    utils: Arc<TargetUtils>,
    updates: BTreeMap<Label, (TargetSummary, BTreeSet<String>)>,
    removed: BTreeSet<Label>,
}

impl TargetUtilsDiff {
    pub fn new(utils: Arc<TargetUtils>) -> Self {
        Self {
            utils,
            updates: BTreeMap::new(),
            removed: BTreeSet::new(),
        }
    }

    pub fn update(&mut self, target: &TargetInfo) {
        let files = target
            .srcs
            .iter()
            .chain(&target.resources)
            .cloned()
            .collect();
        self.removed.remove(&target.id);
        self.updates
            .insert(target.id.clone(), (TargetSummary::of(target), files));
    }

    pub fn remove(&mut self, label: Label) {
        self.updates.remove(&label);
        self.removed.insert(label);
    }

    pub fn len(&self) -> usize {
        self.updates.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProjectStructureDiff for TargetUtilsDiff {
    fn name(&self) -> &'static str {
        "target_utils"
    }

    fn apply(&mut self, _ctx: &ApplyContext) -> anyhow::Result<()> {
        for label in &self.removed {
            self.utils.forget(label)?;
        }
        for (label, (summary, files)) in &self.updates {
            self.utils.record(label, summary.clone(), files.clone())?;
        }
        tracing::debug!(
            target = "bsync.sync",
            updated = self.updates.len(),
            removed = self.removed.len(),
            "applied target utils diff"
        );
        Ok(())
    }
}

/// Built-in hook filling the [`TargetUtilsDiff`] slot from invalidated imported targets.
pub struct TargetUtilsSyncHook {
    utils: Arc<TargetUtils>,
}

impl TargetUtilsSyncHook {
    pub fn new(utils: Arc<TargetUtils>) -> Self {
        Self { utils }
    }
}

impl Hook for TargetUtilsSyncHook {
    fn id(&self) -> &str {
        TARGET_UTILS_SYNC_HOOK_ID
    }
}

#[async_trait]
impl SyncHook for TargetUtilsSyncHook {
    async fn on_sync(&self, _ctx: &HookContext, env: &mut SyncEnv<'_>) -> anyhow::Result<()> {
        let targets = env.invalidated_targets();
        let removed: Vec<Label> = env.hash_diff.removed.iter().cloned().collect();
        let utils = Arc::clone(&self.utils);
        let diff = env
            .diffs
            .get_or_insert_with(move || TargetUtilsDiff::new(utils));
        for label in removed {
            diff.remove(label);
        }
        for target in targets {
            diff.update(target);
        }
        Ok(())
    }
}
