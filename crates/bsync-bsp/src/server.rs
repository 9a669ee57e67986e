use crate::error::Result;
use async_trait::async_trait;
use bsync_core::{Label, TargetInfo};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;

/// The build-tool boundary the sync pipeline queries.
///
/// Every call is a suspension point: implementations race their I/O against `cancel` and the
/// idle timeout. [`BuildServer::disconnect`] must be safe to call on every exit path, including
/// after a failed or cancelled call.
#[async_trait]
pub trait BuildServer: Send {
    /// Every target in the workspace universe.
    async fn workspace_build_targets(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<TargetInfo>>;

    /// Targets known to the server that do not become IDE modules.
    async fn workspace_non_module_targets(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<TargetInfo>>;

    /// `labels` and everything they depend on.
    async fn target_infos(
        &mut self,
        labels: &[Label],
        cancel: &CancellationToken,
    ) -> Result<Vec<TargetInfo>>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Restrict `universe` to `labels` plus their transitive dependencies.
///
/// Used by servers that can only report the whole workspace.
pub fn dependency_closure(universe: Vec<TargetInfo>, labels: &[Label]) -> Vec<TargetInfo> {
    let mut by_label: BTreeMap<Label, TargetInfo> =
        universe.into_iter().map(|t| (t.id.clone(), t)).collect();
    let mut keep = BTreeSet::new();
    let mut stack: Vec<Label> = labels.to_vec();
    while let Some(label) = stack.pop() {
        if keep.contains(&label) {
            continue;
        }
        let Some(target) = by_label.get(&label) else {
            continue;
        };
        stack.extend(target.all_dependencies().cloned());
        keep.insert(label);
    }
    keep.into_iter()
        .filter_map(|label| by_label.remove(&label))
        .collect()
}
