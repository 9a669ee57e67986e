//! Incremental project sync.
//!
//! A [`SyncPipeline`] owns the per-project [`SyncStatusService`], the hook registries and the
//! storage context. Each call to [`SyncPipeline::sync`] queries a [`bsync_bsp::BuildServer`],
//! diffs target hashes against the last persisted snapshot, lets the registered [`SyncHook`]s fill
//! their [`ProjectStructureDiff`] slots for the invalidated targets and applies the slots.
//!
//! ```no_run
//! # async fn run(server: &mut dyn bsync_bsp::BuildServer) -> anyhow::Result<()> {
//! use bsync_storage::StorageContext;
//! use bsync_sync::{ModuleSyncHook, ProjectInfo, SyncPipeline, SyncScope, WorkspaceModel};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let mut pipeline = SyncPipeline::new(ProjectInfo::new("app", "/ws"), StorageContext::in_memory());
//! pipeline.register_sync_hook(Arc::new(ModuleSyncHook::new(Arc::new(WorkspaceModel::in_memory()))))?;
//! let result = pipeline
//!     .sync(server, SyncScope::SecondPhaseSync, CancellationToken::new())
//!     .await?;
//! println!("{:?}", result.outcome);
//! # Ok(())
//! # }
//! ```

mod diff;
mod error;
mod hooks;
mod model;
mod module_diff;
mod pipeline;
mod result;
mod scope;
mod status;
mod target_utils;

pub use bsync_config::DiffApplyPolicy;
pub use diff::{AllProjectStructuresDiff, ApplyContext, ApplyReport, ProjectStructureDiff};
pub use error::{Result, SyncError};
pub use hooks::{
    Hook, HookContext, HookRegistry, PostSyncHook, PreSyncHook, ProjectInfo, SyncEnv, SyncHook,
};
pub use model::{Library, Module, ProjectModel, WorkspaceModel};
pub use module_diff::{
    library_for_target, module_for_target, ModuleDiff, ModuleSyncHook, MODULE_SYNC_HOOK_ID,
};
pub use pipeline::SyncPipeline;
pub use result::{SyncFailure, SyncOutcome, SyncPhase, SyncResult, SyncStats};
pub use scope::{PartialTargets, ResolvedScope, SyncScope};
pub use status::{SyncState, SyncStatusService, SyncTicket};
pub use target_utils::{
    TargetSummary, TargetUtils, TargetUtilsDiff, TargetUtilsSyncHook, TARGET_UTILS_SYNC_HOOK_ID,
};
