//! Collaborators that run around the sync pipeline's phases.
//!
//! Hooks are registered explicitly at startup and run in registration order. A hook that fails is
//! logged and recorded as a partial failure of the sync; it never aborts the pipeline.

use crate::diff::AllProjectStructuresDiff;
use crate::error::{Result, SyncError};
use crate::result::{SyncFailure, SyncPhase, SyncResult};
use crate::scope::SyncScope;
use async_trait::async_trait;
use bsync_core::{Label, TargetInfo};
use bsync_graph::DependencyGraph;
use bsync_hash::HashDiff;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The project a sync runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub name: String,
    pub workspace_root: PathBuf,
}

impl ProjectInfo {
    pub fn new(name: impl Into<String>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            workspace_root: workspace_root.into(),
        }
    }
}

/// What every hook is handed.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub project: ProjectInfo,
    pub scope: SyncScope,
    pub cancel: CancellationToken,
}

pub trait Hook: Send + Sync {
    fn id(&self) -> &str;

    fn is_enabled(&self, _project: &ProjectInfo) -> bool {
        true
    }

    /// Narrows which scopes the hook runs for, e.g. skipping partial syncs.
    fn is_applicable(&self, _scope: &SyncScope) -> bool {
        true
    }
}

#[async_trait]
pub trait PreSyncHook: Hook {
    async fn on_pre_sync(&self, ctx: &HookContext) -> anyhow::Result<()>;
}

/// Resolved state a [`SyncHook`] turns into project structure diffs.
pub struct SyncEnv<'a> {
    pub graph: &'a DependencyGraph,
    /// Targets imported at the requested depth, sorted by label.
    pub imported: &'a [&'a TargetInfo],
    /// Boundary dependencies of the imported targets.
    pub direct_dependencies: &'a [&'a TargetInfo],
    pub hash_diff: &'a HashDiff,
    /// Imported targets whose hash or dependency hashes changed.
    pub invalidated: &'a BTreeSet<Label>,
    pub diffs: &'a mut AllProjectStructuresDiff,
    failures: &'a mut Vec<SyncFailure>,
}

impl<'a> SyncEnv<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        imported: &'a [&'a TargetInfo],
        direct_dependencies: &'a [&'a TargetInfo],
        hash_diff: &'a HashDiff,
        invalidated: &'a BTreeSet<Label>,
        diffs: &'a mut AllProjectStructuresDiff,
        failures: &'a mut Vec<SyncFailure>,
    ) -> Self {
        Self {
            graph,
            imported,
            direct_dependencies,
            hash_diff,
            invalidated,
            diffs,
            failures,
        }
    }

    /// Exclude `target` from this sync. It stays dirty and is retried by the next one.
    pub fn target_failed(&mut self, target: Label, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(
            target = "bsync.sync",
            label = %target,
            error = %message,
            "failed to resolve target"
        );
        self.failures
            .push(SyncFailure::for_target(target, SyncPhase::Resolve, message));
    }

    /// Targets reported through [`SyncEnv::target_failed`] so far.
    pub fn failed_targets(&self) -> impl Iterator<Item = &Label> + '_ {
        self.failures.iter().filter_map(|f| f.target.as_ref())
    }

    /// Imported targets that need re-resolving.
    pub fn invalidated_targets(&self) -> Vec<&'a TargetInfo> {
        let invalidated = self.invalidated;
        self.imported
            .iter()
            .copied()
            .filter(|t| invalidated.contains(&t.id))
            .collect()
    }

    /// Invalidated direct dependencies.
    pub fn invalidated_dependencies(&self) -> Vec<&'a TargetInfo> {
        let invalidated = self.invalidated;
        self.direct_dependencies
            .iter()
            .copied()
            .filter(|t| invalidated.contains(&t.id))
            .collect()
    }
}

#[async_trait]
pub trait SyncHook: Hook {
    /// Record changes into the diff slots of `env`; nothing is applied yet.
    async fn on_sync(&self, ctx: &HookContext, env: &mut SyncEnv<'_>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait PostSyncHook: Hook {
    /// Runs after apply whenever the pipeline did not abort, even with per-target failures.
    async fn on_post_sync(&self, ctx: &HookContext, result: &SyncResult) -> anyhow::Result<()>;
}

/// Ordered table of hooks of one kind.
pub struct HookRegistry<H: ?Sized + Hook> {
    hooks: Vec<Arc<H>>,
}

impl<H: ?Sized + Hook> Default for HookRegistry<H> {
    fn default() -> Self {
        Self { hooks: Vec::new() }
    }
}

impl<H: ?Sized + Hook> Clone for HookRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
        }
    }
}

impl<H: ?Sized + Hook> fmt::Debug for HookRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|h| h.id()))
            .finish()
    }
}

impl<H: ?Sized + Hook> HookRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<H>) -> Result<()> {
        let id = hook.id();
        if self.hooks.iter().any(|existing| existing.id() == id) {
            return Err(SyncError::DuplicateHook { id: id.to_string() });
        }
        self.hooks.push(hook);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.id()).collect()
    }

    /// Hooks enabled for `project` and applicable to `scope`, in registration order.
    pub fn active(&self, project: &ProjectInfo, scope: &SyncScope) -> Vec<Arc<H>> {
        self.hooks
            .iter()
            .filter(|h| h.is_enabled(project) && h.is_applicable(scope))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named {
        id: &'static str,
        full_only: bool,
        enabled_for: Option<&'static str>,
    }

    impl Hook for Named {
        fn id(&self) -> &str {
            self.id
        }

        fn is_enabled(&self, project: &ProjectInfo) -> bool {
            self.enabled_for.map_or(true, |name| project.name == name)
        }

        fn is_applicable(&self, scope: &SyncScope) -> bool {
            !self.full_only || scope.is_full()
        }
    }

    #[async_trait]
    impl PreSyncHook for Named {
        async fn on_pre_sync(&self, _ctx: &HookContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn hook(id: &'static str) -> Arc<dyn PreSyncHook> {
        Arc::new(Named {
            id,
            full_only: false,
            enabled_for: None,
        })
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry: HookRegistry<dyn PreSyncHook> = HookRegistry::new();
        registry.register(hook("env")).unwrap();
        let err = registry.register(hook("env")).unwrap_err();
        assert!(matches!(err, SyncError::DuplicateHook { id } if id == "env"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn active_hooks_respect_project_and_scope() {
        let mut registry: HookRegistry<dyn PreSyncHook> = HookRegistry::new();
        registry.register(hook("always")).unwrap();
        registry
            .register(Arc::new(Named {
                id: "full-only",
                full_only: true,
                enabled_for: None,
            }))
            .unwrap();
        registry
            .register(Arc::new(Named {
                id: "other-project",
                full_only: false,
                enabled_for: Some("other"),
            }))
            .unwrap();

        let project = ProjectInfo::new("main", "/ws");
        let ids = |scope: &SyncScope| -> Vec<String> {
            registry
                .active(&project, scope)
                .iter()
                .map(|h| h.id().to_string())
                .collect()
        };
        assert_eq!(ids(&SyncScope::SecondPhaseSync), vec!["always", "full-only"]);
        let partial = SyncScope::partial([Label::parse("//a")]).unwrap();
        assert_eq!(ids(&partial), vec!["always"]);
    }
}
