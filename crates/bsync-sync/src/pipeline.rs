//! Orchestration of one sync: scope resolution, pre-sync hooks, query, resolve, apply, persist and
//! post-sync hooks, strictly in that order.
//!
//! Only infrastructural errors (the build server cannot be reached, storage cannot be read or
//! written) abort a sync. Hook and per-target failures are recorded in the [`SyncResult`] and the
//! sync carries on.

use crate::diff::{AllProjectStructuresDiff, ApplyContext};
use crate::error::{Result, SyncError};
use crate::hooks::{
    HookContext, HookRegistry, PostSyncHook, PreSyncHook, ProjectInfo, SyncEnv, SyncHook,
};
use crate::result::{SyncFailure, SyncOutcome, SyncPhase, SyncResult, SyncStats};
use crate::scope::{ResolvedScope, SyncScope};
use crate::status::SyncStatusService;
use bsync_bsp::BuildServer;
use bsync_config::{DiffApplyPolicy, ProjectView, SyncConfig};
use bsync_core::{Hasher128, Label, TargetInfo};
use bsync_graph::{DependencyGraph, DepthPredicates};
use bsync_hash::{HashDiff, HashPolicy, HashSnapshot, TargetHash, TargetHasher};
use bsync_storage::StorageContext;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Rule kinds whose compile classpath is limited to direct dependencies.
const STRICT_DEPS_KIND_PREFIXES: &[&str] = &["java_"];

/// Mixed into the snapshot hash of targets imported as direct dependencies.
const DIRECT_DEPENDENCY_ROLE: u8 = 1;

struct Aborted {
    phase: SyncPhase,
    error: SyncError,
}

trait PhaseExt<T> {
    fn in_phase(self, phase: SyncPhase) -> std::result::Result<T, Aborted>;
}

impl<T, E: Into<SyncError>> PhaseExt<T> for std::result::Result<T, E> {
    fn in_phase(self, phase: SyncPhase) -> std::result::Result<T, Aborted> {
        self.map_err(|err| Aborted {
            phase,
            error: err.into(),
        })
    }
}

fn check_cancelled(cancel: &CancellationToken, phase: SyncPhase) -> std::result::Result<(), Aborted> {
    if cancel.is_cancelled() {
        return Err(Aborted {
            phase,
            error: SyncError::Cancelled,
        });
    }
    Ok(())
}

#[derive(Default)]
struct RunState {
    failures: Vec<SyncFailure>,
    stats: SyncStats,
}

/// Sync pipeline of one project.
pub struct SyncPipeline {
    project: ProjectInfo,
    view: ProjectView,
    storage: StorageContext,
    snapshot: Mutex<Option<HashSnapshot>>,
    status: SyncStatusService,
    hash_policy: HashPolicy,
    apply_policy: DiffApplyPolicy,
    pre_sync_hooks: HookRegistry<dyn PreSyncHook>,
    sync_hooks: HookRegistry<dyn SyncHook>,
    post_sync_hooks: HookRegistry<dyn PostSyncHook>,
}

impl std::fmt::Debug for SyncPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPipeline")
            .field("project", &self.project)
            .field("apply_policy", &self.apply_policy)
            .field("pre_sync_hooks", &self.pre_sync_hooks)
            .field("sync_hooks", &self.sync_hooks)
            .field("post_sync_hooks", &self.post_sync_hooks)
            .finish_non_exhaustive()
    }
}

impl SyncPipeline {
    pub fn new(project: ProjectInfo, storage: StorageContext) -> Self {
        Self {
            project,
            view: ProjectView::default(),
            storage,
            snapshot: Mutex::new(None),
            status: SyncStatusService::new(),
            hash_policy: HashPolicy::default(),
            apply_policy: DiffApplyPolicy::default(),
            pre_sync_hooks: HookRegistry::new(),
            sync_hooks: HookRegistry::new(),
            post_sync_hooks: HookRegistry::new(),
        }
    }

    /// Pipeline for `project` configured from `config`.
    pub fn from_config(project: ProjectInfo, config: &SyncConfig, view: ProjectView) -> Self {
        let storage = config.storage.context(&project.workspace_root);
        Self::new(project, storage)
            .with_project_view(view)
            .with_hash_policy(config.hashing.clone())
            .with_apply_policy(config.sync.apply_policy)
    }

    pub fn with_project_view(mut self, view: ProjectView) -> Self {
        self.view = view;
        self
    }

    pub fn with_hash_policy(mut self, policy: HashPolicy) -> Self {
        self.hash_policy = policy;
        self
    }

    pub fn with_apply_policy(mut self, policy: DiffApplyPolicy) -> Self {
        self.apply_policy = policy;
        self
    }

    /// Share sync status with other handles of the same project.
    pub fn with_status(mut self, status: SyncStatusService) -> Self {
        self.status = status;
        self
    }

    pub fn register_pre_sync_hook(&mut self, hook: Arc<dyn PreSyncHook>) -> Result<()> {
        self.pre_sync_hooks.register(hook)
    }

    pub fn register_sync_hook(&mut self, hook: Arc<dyn SyncHook>) -> Result<()> {
        self.sync_hooks.register(hook)
    }

    pub fn register_post_sync_hook(&mut self, hook: Arc<dyn PostSyncHook>) -> Result<()> {
        self.post_sync_hooks.register(hook)
    }

    pub fn project(&self) -> &ProjectInfo {
        &self.project
    }

    pub fn storage(&self) -> &StorageContext {
        &self.storage
    }

    pub fn status(&self) -> &SyncStatusService {
        &self.status
    }

    /// Hashes persisted by the last successful sync.
    pub fn hash_snapshot(&self) -> bsync_storage::Result<HashSnapshot> {
        let mut slot = self.snapshot.lock();
        if let Some(snapshot) = slot.as_ref() {
            return Ok(snapshot.clone());
        }
        let snapshot = HashSnapshot::open(&self.storage)?;
        *slot = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Run one sync of `scope` against `server`.
    ///
    /// Fails only when another sync of this project is running; every other problem is reported
    /// through the returned [`SyncResult`]. `server` is disconnected on every path once the sync
    /// has started.
    pub async fn sync(
        &self,
        server: &mut dyn BuildServer,
        scope: SyncScope,
        cancel: CancellationToken,
    ) -> Result<SyncResult> {
        let ticket = self.status.start(scope.clone(), cancel.clone())?;
        let task_id = format!("sync-{}", ticket.id());
        let span = tracing::info_span!("bsync.sync", task_id = %task_id, scope = %scope);

        let mut state = RunState::default();
        let run = self
            .run(server, &scope, &cancel, &task_id, &mut state)
            .instrument(span.clone())
            .await;

        if let Err(err) = server.disconnect().instrument(span.clone()).await {
            tracing::warn!(
                target = "bsync.sync",
                task_id = %task_id,
                error = %err,
                "failed to disconnect from build server"
            );
        }

        let outcome = match run {
            Ok(()) if state.failures.is_empty() => SyncOutcome::Success,
            Ok(()) => SyncOutcome::PartialSuccess,
            Err(Aborted { phase, error }) if error.is_cancelled() => {
                tracing::info!(target = "bsync.sync", task_id = %task_id, %phase, "sync cancelled");
                SyncOutcome::Cancelled
            }
            Err(Aborted { phase, error }) => {
                tracing::error!(
                    target = "bsync.sync",
                    task_id = %task_id,
                    %phase,
                    error = %error,
                    "sync failed"
                );
                if !matches!(error, SyncError::ApplyAborted { .. }) {
                    state.failures.push(SyncFailure::new(phase, error.to_string()));
                }
                SyncOutcome::Failure
            }
        };
        self.status.finish(ticket, outcome);

        Ok(SyncResult {
            scope,
            outcome,
            failures: state.failures,
            stats: state.stats,
        })
    }

    async fn run(
        &self,
        server: &mut dyn BuildServer,
        scope: &SyncScope,
        cancel: &CancellationToken,
        task_id: &str,
        state: &mut RunState,
    ) -> std::result::Result<(), Aborted> {
        let hook_ctx = HookContext {
            project: self.project.clone(),
            scope: scope.clone(),
            cancel: cancel.clone(),
        };

        let resolved = {
            let _span = tracing::info_span!("phase", phase = %SyncPhase::ScopeResolution).entered();
            check_cancelled(cancel, SyncPhase::ScopeResolution)?;
            ResolvedScope::resolve(scope, &self.view)
        };

        self.run_pre_sync_hooks(&hook_ctx, state)
            .instrument(tracing::info_span!("phase", phase = %SyncPhase::PreSyncHooks))
            .await?;

        check_cancelled(cancel, SyncPhase::Query)?;
        let (universe, non_module) = query(server, &resolved, cancel)
            .instrument(tracing::info_span!("phase", phase = %SyncPhase::Query))
            .await
            .in_phase(SyncPhase::Query)?;

        check_cancelled(cancel, SyncPhase::Resolve)?;
        let span = tracing::info_span!("phase", phase = %SyncPhase::Resolve);
        let snapshot = self.hash_snapshot().in_phase(SyncPhase::Resolve)?;
        let previous = snapshot.load().in_phase(SyncPhase::Resolve)?;

        let roots = resolved.roots(&universe);
        if let Some(requested) = resolved.requested_labels() {
            for label in requested.iter().filter(|l| !roots.contains(*l)) {
                tracing::warn!(
                    target = "bsync.sync",
                    label = %label,
                    "requested target is unknown to the build server"
                );
            }
        }
        state.stats.universe = universe.len();
        state.stats.roots = roots.len();

        let known: BTreeSet<Label> = universe.iter().map(|t| t.id.clone()).collect();
        let graph = DependencyGraph::new(
            roots.clone(),
            universe
                .into_iter()
                .chain(non_module.into_iter().filter(|t| !known.contains(&t.id))),
        );

        let (imported, direct_dependencies, hashes, hash_diff, invalidated) = {
            let _entered = span.enter();
            resolve(&graph, &roots, &resolved, &self.hash_policy, &previous, scope)
        };
        state.stats.imported = imported.len() + direct_dependencies.len();
        state.stats.added = hash_diff.added.len();
        state.stats.changed = hash_diff.changed.len();
        state.stats.removed = hash_diff.removed.len();
        state.stats.unchanged = hash_diff.unchanged.len();
        state.stats.invalidated = invalidated.len();
        tracing::info!(
            target = "bsync.sync",
            task_id,
            imported = state.stats.imported,
            added = state.stats.added,
            changed = state.stats.changed,
            removed = state.stats.removed,
            invalidated = state.stats.invalidated,
            "resolved sync"
        );

        let mut diffs = AllProjectStructuresDiff::new();
        let mut resolve_failures = Vec::new();
        for hook in self.sync_hooks.active(&self.project, scope) {
            check_cancelled(cancel, SyncPhase::Resolve)?;
            let mut env = SyncEnv::new(
                &graph,
                &imported,
                &direct_dependencies,
                &hash_diff,
                &invalidated,
                &mut diffs,
                &mut resolve_failures,
            );
            if let Err(err) = hook.on_sync(&hook_ctx, &mut env).instrument(span.clone()).await {
                tracing::warn!(
                    target = "bsync.sync",
                    hook = hook.id(),
                    error = %format!("{err:#}"),
                    "sync hook failed"
                );
                resolve_failures.push(SyncFailure::new(
                    SyncPhase::Resolve,
                    format!("hook `{}`: {err:#}", hook.id()),
                ));
            }
        }
        let hook_failed = resolve_failures.iter().any(|f| f.target.is_none());
        let failed_targets: BTreeSet<Label> = resolve_failures
            .iter()
            .filter_map(|f| f.target.clone())
            .collect();
        state.failures.extend(resolve_failures);

        check_cancelled(cancel, SyncPhase::Apply)?;
        let report = {
            let _span = tracing::info_span!("phase", phase = %SyncPhase::Apply).entered();
            let ctx = ApplyContext {
                project: self.project.clone(),
                scope: scope.clone(),
                task_id: task_id.to_string(),
            };
            diffs.apply_all(&ctx, self.apply_policy)
        };
        let apply_failed = !report.failures.is_empty();
        state.failures.extend(report.failures);
        if let Some(diff) = report.aborted_at {
            return Err(Aborted {
                phase: SyncPhase::Apply,
                error: SyncError::ApplyAborted {
                    diff: diff.to_string(),
                },
            });
        }

        {
            let _span = tracing::info_span!("phase", phase = %SyncPhase::Persist).entered();
            if hook_failed || apply_failed {
                tracing::warn!(
                    target = "bsync.sync",
                    task_id,
                    "keeping previous hash snapshot after failures"
                );
            } else {
                persist(&snapshot, scope, &hashes, &hash_diff, &failed_targets)
                    .in_phase(SyncPhase::Persist)?;
            }
        }

        check_cancelled(cancel, SyncPhase::PostSyncHooks)?;
        self.run_post_sync_hooks(&hook_ctx, state)
            .instrument(tracing::info_span!("phase", phase = %SyncPhase::PostSyncHooks))
            .await?;
        Ok(())
    }

    async fn run_pre_sync_hooks(
        &self,
        ctx: &HookContext,
        state: &mut RunState,
    ) -> std::result::Result<(), Aborted> {
        for hook in self.pre_sync_hooks.active(&ctx.project, &ctx.scope) {
            check_cancelled(&ctx.cancel, SyncPhase::PreSyncHooks)?;
            if let Err(err) = hook.on_pre_sync(ctx).await {
                tracing::warn!(
                    target = "bsync.sync",
                    hook = hook.id(),
                    error = %format!("{err:#}"),
                    "pre-sync hook failed"
                );
                state.failures.push(SyncFailure::new(
                    SyncPhase::PreSyncHooks,
                    format!("hook `{}`: {err:#}", hook.id()),
                ));
            }
        }
        Ok(())
    }

    async fn run_post_sync_hooks(
        &self,
        ctx: &HookContext,
        state: &mut RunState,
    ) -> std::result::Result<(), Aborted> {
        let hooks = self.post_sync_hooks.active(&ctx.project, &ctx.scope);
        if hooks.is_empty() {
            return Ok(());
        }
        let preliminary = SyncResult {
            scope: ctx.scope.clone(),
            outcome: if state.failures.is_empty() {
                SyncOutcome::Success
            } else {
                SyncOutcome::PartialSuccess
            },
            failures: state.failures.clone(),
            stats: state.stats.clone(),
        };
        for hook in hooks {
            check_cancelled(&ctx.cancel, SyncPhase::PostSyncHooks)?;
            if let Err(err) = hook.on_post_sync(ctx, &preliminary).await {
                tracing::warn!(
                    target = "bsync.sync",
                    hook = hook.id(),
                    error = %format!("{err:#}"),
                    "post-sync hook failed"
                );
                state.failures.push(SyncFailure::new(
                    SyncPhase::PostSyncHooks,
                    format!("hook `{}`: {err:#}", hook.id()),
                ));
            }
        }
        Ok(())
    }
}

/// Universe and non-module targets for `resolved`.
async fn query(
    server: &mut dyn BuildServer,
    resolved: &ResolvedScope,
    cancel: &CancellationToken,
) -> bsync_bsp::Result<(Vec<TargetInfo>, Vec<TargetInfo>)> {
    match resolved.requested_labels() {
        Some(labels) => Ok((server.target_infos(&labels, cancel).await?, Vec::new())),
        None => {
            let universe = server.workspace_build_targets(cancel).await?;
            let non_module = server.workspace_non_module_targets(cancel).await?;
            Ok((universe, non_module))
        }
    }
}

type Resolved<'g> = (
    Vec<&'g TargetInfo>,
    Vec<&'g TargetInfo>,
    Vec<TargetHash>,
    HashDiff,
    BTreeSet<Label>,
);

fn resolve<'g>(
    graph: &'g DependencyGraph,
    roots: &BTreeSet<Label>,
    resolved: &ResolvedScope,
    policy: &HashPolicy,
    previous: &std::collections::BTreeMap<Label, bsync_core::Hash128>,
    scope: &SyncScope,
) -> Resolved<'g> {
    let predicates = DepthPredicates::default().supports_strict_deps(|label| {
        graph.get(label).is_some_and(|t| {
            STRICT_DEPS_KIND_PREFIXES
                .iter()
                .any(|prefix| t.kind.starts_with(prefix))
        })
    });
    let at_depth = graph.all_targets_at_depth(resolved.import_depth, roots, &predicates);

    let imported_labels: BTreeSet<&Label> = at_depth
        .targets
        .iter()
        .chain(&at_depth.direct_dependencies)
        .map(|t| &t.id)
        .collect();
    let dependency_labels: BTreeSet<&Label> =
        at_depth.direct_dependencies.iter().map(|t| &t.id).collect();
    let hashes: Vec<TargetHash> = TargetHasher::new(graph, policy)
        .compute_hashes(imported_labels.iter().copied())
        .into_iter()
        .map(|hash| {
            if dependency_labels.contains(&hash.target) {
                as_direct_dependency(hash)
            } else {
                hash
            }
        })
        .collect();

    let hash_diff = match scope.partial_targets() {
        Some(requested) => HashDiff::compute(previous, &hashes, Some(requested)),
        None => HashDiff::full(previous, &hashes),
    };
    let invalidated: BTreeSet<Label> = hash_diff
        .invalidated(graph)
        .into_iter()
        .filter(|label| imported_labels.contains(label))
        .collect();

    (
        at_depth.targets,
        at_depth.direct_dependencies,
        hashes,
        hash_diff,
        invalidated,
    )
}

/// Salts the hash of a target imported only as a direct dependency, so a target moving between
/// the imported set and the direct dependencies reads as changed.
fn as_direct_dependency(hash: TargetHash) -> TargetHash {
    let salted = Hasher128::new()
        .put_u8(DIRECT_DEPENDENCY_ROLE)
        .put_hash(hash.hash)
        .finish();
    TargetHash {
        target: hash.target,
        hash: salted,
    }
}

/// Record the hashes of this sync. Targets that failed to resolve are left out so the next sync
/// sees them as dirty again.
fn persist(
    snapshot: &HashSnapshot,
    scope: &SyncScope,
    hashes: &[TargetHash],
    hash_diff: &HashDiff,
    failed: &BTreeSet<Label>,
) -> bsync_storage::Result<()> {
    let kept: Vec<TargetHash> = hashes
        .iter()
        .filter(|h| !failed.contains(&h.target))
        .cloned()
        .collect();
    if scope.is_full() {
        snapshot.replace_all(&kept)
    } else {
        let dropped = failed.iter().filter(|l| hashes.iter().any(|h| &h.target == *l));
        snapshot.update(&kept, hash_diff.removed.iter().chain(dropped))
    }
}
