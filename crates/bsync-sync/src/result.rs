use crate::scope::SyncScope;
use bsync_core::Label;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    ScopeResolution,
    PreSyncHooks,
    Query,
    Resolve,
    Apply,
    Persist,
    PostSyncHooks,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::ScopeResolution => "scope_resolution",
            SyncPhase::PreSyncHooks => "pre_sync_hooks",
            SyncPhase::Query => "query",
            SyncPhase::Resolve => "resolve",
            SyncPhase::Apply => "apply",
            SyncPhase::Persist => "persist",
            SyncPhase::PostSyncHooks => "post_sync_hooks",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One thing that went wrong, with enough detail to retry narrowly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    /// The target involved, if the failure is tied to one.
    pub target: Option<Label>,
    pub phase: SyncPhase,
    pub message: String,
}

impl SyncFailure {
    pub fn new(phase: SyncPhase, message: impl Into<String>) -> Self {
        Self {
            target: None,
            phase,
            message: message.into(),
        }
    }

    pub fn for_target(target: Label, phase: SyncPhase, message: impl Into<String>) -> Self {
        Self {
            target: Some(target),
            phase,
            message: message.into(),
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "[{}] {target}: {}", self.phase, self.message),
            None => write!(f, "[{}] {}", self.phase, self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    /// The pipeline ran to completion but some targets, hooks or diffs failed.
    PartialSuccess,
    /// The pipeline aborted.
    Failure,
    Cancelled,
}

/// Target counts of one sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Targets reported by the build server.
    pub universe: usize,
    pub roots: usize,
    /// Targets imported at the requested depth, including direct dependencies.
    pub imported: usize,
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Targets re-resolved because they or something they depend on changed.
    pub invalidated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub scope: SyncScope,
    pub outcome: SyncOutcome,
    pub failures: Vec<SyncFailure>,
    pub stats: SyncStats,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        self.outcome == SyncOutcome::Success
    }

    /// Labels of failed targets, for a follow-up partial sync.
    pub fn failed_targets(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self
            .failures
            .iter()
            .filter_map(|f| f.target.clone())
            .collect();
        labels.sort();
        labels.dedup();
        labels
    }
}
