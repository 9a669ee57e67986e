use crate::error::{Result, SyncError};
use crate::result::SyncOutcome;
use crate::scope::SyncScope;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    NotStarted,
    InProgress,
    Succeeded,
    Cancelled,
    Failed,
}

impl SyncState {
    fn after(outcome: SyncOutcome) -> Self {
        match outcome {
            SyncOutcome::Success | SyncOutcome::PartialSuccess => SyncState::Succeeded,
            SyncOutcome::Failure => SyncState::Failed,
            SyncOutcome::Cancelled => SyncState::Cancelled,
        }
    }
}

#[derive(Debug)]
struct Running {
    id: u64,
    scope: SyncScope,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Inner {
    state: SyncState,
    running: Option<Running>,
    next_id: u64,
}

/// Sync status of one project.
///
/// At most one sync runs at a time. The handle is cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct SyncStatusService {
    inner: Arc<Mutex<Inner>>,
}

impl Default for SyncStatusService {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatusService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: SyncState::NotStarted,
                running: None,
                next_id: 1,
            })),
        }
    }

    /// Mark a sync of `scope` as started.
    ///
    /// Fails with [`SyncError::AlreadyInProgress`] while another sync runs; the running sync is
    /// left untouched. `cancel` is what [`SyncStatusService::cancel`] triggers.
    pub fn start(&self, scope: SyncScope, cancel: CancellationToken) -> Result<SyncTicket> {
        let mut inner = self.inner.lock();
        if let Some(running) = &inner.running {
            return Err(SyncError::AlreadyInProgress {
                running: running.scope.to_string(),
            });
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.state = SyncState::InProgress;
        inner.running = Some(Running {
            id,
            scope: scope.clone(),
            cancel: cancel.clone(),
        });
        tracing::info!(target = "bsync.sync", sync_id = id, scope = %scope, "sync started");
        Ok(SyncTicket {
            id,
            scope,
            cancel,
            service: Arc::clone(&self.inner),
            finished: false,
        })
    }

    /// Record the outcome of the sync `ticket` stands for.
    pub fn finish(&self, mut ticket: SyncTicket, outcome: SyncOutcome) {
        ticket.finished = true;
        finish_inner(&self.inner, ticket.id, outcome);
    }

    /// Request cancellation of the running sync. Returns `false` when none runs.
    pub fn cancel(&self) -> bool {
        let inner = self.inner.lock();
        match &inner.running {
            Some(running) => {
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.inner.lock().running.is_some()
    }

    pub fn state(&self) -> SyncState {
        self.inner.lock().state
    }

    /// Scope of the running sync.
    pub fn current_scope(&self) -> Option<SyncScope> {
        self.inner.lock().running.as_ref().map(|r| r.scope.clone())
    }
}

fn finish_inner(inner: &Mutex<Inner>, id: u64, outcome: SyncOutcome) {
    let mut inner = inner.lock();
    if inner.running.as_ref().map(|r| r.id) != Some(id) {
        return;
    }
    inner.running = None;
    inner.state = SyncState::after(outcome);
    tracing::info!(target = "bsync.sync", sync_id = id, outcome = ?outcome, "sync finished");
}

/// Proof that a sync is running. Dropping an unfinished ticket records it as cancelled.
#[derive(Debug)]
pub struct SyncTicket {
    id: u64,
    scope: SyncScope,
    cancel: CancellationToken,
    service: Arc<Mutex<Inner>>,
    finished: bool,
}

impl SyncTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn scope(&self) -> &SyncScope {
        &self.scope
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for SyncTicket {
    fn drop(&mut self) {
        if !self.finished {
            finish_inner(&self.service, self.id, SyncOutcome::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsync_core::Label;

    #[test]
    fn second_start_is_rejected_and_leaves_first_untouched() {
        let status = SyncStatusService::new();
        assert_eq!(status.state(), SyncState::NotStarted);

        let ticket = status
            .start(SyncScope::FirstPhaseSync, CancellationToken::new())
            .unwrap();
        assert!(status.is_sync_in_progress());

        let partial = SyncScope::partial([Label::parse("//a")]).unwrap();
        match status.start(partial, CancellationToken::new()) {
            Err(SyncError::AlreadyInProgress { running }) => assert_eq!(running, "first_phase"),
            other => panic!("expected AlreadyInProgress, got {other:?}"),
        }
        assert_eq!(status.state(), SyncState::InProgress);
        assert_eq!(status.current_scope(), Some(SyncScope::FirstPhaseSync));
        assert!(!ticket.cancel_token().is_cancelled());

        status.finish(ticket, SyncOutcome::Success);
        assert_eq!(status.state(), SyncState::Succeeded);
        assert!(!status.is_sync_in_progress());
    }

    #[test]
    fn cancel_reaches_the_running_sync() {
        let status = SyncStatusService::new();
        assert!(!status.cancel());
        let ticket = status
            .start(SyncScope::SecondPhaseSync, CancellationToken::new())
            .unwrap();
        assert!(status.cancel());
        assert!(ticket.cancel_token().is_cancelled());
        status.finish(ticket, SyncOutcome::Cancelled);
        assert_eq!(status.state(), SyncState::Cancelled);
    }

    #[test]
    fn dropped_ticket_counts_as_cancelled() {
        let status = SyncStatusService::new();
        let ticket = status
            .start(SyncScope::SecondPhaseSync, CancellationToken::new())
            .unwrap();
        drop(ticket);
        assert_eq!(status.state(), SyncState::Cancelled);

        let ticket = status
            .start(SyncScope::SecondPhaseSync, CancellationToken::new())
            .unwrap();
        status.finish(ticket, SyncOutcome::Failure);
        assert_eq!(status.state(), SyncState::Failed);
    }

    #[test]
    fn concurrent_starts_admit_exactly_one() {
        let status = SyncStatusService::new();
        let admitted = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let status = status.clone();
                    s.spawn(move || {
                        status
                            .start(SyncScope::FirstPhaseSync, CancellationToken::new())
                            .ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        });
        let tickets: Vec<SyncTicket> = admitted.into_iter().flatten().collect();
        assert_eq!(tickets.len(), 1);
        assert!(status.is_sync_in_progress());
    }
}
