use crate::hooks::ProjectInfo;
use crate::result::{SyncFailure, SyncPhase};
use crate::scope::SyncScope;
use bsync_config::DiffApplyPolicy;
use std::any::{Any, TypeId};
use std::fmt;

/// Where a diff is applied from.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    pub project: ProjectInfo,
    pub scope: SyncScope,
    pub task_id: String,
}

/// Changes one downstream consumer needs, accumulated during the resolve phase.
///
/// `apply` is called at most once per sync. Applying the same accumulated state twice must leave
/// the consumer as if it was applied once.
pub trait ProjectStructureDiff: Any + Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&mut self, ctx: &ApplyContext) -> anyhow::Result<()>;
}

/// Outcome of [`AllProjectStructuresDiff::apply_all`].
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: Vec<&'static str>,
    pub failures: Vec<SyncFailure>,
    /// The slot [`DiffApplyPolicy::AllOrNothing`] stopped at.
    pub aborted_at: Option<&'static str>,
}

impl ApplyReport {
    pub fn aborted(&self) -> bool {
        self.aborted_at.is_some()
    }
}

/// One diff slot per diff type, applied in creation order.
#[derive(Default)]
pub struct AllProjectStructuresDiff {
    slots: Vec<(TypeId, Box<dyn ProjectStructureDiff>)>,
}

impl fmt::Debug for AllProjectStructuresDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|(_, d)| d.name()))
            .finish()
    }
}

impl AllProjectStructuresDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// The slot of type `D`, created with `init` on first use.
    pub fn get_or_insert_with<D: ProjectStructureDiff>(&mut self, init: impl FnOnce() -> D) -> &mut D {
        let type_id = TypeId::of::<D>();
        let index = match self.slots.iter().position(|(id, _)| *id == type_id) {
            Some(index) => index,
            None => {
                self.slots.push((type_id, Box::new(init())));
                self.slots.len() - 1
            }
        };
        let slot: &mut dyn Any = &mut *self.slots[index].1;
        match slot.downcast_mut::<D>() {
            Some(diff) => diff,
            None => unreachable!("diff slot keyed by the wrong type"),
        }
    }

    pub fn get<D: ProjectStructureDiff>(&self) -> Option<&D> {
        let type_id = TypeId::of::<D>();
        self.slots
            .iter()
            .find(|(id, _)| *id == type_id)
            .and_then(|(_, diff)| {
                let diff: &dyn Any = &**diff;
                diff.downcast_ref::<D>()
            })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|(_, d)| d.name()).collect()
    }

    /// Apply every slot.
    ///
    /// Slots that applied successfully are never rolled back. Under
    /// [`DiffApplyPolicy::BestEffort`] every slot is attempted; under
    /// [`DiffApplyPolicy::AllOrNothing`] the first failure stops the remaining slots.
    pub fn apply_all(&mut self, ctx: &ApplyContext, policy: DiffApplyPolicy) -> ApplyReport {
        let mut report = ApplyReport::default();
        for (_, diff) in &mut self.slots {
            let name = diff.name();
            match diff.apply(ctx) {
                Ok(()) => {
                    tracing::debug!(target = "bsync.sync", diff = name, "applied diff");
                    report.applied.push(name);
                }
                Err(err) => {
                    tracing::warn!(
                        target = "bsync.sync",
                        diff = name,
                        error = %format!("{err:#}"),
                        "failed to apply diff"
                    );
                    report.failures.push(SyncFailure::new(
                        SyncPhase::Apply,
                        format!("{name}: {err:#}"),
                    ));
                    if policy == DiffApplyPolicy::AllOrNothing {
                        report.aborted_at = Some(name);
                        break;
                    }
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Counter {
        applied: usize,
    }

    impl ProjectStructureDiff for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn apply(&mut self, _ctx: &ApplyContext) -> anyhow::Result<()> {
            self.applied += 1;
            Ok(())
        }
    }

    struct Broken;

    impl ProjectStructureDiff for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn apply(&mut self, _ctx: &ApplyContext) -> anyhow::Result<()> {
            anyhow::bail!("model is read-only")
        }
    }

    fn ctx() -> ApplyContext {
        ApplyContext {
            project: ProjectInfo {
                name: "p".into(),
                workspace_root: PathBuf::from("/ws"),
            },
            scope: SyncScope::SecondPhaseSync,
            task_id: "t".into(),
        }
    }

    #[test]
    fn slots_are_keyed_by_type() {
        let mut diffs = AllProjectStructuresDiff::new();
        diffs.get_or_insert_with(Counter::default).applied = 5;
        assert_eq!(diffs.get_or_insert_with(Counter::default).applied, 5);
        assert_eq!(diffs.len(), 1);
        assert!(diffs.get::<Broken>().is_none());
        assert_eq!(diffs.get::<Counter>().map(|c| c.applied), Some(5));
    }

    #[test]
    fn best_effort_keeps_going_after_failure() {
        let mut diffs = AllProjectStructuresDiff::new();
        diffs.get_or_insert_with(|| Broken);
        diffs.get_or_insert_with(Counter::default);

        let report = diffs.apply_all(&ctx(), DiffApplyPolicy::BestEffort);
        assert!(!report.aborted());
        assert_eq!(report.applied, vec!["counter"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].phase, SyncPhase::Apply);
        assert!(report.failures[0].message.contains("read-only"));
        assert_eq!(diffs.get::<Counter>().map(|c| c.applied), Some(1));
    }

    #[test]
    fn all_or_nothing_stops_at_first_failure() {
        let mut diffs = AllProjectStructuresDiff::new();
        diffs.get_or_insert_with(|| Broken);
        diffs.get_or_insert_with(Counter::default);

        let report = diffs.apply_all(&ctx(), DiffApplyPolicy::AllOrNothing);
        assert_eq!(report.aborted_at, Some("broken"));
        assert!(report.applied.is_empty());
        assert_eq!(diffs.get::<Counter>().map(|c| c.applied), Some(0));
    }
}
