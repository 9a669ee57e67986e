use crate::error::{Result, SyncError};
use bsync_config::{ExcludableList, ProjectView, TargetPattern};
use bsync_core::{Label, TargetInfo};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// What one sync invocation covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "targets", rename_all = "snake_case")]
pub enum SyncScope {
    /// Project-view targets and their direct dependencies only.
    FirstPhaseSync,
    /// Project-view targets down to the configured import depth.
    SecondPhaseSync,
    /// Only the given targets.
    PartialProjectSync(PartialTargets),
}

/// Non-empty, sorted, de-duplicated target list of a partial sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PartialTargets(Vec<Label>);

impl PartialTargets {
    pub fn new(labels: impl IntoIterator<Item = Label>) -> Result<Self> {
        let labels: BTreeSet<Label> = labels.into_iter().collect();
        if labels.is_empty() {
            return Err(SyncError::EmptyPartialScope);
        }
        Ok(Self(labels.into_iter().collect()))
    }

    pub fn labels(&self) -> &[Label] {
        &self.0
    }
}

impl SyncScope {
    pub fn partial(labels: impl IntoIterator<Item = Label>) -> Result<Self> {
        Ok(SyncScope::PartialProjectSync(PartialTargets::new(labels)?))
    }

    /// Full syncs own the whole stored snapshot; partial ones only their targets.
    pub fn is_full(&self) -> bool {
        !self.is_partial()
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, SyncScope::PartialProjectSync(_))
    }

    pub fn partial_targets(&self) -> Option<&[Label]> {
        match self {
            SyncScope::PartialProjectSync(targets) => Some(targets.labels()),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SyncScope::FirstPhaseSync => "first_phase",
            SyncScope::SecondPhaseSync => "second_phase",
            SyncScope::PartialProjectSync(_) => "partial",
        }
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncScope::PartialProjectSync(targets) => {
                write!(f, "partial ({} targets)", targets.labels().len())
            }
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone)]
enum Selection {
    Patterns(ExcludableList<TargetPattern>),
    Labels(BTreeSet<Label>),
}

/// A [`SyncScope`] resolved against the project view.
#[derive(Debug, Clone)]
pub struct ResolvedScope {
    pub import_depth: i32,
    selection: Selection,
    allow_manual: bool,
}

impl ResolvedScope {
    pub fn resolve(scope: &SyncScope, view: &ProjectView) -> Self {
        let allow_manual = view.allow_manual_targets_sync();
        match scope {
            SyncScope::FirstPhaseSync => Self {
                import_depth: 0,
                selection: Selection::Patterns(view.target_patterns()),
                allow_manual,
            },
            SyncScope::SecondPhaseSync => Self {
                import_depth: view.import_depth(),
                selection: Selection::Patterns(view.target_patterns()),
                allow_manual,
            },
            SyncScope::PartialProjectSync(targets) => Self {
                import_depth: 0,
                selection: Selection::Labels(targets.labels().iter().cloned().collect()),
                allow_manual,
            },
        }
    }

    /// Labels to ask the build server for, when the scope names them explicitly.
    pub fn requested_labels(&self) -> Option<Vec<Label>> {
        match &self.selection {
            Selection::Labels(labels) => Some(labels.iter().cloned().collect()),
            Selection::Patterns(_) => None,
        }
    }

    /// Whether `target` is a sync root.
    ///
    /// Explicitly requested targets are always roots. Pattern-selected ones must live in the main
    /// repository, must not be tagged `no-ide` and are dropped when tagged `manual` unless the
    /// project view allows manual targets.
    pub fn selects(&self, target: &TargetInfo) -> bool {
        match &self.selection {
            Selection::Labels(labels) => labels.contains(&target.id),
            Selection::Patterns(patterns) => {
                target.id.is_main_workspace()
                    && !target.is_no_ide()
                    && (self.allow_manual || !target.is_manual())
                    && patterns.included.iter().any(|p| p.matches(&target.id))
                    && !patterns.excluded.iter().any(|p| p.matches(&target.id))
            }
        }
    }

    pub fn roots<'a>(&self, universe: impl IntoIterator<Item = &'a TargetInfo>) -> BTreeSet<Label> {
        universe
            .into_iter()
            .filter(|t| self.selects(t))
            .map(|t| t.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn target(label: &str) -> TargetInfo {
        TargetInfo::new(Label::parse(label), "java_library")
    }

    #[test]
    fn partial_scope_must_not_be_empty() {
        assert!(matches!(
            SyncScope::partial(Vec::<Label>::new()),
            Err(SyncError::EmptyPartialScope)
        ));
        let scope =
            SyncScope::partial([Label::parse("//b"), Label::parse("//a"), Label::parse("//b")])
                .unwrap();
        assert_eq!(
            scope.partial_targets().unwrap(),
            &[Label::parse("//a"), Label::parse("//b")]
        );
        assert!(scope.is_partial());
        assert!(!SyncScope::FirstPhaseSync.is_partial());
    }

    #[test]
    fn phases_use_their_import_depth() {
        let view = ProjectView::parse("targets:\n  //app/...\nimport_depth: 3\n").unwrap();
        assert_eq!(ResolvedScope::resolve(&SyncScope::FirstPhaseSync, &view).import_depth, 0);
        assert_eq!(ResolvedScope::resolve(&SyncScope::SecondPhaseSync, &view).import_depth, 3);

        let unbounded = ProjectView::parse("").unwrap();
        assert_eq!(
            ResolvedScope::resolve(&SyncScope::SecondPhaseSync, &unbounded).import_depth,
            -1
        );
    }

    #[test]
    fn manual_and_no_ide_targets_are_filtered() {
        let universe = vec![
            target("//app:main"),
            target("//app:manual").with_tag("manual"),
            target("//app:hidden").with_tag("no-ide"),
            target("//lib:lib"),
            target("@maven//:guava"),
        ];

        let view = ProjectView::parse("targets:\n  //app/...\n").unwrap();
        let resolved = ResolvedScope::resolve(&SyncScope::SecondPhaseSync, &view);
        assert_eq!(
            resolved.roots(&universe),
            BTreeSet::from([Label::parse("//app:main")])
        );

        let view =
            ProjectView::parse("targets:\n  //app/...\nallow_manual_targets_sync: true\n").unwrap();
        let resolved = ResolvedScope::resolve(&SyncScope::SecondPhaseSync, &view);
        assert_eq!(
            resolved.roots(&universe),
            BTreeSet::from([Label::parse("//app:main"), Label::parse("//app:manual")])
        );
    }

    #[test]
    fn partial_scope_keeps_only_requested_targets() {
        let universe = vec![
            target("//app:main"),
            target("//app:manual").with_tag("manual"),
        ];
        let view = ProjectView::parse("").unwrap();
        let scope = SyncScope::partial([Label::parse("//app:manual")]).unwrap();
        let resolved = ResolvedScope::resolve(&scope, &view);
        assert_eq!(
            resolved.roots(&universe),
            BTreeSet::from([Label::parse("//app:manual")])
        );
        assert_eq!(
            resolved.requested_labels(),
            Some(vec![Label::parse("//app:manual")])
        );
    }
}
