use crate::hasher::TargetHash;
use bsync_core::{Hash128, Label};
use bsync_graph::DependencyGraph;
use std::collections::{BTreeMap, BTreeSet};

/// Comparison of freshly computed hashes against a stored snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashDiff {
    pub added: BTreeSet<Label>,
    pub removed: BTreeSet<Label>,
    pub changed: BTreeSet<Label>,
    pub unchanged: BTreeSet<Label>,
}

impl HashDiff {
    /// Diff `current` against `previous`.
    ///
    /// Only labels present in `removal_universe` can be reported as removed. A partial sync passes
    /// just the labels it synced, so targets outside its scope are not mistaken for deletions.
    pub fn compute<'a>(
        previous: &BTreeMap<Label, Hash128>,
        current: &[TargetHash],
        removal_universe: Option<impl IntoIterator<Item = &'a Label>>,
    ) -> Self {
        let mut diff = HashDiff::default();
        for TargetHash { target, hash } in current {
            match previous.get(target) {
                None => diff.added.insert(target.clone()),
                Some(old) if old == hash => diff.unchanged.insert(target.clone()),
                Some(_) => diff.changed.insert(target.clone()),
            };
        }

        let seen: BTreeSet<&Label> = current.iter().map(|h| &h.target).collect();
        let candidates: BTreeSet<&Label> = match removal_universe {
            Some(labels) => labels.into_iter().collect(),
            None => previous.keys().collect(),
        };
        diff.removed = candidates
            .into_iter()
            .filter(|label| previous.contains_key(*label) && !seen.contains(*label))
            .cloned()
            .collect();
        diff
    }

    /// Diff against the whole snapshot: every stored label not hashed again counts as removed.
    pub fn full(previous: &BTreeMap<Label, Hash128>, current: &[TargetHash]) -> Self {
        Self::compute(previous, current, None::<std::iter::Empty<&Label>>)
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Targets that must be re-resolved: everything added or changed plus all of their
    /// transitive dependents in `graph`.
    pub fn invalidated(&self, graph: &DependencyGraph) -> BTreeSet<Label> {
        let dirty = self.added.iter().chain(&self.changed).chain(&self.removed);
        let mut invalidated = graph.transitive_dependents(dirty);
        for removed in &self.removed {
            invalidated.remove(removed);
        }
        invalidated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsync_core::{DependencyKind, TargetInfo};
    use pretty_assertions::assert_eq;

    fn label(text: &str) -> Label {
        Label::parse(text)
    }

    fn th(text: &str, hash: u128) -> TargetHash {
        TargetHash {
            target: label(text),
            hash: Hash128::from_u128(hash),
        }
    }

    fn labels(texts: &[&str]) -> BTreeSet<Label> {
        texts.iter().map(|t| label(t)).collect()
    }

    #[test]
    fn classifies_targets() {
        let previous: BTreeMap<_, _> = [
            (label("//same"), Hash128::from_u128(1)),
            (label("//changed"), Hash128::from_u128(2)),
            (label("//gone"), Hash128::from_u128(3)),
        ]
        .into_iter()
        .collect();
        let current = vec![th("//same", 1), th("//changed", 20), th("//new", 4)];

        let diff = HashDiff::full(&previous, &current);
        assert_eq!(diff.added, labels(&["//new"]));
        assert_eq!(diff.changed, labels(&["//changed"]));
        assert_eq!(diff.unchanged, labels(&["//same"]));
        assert_eq!(diff.removed, labels(&["//gone"]));
        assert!(!diff.is_empty());
    }

    #[test]
    fn partial_diff_only_removes_within_universe() {
        let previous: BTreeMap<_, _> = [
            (label("//a"), Hash128::from_u128(1)),
            (label("//b"), Hash128::from_u128(2)),
        ]
        .into_iter()
        .collect();
        let universe = [label("//a")];
        let diff = HashDiff::compute(&previous, &[], Some(&universe));
        assert_eq!(diff.removed, labels(&["//a"]));
    }

    #[test]
    fn invalidation_follows_dependents() {
        let lib = TargetInfo::new(label("//lib"), "java_library");
        let app = TargetInfo::new(label("//app"), "java_binary")
            .with_dependency(label("//lib"), DependencyKind::Compile);
        let other = TargetInfo::new(label("//other"), "java_library");
        let graph = DependencyGraph::new(labels(&["//app", "//other"]), vec![lib, app, other]);

        let diff = HashDiff {
            changed: labels(&["//lib"]),
            ..HashDiff::default()
        };
        assert_eq!(diff.invalidated(&graph), labels(&["//app", "//lib"]));
    }
}
