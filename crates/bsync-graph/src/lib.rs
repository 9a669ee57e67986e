//! Dependency graph over a synced target universe.
//!
//! A [`DependencyGraph`] is built once per sync request from the raw targets returned by the query
//! layer and is immutable afterwards. All operations are pure reads, so a graph can be shared
//! across worker threads without locking.
//!
//! Labels referenced by a target but absent from the graph are skipped everywhere: partial or
//! pruned query results are expected, not errors.

use bsync_core::{Label, TargetInfo};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Callbacks steering [`DependencyGraph::all_targets_at_depth`].
pub struct DepthPredicates<'a> {
    is_external: Box<dyn Fn(&Label) -> bool + Send + Sync + 'a>,
    supports_strict_deps: Box<dyn Fn(&Label) -> bool + Send + Sync + 'a>,
    is_workspace: Box<dyn Fn(&Label) -> bool + Send + Sync + 'a>,
}

impl<'a> DepthPredicates<'a> {
    pub fn is_external(mut self, f: impl Fn(&Label) -> bool + Send + Sync + 'a) -> Self {
        self.is_external = Box::new(f);
        self
    }

    pub fn supports_strict_deps(mut self, f: impl Fn(&Label) -> bool + Send + Sync + 'a) -> Self {
        self.supports_strict_deps = Box::new(f);
        self
    }

    pub fn is_workspace(mut self, f: impl Fn(&Label) -> bool + Send + Sync + 'a) -> Self {
        self.is_workspace = Box::new(f);
        self
    }

    fn external(&self, label: &Label) -> bool {
        (self.is_external)(label)
    }

    fn strict(&self, label: &Label) -> bool {
        (self.supports_strict_deps)(label)
    }

    fn workspace(&self, label: &Label) -> bool {
        (self.is_workspace)(label)
    }
}

impl Default for DepthPredicates<'_> {
    /// `@repo` labels are external, no rule supports strict deps, every root is in the workspace.
    fn default() -> Self {
        Self {
            is_external: Box::new(Label::is_external),
            supports_strict_deps: Box::new(|_| false),
            is_workspace: Box::new(|_| true),
        }
    }
}

/// Result of [`DependencyGraph::all_targets_at_depth`], sorted by label.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TargetsAtDepth<'g> {
    pub targets: Vec<&'g TargetInfo>,
    pub direct_dependencies: Vec<&'g TargetInfo>,
}

impl TargetsAtDepth<'_> {
    pub fn target_labels(&self) -> Vec<&Label> {
        self.targets.iter().map(|t| &t.id).collect()
    }

    pub fn direct_dependency_labels(&self) -> Vec<&Label> {
        self.direct_dependencies.iter().map(|t| &t.id).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    roots: BTreeSet<Label>,
    targets: BTreeMap<Label, TargetInfo>,
    reverse: BTreeMap<Label, BTreeSet<Label>>,
}

impl DependencyGraph {
    pub fn new(roots: BTreeSet<Label>, targets: impl IntoIterator<Item = TargetInfo>) -> Self {
        let targets: BTreeMap<Label, TargetInfo> =
            targets.into_iter().map(|t| (t.id.clone(), t)).collect();

        let mut reverse: BTreeMap<Label, BTreeSet<Label>> = BTreeMap::new();
        for target in targets.values() {
            for dep in target.all_dependencies() {
                reverse
                    .entry(dep.clone())
                    .or_default()
                    .insert(target.id.clone());
            }
        }

        tracing::debug!(
            target = "bsync.graph",
            roots = roots.len(),
            targets = targets.len(),
            "built dependency graph"
        );

        Self {
            roots,
            targets,
            reverse,
        }
    }

    pub fn roots(&self) -> &BTreeSet<Label> {
        &self.roots
    }

    pub fn get(&self, label: &Label) -> Option<&TargetInfo> {
        self.targets.get(label)
    }

    pub fn contains(&self, label: &Label) -> bool {
        self.targets.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetInfo> {
        self.targets.values()
    }

    /// Targets depending directly on `label`.
    pub fn reverse_dependencies(&self, label: &Label) -> impl Iterator<Item = &Label> {
        self.reverse.get(label).into_iter().flatten()
    }

    /// `roots` plus everything they reach over any dependency kind.
    pub fn all_transitive_targets<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a Label>,
    ) -> Vec<&TargetInfo> {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<&Label> = roots.into_iter().collect();
        while let Some(label) = stack.pop() {
            let Some(target) = self.targets.get(label) else {
                continue;
            };
            if !visited.insert(&target.id) {
                continue;
            }
            stack.extend(target.all_dependencies());
        }
        self.resolve(visited)
    }

    /// Everything reachable from `root`, excluding any of the graph's roots.
    pub fn transitive_dependencies_without_roots(&self, root: &Label) -> Vec<&TargetInfo> {
        let Some(target) = self.targets.get(root) else {
            return Vec::new();
        };
        self.all_transitive_targets(target.all_dependencies())
            .into_iter()
            .filter(|t| !self.roots.contains(&t.id))
            .collect()
    }

    /// `labels` plus every target transitively depending on any of them.
    pub fn transitive_dependents<'a>(
        &self,
        labels: impl IntoIterator<Item = &'a Label>,
    ) -> BTreeSet<Label> {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<Label> = labels.into_iter().cloned().collect();
        while let Some(label) = stack.pop() {
            if visited.contains(&label) {
                continue;
            }
            stack.extend(self.reverse_dependencies(&label).cloned());
            visited.insert(label);
        }
        visited
    }

    /// Collect the targets to import for `roots` down to `max_depth` dependency hops.
    ///
    /// Layers above the boundary follow compile and runtime dependencies; the boundary layer only
    /// contributes its compile dependencies, which become `direct_dependencies`. External targets
    /// reached above the boundary are leaves. A boundary target that does not support strict deps
    /// imports the whole closure of its external compile dependencies into `targets`; only its
    /// internal compile dependencies stay direct.
    ///
    /// Roots failing `is_workspace` are dropped. A negative `max_depth` imports the whole
    /// transitive closure with no direct dependencies.
    pub fn all_targets_at_depth<'g>(
        &'g self,
        max_depth: i32,
        roots: &BTreeSet<Label>,
        predicates: &DepthPredicates<'_>,
    ) -> TargetsAtDepth<'g> {
        let workspace_roots: BTreeSet<&Label> = roots
            .iter()
            .filter(|label| predicates.workspace(label))
            .filter_map(|label| self.targets.get(label).map(|t| &t.id))
            .collect();

        if max_depth < 0 {
            return TargetsAtDepth {
                targets: self.all_transitive_targets(workspace_roots),
                direct_dependencies: Vec::new(),
            };
        }

        let mut visited: BTreeSet<&Label> = BTreeSet::new();
        let mut current = workspace_roots;
        for _ in 0..max_depth {
            visited.extend(current.iter().copied());
            current = current
                .iter()
                .filter(|label| !predicates.external(label))
                .filter_map(|label| self.targets.get(*label))
                .flat_map(TargetInfo::all_dependencies)
                .filter(|dep| !visited.contains(dep))
                .filter_map(|dep| self.targets.get(dep).map(|t| &t.id))
                .collect();
        }
        visited.extend(current.iter().copied());

        let mut strict_deps: BTreeSet<&Label> = BTreeSet::new();
        let mut non_strict_deps: BTreeSet<&Label> = BTreeSet::new();
        for label in &current {
            if predicates.external(label) {
                continue;
            }
            let Some(target) = self.targets.get(*label) else {
                continue;
            };
            let deps = if predicates.strict(label) {
                &mut strict_deps
            } else {
                &mut non_strict_deps
            };
            deps.extend(
                target
                    .compile_dependencies()
                    .filter(|dep| !visited.contains(dep))
                    .filter_map(|dep| self.targets.get(dep).map(|t| &t.id)),
            );
        }

        let (external, internal): (Vec<&Label>, Vec<&Label>) = non_strict_deps
            .into_iter()
            .partition(|label| predicates.external(label));
        let mut queue: VecDeque<&Label> = external.into_iter().collect();
        visited.extend(queue.iter().copied());
        while let Some(label) = queue.pop_front() {
            let Some(target) = self.targets.get(label) else {
                continue;
            };
            for dep in target.all_dependencies() {
                if let Some(dep) = self.targets.get(dep).map(|t| &t.id) {
                    if visited.insert(dep) {
                        queue.push_back(dep);
                    }
                }
            }
        }

        let direct: BTreeSet<&Label> = internal
            .into_iter()
            .chain(strict_deps)
            .filter(|label| !visited.contains(label))
            .collect();

        tracing::debug!(
            target = "bsync.graph",
            max_depth,
            targets = visited.len(),
            direct_dependencies = direct.len(),
            "resolved targets at depth"
        );

        TargetsAtDepth {
            targets: self.resolve(visited),
            direct_dependencies: self.resolve(direct),
        }
    }

    fn resolve<'g>(&'g self, labels: BTreeSet<&Label>) -> Vec<&'g TargetInfo> {
        labels
            .into_iter()
            .filter_map(|label| self.targets.get(label))
            .collect()
    }
}
