use crate::policy::{HashMode, HashPolicy};
use bsync_core::{DependencyKind, Hash128, Hasher128, Label, TargetInfo};
use bsync_graph::DependencyGraph;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Bumped whenever the hashed byte layout changes, so stale snapshots read as "everything changed".
const HASH_LAYOUT_VERSION: u64 = 1;

/// Content hash of one target, used only for change detection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TargetHash {
    pub target: Label,
    pub hash: Hash128,
}

/// Computes [`TargetHash`]es for targets of one [`DependencyGraph`].
pub struct TargetHasher<'g> {
    graph: &'g DependencyGraph,
    policy: &'g HashPolicy,
}

impl<'g> TargetHasher<'g> {
    pub fn new(graph: &'g DependencyGraph, policy: &'g HashPolicy) -> Self {
        Self { graph, policy }
    }

    /// Hash of the target's own descriptor: name, rule class, tags, sources, declared
    /// dependencies, every non-ignored attribute and the compiler/interpreter environment.
    pub fn shallow_hash(&self, target: &TargetInfo) -> Hash128 {
        let mut hasher = Hasher128::new();
        hasher
            .put_u64(HASH_LAYOUT_VERSION)
            .put_label(&target.id)
            .put_str(&target.kind);

        hasher.put_u64(target.tags.len() as u64);
        for tag in &target.tags {
            hasher.put_str(tag);
        }
        put_strings(&mut hasher, &target.srcs);
        put_strings(&mut hasher, &target.resources);

        hasher.put_u64(target.dependencies.len() as u64);
        for dep in &target.dependencies {
            hasher.put_label(&dep.label).put_bool(dep.kind == DependencyKind::Runtime);
        }

        let attributes: Vec<_> = target
            .attributes
            .iter()
            .filter(|(name, _)| !self.policy.is_ignored(name))
            .collect();
        hasher.put_u64(attributes.len() as u64);
        for (name, value) in attributes {
            hasher.put_str(name);
            put_serialized(&mut hasher, value);
        }

        hasher.put_hash(environment_hash(target));
        hasher.finish()
    }

    /// Hashes for `labels` under the configured [`HashMode`], sorted by label.
    ///
    /// Labels missing from the graph are skipped.
    pub fn compute_hashes<'a>(
        &self,
        labels: impl IntoIterator<Item = &'a Label>,
    ) -> Vec<TargetHash> {
        let requested: BTreeSet<&'g Label> = labels
            .into_iter()
            .filter_map(|label| self.graph.get(label).map(|t| &t.id))
            .collect();

        let hashes = match self.policy.mode {
            HashMode::Shallow => self.shallow_hashes(requested.iter().copied()),
            HashMode::Transitive => {
                let closure = self.graph.all_transitive_targets(requested.iter().copied());
                let shallow = self.shallow_hashes(closure.iter().copied().map(|t| &t.id));
                self.fold_transitive(&shallow)
            }
        };

        let result: Vec<_> = requested
            .into_iter()
            .filter_map(|target| {
                hashes
                    .get(target)
                    .map(|&hash| TargetHash {
                        target: target.clone(),
                        hash,
                    })
            })
            .collect();
        tracing::debug!(
            target = "bsync.hash",
            mode = ?self.policy.mode,
            hashed = result.len(),
            "computed target hashes"
        );
        result
    }

    fn shallow_hashes(
        &self,
        labels: impl Iterator<Item = &'g Label>,
    ) -> BTreeMap<&'g Label, Hash128> {
        let targets: Vec<&'g TargetInfo> = labels.filter_map(|l| self.graph.get(l)).collect();
        targets
            .into_par_iter()
            .map(|target| (&target.id, self.shallow_hash(target)))
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    }

    /// Mix every target's dependency hashes into its own, dependencies first.
    ///
    /// A dependency absent from the graph contributes its label only. A cycle edge contributes the
    /// dependency's shallow hash.
    fn fold_transitive(
        &self,
        shallow: &BTreeMap<&'g Label, Hash128>,
    ) -> BTreeMap<&'g Label, Hash128> {
        let mut done: BTreeMap<&'g Label, Hash128> = BTreeMap::new();
        let mut in_progress: BTreeSet<&'g Label> = BTreeSet::new();

        for &start in shallow.keys() {
            if done.contains_key(start) {
                continue;
            }
            // (label, dependencies already pushed)
            let mut stack: Vec<(&'g Label, bool)> = vec![(start, false)];
            while let Some((label, expanded)) = stack.pop() {
                if done.contains_key(label) || (!expanded && in_progress.contains(label)) {
                    continue;
                }
                let Some(target) = self.graph.get(label) else {
                    continue;
                };
                if !expanded {
                    in_progress.insert(label);
                    stack.push((label, true));
                    for dep in target.all_dependencies() {
                        if let Some(dep_target) = self.graph.get(dep) {
                            let dep = &dep_target.id;
                            if !done.contains_key(dep) && !in_progress.contains(dep) {
                                stack.push((dep, false));
                            }
                        }
                    }
                    continue;
                }

                let mut hasher = Hasher128::new();
                hasher.put_hash(shallow.get(label).copied().unwrap_or(Hash128::ZERO));
                let deps: BTreeSet<&Label> = target.all_dependencies().collect();
                hasher.put_u64(deps.len() as u64);
                for dep in deps {
                    let dep_hash = done
                        .get(dep)
                        .or_else(|| shallow.get(dep))
                        .copied()
                        .unwrap_or_else(|| Hash128::of(dep));
                    hasher.put_hash(dep_hash);
                }
                in_progress.remove(label);
                done.insert(label, hasher.finish());
            }
        }
        done
    }
}

fn put_strings(hasher: &mut Hasher128, values: &[String]) {
    hasher.put_u64(values.len() as u64);
    for value in values {
        hasher.put_str(value);
    }
}

fn put_serialized<T: Serialize + ?Sized>(hasher: &mut Hasher128, value: &T) {
    match bincode::serialize(value) {
        Ok(bytes) => {
            hasher.put_bytes(&bytes);
        }
        Err(err) => {
            tracing::warn!(target = "bsync.hash", error = %err, "failed to serialize hash input");
            hasher.put_u8(0xff);
        }
    }
}

/// Hash of everything that shapes how the target's compiler or interpreter runs.
pub fn environment_hash(target: &TargetInfo) -> Hash128 {
    let mut hasher = Hasher128::new();
    hasher.put_u64(target.env.len() as u64);
    for (key, value) in &target.env {
        hasher.put_str(key).put_str(value);
    }
    match &target.data {
        Some(data) => {
            hasher.put_bool(true);
            put_serialized(&mut hasher, data);
        }
        None => {
            hasher.put_bool(false);
        }
    }
    hasher.finish()
}
