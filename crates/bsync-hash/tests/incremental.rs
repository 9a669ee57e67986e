use bsync_core::{AttributeValue, DependencyKind, Label, TargetInfo};
use bsync_graph::DependencyGraph;
use bsync_hash::{HashDiff, HashPolicy, HashSnapshot, TargetHasher};
use bsync_storage::StorageContext;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use tempfile::TempDir;

fn workspace(copts: &str) -> DependencyGraph {
    let util = TargetInfo::new(Label::parse("//util"), "cc_library")
        .with_attribute("copts", AttributeValue::List(vec![copts.to_string()]));
    let app = TargetInfo::new(Label::parse("//app"), "cc_binary")
        .with_dependency(Label::parse("//util"), DependencyKind::Compile);
    let docs = TargetInfo::new(Label::parse("//docs"), "filegroup");
    let roots = [Label::parse("//app"), Label::parse("//docs")]
        .into_iter()
        .collect();
    DependencyGraph::new(roots, vec![util, app, docs])
}

fn all_labels(graph: &DependencyGraph) -> Vec<Label> {
    graph.targets().map(|t| t.id.clone()).collect()
}

#[test]
fn second_sync_only_invalidates_what_changed() {
    let dir = TempDir::new().unwrap();
    let ctx = StorageContext::for_workspace(dir.path());
    let policy = HashPolicy::default();

    let first = workspace("-O2");
    let hashes = TargetHasher::new(&first, &policy).compute_hashes(&all_labels(&first));
    HashSnapshot::open(&ctx)
        .unwrap()
        .replace_all(&hashes)
        .unwrap();

    // Reopen as a later process would.
    let snapshot = HashSnapshot::open(&ctx).unwrap();
    assert_eq!(snapshot.len().unwrap(), 3);

    let unchanged = TargetHasher::new(&first, &policy).compute_hashes(&all_labels(&first));
    let diff = HashDiff::full(&snapshot.load().unwrap(), &unchanged);
    assert!(diff.is_empty());
    assert!(diff.invalidated(&first).is_empty());

    let second = workspace("-O3");
    let hashes = TargetHasher::new(&second, &policy).compute_hashes(&all_labels(&second));
    let diff = HashDiff::full(&snapshot.load().unwrap(), &hashes);

    let expected: BTreeSet<Label> = [Label::parse("//app"), Label::parse("//util")]
        .into_iter()
        .collect();
    // Transitive hashing already marks the dependent as changed.
    assert_eq!(diff.changed, expected);
    assert_eq!(diff.invalidated(&second), expected);
    assert_eq!(diff.unchanged.len(), 1);
}

#[test]
fn partial_update_keeps_other_entries() {
    let dir = TempDir::new().unwrap();
    let ctx = StorageContext::for_workspace(dir.path());
    let policy = HashPolicy::default();
    let graph = workspace("-O2");
    let snapshot = HashSnapshot::open(&ctx).unwrap();

    let hashes = TargetHasher::new(&graph, &policy).compute_hashes(&all_labels(&graph));
    snapshot.replace_all(&hashes).unwrap();

    let docs = Label::parse("//docs");
    let partial = TargetHasher::new(&graph, &policy).compute_hashes([&Label::parse("//app")]);
    snapshot.update(&partial, [&docs]).unwrap();

    let stored = snapshot.load().unwrap();
    assert_eq!(stored.len(), 2);
    assert!(!stored.contains_key(&docs));
    assert!(stored.contains_key(&Label::parse("//util")));
}
