use bsync_config::{load_for_workspace, DiffApplyPolicy, ProjectView, SyncConfig};
use bsync_core::Label;
use bsync_storage::StorageHints;
use pretty_assertions::assert_eq;

#[test]
fn workspace_without_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let (config, path, diagnostics) = load_for_workspace(dir.path()).unwrap();
    assert_eq!(path, None);
    assert!(diagnostics.is_ok());
    assert_eq!(config.sync, SyncConfig::default().sync);
    assert_eq!(config.storage.hints, StorageHints::Paged);
}

#[test]
fn workspace_config_and_project_view_work_together() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(
        root.join("bsync.toml"),
        "[sync]\napply_policy = \"all_or_nothing\"\nproject_view = \"ide/view.bazelproject\"\n\n\
         [storage]\nhints = \"in_memory\"\n",
    )
    .unwrap();
    std::fs::create_dir_all(root.join("ide")).unwrap();
    std::fs::write(
        root.join("ide/view.bazelproject"),
        "targets:\n  //app/...\n  -//app/legacy/...\nimport_depth: 0\n",
    )
    .unwrap();

    let (config, path, diagnostics) = load_for_workspace(root).unwrap();
    assert!(path.is_some());
    assert!(diagnostics.unknown_keys.is_empty());
    assert_eq!(config.sync.apply_policy, DiffApplyPolicy::AllOrNothing);
    assert_eq!(config.storage.context(root).hints(), StorageHints::InMemory);

    let view = ProjectView::load(&config.sync.project_view_path(root), root).unwrap();
    assert_eq!(view.import_depth(), 0);
    assert!(view.selects(&Label::parse("//app/server:main")));
    assert!(!view.selects(&Label::parse("//app/legacy:old")));
}
