use bsync_core::Label;
use bsync_storage::{BincodeCodec, FlatStore, StorageContext};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MODEL_STORE: &str = "workspace_model";

/// An IDE module built from one workspace target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Unique module name; the qualified label of the target.
    pub name: String,
    pub label: Label,
    pub kind: String,
    pub language: String,
    pub source_roots: Vec<String>,
    pub resource_roots: Vec<String>,
    /// Names of modules this module depends on.
    pub module_dependencies: Vec<String>,
    /// Names of libraries this module depends on.
    pub library_dependencies: Vec<String>,
    pub sdk: Option<String>,
    pub executable: bool,
}

/// A dependency the IDE sees as opaque jars/sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub name: String,
    pub label: Label,
    pub jars: Vec<String>,
}

/// The external project model diffs are applied to.
///
/// Upserts replace by name, so applying the same changes twice leaves one entry per name.
pub trait ProjectModel: Send + Sync {
    fn upsert_module(&self, module: Module) -> anyhow::Result<()>;

    fn remove_module(&self, name: &str) -> anyhow::Result<bool>;

    fn upsert_library(&self, library: Library) -> anyhow::Result<()>;

    fn remove_library(&self, name: &str) -> anyhow::Result<bool>;

    /// Make the changes since the last commit visible.
    fn commit(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ModelState {
    modules: BTreeMap<String, Module>,
    libraries: BTreeMap<String, Library>,
}

/// [`ProjectModel`] kept in memory, optionally persisted on commit.
pub struct WorkspaceModel {
    state: RwLock<ModelState>,
    store: Option<FlatStore<ModelState>>,
}

impl Default for WorkspaceModel {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for WorkspaceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("WorkspaceModel")
            .field("modules", &state.modules.len())
            .field("libraries", &state.libraries.len())
            .field("persisted", &self.store.is_some())
            .finish()
    }
}

impl WorkspaceModel {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(ModelState::default()),
            store: None,
        }
    }

    /// Open the model persisted under `ctx`, starting empty when none was committed yet.
    pub fn open(ctx: &StorageContext) -> bsync_storage::Result<Self> {
        let store = ctx.open_flat(MODEL_STORE, BincodeCodec::<ModelState>::new())?;
        let state = store.get().unwrap_or_default();
        Ok(Self {
            state: RwLock::new(state),
            store: Some(store),
        })
    }

    pub fn modules(&self) -> Vec<Module> {
        self.state.read().modules.values().cloned().collect()
    }

    pub fn module(&self, name: &str) -> Option<Module> {
        self.state.read().modules.get(name).cloned()
    }

    pub fn libraries(&self) -> Vec<Library> {
        self.state.read().libraries.values().cloned().collect()
    }

    pub fn library(&self, name: &str) -> Option<Library> {
        self.state.read().libraries.get(name).cloned()
    }
}

impl ProjectModel for WorkspaceModel {
    fn upsert_module(&self, module: Module) -> anyhow::Result<()> {
        self.state.write().modules.insert(module.name.clone(), module);
        Ok(())
    }

    fn remove_module(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.state.write().modules.remove(name).is_some())
    }

    fn upsert_library(&self, library: Library) -> anyhow::Result<()> {
        self.state
            .write()
            .libraries
            .insert(library.name.clone(), library);
        Ok(())
    }

    fn remove_library(&self, name: &str) -> anyhow::Result<bool> {
        Ok(self.state.write().libraries.remove(name).is_some())
    }

    fn commit(&self) -> anyhow::Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = self.state.read().clone();
        store.set(snapshot)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsync_storage::StorageHints;
    use pretty_assertions::assert_eq;

    fn module(name: &str) -> Module {
        Module {
            name: name.to_string(),
            label: Label::parse(name),
            kind: "java_library".into(),
            language: "java".into(),
            source_roots: vec!["src".into()],
            resource_roots: Vec::new(),
            module_dependencies: Vec::new(),
            library_dependencies: Vec::new(),
            sdk: None,
            executable: false,
        }
    }

    #[test]
    fn upsert_replaces_by_name() {
        let model = WorkspaceModel::in_memory();
        model.upsert_module(module("//a:a")).unwrap();
        let mut changed = module("//a:a");
        changed.source_roots = vec!["java".into()];
        model.upsert_module(changed.clone()).unwrap();
        assert_eq!(model.modules(), vec![changed]);
        assert!(model.remove_module("//a:a").unwrap());
        assert!(!model.remove_module("//a:a").unwrap());
    }

    #[test]
    fn committed_model_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StorageContext::new(dir.path(), StorageHints::Paged, 16);

        let model = WorkspaceModel::open(&ctx).unwrap();
        model.upsert_module(module("//a:a")).unwrap();
        model
            .upsert_library(Library {
                name: "@maven//:guava".into(),
                label: Label::parse("@maven//:guava"),
                jars: vec!["guava.jar".into()],
            })
            .unwrap();
        model.commit().unwrap();
        drop(model);

        let reopened = WorkspaceModel::open(&ctx).unwrap();
        assert_eq!(reopened.module("//a:a"), Some(module("//a:a")));
        assert_eq!(reopened.libraries().len(), 1);
    }
}
