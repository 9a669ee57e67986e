//! Modules and libraries for the IDE project model.

use crate::diff::{ApplyContext, ProjectStructureDiff};
use crate::hooks::{Hook, HookContext, SyncEnv, SyncHook};
use crate::model::{Library, Module, ProjectModel};
use anyhow::bail;
use async_trait::async_trait;
use bsync_core::{Label, TargetData, TargetInfo};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};
use std::sync::Arc;

pub const MODULE_SYNC_HOOK_ID: &str = "bsync.modules";

/// Module and library changes for one [`ProjectModel`].
pub struct ModuleDiff {
    model: Arc<dyn ProjectModel>,
    modules: BTreeMap<String, Module>,
    libraries: BTreeMap<String, Library>,
    removed: BTreeSet<String>,
}

impl ModuleDiff {
    pub fn new(model: Arc<dyn ProjectModel>) -> Self {
        Self {
            model,
            modules: BTreeMap::new(),
            libraries: BTreeMap::new(),
            removed: BTreeSet::new(),
        }
    }

    pub fn add_module(&mut self, module: Module) {
        self.removed.remove(&module.name);
        self.modules.insert(module.name.clone(), module);
    }

    pub fn add_library(&mut self, library: Library) {
        self.removed.remove(&library.name);
        self.libraries.insert(library.name.clone(), library);
    }

    /// Drop the module or library called `name` from the model.
    pub fn remove(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.modules.remove(&name);
        self.libraries.remove(&name);
        self.removed.insert(name);
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn libraries(&self) -> impl Iterator<Item = &Library> {
        self.libraries.values()
    }

    pub fn removed(&self) -> &BTreeSet<String> {
        &self.removed
    }
}

impl ProjectStructureDiff for ModuleDiff {
    fn name(&self) -> &'static str {
        "modules"
    }

    fn apply(&mut self, ctx: &ApplyContext) -> anyhow::Result<()> {
        for name in &self.removed {
            self.model.remove_module(name)?;
            self.model.remove_library(name)?;
        }
        // A label is either a module or a library; upserting one role drops the other.
        for module in self.modules.values() {
            self.model.remove_library(&module.name)?;
            self.model.upsert_module(module.clone())?;
        }
        for library in self.libraries.values() {
            self.model.remove_module(&library.name)?;
            self.model.upsert_library(library.clone())?;
        }
        self.model.commit()?;
        tracing::info!(
            target = "bsync.sync",
            task_id = %ctx.task_id,
            modules = self.modules.len(),
            libraries = self.libraries.len(),
            removed = self.removed.len(),
            "applied module diff"
        );
        Ok(())
    }
}

/// Builds a [`Module`] for a workspace target.
///
/// Dependencies on other entries of `modules` become module dependencies; every other known
/// dependency becomes a library dependency.
pub fn module_for_target(
    target: &TargetInfo,
    modules: &BTreeSet<&Label>,
    known: impl Fn(&Label) -> bool,
) -> anyhow::Result<Module> {
    let source_roots = roots_of(target, &target.srcs)?;
    let resource_roots = roots_of(target, &target.resources)?;

    let mut module_dependencies = BTreeSet::new();
    let mut library_dependencies = BTreeSet::new();
    for dep in target.all_dependencies() {
        if dep == &target.id {
            continue;
        }
        if modules.contains(dep) {
            module_dependencies.insert(dep.to_string());
        } else if known(dep) {
            library_dependencies.insert(dep.to_string());
        }
    }

    Ok(Module {
        name: target.id.to_string(),
        label: target.id.clone(),
        kind: target.kind.clone(),
        language: target.language_id().to_string(),
        source_roots,
        resource_roots,
        module_dependencies: module_dependencies.into_iter().collect(),
        library_dependencies: library_dependencies.into_iter().collect(),
        sdk: sdk_of(target),
        executable: target.is_executable(),
    })
}

pub fn library_for_target(target: &TargetInfo) -> Library {
    let jars = match &target.data {
        Some(TargetData::Jvm(jvm)) => jvm.jars.clone(),
        Some(TargetData::Kotlin(kotlin)) => kotlin.jvm.jars.clone(),
        _ => Vec::new(),
    };
    Library {
        name: target.id.to_string(),
        label: target.id.clone(),
        jars,
    }
}

/// Parent directories of `files`; bare file names resolve to the package directory.
fn roots_of(target: &TargetInfo, files: &[String]) -> anyhow::Result<Vec<String>> {
    let mut roots = BTreeSet::new();
    for file in files {
        let path = Path::new(file);
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            bail!("source `{file}` escapes the workspace");
        }
        let parent = path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| target.id.package_name().to_string());
        roots.insert(parent);
    }
    Ok(roots.into_iter().collect())
}

fn sdk_of(target: &TargetInfo) -> Option<String> {
    match target.data.as_ref()? {
        TargetData::Jvm(jvm) => jvm.java_home.clone().or_else(|| jvm.java_version.clone()),
        TargetData::Kotlin(kotlin) => kotlin
            .jvm
            .java_home
            .clone()
            .or_else(|| kotlin.language_version.clone()),
        TargetData::Go(go) => go.sdk_home.clone(),
        TargetData::Python(python) => python.interpreter.clone(),
        TargetData::Cpp(cpp) => cpp.compiler.clone(),
        TargetData::Protobuf(_) | TargetData::Thrift(_) => None,
    }
}

/// Built-in hook filling the [`ModuleDiff`] slot.
///
/// Only invalidated targets are transformed; the rest of the model is left as the last sync
/// committed it. Imported main-repository targets become modules, external ones and boundary
/// dependencies become libraries.
pub struct ModuleSyncHook {
    model: Arc<dyn ProjectModel>,
}

impl ModuleSyncHook {
    pub fn new(model: Arc<dyn ProjectModel>) -> Self {
        Self { model }
    }
}

impl Hook for ModuleSyncHook {
    fn id(&self) -> &str {
        MODULE_SYNC_HOOK_ID
    }
}

#[async_trait]
impl SyncHook for ModuleSyncHook {
    async fn on_sync(&self, _ctx: &HookContext, env: &mut SyncEnv<'_>) -> anyhow::Result<()> {
        let graph = env.graph;
        let imported = env.imported;
        let module_labels: BTreeSet<&Label> = imported
            .iter()
            .filter(|t| t.id.is_main_workspace())
            .map(|t| &t.id)
            .collect();

        let invalidated = env.invalidated_targets();
        let (workspace, external): (Vec<&TargetInfo>, Vec<&TargetInfo>) = invalidated
            .into_iter()
            .partition(|t| module_labels.contains(&t.id));

        let results: Vec<(Label, anyhow::Result<Module>)> = workspace
            .par_iter()
            .map(|target| {
                let module = module_for_target(target, &module_labels, |dep| graph.contains(dep));
                (target.id.clone(), module)
            })
            .collect();

        let libraries: Vec<Library> = external
            .into_iter()
            .chain(env.invalidated_dependencies())
            .map(library_for_target)
            .collect();

        let mut modules = Vec::with_capacity(results.len());
        for (label, result) in results {
            match result {
                Ok(module) => modules.push(module),
                Err(err) => env.target_failed(label, format!("{err:#}")),
            }
        }
        let removed: Vec<String> = env.hash_diff.removed.iter().map(Label::to_string).collect();

        let model = Arc::clone(&self.model);
        let diff = env
            .diffs
            .get_or_insert_with(move || ModuleDiff::new(model));
        for name in removed {
            diff.remove(name);
        }
        for module in modules {
            diff.add_module(module);
        }
        for library in libraries {
            diff.add_library(library);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::ProjectInfo;
    use crate::model::WorkspaceModel;
    use crate::scope::SyncScope;
    use bsync_core::{DependencyKind, JvmTargetData};
    use pretty_assertions::assert_eq;

    fn label(text: &str) -> Label {
        Label::parse(text)
    }

    fn ctx() -> ApplyContext {
        ApplyContext {
            project: ProjectInfo::new("p", "/ws"),
            scope: SyncScope::SecondPhaseSync,
            task_id: "sync-1".into(),
        }
    }

    #[test]
    fn module_splits_module_and_library_dependencies() {
        let mut target = TargetInfo::new(label("//app:app"), "java_binary")
            .with_dependency(label("//lib:lib"), DependencyKind::Compile)
            .with_dependency(label("@maven//:guava"), DependencyKind::Compile)
            .with_dependency(label("//gone:gone"), DependencyKind::Runtime);
        target.srcs = vec!["app/src/Main.java".into(), "app/src/Util.java".into()];
        target.resources = vec!["app/res/app.properties".into()];
        target.data = Some(TargetData::Jvm(JvmTargetData {
            java_home: Some("/jdk".into()),
            ..JvmTargetData::default()
        }));

        let lib = label("//lib:lib");
        let app = label("//app:app");
        let modules = BTreeSet::from([&app, &lib]);
        let known = |dep: &Label| dep.repo_name() == "maven" || dep == &lib;
        let module = module_for_target(&target, &modules, known).unwrap();

        assert_eq!(module.name, "@@//app:app");
        assert_eq!(module.source_roots, vec!["app/src"]);
        assert_eq!(module.resource_roots, vec!["app/res"]);
        assert_eq!(module.module_dependencies, vec!["@@//lib:lib"]);
        assert_eq!(module.library_dependencies, vec!["@@maven//:guava"]);
        assert_eq!(module.sdk.as_deref(), Some("/jdk"));
        assert!(module.executable);
    }

    #[test]
    fn escaping_sources_fail_the_target() {
        let mut target = TargetInfo::new(label("//app:app"), "java_library");
        target.srcs = vec!["../outside/Foo.java".into()];
        let err = module_for_target(&target, &BTreeSet::new(), |_| false).unwrap_err();
        assert!(err.to_string().contains("escapes the workspace"));

        target.srcs = vec!["/abs/Foo.java".into()];
        assert!(module_for_target(&target, &BTreeSet::new(), |_| false).is_err());
    }

    #[test]
    fn applying_twice_does_not_duplicate_entries() {
        let model = Arc::new(WorkspaceModel::in_memory());
        let mut diff = ModuleDiff::new(model.clone());
        let target = TargetInfo::new(label("//a:a"), "java_library");
        diff.add_module(module_for_target(&target, &BTreeSet::new(), |_| false).unwrap());
        diff.add_library(library_for_target(&TargetInfo::new(
            label("@maven//:guava"),
            "jvm_import",
        )));

        diff.apply(&ctx()).unwrap();
        diff.apply(&ctx()).unwrap();
        assert_eq!(model.modules().len(), 1);
        assert_eq!(model.libraries().len(), 1);
    }

    #[test]
    fn removal_overrides_earlier_addition_and_vice_versa() {
        let model = Arc::new(WorkspaceModel::in_memory());
        model
            .upsert_module(
                module_for_target(
                    &TargetInfo::new(label("//old:old"), "java_library"),
                    &BTreeSet::new(),
                    |_| false,
                )
                .unwrap(),
            )
            .unwrap();

        let mut diff = ModuleDiff::new(model.clone());
        diff.remove("@@//old:old");
        diff.apply(&ctx()).unwrap();
        assert!(model.module("@@//old:old").is_none());

        let target = TargetInfo::new(label("//old:old"), "java_library");
        diff.add_module(module_for_target(&target, &BTreeSet::new(), |_| false).unwrap());
        assert!(diff.removed().is_empty());
    }
}
