use crate::Label;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

const TAG_MANUAL: &str = "manual";
const TAG_NO_IDE: &str = "no-ide";
const BINARY_SUFFIX: &str = "_binary";
const TEST_SUFFIX: &str = "_test";

/// Raw target descriptor, as emitted by Bazel's query/aspect machinery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub id: Label,
    /// Rule class, e.g. `java_library`.
    pub kind: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub srcs: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Environment the rule's compiler/interpreter runs with.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<TargetData>,
}

impl TargetInfo {
    pub fn new(id: Label, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            tags: BTreeSet::new(),
            srcs: Vec::new(),
            resources: Vec::new(),
            dependencies: Vec::new(),
            attributes: BTreeMap::new(),
            env: BTreeMap::new(),
            data: None,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.tags.contains(TAG_MANUAL)
    }

    pub fn is_no_ide(&self) -> bool {
        self.tags.contains(TAG_NO_IDE)
    }

    pub fn is_binary(&self) -> bool {
        self.kind.ends_with(BINARY_SUFFIX)
    }

    pub fn is_test(&self) -> bool {
        self.kind.ends_with(TEST_SUFFIX)
    }

    pub fn is_executable(&self) -> bool {
        self.is_binary() || self.is_test()
    }

    pub fn compile_dependencies(&self) -> impl Iterator<Item = &Label> {
        self.dependencies
            .iter()
            .filter(|dep| dep.kind == DependencyKind::Compile)
            .map(|dep| &dep.label)
    }

    pub fn runtime_dependencies(&self) -> impl Iterator<Item = &Label> {
        self.dependencies
            .iter()
            .filter(|dep| dep.kind == DependencyKind::Runtime)
            .map(|dep| &dep.label)
    }

    pub fn all_dependencies(&self) -> impl Iterator<Item = &Label> {
        self.dependencies.iter().map(|dep| &dep.label)
    }

    /// Language id of the per-target payload, falling back to the rule-kind prefix.
    pub fn language_id(&self) -> &str {
        match &self.data {
            Some(data) => data.language_id(),
            None => self.kind.split('_').next().unwrap_or(&self.kind),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_dependency(mut self, label: Label, kind: DependencyKind) -> Self {
        self.dependencies.push(Dependency { label, kind });
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub label: Label,
    #[serde(default)]
    pub kind: DependencyKind,
}

/// Compile dependencies come from `deps`, `jars`, `exports`, `associates` and
/// `proc_macro_deps`; everything reachable only at runtime is [`DependencyKind::Runtime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    #[default]
    Compile,
    Runtime,
}

/// Attribute value as reported by the aspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    String(String),
    List(Vec<String>),
    Dict(BTreeMap<String, String>),
}

/// Per-language target payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "language", rename_all = "snake_case")]
pub enum TargetData {
    Jvm(JvmTargetData),
    Kotlin(KotlinTargetData),
    Go(GoTargetData),
    Python(PythonTargetData),
    Cpp(CppTargetData),
    Protobuf(ProtobufTargetData),
    Thrift(ThriftTargetData),
}

impl TargetData {
    pub fn language_id(&self) -> &'static str {
        match self {
            TargetData::Jvm(_) => "java",
            TargetData::Kotlin(_) => "kotlin",
            TargetData::Go(_) => "go",
            TargetData::Python(_) => "python",
            TargetData::Cpp(_) => "cpp",
            TargetData::Protobuf(_) => "proto",
            TargetData::Thrift(_) => "thrift",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JvmTargetData {
    #[serde(default)]
    pub java_home: Option<String>,
    #[serde(default)]
    pub java_version: Option<String>,
    #[serde(default)]
    pub javac_opts: Vec<String>,
    #[serde(default)]
    pub jvm_flags: Vec<String>,
    #[serde(default)]
    pub main_class: Option<String>,
    #[serde(default)]
    pub jars: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KotlinTargetData {
    #[serde(default)]
    pub language_version: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub kotlinc_opts: Vec<String>,
    #[serde(default)]
    pub associates: Vec<Label>,
    #[serde(default)]
    pub jvm: JvmTargetData,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GoTargetData {
    #[serde(default)]
    pub importpath: Option<String>,
    #[serde(default)]
    pub sdk_home: Option<String>,
    #[serde(default)]
    pub generated_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PythonTargetData {
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub imports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CppTargetData {
    #[serde(default)]
    pub compiler: Option<String>,
    #[serde(default)]
    pub copts: Vec<String>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub include_dirs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtobufTargetData {
    #[serde(default)]
    pub import_prefix: Option<String>,
    #[serde(default)]
    pub strip_import_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThriftTargetData {
    #[serde(default)]
    pub compiler: Option<String>,
    #[serde(default)]
    pub namespaces: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facets_are_derived_from_kind_and_tags() {
        let target = TargetInfo::new(Label::parse("//app:main"), "java_binary")
            .with_tag("manual");
        assert!(target.is_binary());
        assert!(target.is_executable());
        assert!(!target.is_test());
        assert!(target.is_manual());
        assert!(!target.is_no_ide());

        let test = TargetInfo::new(Label::parse("//app:tests"), "kt_jvm_test").with_tag("no-ide");
        assert!(test.is_test());
        assert!(test.is_no_ide());
    }

    #[test]
    fn splits_compile_and_runtime_dependencies() {
        let target = TargetInfo::new(Label::parse("//a"), "java_library")
            .with_dependency(Label::parse("//b"), DependencyKind::Compile)
            .with_dependency(Label::parse("//c"), DependencyKind::Runtime);
        let compile: Vec<_> = target.compile_dependencies().cloned().collect();
        let runtime: Vec<_> = target.runtime_dependencies().cloned().collect();
        assert_eq!(compile, vec![Label::parse("//b")]);
        assert_eq!(runtime, vec![Label::parse("//c")]);
    }

    #[test]
    fn deserializes_aspect_output() {
        let json = r#"{
            "id": "//svc:server",
            "kind": "go_binary",
            "tags": ["no-ide"],
            "srcs": ["svc/main.go"],
            "dependencies": [
                {"label": "//svc/lib"},
                {"label": "@org_golang_x_sys//unix", "kind": "runtime"}
            ],
            "attributes": {"gc_goopts": ["-N"], "pure": "on", "cgo": false},
            "data": {"language": "go", "importpath": "example.com/svc"}
        }"#;
        let target: TargetInfo = serde_json::from_str(json).unwrap();
        assert_eq!(target.id, Label::parse("//svc:server"));
        assert_eq!(target.dependencies[0].kind, DependencyKind::Compile);
        assert_eq!(target.dependencies[1].kind, DependencyKind::Runtime);
        assert_eq!(
            target.attributes.get("gc_goopts"),
            Some(&AttributeValue::List(vec!["-N".to_string()]))
        );
        assert_eq!(target.attributes.get("cgo"), Some(&AttributeValue::Bool(false)));
        assert_eq!(target.language_id(), "go");
        match target.data {
            Some(TargetData::Go(go)) => {
                assert_eq!(go.importpath.as_deref(), Some("example.com/svc"))
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn language_id_falls_back_to_kind_prefix() {
        let target = TargetInfo::new(Label::parse("//a"), "py_library");
        assert_eq!(target.language_id(), "py");
    }
}
