//! Bazel project view files (`.bazelproject`).
//!
//! ```text
//! # comment
//! import tools/base.bazelproject
//!
//! targets:
//!   //app/...
//!   -//app/experimental/...
//!
//! directories:
//!   app
//!   -app/generated
//!
//! derive_targets_from_directories: true
//! import_depth: 2
//! ```
//!
//! List sections accumulate across repeated headers and imports; singleton sections keep the last
//! value seen. Unknown sections are logged and skipped.

use bsync_core::Label;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Imports nested deeper than this are treated as a cycle.
const MAX_IMPORT_NESTING: usize = 16;

#[derive(Debug, Error)]
pub enum ProjectViewError {
    #[error("failed to read project view {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {message}")]
    Syntax {
        path: String,
        line: usize,
        message: String,
    },
    #[error("project view import cycle through {path}")]
    ImportCycle { path: String },
}

/// A Bazel target pattern as used by project views and the command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetPattern {
    /// A single target.
    Label(Label),
    /// Every target in one package (`//pkg:all`, `//pkg:*`).
    Package { repo: String, package: String },
    /// Every target in a package and its subpackages (`//pkg/...`).
    Recursive { repo: String, package: String },
}

impl TargetPattern {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (repo, rest) = match text.split_once("//") {
            Some((repo, rest)) => (repo.trim_start_matches('@'), rest),
            None => return TargetPattern::Label(Label::parse(text)),
        };

        let rest = ["all-targets", "all", "*"]
            .iter()
            .find_map(|suffix| {
                rest.strip_suffix(suffix)
                    .and_then(|r| r.strip_suffix(':'))
                    .map(|r| (r, true))
            })
            .unwrap_or((rest, false));

        match rest {
            (path, _) if path == "..." || path.ends_with("/...") => TargetPattern::Recursive {
                repo: repo.to_owned(),
                package: path.trim_end_matches("...").trim_end_matches('/').to_owned(),
            },
            (package, true) => TargetPattern::Package {
                repo: repo.to_owned(),
                package: package.to_owned(),
            },
            (_, false) => TargetPattern::Label(Label::parse(text)),
        }
    }

    /// `//dir/...` for a workspace-relative directory; `.` is the whole workspace.
    pub fn for_directory(dir: &Path) -> Self {
        let package = dir
            .to_string_lossy()
            .replace('\\', "/")
            .trim_matches('/')
            .to_owned();
        let package = if package == "." { String::new() } else { package };
        TargetPattern::Recursive {
            repo: String::new(),
            package,
        }
    }

    pub fn matches(&self, label: &Label) -> bool {
        match self {
            TargetPattern::Label(pattern) => pattern == label,
            TargetPattern::Package { repo, package } => {
                repo == label.repo_name() && package == label.package_name()
            }
            TargetPattern::Recursive { repo, package } => {
                repo == label.repo_name() && is_within(label.package_name(), package)
            }
        }
    }
}

fn is_within(package: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || package == prefix
        || package
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl fmt::Display for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repo_prefix = |repo: &str| {
            if repo.is_empty() {
                String::new()
            } else {
                format!("@{repo}")
            }
        };
        match self {
            TargetPattern::Label(label) if label.is_main_workspace() => {
                write!(f, "//{}:{}", label.package_name(), label.target_name())
            }
            TargetPattern::Label(label) => write!(
                f,
                "@{}//{}:{}",
                label.repo_name(),
                label.package_name(),
                label.target_name()
            ),
            TargetPattern::Package { repo, package } => {
                write!(f, "{}//{package}:all", repo_prefix(repo))
            }
            TargetPattern::Recursive { repo, package } if package.is_empty() => {
                write!(f, "{}//...", repo_prefix(repo))
            }
            TargetPattern::Recursive { repo, package } => {
                write!(f, "{}//{package}/...", repo_prefix(repo))
            }
        }
    }
}

/// Entries of a section where a leading `-` excludes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcludableList<T> {
    pub included: Vec<T>,
    pub excluded: Vec<T>,
}

impl<T> Default for ExcludableList<T> {
    fn default() -> Self {
        Self {
            included: Vec::new(),
            excluded: Vec::new(),
        }
    }
}

impl<T> ExcludableList<T> {
    pub fn is_empty(&self) -> bool {
        self.included.is_empty() && self.excluded.is_empty()
    }

    fn push(&mut self, raw: &str, parse: impl Fn(&str) -> T) {
        match raw.strip_prefix('-') {
            Some(excluded) => self.excluded.push(parse(excluded.trim())),
            None => self.included.push(parse(raw)),
        }
    }

    fn extend(&mut self, other: ExcludableList<T>) {
        self.included.extend(other.included);
        self.excluded.extend(other.excluded);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectView {
    pub targets: ExcludableList<TargetPattern>,
    pub directories: ExcludableList<PathBuf>,
    pub import_depth: Option<i32>,
    pub derive_targets_from_directories: Option<bool>,
    pub allow_manual_targets_sync: Option<bool>,
    pub build_flags: Vec<String>,
    pub sync_flags: Vec<String>,
    pub enabled_rules: Vec<String>,
    pub bazel_binary: Option<PathBuf>,
    /// Section names present in the file that are not understood.
    pub unknown_sections: BTreeSet<String>,
}

impl ProjectView {
    /// Import depth with `-1` (unbounded) when unset.
    pub fn import_depth(&self) -> i32 {
        self.import_depth.unwrap_or(-1)
    }

    pub fn derive_targets_from_directories(&self) -> bool {
        self.derive_targets_from_directories.unwrap_or(false)
    }

    pub fn allow_manual_targets_sync(&self) -> bool {
        self.allow_manual_targets_sync.unwrap_or(false)
    }

    /// Patterns selecting the targets to sync.
    ///
    /// Directories contribute `//dir/...` when targets are derived from them. Excluded directories
    /// always exclude everything below them. Without any include the whole workspace is selected.
    pub fn target_patterns(&self) -> ExcludableList<TargetPattern> {
        let mut patterns = self.targets.clone();
        if self.derive_targets_from_directories() {
            patterns.included.extend(
                self.directories
                    .included
                    .iter()
                    .map(|dir| TargetPattern::for_directory(dir)),
            );
        }
        patterns.excluded.extend(
            self.directories
                .excluded
                .iter()
                .map(|dir| TargetPattern::for_directory(dir)),
        );
        if patterns.included.is_empty() {
            patterns.included.push(TargetPattern::Recursive {
                repo: String::new(),
                package: String::new(),
            });
        }
        patterns
    }

    /// Whether `label` is selected by [`ProjectView::target_patterns`].
    pub fn selects(&self, label: &Label) -> bool {
        let patterns = self.target_patterns();
        patterns.included.iter().any(|p| p.matches(label))
            && !patterns.excluded.iter().any(|p| p.matches(label))
    }

    /// Load a project view file, resolving `import` lines relative to `workspace_root`.
    pub fn load(path: &Path, workspace_root: &Path) -> Result<Self, ProjectViewError> {
        let mut stack = Vec::new();
        Self::load_nested(path, workspace_root, &mut stack)
    }

    fn load_nested(
        path: &Path,
        workspace_root: &Path,
        stack: &mut Vec<PathBuf>,
    ) -> Result<Self, ProjectViewError> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if stack.contains(&key) || stack.len() >= MAX_IMPORT_NESTING {
            return Err(ProjectViewError::ImportCycle {
                path: path.display().to_string(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| ProjectViewError::Io {
            path: path.display().to_string(),
            source,
        })?;

        stack.push(key);
        let view = Self::parse_with_imports(&text, &path.display().to_string(), |import| {
            let import_path = if import.is_absolute() {
                import.to_path_buf()
            } else {
                workspace_root.join(import)
            };
            Self::load_nested(&import_path, workspace_root, stack)
        });
        stack.pop();
        view
    }

    /// Parse project view text. `import` lines are rejected; use [`ProjectView::load`].
    pub fn parse(text: &str) -> Result<Self, ProjectViewError> {
        Self::parse_with_imports(text, "<project view>", |import| {
            Err(ProjectViewError::Syntax {
                path: "<project view>".to_owned(),
                line: 0,
                message: format!("cannot resolve import {}", import.display()),
            })
        })
    }

    fn parse_with_imports(
        text: &str,
        origin: &str,
        mut import: impl FnMut(&Path) -> Result<ProjectView, ProjectViewError>,
    ) -> Result<Self, ProjectViewError> {
        let syntax = |line: usize, message: String| ProjectViewError::Syntax {
            path: origin.to_owned(),
            line,
            message,
        };

        let mut view = ProjectView::default();
        let mut current: Option<String> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let indented = raw.starts_with(char::is_whitespace);
            if !indented {
                if let Some(target) = trimmed
                    .strip_prefix("try_import ")
                    .map(|t| (t, true))
                    .or_else(|| trimmed.strip_prefix("import ").map(|t| (t, false)))
                {
                    let (import_path, optional) = target;
                    match import(Path::new(import_path.trim())) {
                        Ok(imported) => view.merge(imported),
                        Err(ProjectViewError::Io { .. }) if optional => {}
                        Err(err) => return Err(err),
                    }
                    current = None;
                    continue;
                }

                let Some((name, value)) = trimmed.split_once(':') else {
                    return Err(syntax(line_no, format!("expected `section:`, got {trimmed:?}")));
                };
                let name = name.trim();
                if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
                {
                    return Err(syntax(line_no, format!("invalid section header {trimmed:?}")));
                }
                current = Some(name.to_owned());
                let value = value.trim();
                if !value.is_empty() {
                    view.apply(name, value).map_err(|msg| syntax(line_no, msg))?;
                }
                continue;
            }

            let Some(section) = &current else {
                return Err(syntax(line_no, "entry outside of any section".to_owned()));
            };
            view.apply(section, trimmed)
                .map_err(|msg| syntax(line_no, msg))?;
        }

        for section in &view.unknown_sections {
            tracing::warn!(
                target: "bsync.config",
                project_view = origin,
                section = %section,
                "ignoring unknown project view section"
            );
        }
        Ok(view)
    }

    fn apply(&mut self, section: &str, value: &str) -> Result<(), String> {
        match section {
            "targets" => self.targets.push(value, TargetPattern::parse),
            "directories" => self.directories.push(value, |v: &str| PathBuf::from(v)),
            "build_flags" => self.build_flags.push(value.to_owned()),
            "sync_flags" => self.sync_flags.push(value.to_owned()),
            "enabled_rules" => self.enabled_rules.push(value.to_owned()),
            "import_depth" => {
                let depth = value
                    .parse::<i32>()
                    .map_err(|_| format!("import_depth: expected an integer, got {value:?}"))?;
                self.import_depth = Some(depth);
            }
            "derive_targets_from_directories" => {
                self.derive_targets_from_directories = Some(parse_bool(section, value)?);
            }
            "allow_manual_targets_sync" => {
                self.allow_manual_targets_sync = Some(parse_bool(section, value)?);
            }
            "bazel_binary" => self.bazel_binary = Some(PathBuf::from(value)),
            other => {
                self.unknown_sections.insert(other.to_owned());
            }
        }
        Ok(())
    }

    /// Layer `imported` below `self`: lists accumulate, singletons already set here win.
    fn merge(&mut self, imported: ProjectView) {
        self.targets.extend(imported.targets);
        self.directories.extend(imported.directories);
        self.build_flags.extend(imported.build_flags);
        self.sync_flags.extend(imported.sync_flags);
        self.enabled_rules.extend(imported.enabled_rules);
        self.import_depth = self.import_depth.or(imported.import_depth);
        self.derive_targets_from_directories = self
            .derive_targets_from_directories
            .or(imported.derive_targets_from_directories);
        self.allow_manual_targets_sync = self
            .allow_manual_targets_sync
            .or(imported.allow_manual_targets_sync);
        self.bazel_binary = self.bazel_binary.take().or(imported.bazel_binary);
        self.unknown_sections.extend(imported.unknown_sections);
    }
}

fn parse_bool(section: &str, value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(format!("{section}: expected true or false, got {value:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_sections_and_exclusions() {
        let view = ProjectView::parse(
            "# header comment\n\
             targets:\n\
             \x20 //app/...\n\
             \x20 -//app/experimental:all\n\
             \x20 //lib:core\n\
             directories: .\n\
             import_depth: 2\n\
             allow_manual_targets_sync: TRUE\n\
             build_flags:\n\
             \x20 --config=ci\n\
             bazel_binary: /usr/bin/bazelisk\n",
        )
        .unwrap();

        assert_eq!(
            view.targets.included,
            vec![
                TargetPattern::Recursive {
                    repo: String::new(),
                    package: "app".to_owned()
                },
                TargetPattern::Label(Label::parse("//lib:core")),
            ]
        );
        assert_eq!(
            view.targets.excluded,
            vec![TargetPattern::Package {
                repo: String::new(),
                package: "app/experimental".to_owned()
            }]
        );
        assert_eq!(view.directories.included, vec![PathBuf::from(".")]);
        assert_eq!(view.import_depth(), 2);
        assert!(view.allow_manual_targets_sync());
        assert!(!view.derive_targets_from_directories());
        assert_eq!(view.build_flags, vec!["--config=ci".to_owned()]);
        assert_eq!(view.bazel_binary, Some(PathBuf::from("/usr/bin/bazelisk")));
    }

    #[test]
    fn defaults_when_sections_are_missing() {
        let view = ProjectView::parse("").unwrap();
        assert_eq!(view.import_depth(), -1);
        assert!(view.selects(&Label::parse("//anything:at_all")));
    }

    #[test]
    fn unknown_sections_are_ignored() {
        let view = ProjectView::parse("workspace_type: java\nshard_sync: true\ntargets: //a\n")
            .unwrap();
        assert_eq!(
            view.unknown_sections.into_iter().collect::<Vec<_>>(),
            vec!["shard_sync".to_owned(), "workspace_type".to_owned()]
        );
        assert_eq!(view.targets.included.len(), 1);
    }

    #[test]
    fn syntax_errors_carry_line_numbers() {
        match ProjectView::parse("targets:\n  //a\nimport_depth: deep\n") {
            Err(ProjectViewError::Syntax { line: 3, .. }) => {}
            other => panic!("expected syntax error on line 3, got {other:?}"),
        }
        match ProjectView::parse("  //orphan\n") {
            Err(ProjectViewError::Syntax { line: 1, .. }) => {}
            other => panic!("expected syntax error on line 1, got {other:?}"),
        }
    }

    #[test]
    fn directories_derive_recursive_patterns() {
        let view = ProjectView::parse(
            "directories:\n  app\n  -app/generated\nderive_targets_from_directories: true\n",
        )
        .unwrap();
        assert_eq!(view.directories.included, vec![PathBuf::from("app")]);
        assert_eq!(view.directories.excluded, vec![PathBuf::from("app/generated")]);
        assert!(view.selects(&Label::parse("//app:main")));
        assert!(view.selects(&Label::parse("//app/util:util")));
        assert!(!view.selects(&Label::parse("//app/generated:protos")));
        assert!(!view.selects(&Label::parse("//application:main")));
        assert!(!view.selects(&Label::parse("//lib:lib")));
    }

    #[test]
    fn pattern_matching_and_rendering() {
        let recursive = TargetPattern::parse("//foo/...");
        assert!(recursive.matches(&Label::parse("//foo:x")));
        assert!(recursive.matches(&Label::parse("//foo/bar:y")));
        assert!(!recursive.matches(&Label::parse("//foobar:z")));
        assert!(!recursive.matches(&Label::parse("@ext//foo:x")));
        assert_eq!(recursive.to_string(), "//foo/...");

        let everything = TargetPattern::parse("//...:all");
        assert!(everything.matches(&Label::parse("//deep/pkg:t")));
        assert_eq!(everything.to_string(), "//...");

        let package = TargetPattern::parse("@ext//lib:*");
        assert!(package.matches(&Label::parse("@ext//lib:a")));
        assert!(!package.matches(&Label::parse("@ext//lib/sub:a")));
        assert_eq!(package.to_string(), "@ext//lib:all");

        let single = TargetPattern::parse("//lib:core");
        assert_eq!(single.to_string(), "//lib:core");
    }

    #[test]
    fn imports_merge_with_local_values_winning() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("tools")).unwrap();
        std::fs::write(
            root.join("tools/base.bazelproject"),
            "targets:\n  //base/...\nimport_depth: 5\nbuild_flags:\n  --a\n",
        )
        .unwrap();
        std::fs::write(
            root.join(".bazelproject"),
            "import tools/base.bazelproject\ntry_import tools/missing.bazelproject\n\
             targets:\n  //app/...\nimport_depth: 1\nbuild_flags:\n  --b\n",
        )
        .unwrap();

        let view = ProjectView::load(&root.join(".bazelproject"), root).unwrap();
        assert_eq!(view.targets.included.len(), 2);
        assert_eq!(view.import_depth(), 1);
        assert_eq!(view.build_flags, vec!["--a".to_owned(), "--b".to_owned()]);
    }

    #[test]
    fn import_cycles_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.bazelproject"), "import b.bazelproject\n").unwrap();
        std::fs::write(root.join("b.bazelproject"), "import a.bazelproject\n").unwrap();
        match ProjectView::load(&root.join("a.bazelproject"), root) {
            Err(ProjectViewError::ImportCycle { .. }) => {}
            other => panic!("expected import cycle, got {other:?}"),
        }
    }
}
