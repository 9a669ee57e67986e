use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Canonical Bazel target identifier (`@repo//package:target`).
///
/// - an empty `repo_name` is a reference into the main repository
/// - an empty `package_name` with a non-empty `target_name` is a same-package reference
///
/// Labels are immutable and compare structurally. The derived ordering (repo, package, target) is
/// what makes graph traversals and snapshots deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    repo_name: String,
    package_name: String,
    target_name: String,
}

impl Label {
    pub fn new(
        repo_name: impl Into<String>,
        package_name: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Self {
        Self {
            repo_name: repo_name.into(),
            package_name: package_name.into(),
            target_name: target_name.into(),
        }
    }

    /// Parse a label string.
    ///
    /// Accepted forms are `@repo//pkg:target`, `@@repo//pkg:target`, `//pkg:target`, `//pkg`,
    /// `:target` and bare `target`. Parsing never fails: a string without `//` (for example
    /// `foo/bar`) becomes a same-package target named after the whole string.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();

        let Some((repo, rest)) = text.split_once("//") else {
            let target = text.strip_prefix(':').unwrap_or(text);
            return Self::new("", "", target);
        };

        let repo = repo.trim_start_matches('@');
        match rest.split_once(':') {
            Some((package, target)) => Self::new(repo, package, target),
            None => {
                let target = rest.rsplit('/').next().unwrap_or(rest);
                Self::new(repo, rest, target)
            }
        }
    }

    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn is_main_workspace(&self) -> bool {
        self.repo_name.is_empty()
    }

    /// Labels pointing into another Bazel repository (`@repo//...`).
    pub fn is_external(&self) -> bool {
        !self.repo_name.is_empty()
    }

    /// Package path split into its slash-delimited segments.
    pub fn package_segments(&self) -> impl Iterator<Item = &str> {
        self.package_name.split('/').filter(|segment| !segment.is_empty())
    }

    /// Canonical `@@repo//package:target` rendering.
    pub fn qualified_target_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@{}//{}:{}",
            self.repo_name, self.package_name, self.target_name
        )
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}
