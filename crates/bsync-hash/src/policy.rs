use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether a target's hash covers only its own descriptor or also its dependencies' hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashMode {
    Shallow,
    #[default]
    Transitive,
}

/// Which parts of a [`bsync_core::TargetInfo`] feed its hash.
///
/// Attributes named in `ignored_attributes` never contribute, so changes to them do not trigger a
/// re-resolve.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HashPolicy {
    pub mode: HashMode,
    pub ignored_attributes: BTreeSet<String>,
}

impl HashPolicy {
    pub fn shallow() -> Self {
        Self {
            mode: HashMode::Shallow,
            ..Self::default()
        }
    }

    pub fn ignoring(mut self, attributes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ignored_attributes
            .extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn is_ignored(&self, attribute: &str) -> bool {
        self.ignored_attributes.contains(attribute)
    }
}
