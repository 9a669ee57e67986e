//! Configuration for `bsync`.
//!
//! A workspace is configured by an optional `bsync.toml` (see [`discover_config_path`]) plus a
//! handful of environment overrides, and by a Bazel project view (see [`ProjectView`]) describing
//! which targets to sync.
//!
//! ```toml
//! [logging]
//! level = "bsync.sync=debug,info"
//! json = false
//!
//! [storage]
//! hints = "paged"
//! cache_capacity = 4096
//!
//! [timeouts]
//! idle_ms = 300000
//!
//! [hashing]
//! mode = "transitive"
//! ignored_attributes = ["stamp"]
//!
//! [sync]
//! apply_policy = "best_effort"
//! project_view = ".bazelproject"
//!
//! [server.aspect]
//! program = "bazel"
//! args = ["build", "--aspects=//tools:ide.bzl%ide_info", "--output_groups=ide-info-json"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bsync_bsp::{AspectCommand, BspConnection};
use bsync_hash::HashPolicy;
use bsync_storage::{StorageContext, StorageHints, DEFAULT_CACHE_CAPACITY, STORAGE_DIR_NAME};
use thiserror::Error;

mod diagnostics;
mod logging;
mod project_view;
mod validation;

pub use diagnostics::{ConfigDiagnostics, ConfigValidationError, ConfigWarning, ValidationDiagnostics};
pub use logging::{init_tracing, LoggingConfig};
pub use project_view::{ExcludableList, ProjectView, ProjectViewError, TargetPattern};

/// Explicit config file location (absolute or relative to the workspace root).
pub const CONFIG_ENV_VAR: &str = "BSYNC_CONFIG_PATH";
/// Overrides [`TimeoutsConfig::idle_ms`].
pub const ENV_IDLE_TIMEOUT_MS: &str = "BSYNC_IDLE_TIMEOUT_MS";
/// Overrides [`LoggingConfig::level`].
pub const ENV_LOG: &str = "BSYNC_LOG";

pub const DEFAULT_PROJECT_VIEW: &str = ".bazelproject";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// What feeds target hashes and whether they fold in dependencies.
    #[serde(default)]
    pub hashing: HashPolicy,

    #[serde(default)]
    pub sync: SyncSettings,

    /// How the build tool is reached.
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub hints: StorageHints,

    /// Entries kept by the write-through cache in front of each persistent store.
    #[serde(default = "StorageConfig::default_cache_capacity")]
    pub cache_capacity: usize,

    /// Store directory, relative to the workspace root unless absolute.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    fn default_cache_capacity() -> usize {
        DEFAULT_CACHE_CAPACITY
    }

    pub fn resolved_dir(&self, workspace_root: &Path) -> PathBuf {
        match &self.dir {
            Some(dir) => resolve_path(workspace_root, dir),
            None => workspace_root.join(STORAGE_DIR_NAME),
        }
    }

    pub fn context(&self, workspace_root: &Path) -> StorageContext {
        StorageContext::new(
            self.resolved_dir(workspace_root),
            self.hints,
            self.cache_capacity,
        )
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            hints: StorageHints::default(),
            cache_capacity: Self::default_cache_capacity(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Longest silence tolerated from the build tool before a call fails.
    #[serde(default = "TimeoutsConfig::default_idle_ms")]
    pub idle_ms: u64,
}

impl TimeoutsConfig {
    fn default_idle_ms() -> u64 {
        5 * 60 * 1000
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            idle_ms: Self::default_idle_ms(),
        }
    }
}

/// How project-structure diffs react to a failing apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffApplyPolicy {
    /// Apply every diff, recording failures as partial success.
    #[default]
    BestEffort,
    /// Stop at the first failing diff and fail the sync.
    AllOrNothing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub apply_policy: DiffApplyPolicy,

    /// Project view file, relative to the workspace root unless absolute.
    #[serde(default = "SyncSettings::default_project_view")]
    pub project_view: PathBuf,
}

impl SyncSettings {
    fn default_project_view() -> PathBuf {
        PathBuf::from(DEFAULT_PROJECT_VIEW)
    }

    pub fn project_view_path(&self, workspace_root: &Path) -> PathBuf {
        resolve_path(workspace_root, &self.project_view)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            apply_policy: DiffApplyPolicy::default(),
            project_view: Self::default_project_view(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// BSP launcher; overrides `.bsp/*.json` discovery.
    #[serde(default)]
    pub program: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Talk to Bazel directly instead of a BSP server.
    #[serde(default)]
    pub aspect: Option<AspectConfig>,
}

impl ServerConfig {
    /// The BSP launcher for `workspace_root`: `.bsp/*.json`, then this config on top.
    pub fn bsp_connection(&self, workspace_root: &Path) -> Option<BspConnection> {
        let discovered = BspConnection::from_dot_bsp(workspace_root);
        let mut connection = bsync_bsp::apply_env_overrides(discovered, self.program.as_deref(), None)?;
        if !self.args.is_empty() {
            connection.args = self.args.clone();
        }
        Some(connection)
    }

    pub fn aspect_command(&self, workspace_root: &Path) -> Option<AspectCommand> {
        let aspect = self.aspect.as_ref()?;
        let mut command = AspectCommand::new(aspect.program.clone(), workspace_root);
        command.args = aspect.args.clone();
        if !aspect.universe.is_empty() {
            command.universe = aspect.universe.clone();
        }
        Some(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectConfig {
    #[serde(default = "AspectConfig::default_program")]
    pub program: String,

    /// Arguments placed before the target patterns.
    #[serde(default)]
    pub args: Vec<String>,

    /// Patterns for a whole-workspace query. Empty means `//...`.
    #[serde(default)]
    pub universe: Vec<String>,
}

impl AspectConfig {
    fn default_program() -> String {
        "bazel".to_owned()
    }
}

impl Default for AspectConfig {
    fn default() -> Self {
        Self {
            program: Self::default_program(),
            args: Vec::new(),
            universe: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` embeds a source snippet; keep just the message.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl SyncConfig {
    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = read_config(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Parse TOML and report unknown keys and validation problems alongside the config.
    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (config, unknown_keys) =
            diagnostics::deserialize_toml_with_unknown_keys::<SyncConfig>(text)?;
        let mut diagnostics = ConfigDiagnostics {
            unknown_keys,
            ..ConfigDiagnostics::default()
        };
        diagnostics.extend_validation(config.validate());
        Ok((config, diagnostics))
    }

    /// Apply `BSYNC_*` overrides read through `lookup`.
    ///
    /// Malformed values are ignored and reported as warnings.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if let Some(level) = lookup(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }

        if let Some(raw) = lookup(ENV_IDLE_TIMEOUT_MS).filter(|v| !v.trim().is_empty()) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.timeouts.idle_ms = ms,
                _ => warnings.push(ConfigWarning::InvalidValue {
                    toml_path: ENV_IDLE_TIMEOUT_MS.to_owned(),
                    message: format!("expected a positive number of milliseconds, got {raw:?}"),
                }),
            }
        }

        if let Some(program) = lookup(bsync_bsp::ENV_BSP_PROGRAM).filter(|v| !v.trim().is_empty()) {
            self.server.program = Some(program.trim().to_owned());
        }
        if let Some(args) = lookup(bsync_bsp::ENV_BSP_ARGS).filter(|v| !v.trim().is_empty()) {
            self.server.args = bsync_bsp::parse_args(&args);
        }

        warnings
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn resolve_path(workspace_root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace_root.join(path)
    }
}

/// Discover the config file for a workspace root.
///
/// Search order:
/// 1) `BSYNC_CONFIG_PATH` (absolute or relative to `workspace_root`)
/// 2) `bsync.toml`, then `.bsync.toml`, in `workspace_root` or the nearest ancestor having one
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    let explicit = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    discover_config_path_with(workspace_root, explicit)
}

fn discover_config_path_with(workspace_root: &Path, explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(candidate) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        let path = resolve_path(workspace_root, &candidate);
        return Some(path.canonicalize().unwrap_or(path));
    }

    workspace_root
        .ancestors()
        .flat_map(|dir| ["bsync.toml", ".bsync.toml"].map(|name| dir.join(name)))
        .find(|path| path.is_file())
        .map(|path| path.canonicalize().unwrap_or(path))
}

/// Load the config for a workspace root, apply process environment overrides and validate it.
///
/// If no config file is present the defaults are used and the returned path is `None`.
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(SyncConfig, Option<PathBuf>, ConfigDiagnostics), ConfigError> {
    let path = discover_config_path(workspace_root);
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with(
    path: Option<PathBuf>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(SyncConfig, Option<PathBuf>, ConfigDiagnostics), ConfigError> {
    let (mut config, unknown_keys) = match &path {
        Some(path) => diagnostics::deserialize_toml_with_unknown_keys::<SyncConfig>(
            &read_config(path)?,
        )?,
        None => (SyncConfig::default(), Vec::new()),
    };

    let mut diagnostics = ConfigDiagnostics {
        unknown_keys,
        warnings: config.apply_env_overrides(lookup),
        ..ConfigDiagnostics::default()
    };
    diagnostics.extend_validation(config.validate());

    for warning in &diagnostics.warnings {
        tracing::warn!(target: "bsync.config", "{warning}");
    }
    for key in &diagnostics.unknown_keys {
        tracing::warn!(target: "bsync.config", key = %key, "ignoring unknown config key");
    }
    Ok((config, path, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: SyncConfig = toml::from_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.timeouts.idle(), Duration::from_secs(300));
        assert_eq!(config.sync.apply_policy, DiffApplyPolicy::BestEffort);
        assert_eq!(config.storage.hints, StorageHints::Paged);
    }

    #[test]
    fn parses_every_section() {
        let text = r#"
[logging]
level = "debug"
json = true

[storage]
hints = "in_memory"
cache_capacity = 16
dir = "/tmp/bsync-store"

[timeouts]
idle_ms = 1500

[hashing]
mode = "shallow"
ignored_attributes = ["stamp"]

[sync]
apply_policy = "all_or_nothing"
project_view = "tools/ide.bazelproject"

[server]
program = "bazel-bsp"
args = ["--verbose"]

[server.aspect]
args = ["build", "--output_groups=ide-info"]
"#;
        let (config, diagnostics) = SyncConfig::load_from_str_with_diagnostics(text).unwrap();
        assert!(diagnostics.unknown_keys.is_empty(), "{diagnostics:?}");
        assert!(diagnostics.errors.is_empty(), "{diagnostics:?}");
        assert_eq!(
            diagnostics.warnings,
            vec![ConfigWarning::ServerAspectOverridesBsp]
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.storage.hints, StorageHints::InMemory);
        assert_eq!(config.storage.cache_capacity, 16);
        assert_eq!(config.timeouts.idle_ms, 1500);
        assert_eq!(config.hashing, HashPolicy::shallow().ignoring(["stamp"]));
        assert_eq!(config.sync.apply_policy, DiffApplyPolicy::AllOrNothing);
        assert_eq!(
            config.sync.project_view_path(Path::new("/ws")),
            PathBuf::from("/ws/tools/ide.bazelproject")
        );
        assert_eq!(
            config.storage.resolved_dir(Path::new("/ws")),
            PathBuf::from("/tmp/bsync-store")
        );

        let aspect = config.server.aspect_command(Path::new("/ws")).unwrap();
        assert_eq!(aspect.program, "bazel");
        assert_eq!(aspect.universe, vec!["//...".to_string()]);
    }

    #[test]
    fn unknown_keys_are_reported_not_fatal() {
        let (config, diagnostics) =
            SyncConfig::load_from_str_with_diagnostics("[timeouts]\nidle_ms = 10\nidel = 3\n")
                .unwrap();
        assert_eq!(config.timeouts.idle_ms, 10);
        assert_eq!(diagnostics.unknown_keys, vec!["timeouts.idel".to_string()]);
        assert!(diagnostics.is_ok());
    }

    #[test]
    fn toml_errors_do_not_echo_the_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bsync.toml");
        std::fs::write(&path, "[timeouts]\nidle_ms = \"secret\"\n").unwrap();

        let err = SyncConfig::load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
        assert!(!err.to_string().contains("idle_ms = "), "{err}");
    }

    #[test]
    fn env_overrides_layer_on_top() {
        let mut config = SyncConfig::default();
        let warnings = config.apply_env_overrides(env(&[
            (ENV_LOG, "trace"),
            (ENV_IDLE_TIMEOUT_MS, "2500"),
            (bsync_bsp::ENV_BSP_PROGRAM, " my-bsp "),
            (bsync_bsp::ENV_BSP_ARGS, r#"["--a", "b c"]"#),
        ]));
        assert!(warnings.is_empty());
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.timeouts.idle_ms, 2500);
        assert_eq!(config.server.program.as_deref(), Some("my-bsp"));
        assert_eq!(config.server.args, vec!["--a".to_string(), "b c".to_string()]);
    }

    #[test]
    fn malformed_idle_override_is_a_warning() {
        let mut config = SyncConfig::default();
        let warnings = config.apply_env_overrides(env(&[(ENV_IDLE_TIMEOUT_MS, "soon")]));
        assert_eq!(config.timeouts, TimeoutsConfig::default());
        assert!(matches!(
            warnings.as_slice(),
            [ConfigWarning::InvalidValue { toml_path, .. }] if toml_path == ENV_IDLE_TIMEOUT_MS
        ));
    }

    #[test]
    fn discovery_prefers_explicit_then_bsync_toml() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        assert_eq!(discover_config_path_with(root, None), None);

        std::fs::write(root.join(".bsync.toml"), "").unwrap();
        let found = discover_config_path_with(root, None).unwrap();
        assert!(found.ends_with(".bsync.toml"));

        std::fs::write(root.join("bsync.toml"), "").unwrap();
        let found = discover_config_path_with(root, None).unwrap();
        assert!(found.ends_with("bsync.toml") && !found.ends_with(".bsync.toml"));

        let explicit = discover_config_path_with(root, Some(PathBuf::from("custom.toml"))).unwrap();
        assert_eq!(explicit, root.join("custom.toml"));

        let nested = root.join("sub/project");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(discover_config_path_with(&nested, None), Some(found));
    }

    #[test]
    fn load_with_validates_after_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bsync.toml");
        std::fs::write(&path, "[storage]\ncache_capacity = 0\n").unwrap();

        let (config, found, diagnostics) =
            load_with(Some(path.clone()), env(&[(ENV_IDLE_TIMEOUT_MS, "10")])).unwrap();
        assert_eq!(found, Some(path));
        assert_eq!(config.timeouts.idle_ms, 10);
        assert!(!diagnostics.is_ok());
        assert_eq!(diagnostics.errors.len(), 1);
    }

    #[test]
    fn missing_config_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        match load_with(Some(missing), env(&[])) {
            Err(ConfigError::Io { .. }) => {}
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
