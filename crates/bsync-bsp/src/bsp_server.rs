use crate::client::BspClient;
use crate::discovery::BspConnection;
use crate::error::{BspError, Result};
use crate::protocol::{
    BuildEvent, BuildTarget, BuildTargetIdentifier, ClientCapabilities, InitializeBuildParams,
    InitializeBuildResult, TargetsParams, BSP_VERSION,
};
use crate::server::{dependency_closure, BuildServer};
use crate::timeout::IdleTimeout;
use async_trait::async_trait;
use bsync_core::{
    DependencyKind, GoTargetData, JvmTargetData, Label, PythonTargetData, TargetData, TargetInfo,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const LANGUAGE_IDS: &[&str] = &["java", "kotlin", "scala", "go", "python", "cpp"];

/// [`BuildServer`] backed by a BSP session.
pub struct BspBuildServer<R, W> {
    client: BspClient<R, W>,
    child: Option<Child>,
    root: PathBuf,
    server_info: InitializeBuildResult,
    connected: bool,
}

/// A BSP server running as a child process.
pub type ProcessBspServer = BspBuildServer<ChildStdout, ChildStdin>;

impl BspBuildServer<ChildStdout, ChildStdin> {
    /// Launch the server described by `connection` in `workspace_root` and run the handshake.
    pub async fn spawn(
        connection: &BspConnection,
        workspace_root: &Path,
        idle: IdleTimeout,
        events: Option<UnboundedSender<BuildEvent>>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut child = Command::new(&connection.program)
            .args(&connection.args)
            .current_dir(workspace_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BspError::Spawn {
                program: connection.program.clone(),
                source,
            })?;
        tracing::info!(
            target = "bsync.bsp",
            program = %connection.program,
            pid = ?child.id(),
            "spawned BSP server"
        );

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BspError::protocol("BSP server stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BspError::protocol("BSP server stdout unavailable"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, idle.clone()));
        }

        let mut client = BspClient::new(stdout, stdin, idle);
        if let Some(events) = events {
            client = client.with_events(events);
        }
        let mut server = Self::initialize(client, workspace_root, cancel).await?;
        server.child = Some(child);
        Ok(server)
    }
}

impl<R, W> BspBuildServer<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Run the `build/initialize` handshake over an existing connection.
    pub async fn initialize(
        mut client: BspClient<R, W>,
        workspace_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let root = workspace_root
            .canonicalize()
            .unwrap_or_else(|_| workspace_root.to_path_buf());
        let server_info = client
            .initialize(
                InitializeBuildParams {
                    display_name: "bsync".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    bsp_version: BSP_VERSION.to_string(),
                    root_uri: path_to_file_uri(&root),
                    capabilities: ClientCapabilities {
                        language_ids: LANGUAGE_IDS.iter().map(|id| id.to_string()).collect(),
                    },
                    data: None,
                },
                cancel,
            )
            .await?;
        client.initialized().await?;
        tracing::info!(
            target = "bsync.bsp",
            server = %server_info.display_name,
            version = %server_info.version,
            "BSP session initialized"
        );
        Ok(Self {
            client,
            child: None,
            root,
            server_info,
            connected: true,
        })
    }

    pub fn server_info(&self) -> &InitializeBuildResult {
        &self.server_info
    }

    async fn fetch_sources(
        &mut self,
        targets: &[BuildTarget],
        cancel: &CancellationToken,
    ) -> Result<(
        HashMap<BuildTargetIdentifier, Vec<String>>,
        HashMap<BuildTargetIdentifier, Vec<String>>,
    )> {
        if targets.is_empty() {
            return Ok((HashMap::new(), HashMap::new()));
        }
        let ids: Vec<BuildTargetIdentifier> = targets.iter().map(|t| t.id.clone()).collect();

        let sources = self
            .client
            .sources(TargetsParams { targets: ids.clone() }, cancel)
            .await?;
        let sources = sources
            .items
            .into_iter()
            .map(|item| {
                let paths = item
                    .sources
                    .iter()
                    .map(|source| workspace_relative(&self.root, &source.uri))
                    .collect();
                (item.target, paths)
            })
            .collect();

        let resources = if self.server_info.capabilities.resources_provider {
            self.client
                .resources(TargetsParams { targets: ids }, cancel)
                .await?
                .items
                .into_iter()
                .map(|item| {
                    let paths = item
                        .resources
                        .iter()
                        .map(|uri| workspace_relative(&self.root, uri))
                        .collect();
                    (item.target, paths)
                })
                .collect()
        } else {
            HashMap::new()
        };
        Ok((sources, resources))
    }
}

#[async_trait]
impl<R, W> BuildServer for BspBuildServer<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn workspace_build_targets(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<TargetInfo>> {
        let targets = self.client.workspace_build_targets(cancel).await?.targets;
        let (mut sources, mut resources) = self.fetch_sources(&targets, cancel).await?;
        let infos: Vec<TargetInfo> = targets
            .iter()
            .map(|target| {
                let mut info = target_info_from_bsp(target);
                info.srcs = sources.remove(&target.id).unwrap_or_default();
                info.resources = resources.remove(&target.id).unwrap_or_default();
                info
            })
            .collect();
        tracing::debug!(
            target = "bsync.bsp",
            targets = infos.len(),
            "received workspace build targets"
        );
        Ok(infos)
    }

    async fn workspace_non_module_targets(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<TargetInfo>> {
        match self.client.workspace_non_module_targets(cancel).await {
            Ok(result) => Ok(result.targets.iter().map(target_info_from_bsp).collect()),
            Err(err) if err.is_method_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    async fn target_infos(
        &mut self,
        labels: &[Label],
        cancel: &CancellationToken,
    ) -> Result<Vec<TargetInfo>> {
        let universe = self.workspace_build_targets(cancel).await?;
        Ok(dependency_closure(universe, labels))
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        let cancel = CancellationToken::new();
        if let Err(err) = self.client.shutdown(&cancel).await {
            tracing::debug!(target = "bsync.bsp", error = %err, "BSP shutdown failed");
        }
        if let Err(err) = self.client.exit().await {
            tracing::debug!(target = "bsync.bsp", error = %err, "BSP exit failed");
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(target = "bsync.bsp", %status, "BSP server exited");
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => {
                    tracing::warn!(
                        target = "bsync.bsp",
                        "BSP server ignored exit; killing it"
                    );
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }
}

async fn forward_stderr(stderr: tokio::process::ChildStderr, idle: IdleTimeout) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        idle.reset();
        tracing::debug!(target = "bsync.bsp", "server stderr: {line}");
    }
}

/// Translate a BSP build target into the raw target model.
pub fn target_info_from_bsp(target: &BuildTarget) -> TargetInfo {
    let id = target
        .display_name
        .as_deref()
        .filter(|name| name.contains("//"))
        .unwrap_or(&target.id.uri);
    let mut info = TargetInfo::new(Label::parse(id), rule_kind(target));
    info.tags = target.tags.iter().cloned().collect();
    info.dependencies = target
        .dependencies
        .iter()
        .map(|dep| bsync_core::Dependency {
            label: Label::parse(&dep.uri),
            kind: DependencyKind::Compile,
        })
        .collect();
    info.data = target_data(target);
    info
}

fn rule_kind(target: &BuildTarget) -> String {
    if let Some(kind) = target
        .data
        .as_ref()
        .and_then(|data| data.get("ruleKind").or_else(|| data.get("kind")))
        .and_then(Value::as_str)
    {
        return kind.to_string();
    }

    let language = target
        .language_ids
        .first()
        .map(String::as_str)
        .unwrap_or("generic");
    let has_tag = |tag: &str| target.tags.iter().any(|t| t == tag);
    let suffix = if target.capabilities.can_test || has_tag("test") {
        "test"
    } else if target.capabilities.can_run || has_tag("application") {
        "binary"
    } else {
        "library"
    };
    format!("{language}_{suffix}")
}

fn target_data(target: &BuildTarget) -> Option<TargetData> {
    let data = target.data.as_ref();
    let field = |name: &str| {
        data.and_then(|d| d.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    match target.data_kind.as_deref() {
        Some("jvm") => Some(TargetData::Jvm(JvmTargetData {
            java_home: field("javaHome"),
            java_version: field("javaVersion"),
            ..JvmTargetData::default()
        })),
        Some("go") => Some(TargetData::Go(GoTargetData {
            importpath: field("importPath"),
            sdk_home: field("sdkHomePath"),
            ..GoTargetData::default()
        })),
        Some("python") => Some(TargetData::Python(PythonTargetData {
            interpreter: field("interpreter"),
            version: field("version"),
            ..PythonTargetData::default()
        })),
        _ => None,
    }
}

pub(crate) fn path_to_file_uri(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/").replace(' ', "%20");
    if path.starts_with('/') {
        format!("file://{path}")
    } else {
        format!("file:///{path}")
    }
}

/// Workspace-relative path for a `file://` URI, or the decoded absolute path when outside the
/// workspace.
fn workspace_relative(root: &Path, uri: &str) -> String {
    let path = uri
        .strip_prefix("file://")
        .map(|p| p.replace("%20", " "))
        .unwrap_or_else(|| uri.to_string());
    let path = PathBuf::from(path);
    path.strip_prefix(root)
        .unwrap_or(&path)
        .to_string_lossy()
        .into_owned()
}
