use crate::error::{BspError, Result};
use crate::server::BuildServer;
use crate::timeout::IdleTimeout;
use async_trait::async_trait;
use bsync_core::{Label, TargetInfo};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Bounded tail of stderr kept for error reports.
const STDERR_TAIL_LINES: usize = 40;

/// How to invoke Bazel so that it prints one JSON-encoded [`TargetInfo`] per stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectCommand {
    pub program: String,
    /// Arguments placed before the target patterns, e.g. `build --aspects=... --output_groups=...`.
    pub args: Vec<String>,
    /// Patterns describing the workspace universe.
    pub universe: Vec<String>,
    pub workspace_root: PathBuf,
}

impl AspectCommand {
    pub fn new(program: impl Into<String>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            universe: vec!["//...".to_string()],
            workspace_root: workspace_root.into(),
        }
    }

    fn render(&self, patterns: &[String]) -> String {
        let mut rendered = self.program.clone();
        for arg in self.args.iter().chain(patterns) {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }
}

/// [`BuildServer`] that talks to the Bazel CLI directly.
///
/// A command producing no stdout or stderr for a whole idle window is killed and reported as
/// [`BspError::IdleTimeout`], distinct from the process exiting on its own.
#[derive(Debug)]
pub struct BazelAspectServer {
    command: AspectCommand,
    idle: Duration,
}

impl BazelAspectServer {
    pub fn new(command: AspectCommand, idle: Duration) -> Self {
        Self { command, idle }
    }

    async fn run(&self, patterns: &[String], cancel: &CancellationToken) -> Result<Vec<TargetInfo>> {
        let rendered = self.command.render(patterns);
        tracing::debug!(target = "bsync.bsp", command = %rendered, "running bazel");

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .args(patterns)
            .current_dir(&self.command.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BspError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BspError::protocol("bazel stdout unavailable"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BspError::protocol("bazel stderr unavailable"))?;

        let idle = IdleTimeout::new(self.idle);
        let stderr_task = tokio::spawn(collect_stderr(stderr, idle.clone()));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BspError::Cancelled),
            _ = idle.elapsed() => Err(BspError::IdleTimeout {
                operation: rendered.clone(),
                idle: self.idle,
            }),
            parsed = read_targets(stdout, &idle) => parsed,
        };

        let targets = match outcome {
            Ok(targets) => targets,
            Err(err) => {
                if let Err(kill_err) = child.kill().await {
                    tracing::debug!(target = "bsync.bsp", error = %kill_err, "failed to kill bazel");
                }
                stderr_task.abort();
                return Err(err);
            }
        };

        let status = child.wait().await?;
        let stderr_tail = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(BspError::CommandFailed {
                command: rendered,
                status,
                stderr: stderr_tail,
            });
        }
        tracing::debug!(
            target = "bsync.bsp",
            command = %rendered,
            targets = targets.len(),
            "bazel reported targets"
        );
        Ok(targets)
    }
}

#[async_trait]
impl BuildServer for BazelAspectServer {
    async fn workspace_build_targets(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<TargetInfo>> {
        let universe = self.command.universe.clone();
        self.run(&universe, cancel).await
    }

    /// The Bazel CLI does not distinguish non-module targets.
    async fn workspace_non_module_targets(
        &mut self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<TargetInfo>> {
        Ok(Vec::new())
    }

    async fn target_infos(
        &mut self,
        labels: &[Label],
        cancel: &CancellationToken,
    ) -> Result<Vec<TargetInfo>> {
        if labels.is_empty() {
            return Ok(Vec::new());
        }
        let patterns: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        self.run(&patterns, cancel).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Parse one JSON target per non-blank line, resetting `idle` on every line.
pub async fn read_targets<R: AsyncRead + Unpin>(
    reader: R,
    idle: &IdleTimeout,
) -> Result<Vec<TargetInfo>> {
    let mut lines = BufReader::new(reader).lines();
    let mut targets = Vec::new();
    let mut line_no = 0;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        idle.reset();
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let target: TargetInfo = serde_json::from_str(line).map_err(|source| {
            BspError::MalformedTarget {
                line: line_no,
                source,
            }
        })?;
        targets.push(target);
    }
    Ok(targets)
}

async fn collect_stderr<R: AsyncRead + Unpin>(stderr: R, idle: IdleTimeout) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        idle.reset();
        tracing::trace!(target = "bsync.bsp", "bazel: {line}");
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}
