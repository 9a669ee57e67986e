use anyhow::{Context, Result};
use bsync_bsp::{
    parse_args, AspectCommand, BazelAspectServer, BspBuildServer, BuildServer, IdleTimeout,
};
use bsync_config::{ConfigDiagnostics, ProjectView, SyncConfig};
use bsync_core::Label;
use bsync_hash::HashSnapshot;
use bsync_sync::{
    ModuleSyncHook, ProjectInfo, SyncOutcome, SyncPipeline, SyncResult, SyncScope, TargetUtils,
    TargetUtilsSyncHook, WorkspaceModel,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "bsync", version, about = "Incremental Bazel project sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Query the build server and update the stored project structure
    Sync(SyncArgs),
    /// Summarize what the last sync stored
    Status(WorkspaceArgs),
    /// Print the stored target hashes
    Hashes(WorkspaceArgs),
}

#[derive(Args)]
struct WorkspaceArgs {
    /// Workspace root (defaults to current directory)
    #[arg(long, default_value = ".")]
    workspace: PathBuf,
    /// Config file; overrides `bsync.toml` discovery
    #[arg(long)]
    config: Option<PathBuf>,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct SyncArgs {
    #[command(flatten)]
    workspace: WorkspaceArgs,
    #[arg(long, value_enum, default_value_t = ScopeArg::Second)]
    scope: ScopeArg,
    /// Target to sync; implies `--scope partial`
    #[arg(long = "target", value_name = "LABEL")]
    targets: Vec<String>,
    /// Run this Bazel command instead of connecting to a BSP server
    #[arg(long, value_name = "CMD")]
    aspect_command: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScopeArg {
    /// Project-view targets and their direct dependencies
    First,
    /// Project-view targets down to the import depth
    Second,
    /// Only the `--target` labels
    Partial,
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    match cli.command {
        Command::Sync(args) => runtime.block_on(sync(args)),
        Command::Status(args) => status(args),
        Command::Hashes(args) => hashes(args),
    }
}

struct Workspace {
    root: PathBuf,
    config: SyncConfig,
    config_path: Option<PathBuf>,
}

impl Workspace {
    fn load(args: &WorkspaceArgs) -> Result<Self> {
        let root = args
            .workspace
            .canonicalize()
            .with_context(|| format!("workspace {} not found", args.workspace.display()))?;
        let (config, config_path) = match &args.config {
            Some(path) => (
                SyncConfig::load_from_path(path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                Some(path.clone()),
            ),
            None => {
                let (config, path, diagnostics) = bsync_config::load_for_workspace(&root)?;
                report_diagnostics(&diagnostics)?;
                (config, path)
            }
        };
        bsync_config::init_tracing(&config.logging);
        Ok(Self {
            root,
            config,
            config_path,
        })
    }

    fn project(&self) -> ProjectInfo {
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workspace".to_string());
        ProjectInfo::new(name, &self.root)
    }

    fn project_view(&self) -> Result<ProjectView> {
        let path = self.config.sync.project_view_path(&self.root);
        if !path.is_file() {
            tracing::info!(
                target = "bsync.cli",
                path = %path.display(),
                "no project view; syncing the whole workspace"
            );
            return Ok(ProjectView::default());
        }
        Ok(ProjectView::load(&path, &self.root)?)
    }

    async fn connect(
        &self,
        aspect_command: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn BuildServer>> {
        let idle = self.config.timeouts.idle();
        let aspect = match aspect_command {
            Some(raw) => {
                let mut argv = parse_args(raw).into_iter();
                let program = argv.next().context("--aspect-command is empty")?;
                let mut command = AspectCommand::new(program, &self.root);
                command.args = argv.collect();
                Some(command)
            }
            None => self.config.server.aspect_command(&self.root),
        };
        if let Some(command) = aspect {
            return Ok(Box::new(BazelAspectServer::new(command, idle)));
        }

        let connection = self.config.server.bsp_connection(&self.root).with_context(|| {
            format!(
                "no BSP connection found in {}/.bsp and no server configured",
                self.root.display()
            )
        })?;
        let server =
            BspBuildServer::spawn(&connection, &self.root, IdleTimeout::new(idle), None, cancel)
                .await?;
        Ok(Box::new(server))
    }
}

fn report_diagnostics(diagnostics: &ConfigDiagnostics) -> Result<()> {
    for key in &diagnostics.unknown_keys {
        eprintln!("warning: unknown config key `{key}`");
    }
    for warning in &diagnostics.warnings {
        eprintln!("warning: {warning}");
    }
    if let Some(first) = diagnostics.errors.first() {
        for err in &diagnostics.errors[1..] {
            eprintln!("error: {err}");
        }
        anyhow::bail!("invalid config: {first}");
    }
    Ok(())
}

fn scope_of(args: &SyncArgs) -> Result<SyncScope> {
    if !args.targets.is_empty() || args.scope == ScopeArg::Partial {
        let labels: Vec<Label> = args.targets.iter().map(|t| Label::parse(t)).collect();
        return SyncScope::partial(labels).context("--scope partial needs at least one --target");
    }
    Ok(match args.scope {
        ScopeArg::First => SyncScope::FirstPhaseSync,
        _ => SyncScope::SecondPhaseSync,
    })
}

async fn sync(args: SyncArgs) -> Result<i32> {
    let workspace = Workspace::load(&args.workspace)?;
    let scope = scope_of(&args)?;
    let view = workspace.project_view()?;

    let mut pipeline = SyncPipeline::from_config(workspace.project(), &workspace.config, view);
    let model = Arc::new(WorkspaceModel::open(pipeline.storage())?);
    let utils = Arc::new(TargetUtils::open(pipeline.storage())?);
    pipeline.register_sync_hook(Arc::new(ModuleSyncHook::new(model)))?;
    pipeline.register_sync_hook(Arc::new(TargetUtilsSyncHook::new(utils)))?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(target = "bsync.cli", "interrupted; cancelling sync");
            on_interrupt.cancel();
        }
    });

    let mut server = workspace
        .connect(args.aspect_command.as_deref(), &cancel)
        .await?;
    let result = pipeline.sync(server.as_mut(), scope, cancel).await?;
    print_output(&result, args.workspace.json)?;

    Ok(match result.outcome {
        SyncOutcome::Success | SyncOutcome::PartialSuccess => 0,
        SyncOutcome::Failure | SyncOutcome::Cancelled => 1,
    })
}

#[derive(Serialize)]
struct StatusReport {
    workspace: PathBuf,
    config: Option<PathBuf>,
    storage: PathBuf,
    targets: usize,
    modules: usize,
    libraries: usize,
    executable_targets: usize,
}

fn status(args: WorkspaceArgs) -> Result<i32> {
    let workspace = Workspace::load(&args)?;
    let storage = workspace.config.storage.context(&workspace.root);
    let snapshot = HashSnapshot::open(&storage)?;
    let model = WorkspaceModel::open(&storage)?;
    let utils = TargetUtils::open(&storage)?;

    let report = StatusReport {
        storage: workspace.config.storage.resolved_dir(&workspace.root),
        workspace: workspace.root,
        config: workspace.config_path,
        targets: snapshot.len()?,
        modules: model.modules().len(),
        libraries: model.libraries().len(),
        executable_targets: utils.executable_targets().len(),
    };
    print_output(&report, args.json)?;
    Ok(0)
}

#[derive(Serialize)]
struct HashEntry {
    target: Label,
    hash: String,
}

fn hashes(args: WorkspaceArgs) -> Result<i32> {
    let workspace = Workspace::load(&args)?;
    let storage = workspace.config.storage.context(&workspace.root);
    let entries: Vec<HashEntry> = HashSnapshot::open(&storage)?
        .load()?
        .into_iter()
        .map(|(target, hash)| HashEntry {
            target,
            hash: hash.to_string(),
        })
        .collect();
    print_output(&entries, args.json)?;
    Ok(0)
}

fn print_output<T: Serialize + 'static>(value: &T, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
        return Ok(());
    }

    let any = value as &dyn std::any::Any;
    if let Some(result) = any.downcast_ref::<SyncResult>() {
        print_sync_result(result);
    } else if let Some(report) = any.downcast_ref::<StatusReport>() {
        println!("workspace: {}", report.workspace.display());
        if let Some(config) = &report.config {
            println!("  config: {}", config.display());
        }
        println!("  storage: {}", report.storage.display());
        println!("  targets: {}", report.targets);
        println!("  modules: {}", report.modules);
        println!("  libraries: {}", report.libraries);
        println!("  executable_targets: {}", report.executable_targets);
    } else if let Some(entries) = any.downcast_ref::<Vec<HashEntry>>() {
        for entry in entries {
            println!("{} {}", entry.hash, entry.target);
        }
    } else {
        let out = serde_json::to_string_pretty(value)?;
        println!("{out}");
    }
    Ok(())
}

fn print_sync_result(result: &SyncResult) {
    let outcome = match result.outcome {
        SyncOutcome::Success => "succeeded",
        SyncOutcome::PartialSuccess => "partially succeeded",
        SyncOutcome::Failure => "failed",
        SyncOutcome::Cancelled => "cancelled",
    };
    println!("{} sync {outcome}", result.scope);
    let stats = &result.stats;
    println!("  universe: {}", stats.universe);
    println!("  imported: {}", stats.imported);
    println!(
        "  added: {}, changed: {}, removed: {}, unchanged: {}",
        stats.added, stats.changed, stats.removed, stats.unchanged
    );
    println!("  invalidated: {}", stats.invalidated);
    for failure in &result.failures {
        println!("  {failure}");
    }
}
