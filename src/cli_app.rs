//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use device_panel_cache::cache::{DataKind, SubjectId, open_store};
use device_panel_cache::core::config::Config;
use device_panel_cache::core::errors::DpcError;
use device_panel_cache::logger::{DiagnosticsLogger, spawn_logger};
use device_panel_cache::refresh::SimulatedFetcher;
use device_panel_cache::tui::model::{DashboardMsg, NotificationLevel, PanelSpec};
use device_panel_cache::tui::panel::{PanelPhase, PanelSource};
use device_panel_cache::tui::snapshot::DashboardSnapshot;
use device_panel_cache::tui::terminal_guard::{TerminalGuard, TerminalSink, spawn_input_reader};
use device_panel_cache::tui::{EventLoop, StopReason};

/// Device Panel Cache: drive the dashboard data layer against simulated devices.
#[derive(Debug, Parser)]
#[command(
    name = "dpc",
    author,
    version,
    about = "Device Panel Cache - stale-while-revalidate dashboard runtime",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Open panels against simulated devices and run the event loop.
    Run(RunArgs),
    /// Inspect the effective configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Device to open panels for (repeatable). IDs ending in `-offline`
    /// simulate an unreachable device.
    #[arg(long = "subject", value_name = "ID", default_value = "dev1")]
    subjects: Vec<String>,
    /// Data kind to show per device (repeatable).
    #[arg(long = "kind", value_name = "KIND", default_value = "status")]
    kinds: Vec<DataKind>,
    /// Show each kind as one fleet panel across all subjects.
    #[arg(long)]
    fleet: bool,
    /// Stop after this many ticks (headless runs only).
    #[arg(long, default_value_t = 50, value_name = "N")]
    ticks: u64,
    /// Simulated device round-trip time.
    #[arg(long, default_value_t = 50, value_name = "MILLISECONDS")]
    latency_ms: u64,
    /// Probability that a simulated call fails.
    #[arg(long, default_value_t = 0.0, value_name = "RATE")]
    failure_rate: f64,
    /// Seed for simulated jitter and failures.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Take over the terminal and run until `q`.
    #[arg(long)]
    interactive: bool,
}

#[derive(Debug, Clone, Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the effective configuration.
    Show,
    /// Validate the configuration and report its hash.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input or configuration.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Json(_) => 3,
        }
    }
}

impl From<DpcError> for CliError {
    fn from(e: DpcError) -> Self {
        match e {
            DpcError::InvalidConfig { .. }
            | DpcError::MissingConfig { .. }
            | DpcError::ConfigParse { .. } => Self::User(e.to_string()),
            other => Self::Runtime(other.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_session(cli, args),
        Command::Config(args) => run_config(cli, args),
    }
}

// ──────────────────── run ────────────────────

fn run_session(cli: &Cli, args: &RunArgs) -> Result<(), CliError> {
    validate_run_args(args)?;
    let config = Config::load(cli.config.as_deref())?;
    let (logger, logger_join) = spawn_logger(&config.logging)?;

    let outcome = drive_session(&config, args, &logger);
    let dropped = logger.dropped_events();
    logger.shutdown();
    if let Some(join) = logger_join
        && join.join().is_err()
    {
        eprintln!("[DPC-LOGGER] logger thread panicked");
    }

    let (snapshot, reason) = outcome?;
    if !args.interactive {
        match output_mode(cli) {
            OutputMode::Human => print_snapshot_human(&snapshot, reason, dropped)?,
            OutputMode::Json => write_json_line(&snapshot_json(&snapshot, reason, dropped))?,
        }
    }
    Ok(())
}

/// Reject bad arguments before any thread is started.
fn validate_run_args(args: &RunArgs) -> Result<(), CliError> {
    if !(0.0..=1.0).contains(&args.failure_rate) {
        return Err(CliError::User(format!(
            "--failure-rate must be within [0, 1], got {}",
            args.failure_rate
        )));
    }
    if args.subjects.is_empty() || args.subjects.iter().any(|s| s.trim().is_empty()) {
        return Err(CliError::User("at least one non-empty --subject is required".to_string()));
    }
    Ok(())
}

/// Open the store, run the loop, and stop its workers. The logger stays
/// with the caller so it is joined on every path.
fn drive_session(
    config: &Config,
    args: &RunArgs,
    logger: &DiagnosticsLogger,
) -> Result<(DashboardSnapshot, StopReason), CliError> {
    let store = open_store(&config.cache, &config.paths.cache_dir);
    let mut fetcher = SimulatedFetcher::new(args.seed)
        .with_latency(Duration::from_millis(args.latency_ms))
        .with_jitter(Duration::from_millis(args.latency_ms / 4))
        .with_failure_rate(args.failure_rate);
    for subject in args.subjects.iter().filter(|s| s.ends_with("-offline")) {
        fetcher = fetcher.with_unreachable(subject.as_str());
    }

    let mut event_loop = EventLoop::new(config, store, Arc::new(fetcher), logger.clone())?;
    for spec in panel_specs(args) {
        event_loop.dispatch(DashboardMsg::OpenPanel(spec));
    }

    let outcome = if args.interactive {
        run_interactive(&mut event_loop)
    } else {
        let mut sink = |_: &DashboardSnapshot| -> device_panel_cache::core::errors::Result<()> { Ok(()) };
        event_loop
            .run(&mut sink, Some(args.ticks))
            .map_err(CliError::from)
    };
    let snapshot = event_loop.snapshot();
    event_loop.shutdown();
    Ok((snapshot, outcome?))
}

fn panel_specs(args: &RunArgs) -> Vec<PanelSpec> {
    let subjects: Vec<SubjectId> = args.subjects.iter().map(SubjectId::new).collect();
    let mut specs = Vec::new();
    for kind in &args.kinds {
        if args.fleet {
            specs.push(PanelSpec::new(
                format!("{} (fleet)", kind.as_str()),
                PanelSource::Fleet {
                    subjects: subjects.clone(),
                    kind: *kind,
                },
            ));
            continue;
        }
        for subject in &subjects {
            let spec = PanelSpec::new(
                format!("{subject} {}", kind.as_str()),
                PanelSource::Device {
                    subject: subject.clone(),
                    kind: *kind,
                },
            );
            specs.push(if *kind == DataKind::Config {
                spec.editable()
            } else {
                spec
            });
        }
    }
    specs
}

fn run_interactive(event_loop: &mut EventLoop) -> Result<StopReason, CliError> {
    let guard = TerminalGuard::new()?;
    let (cols, rows) = TerminalGuard::terminal_size();
    event_loop.dispatch(DashboardMsg::Resize { cols, rows });
    let input = spawn_input_reader(event_loop.sender())?;
    let mut sink = TerminalSink::new();
    let reason = event_loop.run(&mut sink, None);
    drop(guard);
    if input.join().is_err() {
        eprintln!("[DPC-INPUT] input thread panicked");
    }
    Ok(reason?)
}

// ──────────────────── config ────────────────────

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match args.command.unwrap_or(ConfigCommand::Show) {
        ConfigCommand::Path => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            match output_mode(cli) {
                OutputMode::Human => println!("{}", path.display()),
                OutputMode::Json => write_json_line(&json!({ "path": path }))?,
            }
        }
        ConfigCommand::Show => {
            let config = Config::load(cli.config.as_deref())?;
            match output_mode(cli) {
                OutputMode::Human => {
                    let rendered = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("failed to render config: {e}")))?;
                    print!("{rendered}");
                }
                OutputMode::Json => write_json_line(&serde_json::to_value(&config)?)?,
            }
        }
        ConfigCommand::Validate => {
            let config = Config::load(cli.config.as_deref())?;
            let hash = config.stable_hash()?;
            match output_mode(cli) {
                OutputMode::Human => println!("{} config valid (hash {hash})", "ok".green().bold()),
                OutputMode::Json => write_json_line(&json!({ "valid": true, "hash": hash }))?,
            }
        }
    }
    Ok(())
}

// ──────────────────── output ────────────────────

fn print_snapshot_human(
    snapshot: &DashboardSnapshot,
    reason: StopReason,
    dropped: u64,
) -> Result<(), CliError> {
    let mut out = io::stdout().lock();
    for panel in &snapshot.panels {
        let phase = match panel.phase {
            PanelPhase::Ready => panel.phase.label().green(),
            PanelPhase::Refreshing => panel.phase.label().cyan(),
            PanelPhase::Loading => panel.phase.label().yellow(),
            PanelPhase::Errored => panel.phase.label().red(),
            PanelPhase::Idle => panel.phase.label().dimmed(),
        };
        writeln!(out, "{} {} [{phase}]", panel.id.to_string().dimmed(), panel.title.bold())?;
        if let Some(error) = &panel.error {
            writeln!(out, "  {}", error.red())?;
        }
        if let Some(label) = &panel.refresh_error {
            writeln!(out, "  {}", format!("refresh failed ({label}); showing cached data").yellow())?;
        }
        for row in &panel.rows {
            writeln!(out, "  {row}")?;
        }
        if panel.item_count > panel.rows.len() {
            let hidden = panel.item_count - panel.rows.len();
            writeln!(out, "  {}", format!("... {hidden} more").dimmed())?;
        }
    }
    for note in &snapshot.notifications {
        let line = match note.level {
            NotificationLevel::Info => note.message.normal(),
            NotificationLevel::Warning => note.message.yellow(),
            NotificationLevel::Error => note.message.red(),
        };
        writeln!(out, "{line}")?;
    }
    writeln!(
        out,
        "{}",
        format!("stopped: {} after {} ticks", reason.as_str(), snapshot.tick).dimmed()
    )?;
    if dropped > 0 {
        writeln!(out, "{}", format!("{dropped} diagnostic events dropped").yellow())?;
    }
    Ok(())
}

fn snapshot_json(snapshot: &DashboardSnapshot, reason: StopReason, dropped: u64) -> Value {
    let panels: Vec<Value> = snapshot
        .panels
        .iter()
        .map(|p| {
            json!({
                "id": p.id.0,
                "title": p.title,
                "phase": p.phase.label(),
                "rows": p.rows,
                "item_count": p.item_count,
                "offset": p.offset,
                "error": p.error,
                "refresh_error": p.refresh_error,
            })
        })
        .collect();
    let notifications: Vec<Value> = snapshot
        .notifications
        .iter()
        .map(|n| {
            let level = match n.level {
                NotificationLevel::Info => "info",
                NotificationLevel::Warning => "warning",
                NotificationLevel::Error => "error",
            };
            json!({ "level": level, "message": n.message })
        })
        .collect();
    json!({
        "stopped": reason.as_str(),
        "ticks": snapshot.tick,
        "panels": panels,
        "notifications": notifications,
        "dropped_diagnostics": dropped,
    })
}

fn write_json_line(value: &Value) -> Result<(), CliError> {
    let mut out = io::stdout().lock();
    serde_json::to_writer(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("DPC_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }
    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };
    match env_mode.map(str::to_ascii_lowercase).as_deref() {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}
