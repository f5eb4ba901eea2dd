#![warn(missing_docs)]
//! Saturate CLI Library
//!
//! This module provides the benchmark engine behind the `saturate` binary:
//! configuration, run coordination, orchestration of the run sequence,
//! worker pools (threads or processes) and report publishing.
//!
//! Use `saturate::run()` (or `saturate_cli::run()`) in a main function to get
//! the full CLI, or drive an [`Orchestrator`] directly:
//!
//! ```ignore
//! use saturate_cli::{BenchConfig, NoopObserver, Orchestrator, detect_system_profile};
//!
//! let report = Orchestrator::new(BenchConfig::default(), detect_system_profile())
//!     .run(&mut NoopObserver)?;
//! println!("{} runs", report.individual_runs.len());
//! ```

mod config;
mod coordinator;
mod metadata;
mod orchestrator;
mod pool;
mod publish;
mod supervisor;

pub use config::*;
pub use coordinator::{CoordinatorError, DEFAULT_TICK, RunCoordinator, RunOutcome};
pub use metadata::detect_system_profile;
pub use orchestrator::{NoopObserver, Orchestrator, OrchestratorError, RunObserver};
pub use pool::{RunEvent, ThreadWorkers, WorkerPool, spawn_workers};
pub use publish::{
    ConsoleRenderer, DEFAULT_POST_TIMEOUT, FileWriter, HttpPoster, PublishError, ReportSink,
    format_human_output, format_run_line, publish, sinks_for,
};
pub use supervisor::{ProcessWorkers, SupervisorError, WORKER_FLAG, WorkerProcess};

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use saturate_core::{WorkerMain, fibonacci};
use saturate_report::{OutputFormat, RunAbort, RunResult};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Saturate CLI arguments
#[derive(Parser, Debug)]
#[command(name = "saturate")]
#[command(
    author,
    version,
    about = "Saturate - load every CPU core and score the machine"
)]
pub struct Cli {
    /// Optional subcommand (Run, Info, Init); defaults to Run
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Length of each run in seconds
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Abort once resident memory exceeds this many MB
    #[arg(short = 'm', long = "max-memory")]
    pub max_memory: Option<u64>,

    /// Number of sequential runs
    #[arg(short, long)]
    pub runs: Option<u32>,

    /// Write the JSON report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// POST the JSON report to this URL
    #[arg(long)]
    pub post: Option<String>,

    /// Config file (default: discover saturate.toml upwards from the current directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Console format: human, json
    #[arg(long)]
    pub format: Option<OutputFormat>,

    /// Worker isolation: thread, process
    #[arg(long)]
    pub isolation: Option<IsolationMode>,

    /// Pause between runs (e.g. "2s", "500ms")
    #[arg(long)]
    pub cooldown: Option<String>,

    /// Pin worker i to core i
    #[arg(long)]
    pub pin: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: Run as worker process (used by supervisor)
    #[arg(long, hide = true)]
    pub saturate_worker: bool,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the benchmark (default)
    Run,
    /// Print the detected system profile
    Info,
    /// Print a default saturate.toml
    Init,
}

/// Run the Saturate CLI with the process arguments.
///
/// # Returns
/// Returns `Ok(())` on success, including degraded and aborted runs. Errors
/// are configuration problems or a benchmark whose first run could not start.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_with_cli(cli)
}

/// Run the Saturate CLI with pre-parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    // Handle worker mode first (before any other initialization)
    if cli.saturate_worker {
        return run_worker_mode();
    }

    init_tracing(cli.verbose);

    match cli.command {
        Some(Commands::Info) => {
            print_system_info();
            Ok(())
        }
        Some(Commands::Init) => {
            print!("{}", FileConfig::default_toml());
            Ok(())
        }
        Some(Commands::Run) | None => run_benchmark(&cli),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "saturate=debug"
    } else {
        "saturate=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when embedded in another binary
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run as a worker process (IPC mode)
fn run_worker_mode() -> anyhow::Result<()> {
    let mut worker = WorkerMain::new(fibonacci);
    worker
        .run()
        .map_err(|e| anyhow::anyhow!("Worker error: {}", e))
}

fn print_system_info() {
    let profile = detect_system_profile();
    println!("Host:    {}", profile.hostname);
    println!("OS:      {} ({})", profile.os, profile.arch);
    println!("CPU:     {}", profile.cpu_model);
    println!("Cores:   {}", profile.core_count);
    println!(
        "Memory:  {:.1} GB",
        profile.total_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    );
}

/// Build CLI overrides; flags the user did not pass stay `None`
fn overrides_from_cli(cli: &Cli) -> anyhow::Result<ConfigOverrides> {
    let cooldown = cli.cooldown.as_deref().map(parse_duration).transpose()?;
    Ok(ConfigOverrides {
        duration_seconds: cli.duration,
        max_memory_mb: cli.max_memory,
        runs: cli.runs,
        output: cli.output.clone(),
        post_url: cli.post.clone(),
        format: cli.format,
        isolation: cli.isolation,
        cooldown,
        pin_workers: cli.pin.then_some(true),
    })
}

/// Resolve configuration: defaults → config file → CLI flags
fn resolve_config(cli: &Cli) -> anyhow::Result<BenchConfig> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => match FileConfig::discover()? {
            Some((path, file)) => {
                tracing::debug!(path = %path.display(), "using discovered config");
                file
            }
            None => FileConfig::default(),
        },
    };
    Ok(file.resolve(&overrides_from_cli(cli)?)?)
}

fn run_benchmark(cli: &Cli) -> anyhow::Result<()> {
    let config = resolve_config(cli)?;
    let profile = detect_system_profile();

    eprintln!(
        "Saturating {} cores of {} for {}s x {} run(s)",
        profile.cores(),
        profile.cpu_model,
        config.duration_seconds,
        config.run_count
    );

    let sinks = sinks_for(&config);
    let mut observer = ConsoleObserver::default();
    let report = Orchestrator::new(config, profile).run(&mut observer)?;

    for (sink, err) in publish(&report, &sinks) {
        eprintln!("Warning: {} failed: {}", sink, err);
    }

    Ok(())
}

/// Progress bar and per-run lines on stderr
#[derive(Default)]
struct ConsoleObserver {
    bar: Option<ProgressBar>,
}

impl ConsoleObserver {
    fn clear_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl RunObserver for ConsoleObserver {
    fn on_run_start(&mut self, run_number: u32, total_runs: u32, _cores: usize) {
        self.clear_bar();
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {prefix} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.set_prefix(format!("run {}/{}", run_number, total_runs));
        self.bar = Some(bar);
    }

    fn on_progress(&mut self, _run_number: u32, elapsed: Duration, duration: Duration, units: u64) {
        if let Some(bar) = &self.bar {
            bar.set_length(duration.as_millis() as u64);
            bar.set_position((elapsed.as_millis() as u64).min(duration.as_millis() as u64));
            bar.set_message(format!("{} calculations", units));
        }
    }

    fn on_worker_failed(&mut self, run_number: u32, worker_id: u32, message: &str) {
        let line = format!(
            "Warning: worker {} failed in run {}: {}",
            worker_id, run_number, message
        );
        match &self.bar {
            Some(bar) => bar.suspend(|| eprintln!("{}", line)),
            None => eprintln!("{}", line),
        }
    }

    fn on_run_complete(&mut self, result: &RunResult) {
        self.clear_bar();
        eprintln!("{}", format_run_line(result));
        for warning in &result.warnings {
            eprintln!("  Warning: {}", warning);
        }
    }

    fn on_run_aborted(&mut self, abort: &RunAbort) {
        self.clear_bar();
        eprintln!(
            "Run {} aborted ({}): {}",
            abort.run_number, abort.reason, abort.message
        );
    }

    fn on_cooldown(&mut self, after_run: u32, cooldown: Duration) {
        tracing::debug!(after_run, ?cooldown, "cooling down");
        eprintln!("Cooling down for {:.1}s", cooldown.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_parse() {
        let cli = Cli::try_parse_from([
            "saturate",
            "--duration",
            "5",
            "-m",
            "512",
            "--runs",
            "3",
            "--format",
            "json",
            "--isolation",
            "process",
            "--cooldown",
            "250ms",
        ])
        .unwrap();
        let overrides = overrides_from_cli(&cli).unwrap();
        assert_eq!(overrides.duration_seconds, Some(5));
        assert_eq!(overrides.max_memory_mb, Some(512));
        assert_eq!(overrides.runs, Some(3));
        assert_eq!(overrides.format, Some(OutputFormat::Json));
        assert_eq!(overrides.isolation, Some(IsolationMode::Process));
        assert_eq!(overrides.cooldown, Some(Duration::from_millis(250)));
        assert_eq!(overrides.pin_workers, None);
    }

    #[test]
    fn test_subcommands_and_worker_flag() {
        let cli = Cli::try_parse_from(["saturate", "info"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Info)));

        let cli = Cli::try_parse_from(["saturate", WORKER_FLAG]).unwrap();
        assert!(cli.saturate_worker);
    }

    #[test]
    fn test_bad_flag_values_rejected() {
        assert!(Cli::try_parse_from(["saturate", "--format", "csv"]).is_err());
        assert!(Cli::try_parse_from(["saturate", "--isolation", "vm"]).is_err());

        let cli = Cli::try_parse_from(["saturate", "--cooldown", "soon"]).unwrap();
        assert!(overrides_from_cli(&cli).is_err());
    }

    #[test]
    fn test_explicit_config_and_flag_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[runner]\nduration_seconds = 7\nruns = 4\n").unwrap();

        let cli = Cli::try_parse_from([
            "saturate",
            "--config",
            path.to_str().unwrap(),
            "--runs",
            "2",
        ])
        .unwrap();
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.duration_seconds, 7);
        assert_eq!(config.run_count, 2);
    }

    #[test]
    fn test_zero_duration_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saturate.toml");
        std::fs::write(&path, "").unwrap();
        let cli = Cli::try_parse_from([
            "saturate",
            "--config",
            path.to_str().unwrap(),
            "--duration",
            "0",
        ])
        .unwrap();
        assert!(resolve_config(&cli).is_err());
    }
}
