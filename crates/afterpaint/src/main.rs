//! afterpaint CLI
//!
//! Thin wrapper over afterpaint-core: loads config, installs logging and
//! runs scripted navigations against the scheduler.

use std::path::PathBuf;
use std::time::Duration;

use afterpaint_core::Config;
use afterpaint_core::config::LogFormat;
use afterpaint_core::logging::init_logging;
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::task::LocalSet;

mod simulate;

use simulate::Plan;

/// Frame-gated deferred work scheduler.
#[derive(Parser, Debug)]
#[command(name = "afterpaint", version, about)]
struct Cli {
    /// Path to afterpaint.toml config file.
    #[arg(long, global = true, env = "AFTERPAINT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Override the configured log format.
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive the scheduler through simulated navigations and report the outcome.
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Number of navigations to run.
    #[arg(long, default_value_t = 3)]
    navigations: usize,

    /// Callbacks scheduled on each queue per navigation.
    #[arg(long, default_value_t = 4)]
    tasks: usize,

    /// Abandon every K-th navigation before it settles (0 = never).
    #[arg(long, default_value_t = 0)]
    abandon_every: usize,

    /// Cancel every K-th scheduled callback (0 = never).
    #[arg(long, default_value_t = 0)]
    cancel_every: usize,

    /// Give up if a settled navigation has not drained after this long.
    #[arg(long, default_value_t = 5000)]
    drain_timeout_ms: u64,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

impl SimulateArgs {
    fn plan(&self) -> Plan {
        Plan {
            navigations: self.navigations,
            tasks: self.tasks,
            abandon_every: self.abandon_every,
            cancel_every: self.cancel_every,
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn simulate(config: &Config, args: &SimulateArgs) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let local = LocalSet::new();
    let report = local.block_on(&runtime, simulate::run(&args.plan(), config.scheduler.clone()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging).context("failed to initialize logging")?;
    tracing::debug!(?config, "Configuration resolved");

    match &cli.command {
        Command::Simulate(args) => simulate(&config, args),
    }
}
