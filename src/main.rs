mod config;
mod detect;
mod hooks;
mod orchestrator;
mod report;
mod runner;
mod tools;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

use config::{Config, Mode};
use orchestrator::Orchestrator;
use report::types::{Category, Severity};
use report::OutputFormat;

/// repo-assess: runs the repository's linters, formatters and scanners,
/// normalizes their findings and prints a prioritized remediation plan.
#[derive(Parser, Debug)]
#[command(name = "repo-assess", version, about)]
struct Cli {
    /// Repository or project directory to assess
    #[arg(default_value = ".")]
    target: PathBuf,

    /// no-op, check or fix
    #[arg(long)]
    mode: Option<Mode>,

    /// Maximum categories running at once (overrides --cpu-percent)
    #[arg(long)]
    workers: Option<usize>,

    /// Share of available CPUs used to size the worker pool
    #[arg(long)]
    cpu_percent: Option<u32>,

    /// Total run deadline in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Exit non-zero when an issue at or above this severity is found
    #[arg(long)]
    fail_on: Option<Severity>,

    /// Only run these categories (repeatable)
    #[arg(long = "category", value_name = "CATEGORY")]
    categories: Vec<Category>,

    /// Keep only issues in files matching these globs
    #[arg(long)]
    include: Vec<String>,

    /// Drop issues in files matching these globs
    #[arg(long)]
    exclude: Vec<String>,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    /// Print registered categories and their availability, then exit
    #[arg(long)]
    list_categories: bool,

    /// Run the [[hooks]] list from the config file instead of a single assessment
    #[arg(long)]
    hook: bool,
}

impl Cli {
    /// Command-line values win over the config file.
    fn apply(&self, config: &mut Config) {
        let assess = &mut config.assess;
        if let Some(mode) = self.mode {
            assess.mode = mode;
        }
        if let Some(workers) = self.workers {
            assess.workers = workers;
        }
        if let Some(cpu_percent) = self.cpu_percent {
            assess.cpu_percent = cpu_percent;
        }
        if let Some(timeout) = self.timeout {
            assess.timeout_secs = timeout;
        }
        if let Some(fail_on) = self.fail_on {
            assess.fail_on = fail_on;
        }
        if !self.categories.is_empty() {
            assess.categories = self.categories.clone();
        }
        if !self.include.is_empty() {
            assess.include = self.include.clone();
        }
        if !self.exclude.is_empty() {
            assess.exclude = self.exclude.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let target = std::fs::canonicalize(&cli.target)?;
    let _main_span = info_span!("repo_assess", target = %target.display()).entered();

    info!("loading configuration");
    let mut config = Config::load(&target)?;
    cli.apply(&mut config);
    config.assess.validate()?;

    let registry = runner::global();
    tools::register_defaults(&registry, &target);

    if cli.list_categories {
        let available = registry.get_available_categories();
        for category in registry.get_all_categories() {
            let state = if available.contains(&category) { "available" } else { "unavailable" };
            let priority = registry.get_runner(category).map_or(0, |r| r.priority());
            println!("{category:<16} priority {priority}  {state}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    let hook_entries = config.hooks.clone();
    let fail_on = config.assess.fail_on;
    let orchestrator = Arc::new(Orchestrator::new(registry, config, &target));

    if cli.hook {
        if hook_entries.is_empty() {
            warn!(config = config::CONFIG_FILE, "no [[hooks]] configured, nothing to run");
            return Ok(ExitCode::SUCCESS);
        }
        let hook_runner = hooks::HookRunner::new(&target)
            .with_handler(orchestrator.clone())
            .with_cancel(cancel.clone());
        return match hook_runner.run(&hook_entries).instrument(info_span!("hooks")).await {
            Ok(done) => {
                for hook in &done {
                    info!(command = %hook.command, elapsed = ?hook.elapsed, used_fallback = hook.used_fallback, "hook ok");
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(err) => {
                error!(error = %err, "hook run failed");
                Ok(ExitCode::FAILURE)
            }
        };
    }

    let built = orchestrator.assess(&cancel).await?;
    report::output(&built, cli.format, cli.output.as_deref())?;

    let failed = report::should_fail(&built, fail_on);
    info!(
        health = built.summary.overall_health,
        total_issues = built.summary.total_issues,
        fail_on = %fail_on,
        failed,
        "done"
    );
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
