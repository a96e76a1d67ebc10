//! AssetForge CLI - runs build tasks against a project root
//!
//! Logs to stderr, optionally prints the run reports as JSON to stdout.
//! Returns 2 when the script lint gate failed, 1 on any other failure.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use assetforge_core::{run_targets, BuildConfig, BuildContext, ProjectLayout, RunReport};

#[derive(Parser)]
#[command(name = "assetforge-cli")]
#[command(about = "AssetForge CLI - Front-End Asset Build Orchestrator")]
#[command(version)]
struct Cli {
    /// Project root containing src/main/web
    #[arg(long)]
    root: PathBuf,

    /// Build settings (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stylesheet lint rules, overrides the config file
    #[arg(long)]
    stylelint_config: Option<PathBuf>,

    /// Script lint rules, overrides the config file
    #[arg(long)]
    eslint_config: Option<PathBuf>,

    /// Print run reports as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long)]
    verbose: bool,

    /// Tasks to run, in order: clean, html, resource, css, js, build
    #[arg(value_name = "TASK", default_value = "build")]
    tasks: Vec<String>,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn load_context(cli: &Cli) -> Result<BuildContext, String> {
    let layout = ProjectLayout::existing(&cli.root).map_err(|e| e.to_string())?;
    let mut config = match &cli.config {
        Some(path) => BuildConfig::load(path).map_err(|e| e.to_string())?,
        None => BuildConfig::default(),
    };
    if let Some(path) = &cli.stylelint_config {
        config.stylelint_config = Some(path.clone());
    }
    if let Some(path) = &cli.eslint_config {
        config.eslint_config = Some(path.clone());
    }
    BuildContext::new(layout, config).map_err(|e| e.to_string())
}

fn exit_code(reports: &[RunReport]) -> ExitCode {
    if reports.iter().all(RunReport::is_success) {
        ExitCode::SUCCESS
    } else if reports.iter().any(RunReport::lint_failed) {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = match load_context(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let reports = match runtime.block_on(run_targets(ctx, &cli.tasks)) {
        Ok(reports) => reports,
        Err(e) => {
            error!(error = %e, "cannot schedule tasks");
            return ExitCode::FAILURE;
        }
    };

    for report in &reports {
        let failed = report.failed();
        if failed.is_empty() {
            info!(targets = ?report.targets, "finished");
        } else {
            error!(targets = ?report.targets, failed = ?failed, "failed");
        }
    }

    if cli.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{}", json),
            Err(e) => error!(error = %e, "failed to serialize run reports"),
        }
    }

    exit_code(&reports)
}
