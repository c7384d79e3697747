use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mender::config::Config;
use mender::engine::Engine;
use mender::explain::OracleExplainer;
use mender::ingest::{load_reports, SemgrepScanner};
use mender::normalize::{Normalizer, RawReport};
use mender::oracle::{ChatBackend, HttpOracle, RetryPolicy};
use mender::repair::RepairClient;
use mender::report;
use mender::validate::Validator;

#[derive(Parser, Debug)]
#[command(
    name = "mender",
    about = "Repairs reported code bugs with an LLM and checks every patch before accepting it",
    version
)]
struct Args {
    /// Ceiling on repair attempts per issue, recorded in the report
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Scan this local project with semgrep instead of reading benchmark reports
    #[arg(long, value_name = "DIR")]
    local_dir: Option<PathBuf>,

    /// Directory of benchmark report files (*.json)
    #[arg(long, value_name = "DIR")]
    benchmark_dir: Option<PathBuf>,

    /// Where timestamped report directories are created
    #[arg(long, value_name = "DIR")]
    reports_dir: Option<PathBuf>,

    /// Config file (defaults to <config dir>/mender/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = Config::load(args.config.as_deref());
    if let Some(n) = args.max_iterations {
        config.run.max_iterations = n;
    }
    if let Some(dir) = args.benchmark_dir {
        config.run.benchmark_dir = dir;
    }
    if let Some(dir) = args.reports_dir {
        config.run.reports_dir = dir;
    }

    let Some(api_key) = Config::api_key() else {
        bail!("no oracle API key: set MENDER_API_KEY or DASHSCOPE_API_KEY, or store one in the system keychain");
    };

    info!(
        model = %config.oracle.model,
        max_iterations = config.run.max_iterations,
        "mender starting"
    );

    let reports = match &args.local_dir {
        Some(dir) => {
            let items = scan_local(&config, dir).await?;
            if items.is_empty() {
                println!("semgrep reported no findings; nothing to repair.");
                return Ok(ExitCode::SUCCESS);
            }
            vec![RawReport::Parsed(Value::Array(items))]
        }
        None => {
            let reports = load_reports(&config.run.benchmark_dir);
            if reports.is_empty() {
                error!(
                    dir = %config.run.benchmark_dir.display(),
                    "no benchmark reports found and no --local-dir given; nothing to do"
                );
                return Ok(ExitCode::FAILURE);
            }
            reports
        }
    };

    let backend: Arc<dyn ChatBackend> = Arc::new(HttpOracle::new(&config.oracle, Some(api_key))?);
    let policy = RetryPolicy::from(&config.retry);

    let explainer = Arc::new(OracleExplainer::new(
        Arc::clone(&backend),
        policy.clone(),
        &config.oracle,
    ));
    let normalizer = Normalizer::new(explainer, &config.normalize);
    let issues = normalizer.normalize(reports).await;
    info!(issues = issues.len(), "reports normalized");
    if issues.is_empty() {
        warn!("no valid issues in the reports");
    }

    let repairer = RepairClient::from_settings(backend, policy, &config.oracle);
    let engine = Engine::new(
        repairer,
        Validator::new(config.validate.clone()),
        config.run.max_iterations,
    );
    let aggregate = engine.run(issues).await;

    let dir = report::timestamped_dir(&config.run.reports_dir);
    println!("{}", report::write(&aggregate, &dir));

    Ok(if aggregate.all_fixed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn scan_local(config: &Config, dir: &Path) -> Result<Vec<Value>> {
    let dir = dir
        .canonicalize()
        .with_context(|| format!("Local directory does not exist: {}", dir.display()))?;
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }

    let scanner = SemgrepScanner::from_settings(&config.scanner);
    tokio::task::spawn_blocking(move || scanner.scan(&dir))
        .await
        .context("semgrep scan task failed")
}
