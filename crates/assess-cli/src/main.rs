//! Agent assessment CLI
//!
//! The `assess` command runs benchmark suites against assessee endpoints.
//!
//! ## Commands
//!
//! - `run`: dispatch a suite, judge every trajectory, write results
//! - `check`: probe one endpoint's readiness
//! - `summarize`: recompute metrics from a results directory

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use assess_core::reporting::{render_metrics_md, RUN_SUMMARY_JSON, RUN_SUMMARY_MD};
use assess_core::store::fs::read_verdicts;
use assess_core::{
    check_readiness, init_tracing, render_run_summary_md, summarize_verdicts,
    write_run_summary_json, write_run_summary_md, AssessConfig, AssessmentController,
    AssesseeEndpoint, HttpAssesseeClient, HttpJudgeService, JsonlResultStore, LogFormat,
    RunRequest,
};

#[derive(Parser)]
#[command(name = "assess")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Assess autonomous agents against benchmark tasks", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log line format: `pretty` or `json`
    #[arg(long, global = true, env = "ASSESS_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a suite of tasks against every endpoint it lists
    Run {
        /// Suite file (TOML with `tasks` and `endpoints` arrays)
        #[arg(short, long)]
        suite: PathBuf,

        /// Run configuration (TOML); defaults apply when omitted
        #[arg(short, long, env = "ASSESS_CONFIG")]
        config: Option<PathBuf>,

        /// Directory receiving trajectories, verdicts and the run summary
        #[arg(short, long, env = "ASSESS_OUT_DIR", default_value = "assess-results")]
        out_dir: PathBuf,

        /// Bearer token for the judge service
        #[arg(long, env = "ASSESS_JUDGE_API_KEY", hide_env_values = true)]
        judge_api_key: Option<String>,
    },

    /// Probe an endpoint with the configured readiness policy
    Check {
        /// Assessee base URL
        #[arg(short, long)]
        address: String,

        /// Run configuration (TOML); defaults apply when omitted
        #[arg(short, long, env = "ASSESS_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Recompute label counts and success rates from verdicts.jsonl
    Summarize {
        /// Results directory written by `assess run`
        #[arg(short, long)]
        results_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_format, assess_core::telemetry::level_for(cli.verbose));

    match cli.command {
        Commands::Run {
            suite,
            config,
            out_dir,
            judge_api_key,
        } => cmd_run(&suite, config.as_deref(), &out_dir, judge_api_key).await,
        Commands::Check { address, config } => cmd_check(&address, config.as_deref()).await,
        Commands::Summarize { results_dir } => cmd_summarize(&results_dir),
    }
}

fn load_config(path: Option<&Path>, judge_api_key: Option<String>) -> Result<AssessConfig> {
    let config = match path {
        Some(path) => {
            AssessConfig::load(path).with_context(|| format!("load config {:?}", path))?
        }
        None => AssessConfig::default(),
    };
    Ok(config.with_judge_api_key(judge_api_key))
}

fn load_suite(path: &Path) -> Result<RunRequest> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read suite {:?}", path))?;
    toml::from_str(&raw).with_context(|| format!("parse suite {:?}", path))
}

async fn cmd_run(
    suite: &Path,
    config: Option<&Path>,
    out_dir: &Path,
    judge_api_key: Option<String>,
) -> Result<()> {
    let config = load_config(config, judge_api_key)?;
    let request = load_suite(suite)?;
    info!(
        tasks = request.tasks.len(),
        endpoints = request.endpoints.len(),
        out_dir = %out_dir.display(),
        "starting assessment run"
    );

    let store = Arc::new(
        JsonlResultStore::create(out_dir)
            .with_context(|| format!("open results directory {:?}", out_dir))?,
    );
    let results_dir = store.root().to_path_buf();
    let client = HttpAssesseeClient::new().context("build assessee HTTP client")?;
    let judge = HttpJudgeService::new(&config.judge).context("build judge HTTP client")?;
    let controller =
        AssessmentController::new(config, Arc::new(client), Arc::new(judge), store);

    cancel_on_interrupt(controller.cancellation_token(), "interrupt received, cancelling run");
    let summary = controller.run(request).await.context("assessment run failed")?;

    write_run_summary_json(&results_dir.join(RUN_SUMMARY_JSON), &summary)?;
    write_run_summary_md(&results_dir.join(RUN_SUMMARY_MD), &summary)?;

    println!("{}", render_run_summary_md(&summary));
    Ok(())
}

async fn cmd_check(address: &str, config: Option<&Path>) -> Result<()> {
    let config = load_config(config, None)?;
    let endpoint = AssesseeEndpoint::new("check", address);
    endpoint.validate()?;

    let client = HttpAssesseeClient::new().context("build assessee HTTP client")?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone(), "interrupt received, abandoning readiness check");
    let readiness = check_readiness(&client, &endpoint, &config.readiness, &cancel).await;
    if !readiness.is_ready() {
        bail!("{} is not ready: {:?}", address, readiness);
    }
    println!("{} is ready", address);
    Ok(())
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken, message: &'static str) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("{message}");
            token.cancel();
        }
    });
}

fn cmd_summarize(results_dir: &Path) -> Result<()> {
    let verdicts = read_verdicts(results_dir)
        .with_context(|| format!("read verdicts from {:?}", results_dir))?;
    if verdicts.is_empty() {
        bail!("no verdicts found in {:?}", results_dir);
    }

    let metrics = summarize_verdicts(&verdicts);
    println!("# Results for {}\n", results_dir.display());
    println!("{}", render_metrics_md(&metrics.aggregate, &metrics.per_assessee));
    Ok(())
}
