//! dm-qc-report - per-session MRI quality control
//!
//! Without a session, finds every session of the study that still needs QC
//! and submits one scheduler job per session. With a session, runs the QC
//! pipelines for it and writes its report.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use dmqc_common::config::StudyConfig;
use dmqc_report::logging::{init_logging, Verbosity};
use dmqc_report::services::{
    CommandRunner, Dashboard, HttpDashboard, NoDashboard, QsubScheduler, Scheduler, ShellRunner,
};
use dmqc_report::{Orchestrator, RunOptions};

/// Command-line arguments for dm-qc-report
#[derive(Parser, Debug)]
#[command(name = "dm-qc-report")]
#[command(about = "Generate QC reports for a study, or for one session of it")]
#[command(version)]
struct Args {
    /// Study name, used to find `<STUDY>.toml`
    study: String,

    /// Session to QC in-process, e.g. SPN01_CMH_0001_01_01
    session: Option<String>,

    /// Regenerate reports and phantom outputs that already exist
    #[arg(long)]
    rewrite: bool,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Log progress
    #[arg(short, long)]
    verbose: bool,

    /// Log everything
    #[arg(short, long)]
    debug: bool,

    /// Also send logs to the study's log server
    #[arg(long)]
    log_to_server: bool,
}

impl Args {
    fn options(&self) -> RunOptions {
        RunOptions {
            rewrite: self.rewrite,
            verbosity: Verbosity {
                quiet: self.quiet,
                verbose: self.verbose,
                debug: self.debug,
            },
            log_to_server: self.log_to_server,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let options = args.options();

    // Config is needed before logging to know where the log server is
    let config = StudyConfig::load(&args.study);
    let log_server = match (&config, options.log_to_server) {
        (Ok(config), true) => config.log_server_addr(),
        _ => None,
    };
    init_logging(options.verbosity, log_server.clone());

    info!(
        "Starting dm-qc-report v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    if options.log_to_server && log_server.is_none() && config.is_ok() {
        warn!("--log-to-server given but no log_server configured for {}", args.study);
    }

    if let Err(e) = run(&args, options, config).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(
    args: &Args,
    options: RunOptions,
    config: dmqc_common::Result<StudyConfig>,
) -> Result<()> {
    let config = config
        .with_context(|| format!("Failed to load config for study {}", args.study))?;
    config.require_paths()?;
    info!(study = %config.study_name, "Loaded config");

    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner);
    let dashboard: Arc<dyn Dashboard> = match config.dashboard_url.as_deref() {
        Some(url) => Arc::new(HttpDashboard::new(url)?),
        None => Arc::new(NoDashboard),
    };
    let scheduler: Arc<dyn Scheduler> = Arc::new(QsubScheduler::new(
        runner.clone(),
        config.qc.scheduler_queue.clone(),
    ));
    let program = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("dm-qc-report"));

    let orchestrator = Orchestrator::new(config, options, runner, dashboard, scheduler, program);
    orchestrator.run(args.session.as_deref()).await?;
    Ok(())
}
