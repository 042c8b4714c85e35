use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use cli::{logging, report};
use docsort_core::config::{self, AppConfig};
use docsort_core::extractor::Extractor;
use docsort_core::models::FileTask;
use docsort_core::pipeline;
use docsort_core::rules::RuleSet;
use docsort_core::{Coordinator, RunStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use storage::ProgressStore;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            fresh,
            workers,
            json,
        } => {
            if workers.is_some() {
                cfg.processing.workers = workers;
            }
            run_batch(cfg, fresh, json).await
        }
        Commands::Status { json } => {
            logging::init(None)?;
            show_status(&cfg, json)
        }
        Commands::Check { file } => {
            logging::init(None)?;
            check_file(&cfg, file).await
        }
        Commands::Rules => {
            let rules = RuleSet::from_config(&cfg.categories)?;
            println!("{}", report::render_rules(&rules));
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Parser)]
#[command(name = "docsort")]
#[command(about = "Sort Word documents into category folders by keyword rules", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify and copy documents, resuming an unfinished run if there is one
    ///
    /// Ctrl-C while scanning or copying saves progress and exits with 130.
    /// Once every file is committed the run finishes writing its statistics.
    Run {
        /// Discard saved progress and start over
        #[arg(long)]
        fresh: bool,
        /// Fixed number of workers instead of the CPU-based default
        #[arg(long)]
        workers: Option<usize>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Describe the saved progress of an unfinished run
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Extract and classify a single file without copying it
    Check { file: PathBuf },
    /// List categories in evaluation order
    Rules,
}

async fn run_batch(cfg: AppConfig, fresh: bool, json: bool) -> Result<ExitCode> {
    let logs = cfg.directories.logs();
    let resume = !fresh && ProgressStore::in_dir(&logs).exists();
    let target = logging::log_target(&logs, resume, Local::now());
    logging::init(Some(&target.log_file))?;
    info!(
        source = %cfg.directories.source().display(),
        dest = %cfg.directories.dest().display(),
        log = %target.log_file.display(),
        resume,
        "starting batch"
    );

    let mut coordinator = Coordinator::new(cfg)?
        .fresh(fresh)
        .stats_path(target.stats_file);
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    match coordinator.run(shutdown).await {
        Ok(run) => {
            println!("{}", report::render_run(&run, json)?);
            Ok(ExitCode::from(run.status.exit_code()))
        }
        Err(e) => {
            println!("{}", report::render_failure(&e, json)?);
            Ok(ExitCode::from(RunStatus::Failed.exit_code()))
        }
    }
}

fn show_status(cfg: &AppConfig, json: bool) -> Result<ExitCode> {
    let store = ProgressStore::in_dir(&cfg.directories.logs());
    match store.load_snapshot() {
        Ok(snapshot) => {
            println!(
                "{}",
                report::render_status(snapshot.as_ref(), store.path(), json)?
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn check_file(cfg: &AppConfig, file: PathBuf) -> Result<ExitCode> {
    let rules = RuleSet::from_config(&cfg.categories)?;
    let extractor = Extractor::new(
        &cfg.extraction,
        Duration::from_secs(cfg.processing.extraction_timeout_secs),
    );
    let task = FileTask::from_path(&file)
        .with_context(|| format!("{} has no file extension", file.display()))?;

    match pipeline::inspect(&task, &extractor, &rules).await {
        Ok(found) => {
            println!(
                "{}: {} ({} chars extracted)",
                file.display(),
                found.verdict.category(),
                found.chars
            );
            if !found.preview.is_empty() {
                println!("  {}", found.preview);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("{}: error ({e})", file.display());
            Ok(ExitCode::FAILURE)
        }
    }
}
