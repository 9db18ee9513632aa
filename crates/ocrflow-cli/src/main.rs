use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use ocrflow::config::{load_config, Config};
use ocrflow::db::default_database_path;
use ocrflow::logging::{self, LogFormat};
use ocrflow::{Database, ExtractionJob, ExtractionPipeline, JobRegistry, JobStatus, RetryMode};

#[derive(Debug, Parser)]
#[command(name = "ocrflow")]
#[command(about = "Extract text from scanned documents through a batched OCR pipeline")]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, global = true, env = "OCRFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database holding job state. Overrides `storage.database_path`.
    #[arg(long, global = true, env = "OCRFLOW_DB")]
    db: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogOutput::Text)]
    log_format: LogOutput,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogOutput {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Submit a document and run it to completion.
    Extract {
        /// Document reference, relative to `storage.source_root`.
        source: String,
    },
    /// Show a job's current attempt.
    Status {
        job_id: String,
        /// Show every attempt, oldest first.
        #[arg(long)]
        attempts: bool,
    },
    /// List jobs, newest first.
    List {
        /// Only jobs with this status (pending, processing, completed, failed).
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Start a new attempt for a finished job and run it.
    Retry {
        job_id: String,
        /// Run again even though the job completed.
        #[arg(long)]
        reextract: bool,
    },
    /// Fail attempts left processing by a run that crashed or was killed.
    Recover {
        /// Only touch attempts with no progress for this many seconds.
        #[arg(long, default_value_t = 600)]
        stale_after_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => process::exit(code),
        Err(error) => {
            if tracing::enabled!(tracing::Level::ERROR) {
                tracing::error!(error = %format!("{error:#}"), "ocrflow failed");
            } else {
                eprintln!("Error: {error:#}");
            }
            process::exit(2);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let format = match cli.log_format {
        LogOutput::Text => LogFormat::Text,
        LogOutput::Json => LogFormat::Json,
    };
    logging::init(default_filter, format).context("failed to initialize logging")?;

    let config = cli
        .config
        .as_ref()
        .map(|path| {
            load_config(path).with_context(|| format!("failed to load {}", path.display()))
        })
        .transpose()?;

    let registry = Arc::new(open_registry(cli.db.as_ref(), config.as_ref())?);

    match cli.command {
        Command::Extract { source } => {
            let config = require_config(config)?;
            let pipeline = ExtractionPipeline::from_config(&config, Arc::clone(&registry))
                .context("failed to build pipeline")?;
            let job = registry.submit(&source)?;
            run_attempt(&pipeline, &job.id).await
        }
        Command::Status { job_id, attempts } => {
            if attempts {
                print_json(&registry.get_attempts(&job_id)?)?;
            } else {
                print_json(&registry.get(&job_id)?)?;
            }
            Ok(0)
        }
        Command::List { status, limit } => {
            let status = status
                .map(|s| match JobStatus::parse(&s) {
                    Some(status) => Ok(status),
                    None => bail!("unknown status '{}'", s),
                })
                .transpose()?;
            print_json(&registry.list(status, Some(limit))?)?;
            Ok(0)
        }
        Command::Retry { job_id, reextract } => {
            let config = require_config(config)?;
            let pipeline = ExtractionPipeline::from_config(&config, Arc::clone(&registry))
                .context("failed to build pipeline")?;
            let mode = if reextract {
                RetryMode::Reextract
            } else {
                RetryMode::Retry
            };
            let job = registry.retry(&job_id, mode)?;
            run_attempt(&pipeline, &job.id).await
        }
        Command::Recover { stale_after_secs } => {
            let recovered =
                registry.recover_interrupted(Duration::from_secs(stale_after_secs))?;
            log::info!("Recovered {} interrupted jobs", recovered.len());
            print_json(&recovered)?;
            Ok(0)
        }
    }
}

fn require_config(config: Option<Config>) -> anyhow::Result<Config> {
    config.context("this command needs a configuration file (--config or OCRFLOW_CONFIG)")
}

fn open_registry(db: Option<&PathBuf>, config: Option<&Config>) -> anyhow::Result<JobRegistry> {
    let path = db
        .cloned()
        .or_else(|| config.and_then(|c| c.storage.database_path()))
        .or_else(default_database_path)
        .context("could not determine a database path; pass --db")?;

    let db = Database::open(&path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(JobRegistry::with_database(db))
}

/// Runs one attempt, cancelling it between waves on Ctrl-C. Prints the final
/// job record and returns the exit code.
async fn run_attempt(pipeline: &ExtractionPipeline, job_id: &str) -> anyhow::Result<i32> {
    let run = pipeline.run(job_id);
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, cancelling job {} after the current wave", job_id);
            pipeline.cancel(job_id);
            run.await
        }
    };

    if let Err(e) = &result {
        log::error!("Job {} failed: {}", job_id, e);
    }

    let job = pipeline.registry().get(job_id)?;
    print_json(&job)?;
    Ok(exit_code(&job))
}

fn exit_code(job: &ExtractionJob) -> i32 {
    match job.status {
        JobStatus::Completed => 0,
        _ => 1,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
