mod config;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tracing::info;

use certforge_core::{BudgetOverrides, JobStatus};
use certforge_engine::{export_active_csv, JobError, JobRegistry, JobRequest};
use certforge_store::{StoreError, StreamingStore};

use config::{load_config, CliConfig};
use logging::init_logging;

const DEFAULT_CLIENTS: u64 = 1_000;
const DEFAULT_CERTIFICATES: u64 = 2_000;
const DEFAULT_DB_PATH: &str = "data/certificates.db";
const DEFAULT_OUTPUT_PATH: &str = "output/active_certificates.csv";

#[derive(Debug, Error)]
enum CliError {
    #[error("job error: {0}")]
    Job(#[from] JobError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(
    name = "certforge",
    version,
    about = "Synthetic client/certificate dataset generator"
)]
struct Cli {
    /// Optional TOML configuration file; explicit flags take precedence.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a dataset and export the active subset as CSV.
    Generate(GenerateArgs),
    /// Export the active subset of an existing dataset as CSV.
    Export(ExportArgs),
    /// Page through the active subset of an existing dataset.
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Number of clients to synthesize.
    #[arg(long)]
    clients: Option<u64>,
    /// Number of certificate records to synthesize.
    #[arg(long)]
    certificates: Option<u64>,
    /// Seed for reproducible runs.
    #[arg(long)]
    seed: Option<u64>,
    /// Database file for the generated dataset.
    #[arg(long)]
    db: Option<PathBuf>,
    /// Destination of the active-certificates CSV.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Records per write transaction (auto-sized when omitted).
    #[arg(long)]
    batch_size: Option<usize>,
    /// Parallel synthesizer workers (auto-sized when omitted).
    #[arg(long)]
    workers: Option<usize>,
    /// Queue capacity between synthesizers and the writer (auto-sized when
    /// omitted).
    #[arg(long)]
    buffer_size: Option<usize>,
    /// Skip the CSV export after generation.
    #[arg(long, default_value_t = false)]
    no_export: bool,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[arg(long)]
    db: Option<PathBuf>,
    /// Restrict the listing to one client.
    #[arg(long)]
    client: Option<i64>,
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long, default_value_t = 100)]
    page_size: u64,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    init_logging()?;
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Generate(args) => run_generate(args, &config).await,
        Command::Export(args) => run_export(args, &config).await,
        Command::Query(args) => run_query(args, &config).await,
    }
}

async fn run_generate(args: GenerateArgs, config: &CliConfig) -> Result<(), CliError> {
    let clients = args.clients.or(config.clients).unwrap_or(DEFAULT_CLIENTS);
    let certificates = args
        .certificates
        .or(config.certificates)
        .unwrap_or(DEFAULT_CERTIFICATES);
    let db_path = resolve_path(args.db, config.db_path.clone(), DEFAULT_DB_PATH);
    let out_path = resolve_path(args.out, config.output_path.clone(), DEFAULT_OUTPUT_PATH);

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let store = Arc::new(StreamingStore::open(&db_path).await?);
    let registry = JobRegistry::new(Arc::clone(&store));
    let job_id = registry.start_job(JobRequest {
        num_clients: clients,
        num_certificates: certificates,
        seed: args.seed.or(config.seed),
        reference_time: None,
        overrides: BudgetOverrides {
            batch_size: args.batch_size.or(config.batch_size),
            worker_count: args.workers.or(config.workers),
            buffer_size: args.buffer_size.or(config.buffer_size),
        },
    })?;

    let mut last_reported = 0u64;
    let snapshot = loop {
        let snapshot = registry.get_status(job_id)?;
        if snapshot.status.is_terminal() {
            break snapshot;
        }
        if snapshot.produced_count != last_reported {
            last_reported = snapshot.produced_count;
            info!(
                produced = snapshot.produced_count,
                requested = snapshot.requested_certificates,
                "generation progress"
            );
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    };

    match snapshot.status {
        JobStatus::Completed => {
            info!(produced = snapshot.produced_count, "generation finished");
        }
        JobStatus::Failed => {
            return Err(CliError::Generation(
                snapshot
                    .error
                    .unwrap_or_else(|| "unknown failure".to_string()),
            ));
        }
        other => {
            return Err(CliError::Generation(format!(
                "job ended in unexpected state {other:?}"
            )));
        }
    }

    if !args.no_export {
        let summary = export_active_csv(&store, &out_path, Utc::now().naive_utc()).await?;
        info!(
            rows = summary.rows,
            path = %summary.path.display(),
            "active-certificate export written"
        );
    }
    Ok(())
}

async fn run_export(args: ExportArgs, config: &CliConfig) -> Result<(), CliError> {
    let db_path = resolve_path(args.db, config.db_path.clone(), DEFAULT_DB_PATH);
    let out_path = resolve_path(args.out, config.output_path.clone(), DEFAULT_OUTPUT_PATH);

    let store = open_existing(&db_path).await?;
    let summary = export_active_csv(&store, &out_path, Utc::now().naive_utc()).await?;
    info!(
        rows = summary.rows,
        path = %summary.path.display(),
        "active-certificate export written"
    );
    Ok(())
}

async fn run_query(args: QueryArgs, config: &CliConfig) -> Result<(), CliError> {
    if args.page == 0 || args.page_size == 0 {
        return Err(CliError::InvalidConfig(
            "page and page-size must be positive".to_string(),
        ));
    }
    let db_path = resolve_path(args.db, config.db_path.clone(), DEFAULT_DB_PATH);
    let store = open_existing(&db_path).await?;
    let page = store
        .query_active(args.client, args.page, args.page_size, Utc::now().naive_utc())
        .await?;
    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

async fn open_existing(db_path: &std::path::Path) -> Result<StreamingStore, CliError> {
    if !db_path.exists() {
        return Err(CliError::InvalidConfig(format!(
            "database {} does not exist; run `certforge generate` first",
            db_path.display()
        )));
    }
    Ok(StreamingStore::open_existing(db_path).await?)
}

fn resolve_path(flag: Option<PathBuf>, config: Option<PathBuf>, default: &str) -> PathBuf {
    flag.or(config).unwrap_or_else(|| PathBuf::from(default))
}
