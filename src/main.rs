use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{Days, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{debug, error, trace};

use plume::config::{PipelineConfig, StoreBackend};
use plume::pipeline::{Inventory, Orchestrator, RunReport};
use plume::store::{BlobStore, FileSink, FileStore, MemorySink, MemoryStore, MessageSink};

/// Daily air-quality map-reduce pipeline
#[derive(Parser)]
#[command(name = "plume")]
#[command(about = "Pivot and summarize daily air-quality sensor feeds", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one day end to end (default command)
    Run {
        /// Target date (YYYY-MM-DD); defaults to yesterday UTC
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Source objects per transform chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Print the run report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List a day's source objects and show the chunk plan without running
    Inventory {
        /// Target date (YYYY-MM-DD); defaults to yesterday UTC
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Source objects per transform chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .init();

    debug!("plume started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Some(Commands::Run {
            date,
            chunk_size,
            config,
            json,
        }) => run_pipeline(date, chunk_size, config, json).await,
        Some(Commands::Inventory {
            date,
            chunk_size,
            config,
        }) => run_inventory(date, chunk_size, config).await,
        None => {
            // Default to a full run over yesterday with default settings
            run_pipeline(None, None, None, false).await
        }
    };

    if let Err(e) = result {
        error!("Fatal error: {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run_pipeline(
    date: Option<NaiveDate>,
    chunk_size: Option<usize>,
    config_path: Option<PathBuf>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path.as_deref(), chunk_size)?;
    let target_date = resolve_date(date)?;
    let (store, sink) = build_adapters(&config).await?;

    let orchestrator = Orchestrator::new(config, store, sink)?;
    let report = orchestrator.run(target_date).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_inventory(
    date: Option<NaiveDate>,
    chunk_size: Option<usize>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = load_config(config_path.as_deref(), chunk_size)?;
    let target_date = resolve_date(date)?;
    let (store, _) = build_adapters(&config).await?;

    let inventory = Inventory::new(store, config)?;
    let chunks = inventory.list(target_date).await?;

    let objects: usize = chunks.iter().map(|c| c.keys.len()).sum();
    println!("{objects} source object(s) for {target_date} in {} chunk(s):", chunks.len());
    for chunk in &chunks {
        println!("  chunk {:>3}: {} object(s)", chunk.index, chunk.keys.len());
        for key in &chunk.keys {
            println!("    {key}");
        }
    }
    Ok(())
}

fn load_config(
    config_path: Option<&Path>,
    chunk_size: Option<usize>,
) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::load(config_path)?;
    if let Some(chunk_size) = chunk_size {
        config.chunk_size = chunk_size;
    }
    Ok(config)
}

/// Map -v occurrences to an env-filter directive.
fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Feeds finish publishing a short while after midnight, so an unspecified
/// date means the most recent complete day.
fn resolve_date(date: Option<NaiveDate>) -> anyhow::Result<NaiveDate> {
    match date {
        Some(date) => Ok(date),
        None => Utc::now()
            .date_naive()
            .checked_sub_days(Days::new(1))
            .context("no previous day for the current date"),
    }
}

async fn build_adapters(
    config: &PipelineConfig,
) -> anyhow::Result<(Arc<dyn BlobStore>, Arc<dyn MessageSink>)> {
    match config.store.backend {
        StoreBackend::Memory => Ok((
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySink::new()),
        )),
        StoreBackend::File => {
            let store = FileStore::new(&config.store.base_dir).await?;
            let sink = FileSink::new(&config.store.base_dir).await?;
            Ok((Arc::new(store), Arc::new(sink)))
        }
        #[cfg(feature = "s3")]
        StoreBackend::S3 => {
            let bucket = config
                .store
                .bucket
                .as_deref()
                .context("store.bucket is required for the s3 backend")?;
            let store = plume::store::S3Store::new(bucket, config.store.endpoint.as_deref()).await?;
            // Outcome messages go to a local sink; queue delivery is a
            // deployment concern outside the store adapter.
            let sink = FileSink::new(&config.store.base_dir).await?;
            Ok((Arc::new(store), Arc::new(sink)))
        }
        #[cfg(not(feature = "s3"))]
        StoreBackend::S3 => {
            anyhow::bail!("this binary was built without the 's3' feature")
        }
    }
}

fn print_report(report: &RunReport) {
    let banner = if report.is_success() { "✅" } else { "❌" };
    println!(
        "{banner} run {} for {} finished: {}",
        report.run_id, report.target_date, report.status
    );
    println!(
        "   {} source object(s) in {} chunk(s), {} pivoted row(s), {} line(s) skipped",
        report.source_objects, report.chunks, report.intermediate_rows, report.skipped_lines
    );
    if let Some(artifact) = &report.final_artifact {
        println!("   {} summary row(s) at {}", report.summary_rows, artifact);
    }
    if let Some(cleanup) = &report.cleanup {
        println!(
            "   cleanup: {} deleted, {} missing, {} failed",
            cleanup.deleted,
            cleanup.missing,
            cleanup.failed.len()
        );
    }
    if let Some(failure) = &report.failure {
        println!("   failed at {}: {}", failure.stage, failure.cause);
        for artifact in &failure.leftover_artifacts {
            println!("   leftover: {artifact}");
        }
    }
    println!("   elapsed: {:?}", report.elapsed);
}
