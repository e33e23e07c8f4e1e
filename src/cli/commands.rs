//! CLI parser and command dispatch.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tracing::warn;

use crate::config::{DestinationKind, Settings};
use crate::models::{DocumentStatus, StepStatus};
use crate::pipeline::{
    Collaborators, Orchestrator, OrchestratorConfig, StallWatchdog,
};
use crate::repository::{run_migrations, DbPool, DocumentRepository, StepLedger};
use crate::services::{HeuristicMetadata, IngestService, PdftotextOcr, ShellConverter};
use crate::split::QpdfCodec;

#[derive(Parser)]
#[command(name = "docrelay")]
#[command(about = "Document processing and distribution pipeline")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Ingest files into the processing queue
    Ingest {
        /// Files to ingest
        files: Vec<PathBuf>,
    },

    /// Process pending documents through the pipeline
    Process {
        /// Number of concurrent workers (default: from config)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Limit number of documents to process (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
        /// Requeue previously failed documents first
        #[arg(long)]
        retry_failed: bool,
    },

    /// Show a document's pipeline status
    Status {
        /// Document ID
        document_id: String,
    },

    /// Recover stalled processing steps
    Watchdog {
        /// Run a single recovery pass and exit
        #[arg(long)]
        once: bool,
    },

    /// List configured delivery destinations
    Destinations,
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => cmd_init(&settings).await,
        Commands::Ingest { files } => cmd_ingest(&settings, files).await,
        Commands::Process {
            workers,
            limit,
            retry_failed,
        } => cmd_process(&settings, workers, limit, retry_failed).await,
        Commands::Status { document_id } => cmd_status(&settings, &document_id).await,
        Commands::Watchdog { once } => cmd_watchdog(&settings, once).await,
        Commands::Destinations => cmd_destinations(&settings),
    }
}

async fn open_pool(settings: &Settings) -> anyhow::Result<DbPool> {
    let url = settings.database_url();
    run_migrations(&url).await?;
    Ok(DbPool::from_url(&url)?)
}

fn build_orchestrator(
    settings: &Settings,
    documents: DocumentRepository,
    ledger: StepLedger,
) -> Orchestrator {
    let collaborators = Collaborators {
        converter: Arc::new(ShellConverter::new(settings.processed_dir())),
        ocr: Arc::new(PdftotextOcr::new()),
        metadata: Arc::new(HeuristicMetadata::new()),
        codec: Arc::new(QpdfCodec::new()),
    };
    let config = OrchestratorConfig {
        retry: settings.retry_policy(),
        max_single_file_size: settings.pipeline.max_single_file_size,
        chunk_dir: settings.chunks_dir(),
    };
    Orchestrator::new(
        documents,
        ledger,
        collaborators,
        settings.destination_bindings(),
        config,
    )
}

async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.data_dir)?;
    std::fs::create_dir_all(settings.documents_dir())?;
    std::fs::create_dir_all(settings.processed_dir())?;
    run_migrations(&settings.database_url()).await?;

    println!(
        "{} initialized data directory {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    Ok(())
}

async fn cmd_ingest(settings: &Settings, files: Vec<PathBuf>) -> anyhow::Result<()> {
    if files.is_empty() {
        anyhow::bail!("no files given");
    }

    let pool = open_pool(settings).await?;
    let documents = DocumentRepository::new(pool);
    let ingest = IngestService::new(documents, settings.documents_dir());

    for file in files {
        let content = tokio::fs::read(&file).await?;
        let filename = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document");
        let id = ingest.enqueue(&content, filename).await?;
        println!("{} {}  {}", style("✓").green(), id, file.display());
    }
    Ok(())
}

async fn cmd_process(
    settings: &Settings,
    workers: Option<usize>,
    limit: usize,
    retry_failed: bool,
) -> anyhow::Result<()> {
    let pool = open_pool(settings).await?;
    let documents = DocumentRepository::new(pool.clone());
    let ledger = StepLedger::new(pool);
    let orchestrator = build_orchestrator(settings, documents.clone(), ledger.clone());
    let workers = workers.unwrap_or(settings.pipeline.workers).max(1);

    if retry_failed {
        let requeued = documents.requeue_failed().await?;
        if requeued > 0 {
            println!("requeued {requeued} failed documents");
        }
    }

    // Documents abandoned mid-run by a crashed worker go back to the queue.
    let stale = documents
        .requeue_stale_processing(settings.stage_timeout())
        .await?;
    if stale > 0 {
        println!("requeued {stale} stale documents");
    }

    // The watchdog runs alongside the workers, decoupled from any one
    // document's lifecycle.
    let watchdog = StallWatchdog::new(
        ledger.clone(),
        settings.stage_timeout(),
        settings.watchdog_period(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watchdog_task = tokio::spawn(async move { watchdog.run(shutdown_rx).await });

    let pending = documents.count_by_status(DocumentStatus::Pending).await?;
    let total = if limit > 0 {
        pending.min(limit as u64)
    } else {
        pending
    };
    let bar = ProgressBar::new(total);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )?);

    let mut processed = 0usize;
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    loop {
        let batch_size = if limit > 0 {
            workers.min(limit - processed)
        } else {
            workers
        };
        if batch_size == 0 {
            break;
        }

        let batch = documents.claim_pending(batch_size).await?;
        if batch.is_empty() {
            break;
        }

        let results = join_all(
            batch
                .iter()
                .map(|doc| orchestrator.process_document(&doc.id)),
        )
        .await;

        for (doc, result) in batch.iter().zip(results) {
            match result {
                Ok(DocumentStatus::Processed) => succeeded += 1,
                Ok(DocumentStatus::Failed) => failed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(document_id = %doc.id, error = %e, "processing error");
                    failed += 1;
                }
            }
            bar.inc(1);
        }
        processed += batch.len();
    }

    bar.finish_and_clear();
    let _ = shutdown_tx.send(true);
    watchdog_task.await??;

    println!(
        "{} processed {} documents ({} ok, {} failed)",
        style("✓").green(),
        processed,
        style(succeeded).green(),
        if failed > 0 {
            style(failed).red()
        } else {
            style(failed).dim()
        },
    );
    Ok(())
}

async fn cmd_status(settings: &Settings, document_id: &str) -> anyhow::Result<()> {
    let pool = open_pool(settings).await?;
    let documents = DocumentRepository::new(pool.clone());
    let ledger = StepLedger::new(pool);

    let doc = documents
        .get(document_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("document not found: {document_id}"))?;

    println!("{} {}", style("document").bold(), doc.id);
    println!("  name:    {}", doc.original_name);
    println!("  mime:    {}", doc.mime_type);
    println!("  size:    {} bytes", doc.size_bytes);
    println!("  status:  {}", doc.status.as_str());
    if doc.is_duplicate {
        println!(
            "  duplicate of: {}",
            doc.duplicate_of_id.as_deref().unwrap_or("?")
        );
    }

    let steps = ledger.steps_for_document(document_id).await?;
    if steps.is_empty() {
        println!("  (no pipeline steps yet)");
        return Ok(());
    }

    println!("{}", style("steps").bold());
    for step in steps {
        let status = match step.status {
            StepStatus::Success => style(step.status.as_str()).green(),
            StepStatus::Failure => style(step.status.as_str()).red(),
            StepStatus::InProgress => style(step.status.as_str()).yellow(),
            StepStatus::Pending => style(step.status.as_str()).dim(),
        };
        let mut line = format!("  {:<24} {}", step.stage, status);
        if let Some(detail) = &step.detail {
            line.push_str(&format!("  {}", style(detail).dim()));
        }
        if let Some(error) = &step.error_message {
            line.push_str(&format!("  {}", style(error).red()));
        }
        println!("{line}");
    }
    Ok(())
}

async fn cmd_watchdog(settings: &Settings, once: bool) -> anyhow::Result<()> {
    let pool = open_pool(settings).await?;
    let ledger = StepLedger::new(pool);
    let watchdog = StallWatchdog::new(
        ledger,
        settings.stage_timeout(),
        settings.watchdog_period(),
    );

    if once {
        let recovered = watchdog.pass().await?;
        println!("recovered {recovered} stalled steps");
        return Ok(());
    }

    println!(
        "watchdog running (timeout {}s, period {}s), ctrl-c to stop",
        settings.pipeline.stage_timeout_secs, settings.pipeline.watchdog_period_secs
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });
    watchdog.run(shutdown_rx).await?;
    Ok(())
}

fn cmd_destinations(settings: &Settings) -> anyhow::Result<()> {
    if settings.destinations.is_empty() {
        println!("no destinations configured");
        return Ok(());
    }

    for dest in &settings.destinations {
        let state = if dest.enabled {
            style("enabled").green()
        } else {
            style("disabled").dim()
        };
        let target = match &dest.kind {
            DestinationKind::Directory { path } => format!("directory {}", path.display()),
        };
        let mut line = format!("{:<16} {:<9} {}", dest.id, state, target);
        if dest.skip_duplicates {
            line.push_str(&format!("  {}", style("(skips duplicates)").dim()));
        }
        println!("{line}");
    }
    Ok(())
}
