//! fieldsync CLI - Command line interface for the offline sync queue.
//!
//! Captures records into the local queue, inspects its state, and drives
//! sync runs against the configured backend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fieldsync_common::{RecordId, RecordType};
use fieldsync_storage::QueuedRecord;
use fieldsync_sync::{Connectivity, EngineConfig, SyncEngine};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "fieldsync - Offline-first field data sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a captured record.
    Enqueue {
        /// Record type: farmer, activity, visit, photo or batch.
        #[arg(short = 't', long = "type")]
        record_type: String,

        /// Inline JSON payload.
        #[arg(short, long, conflicts_with = "file")]
        payload: Option<String>,

        /// File holding the JSON payload.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// List queued records, oldest first.
    List,

    /// Show connectivity, queue and last sync.
    Status,

    /// Probe the backend and run one sync pass.
    Sync,

    /// Retry failed records.
    Retry {
        /// Record to retry.
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        id: Option<String>,

        /// Retry every failed record.
        #[arg(long)]
        all: bool,
    },

    /// Remove a record from the queue without delivering it.
    Discard {
        /// Record to discard.
        #[arg(long)]
        id: String,
    },

    /// Delete every queued record.
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },

    /// Show recent sync runs, most recent first.
    History,

    /// Keep syncing in the background until interrupted.
    Run,

    /// Write a default configuration file.
    InitConfig {
        /// Destination path.
        #[arg(short, long, default_value = "fieldsync.json")]
        output: PathBuf,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::InitConfig { output, force } = &cli.command {
        return cmd_init_config(output, *force);
    }

    let config = load_config(cli.config.as_deref())?;
    let engine = SyncEngine::open(&config)
        .await
        .with_context(|| format!("Failed to open queue at {}", config.database_path.display()))?;

    match cli.command {
        Commands::Enqueue {
            record_type,
            payload,
            file,
        } => cmd_enqueue(&engine, &record_type, payload.as_deref(), file.as_deref()).await,

        Commands::List => cmd_list(&engine).await,

        Commands::Status => cmd_status(&engine).await,

        Commands::Sync => cmd_sync(&engine).await,

        Commands::Retry { id, all } => cmd_retry(&engine, id.as_deref(), all).await,

        Commands::Discard { id } => cmd_discard(&engine, &id).await,

        Commands::Clear { yes } => cmd_clear(&engine, yes).await,

        Commands::History => cmd_history(&engine).await,

        Commands::Run => cmd_run(&engine).await,

        Commands::InitConfig { .. } => Ok(()),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn parse_id(id: &str) -> Result<RecordId> {
    RecordId::new(id).context("Invalid record id")
}

/// Write the default configuration.
fn cmd_init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists; pass --force to overwrite",
            output.display()
        );
    }

    EngineConfig::default()
        .save(output)
        .context("Failed to write config")?;

    println!("Config written to {}", output.display());
    Ok(())
}

/// Queue one record.
async fn cmd_enqueue(
    engine: &SyncEngine,
    record_type: &str,
    payload: Option<&str>,
    file: Option<&Path>,
) -> Result<()> {
    let raw = match (payload, file) {
        (Some(payload), _) => payload.to_string(),
        (None, Some(file)) => std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?,
        (None, None) => anyhow::bail!("Provide --payload or --file"),
    };
    let payload: serde_json::Value =
        serde_json::from_str(&raw).context("Payload is not valid JSON")?;

    let record_type = RecordType::from(record_type);
    if !record_type.is_known() {
        // Queued anyway; delivery reports the mismatch.
        warn!("Record type '{}' has no known endpoint", record_type);
    }

    let id = engine
        .enqueue(record_type, payload)
        .await
        .context("Failed to queue record")?;

    println!("Queued {}", id);
    Ok(())
}

fn print_record(record: &QueuedRecord) {
    println!(
        "{}  {:<10} {:<9} retries={} {} bytes  {}",
        record.id,
        record.record_type.as_str(),
        record.status.as_str(),
        record.retry_count,
        record.approx_size,
        record.created_at.format("%Y-%m-%d %H:%M:%S"),
    );
    if let Some(error) = &record.last_error {
        println!("    last error: {}", error);
    }
}

/// List queued records.
async fn cmd_list(engine: &SyncEngine) -> Result<()> {
    let records = engine.records().await.context("Failed to read queue")?;

    if records.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    for record in &records {
        print_record(record);
    }
    println!("\n{} records queued", records.len());
    Ok(())
}

/// Show the status line.
async fn cmd_status(engine: &SyncEngine) -> Result<()> {
    engine.refresh_connectivity().await;
    let status = engine.status().await.context("Failed to read status")?;

    println!("{}", status);
    if status.needs_attention() {
        println!("Some records failed; run `fieldsync retry --all` to try them again.");
    }
    Ok(())
}

/// Run one pass now.
async fn cmd_sync(engine: &SyncEngine) -> Result<()> {
    if engine.refresh_connectivity().await == Connectivity::Offline {
        let pending = engine.pending_count().await?;
        println!("Backend unreachable; {} records remain queued", pending);
        return Ok(());
    }

    match engine.sync_now().await.context("Sync run failed")? {
        Some(report) if report.total == 0 => println!("Nothing to sync"),
        Some(report) => {
            println!(
                "Delivered {} of {} records in {:?}",
                report.delivered, report.total, report.duration
            );
            if report.failed > 0 {
                println!("  Failed: {}", report.failed);
            }
            if report.unsupported > 0 {
                println!("  Without endpoint: {}", report.unsupported);
            }
            if let Some(error) = &report.last_error {
                println!("  Last error: {}", error);
            }
        }
        None => println!("Another sync run is in progress"),
    }
    Ok(())
}

/// Manually retry failed records.
async fn cmd_retry(engine: &SyncEngine, id: Option<&str>, all: bool) -> Result<()> {
    if all {
        let count = engine.retry_all_failed().await?;
        println!("{} records queued for retry", count);
        return Ok(());
    }

    let Some(id) = id else {
        anyhow::bail!("Provide --id or --all");
    };
    let id = parse_id(id)?;
    if engine.retry_item(&id).await.context("Failed to retry record")? {
        println!("Record {} queued for retry", id);
    } else {
        println!("Record {} has not failed; nothing to retry", id);
    }
    Ok(())
}

/// Drop a record from the queue.
async fn cmd_discard(engine: &SyncEngine, id: &str) -> Result<()> {
    let id = parse_id(id)?;
    engine.discard(&id).await.context("Failed to discard record")?;
    println!("Record {} discarded", id);
    Ok(())
}

/// Empty the queue.
async fn cmd_clear(engine: &SyncEngine, yes: bool) -> Result<()> {
    let count = engine.pending_count().await?;
    if !yes {
        anyhow::bail!(
            "Refusing to delete {} undelivered records without --yes",
            count
        );
    }

    engine.clear_queue().await.context("Failed to clear queue")?;
    println!("Deleted {} records", count);
    Ok(())
}

/// Print the sync history.
async fn cmd_history(engine: &SyncEngine) -> Result<()> {
    let entries = engine.sync_history().await?;

    if entries.is_empty() {
        println!("No sync runs recorded");
        return Ok(());
    }

    for entry in entries {
        let outcome = if entry.success { "ok" } else { "FAILED" };
        println!(
            "{}  {:<6} delivered={} failed={}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            outcome,
            entry.item_count,
            entry.failed_count
        );
        if let Some(error) = entry.error {
            println!("    {}", error);
        }
    }
    Ok(())
}

/// Run the scheduler until Ctrl-C.
async fn cmd_run(engine: &SyncEngine) -> Result<()> {
    let _subscription = engine.connectivity().on_change(|state| {
        info!("Connectivity changed: {}", state);
    });

    engine.start()?;
    let state = engine.refresh_connectivity().await;
    info!("Watching queue ({}); press Ctrl-C to stop", state);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    engine.shutdown().await;
    let status = engine.status().await?;
    println!("{}", status);
    Ok(())
}
