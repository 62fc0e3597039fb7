//! TenderWatch Ingestion Service
//!
//! Operational entry point:
//! 1. `import` ingests one connector batch inside an import run
//! 2. `stale-runs` lists runs left open by a crashed process
//! 3. `rematch` re-evaluates one notice against the current watchlists

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tenderwatch_common::ai::{create_ai_clients, MockAi, Translator};
use tenderwatch_common::config::{AppConfig, ObservabilityConfig};
use tenderwatch_common::db::{DbPool, MemoryStore, Repository, Store};
use tenderwatch_common::metrics::{register_metrics, EXTERNAL_CALL_BUCKETS};
use tenderwatch_common::queue::{MemorySignalSink, SignalSink, SqsSignalSink};
use tenderwatch_common::VERSION;
use tenderwatch_ingestion::input::{parse_criteria, read_batch_file};
use tenderwatch_ingestion::{build_processor, ImportRunTracker, IngestionError};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to a config file (defaults to config/ and APP__ variables)
    #[arg(short, long, env = "TENDERWATCH_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a batch of normalized payloads for one source
    Import {
        /// Source the batch was fetched from (e.g. "TED")
        #[arg(long)]
        source: String,

        /// JSON array or JSON Lines file of payloads
        #[arg(long)]
        file: PathBuf,

        /// Search criteria the connector used, as inline JSON
        #[arg(long)]
        criteria: Option<String>,

        /// Run against an in-memory store; nothing is persisted or sent
        #[arg(long)]
        dry_run: bool,
    },

    /// List import runs still open after the given age
    StaleRuns {
        #[arg(long, default_value = "6")]
        older_than_hours: i64,
    },

    /// Re-match one notice against the enabled watchlists
    Rematch {
        #[arg(long)]
        notice: Uuid,
    },
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_metrics(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port == 0 {
        return Ok(());
    }
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), EXTERNAL_CALL_BUCKETS)?
        .install()?;
    register_metrics();
    info!(port = config.metrics_port, "Prometheus exporter listening");
    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    info!("Connecting to database...");
    let pool = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        pool.migrate().await?;
    }
    Ok(Arc::new(Repository::new(pool)))
}

async fn signal_sink(config: &AppConfig) -> anyhow::Result<Arc<dyn SignalSink>> {
    Ok(Arc::new(SqsSignalSink::new(&config.queue).await?))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .map_err(IngestionError::from)?;

    init_tracing(&config.observability);
    info!("Starting TenderWatch Ingestion v{}", VERSION);

    match cli.command {
        Commands::Import {
            source,
            file,
            criteria,
            dry_run,
        } => {
            let items = read_batch_file(&file)?;
            let criteria = parse_criteria(criteria.as_deref())?;

            let (store, signals, translator): (Arc<dyn Store>, Arc<dyn SignalSink>, Arc<dyn Translator>) = if dry_run {
                info!("Dry run: using in-memory store and signal sink");
                (
                    Arc::new(MemoryStore::new()),
                    Arc::new(MemorySignalSink::new()),
                    Arc::new(MockAi::new()),
                )
            } else {
                install_metrics(&config.observability)?;
                let ai = create_ai_clients(&config.ai)?;
                (connect(&config).await?, signal_sink(&config).await?, ai.translator)
            };

            let processor = build_processor(&config, store, signals, translator);
            let run = processor.ingest_batch(&source, criteria, items).await.map_err(|e| {
                error!(error = %e, "Import failed");
                e
            })?;

            println!("{}", serde_json::to_string_pretty(&run)?);
        }

        Commands::StaleRuns { older_than_hours } => {
            let tracker = ImportRunTracker::new(connect(&config).await?);
            let stale = tracker
                .stale_runs(Duration::hours(older_than_hours), Utc::now())
                .await?;

            info!(count = stale.len(), "Stale import runs");
            for run in &stale {
                println!(
                    "{}\t{}\tstarted {}\tprocessed {}",
                    run.id,
                    run.source,
                    run.started_at.to_rfc3339(),
                    run.processed()
                );
            }
        }

        Commands::Rematch { notice } => {
            install_metrics(&config.observability)?;
            let ai = create_ai_clients(&config.ai)?;
            let processor = build_processor(
                &config,
                connect(&config).await?,
                signal_sink(&config).await?,
                ai.translator,
            );

            let results = processor.matcher().rematch(notice).await?;
            for result in &results {
                println!(
                    "{}\t{}\t{}\t{:?}",
                    result.scored.watchlist_id,
                    result.scored.relevance_score,
                    result.scored.matched_on,
                    result.upsert
                );
            }
        }
    }

    Ok(())
}
