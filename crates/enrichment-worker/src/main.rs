//! TenderWatch Enrichment Worker
//!
//! Polls the store for documents waiting on a pipeline stage:
//! 1. Downloads the document and records its checksum
//! 2. Extracts text (PDF, HTML or plain text)
//! 3. Requests an AI analysis of the text
//!
//! Each round also fills missing notice summaries.

use chrono::Duration as ChronoDuration;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tenderwatch_common::ai::create_ai_clients;
use tenderwatch_common::config::{AppConfig, ObservabilityConfig};
use tenderwatch_common::db::{DbPool, Repository, Store};
use tenderwatch_common::metrics::{register_metrics, EXTERNAL_CALL_BUCKETS};
use tenderwatch_common::VERSION;
use tenderwatch_enrichment::pipeline::idle_delay;
use tenderwatch_enrichment::{build_workers, DocumentPipeline, SummaryRefresher};

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
    /// Poll for pending documents until interrupted
    Run,

    /// Advance one batch of pending documents and exit
    Once,

    /// Generate missing notice summaries
    Summaries {
        #[arg(long, default_value = "50")]
        limit: u64,
    },

    /// Re-enter the failed stage of one document
    Retry {
        #[arg(long)]
        document: Uuid,
    },

    /// Download a settled document again
    Redownload {
        #[arg(long)]
        document: Uuid,
    },

    /// Fail documents stuck in flight, e.g. after a crash
    RecoverStalled {
        #[arg(long, default_value = "30")]
        older_than_minutes: i64,
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

/// Poll until ctrl-c. Repeated failed rounds open a circuit breaker.
async fn run(pipeline: DocumentPipeline, refresher: SummaryRefresher, config: &AppConfig) -> anyhow::Result<()> {
    let mut consecutive_failures = 0;
    const MAX_FAILURES: u32 = 5;
    const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);

    let idle = idle_delay(&config.pipeline);
    let summary_limit = config.pipeline.batch_size;

    info!("Enrichment worker ready, starting polling...");

    loop {
        if consecutive_failures >= MAX_FAILURES {
            warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        let round = async {
            let documents = pipeline.run_once().await?;
            let summaries = refresher.refresh(summary_limit).await?;
            Ok::<_, tenderwatch_common::AppError>((documents, summaries))
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            result = round => {
                match result {
                    Ok((documents, summaries)) => {
                        consecutive_failures = 0;
                        let busy = documents.completed + documents.failed + summaries.summarized + summaries.failed > 0;
                        if !busy {
                            tokio::select! {
                                _ = tokio::signal::ctrl_c() => {
                                    info!("Shutdown signal received");
                                    break;
                                }
                                _ = tokio::time::sleep(idle) => {}
                            }
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, failures = consecutive_failures, "Polling round failed");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    info!("Enrichment worker shutting down");
    Ok(())
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
    }?;

    init_tracing(&config.observability);
    info!("Starting TenderWatch Enrichment Worker v{}", VERSION);

    install_metrics(&config.observability)?;
    let store = connect(&config).await?;
    let ai = create_ai_clients(&config.ai)?;
    let (pipeline, refresher) = build_workers(&config, store, ai)?;

    match cli.command {
        Commands::Run => run(pipeline, refresher, &config).await?,

        Commands::Once => {
            let summary = pipeline.run_once().await?;
            println!(
                "completed {}\tfailed {}\tskipped {}",
                summary.completed, summary.failed, summary.skipped
            );
        }

        Commands::Summaries { limit } => {
            let report = refresher.refresh(limit).await?;
            println!(
                "summarized {}\tstale {}\tfailed {}",
                report.summarized, report.stale, report.failed
            );
        }

        Commands::Retry { document } => {
            let outcome = pipeline.advance(document).await?;
            println!("{}\t{:?}", document, outcome);
        }

        Commands::Redownload { document } => {
            let doc = pipeline.redownload(document).await?;
            println!(
                "{}\t{}\t{}",
                doc.id,
                doc.state,
                doc.sha256.as_deref().unwrap_or("-")
            );
        }

        Commands::RecoverStalled { older_than_minutes } => {
            let recovered = pipeline
                .recover_stalled(ChronoDuration::minutes(older_than_minutes))
                .await?;
            println!("recovered {}", recovered);
        }
    }

    Ok(())
}
