//! TenderWatch Enrichment Worker
//!
//! Best-effort enrichment that never blocks ingestion:
//! - The document pipeline: download, text extraction and AI analysis of
//!   documents referenced by notices (`pipeline`, `extract`)
//! - The notice summary refresher (`summary`)

pub mod errors;
pub mod extract;
pub mod pipeline;
pub mod summary;

pub use errors::PipelineError;
pub use pipeline::{AdvanceSummary, DocumentPipeline, Downloader, Fetched, HttpDownloader, StageRun};
pub use summary::{SummaryReport, SummaryRefresher};

use std::sync::Arc;
use std::time::Duration;
use tenderwatch_common::ai::AiClients;
use tenderwatch_common::config::AppConfig;
use tenderwatch_common::db::Store;
use tenderwatch_common::errors::Result;

/// Wire the pipeline and the summary refresher from configuration.
pub fn build_workers(
    config: &AppConfig,
    store: Arc<dyn Store>,
    ai: AiClients,
) -> Result<(DocumentPipeline, SummaryRefresher)> {
    let downloader = Arc::new(HttpDownloader::new(&config.pipeline)?);
    let pipeline = DocumentPipeline::new(store.clone(), downloader, ai.analyzer, config.pipeline.clone());
    let refresher = SummaryRefresher::new(
        store,
        ai.summarizer,
        config.pipeline.retry_policy(),
        Duration::from_secs(config.ai.timeout_secs),
    );
    Ok((pipeline, refresher))
}
