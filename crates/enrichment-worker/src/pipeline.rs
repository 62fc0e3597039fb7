//! Document Pipeline
//!
//! Drives each document through download, extraction and analysis. Every
//! transition is persisted with a compare-and-set on the previous state,
//! and transitions of one document are serialized by a per-document lock,
//! so two workers never download the same document at once.
//!
//! A failed attempt is recorded on the document and the stage is retried by
//! re-entering its in-flight state, up to the configured attempt limit.
//! Failures never touch the owning notice.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use tenderwatch_common::ai::DocumentAnalyzer;
use tenderwatch_common::config::PipelineConfig;
use tenderwatch_common::db::Store;
use tenderwatch_common::errors::{AppError, Result};
use tenderwatch_common::locks::KeyedLocks;
use tenderwatch_common::metrics::{self, ExternalCallTimer};
use tenderwatch_common::model::{DocumentState, DownloadedContent, NoticeDocument, Stage};
use tenderwatch_common::retry::with_timeout;

use crate::errors::PipelineError;
use crate::extract::extract_text;

/// Raw bytes fetched for a document.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl Fetched {
    pub fn sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<Fetched, PipelineError>;
}

/// Plain HTTP GET with a size cap.
pub struct HttpDownloader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpDownloader {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tenderwatch-enrichment/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            max_bytes: config.max_document_bytes,
        })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> std::result::Result<Fetched, PipelineError> {
        let failed = |message: String| PipelineError::Download {
            url: url.to_string(),
            message,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failed(e.to_string()))?;

        if let Some(size) = response.content_length().filter(|s| *s > self.max_bytes) {
            return Err(PipelineError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| failed(e.to_string()))? {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > self.max_bytes {
                return Err(PipelineError::TooLarge {
                    size: bytes.len() as u64,
                    limit: self.max_bytes,
                });
            }
        }

        Ok(Fetched { bytes, content_type })
    }
}

/// How a stage run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRun {
    Completed,
    /// Attempts exhausted or a permanent failure; the document rests in the
    /// stage's failed state.
    Failed,
}

/// Outcome of one `advance` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdvanceSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// States `run_once` picks up.
pub const PENDING_STATES: [DocumentState; 3] = [
    DocumentState::Discovered,
    DocumentState::Downloaded,
    DocumentState::Extracted,
];

const IN_FLIGHT_STATES: [DocumentState; 3] = [
    DocumentState::Downloading,
    DocumentState::Extracting,
    DocumentState::Analyzing,
];

#[derive(Clone)]
pub struct DocumentPipeline {
    store: Arc<dyn Store>,
    downloader: Arc<dyn Downloader>,
    analyzer: Arc<dyn DocumentAnalyzer>,
    locks: Arc<KeyedLocks<Uuid>>,
    config: PipelineConfig,
}

impl DocumentPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        downloader: Arc<dyn Downloader>,
        analyzer: Arc<dyn DocumentAnalyzer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            downloader,
            analyzer,
            locks: Arc::new(KeyedLocks::new()),
            config,
        }
    }

    /// Advance one batch of pending documents concurrently.
    pub async fn run_once(&self) -> Result<AdvanceSummary> {
        let documents = self
            .store
            .documents_in_states(&PENDING_STATES, self.config.batch_size)
            .await?;

        if documents.is_empty() {
            debug!("No pending documents");
            return Ok(AdvanceSummary::default());
        }
        info!(count = documents.len(), "Advancing pending documents");

        let mut summary = AdvanceSummary::default();
        let mut runs = stream::iter(documents)
            .map(|doc| async move { (doc.id, self.advance(doc.id).await) })
            .buffer_unordered(self.config.concurrency.max(1));

        while let Some((id, result)) = runs.next().await {
            match result {
                Ok(StageRun::Completed) => summary.completed += 1,
                Ok(StageRun::Failed) => summary.failed += 1,
                Err(e) if e.is_conflict() => {
                    debug!(document_id = %id, error = %e, "Document moved by another worker, skipped");
                    summary.skipped += 1;
                }
                Err(e) => {
                    warn!(document_id = %id, error = %e, "Document could not be advanced");
                    summary.skipped += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Run every remaining stage of one document. A document resting in a
    /// failed state gets its stage re-entered.
    #[instrument(skip(self))]
    pub async fn advance(&self, document_id: Uuid) -> Result<StageRun> {
        let _guard = self.locks.lock(document_id).await;
        let mut doc = self.load(document_id).await?;
        let mut content: Option<Fetched> = None;

        while let Some(stage) = doc.state.next_stage() {
            if self.run_stage(&mut doc, stage, false, &mut content).await? == StageRun::Failed {
                return Ok(StageRun::Failed);
            }
        }

        Ok(StageRun::Completed)
    }

    /// Explicitly re-download a settled document. Only the download stage
    /// runs; `advance` picks up from there.
    #[instrument(skip(self))]
    pub async fn redownload(&self, document_id: Uuid) -> Result<NoticeDocument> {
        let _guard = self.locks.lock(document_id).await;
        let mut doc = self.load(document_id).await?;

        let previous = doc.state;
        doc.restart_download(Utc::now())?;
        self.persist(&doc, previous).await?;

        let mut content = None;
        self.run_stage(&mut doc, Stage::Download, true, &mut content).await?;
        Ok(doc)
    }

    /// Fail documents stuck in flight since before `older_than` ago, e.g.
    /// after a crash. They become eligible for an explicit retry.
    pub async fn recover_stalled(&self, older_than: ChronoDuration) -> Result<usize> {
        let cutoff = Utc::now() - older_than;
        let stalled = self
            .store
            .documents_in_states(&IN_FLIGHT_STATES, self.config.batch_size)
            .await?;

        let mut recovered = 0;
        for doc in stalled.into_iter().filter(|d| d.updated_at < cutoff) {
            let _guard = self.locks.lock(doc.id).await;
            let mut doc = self.load(doc.id).await?;
            if !doc.state.is_in_flight() || doc.updated_at >= cutoff {
                continue;
            }
            let previous = doc.state;
            doc.fail("interrupted", Utc::now())?;
            match self.persist(&doc, previous).await {
                Ok(()) => recovered += 1,
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e),
            }
        }

        if recovered > 0 {
            warn!(recovered, "Recovered stalled documents");
        }
        Ok(recovered)
    }

    async fn load(&self, document_id: Uuid) -> Result<NoticeDocument> {
        self.store
            .find_document(document_id)
            .await?
            .ok_or_else(|| AppError::not_found("document", document_id))
    }

    async fn persist(&self, doc: &NoticeDocument, expected: DocumentState) -> Result<()> {
        self.store.update_document(doc, expected).await?;
        metrics::record_document_transition(doc.state.as_str());
        debug!(document_id = %doc.id, from = %expected, to = %doc.state, "Document transition");
        Ok(())
    }

    async fn run_stage(
        &self,
        doc: &mut NoticeDocument,
        stage: Stage,
        begun: bool,
        content: &mut Option<Fetched>,
    ) -> Result<StageRun> {
        let policy = self.config.retry_policy();
        let mut backoff = policy.backoff();
        let mut begun = begun;

        loop {
            if !begun {
                let previous = doc.state;
                doc.begin(stage, Utc::now())?;
                self.persist(doc, previous).await?;
            }
            begun = false;

            match self.attempt(doc, stage, content).await {
                Ok(()) => {
                    self.persist(doc, stage.in_flight()).await?;
                    return Ok(StageRun::Completed);
                }
                Err(e) => {
                    doc.fail(e.to_string(), Utc::now())?;
                    self.persist(doc, stage.in_flight()).await?;

                    let exhausted = doc.attempt_count as u32 >= policy.max_attempts;
                    if !e.is_retryable() || exhausted {
                        warn!(
                            document_id = %doc.id,
                            stage = %stage,
                            attempts = doc.attempt_count,
                            error = %e,
                            "Document stage failed"
                        );
                        return Ok(StageRun::Failed);
                    }

                    let delay = backoff.next_backoff().unwrap_or(policy.max_backoff);
                    debug!(document_id = %doc.id, stage = %stage, ?delay, error = %e, "Retrying document stage");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One external attempt. On success `doc` carries the completed state.
    async fn attempt(&self, doc: &mut NoticeDocument, stage: Stage, content: &mut Option<Fetched>) -> Result<()> {
        let now = Utc::now();
        match stage {
            Stage::Download => {
                let fetched = self.download(&doc.url).await?;
                let outcome = doc.complete_download(
                    DownloadedContent {
                        sha256: fetched.sha256(),
                        content_type: fetched.content_type.clone(),
                        file_size: fetched.bytes.len() as i64,
                    },
                    now,
                )?;
                info!(document_id = %doc.id, ?outcome, size = fetched.bytes.len(), "Document downloaded");
                *content = Some(fetched);
                Ok(())
            }

            Stage::Extraction => {
                if doc.extracted_text.is_some() {
                    debug!(document_id = %doc.id, "Content unchanged, keeping extracted text");
                    return doc.complete_extraction(None, now);
                }

                let fetched = match content.take() {
                    Some(fetched) => fetched,
                    None => self.refetch(doc).await?,
                };
                let text = self.extract(&fetched).await?;
                *content = Some(fetched);
                doc.complete_extraction(Some(text), now)
            }

            Stage::Analysis => {
                if doc.ai_analysis.is_some() {
                    debug!(document_id = %doc.id, "Content unchanged, keeping analysis");
                    return doc.complete_analysis(None, now);
                }

                let text = doc
                    .extracted_text
                    .clone()
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| AppError::from(PipelineError::NoText))?;

                let timer = ExternalCallTimer::start("analyze");
                let result = with_timeout("analyze", self.config.analysis_timeout(), self.analyzer.analyze(&text)).await;
                timer.finish(result.is_ok());

                doc.complete_analysis(Some(result?), Utc::now())
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Fetched> {
        let timer = ExternalCallTimer::start("download");
        let result = with_timeout("download", self.config.download_timeout(), async {
            self.downloader.fetch(url).await.map_err(AppError::from)
        })
        .await;
        timer.finish(result.is_ok());
        result
    }

    /// Bytes for a document downloaded by an earlier run. They must still
    /// match the recorded checksum.
    async fn refetch(&self, doc: &NoticeDocument) -> Result<Fetched> {
        let fetched = self.download(&doc.url).await?;
        let actual = fetched.sha256();
        match doc.sha256.as_deref() {
            Some(expected) if expected != actual => Err(PipelineError::ContentChanged {
                expected: expected.to_string(),
                actual,
            }
            .into()),
            _ => Ok(fetched),
        }
    }

    async fn extract(&self, fetched: &Fetched) -> Result<String> {
        let bytes = fetched.bytes.clone();
        let content_type = fetched.content_type.clone();

        let timer = ExternalCallTimer::start("extract");
        let result = with_timeout("extract", self.config.extraction_timeout(), async move {
            tokio::task::spawn_blocking(move || extract_text(&bytes, content_type.as_deref()))
                .await
                .map_err(|e| AppError::Internal {
                    message: format!("extraction task failed: {}", e),
                })?
                .map_err(AppError::from)
        })
        .await;
        timer.finish(result.is_ok());
        result
    }
}

/// Wait between polls that found nothing.
pub fn idle_delay(config: &PipelineConfig) -> Duration {
    Duration::from_secs(config.poll_interval_secs.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderwatch_common::ai::MockAi;
    use tenderwatch_common::db::MemoryStore;

    struct StaticDownloader(&'static [u8]);

    #[async_trait]
    impl Downloader for StaticDownloader {
        async fn fetch(&self, _url: &str) -> std::result::Result<Fetched, PipelineError> {
            Ok(Fetched {
                bytes: self.0.to_vec(),
                content_type: Some("text/plain".into()),
            })
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            ..PipelineConfig::default()
        }
    }

    async fn seeded(store: &MemoryStore) -> NoticeDocument {
        let doc = NoticeDocument::discovered(
            Uuid::new_v4(),
            "https://example.org/notice.txt".into(),
            None,
            None,
            Utc::now(),
        );
        store.insert_document_if_absent(&doc).await.unwrap();
        doc
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        let fetched = Fetched {
            bytes: b"abc".to_vec(),
            content_type: None,
        };
        assert_eq!(
            fetched.sha256(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_advance_runs_every_stage() {
        let store = Arc::new(MemoryStore::new());
        let doc = seeded(&store).await;
        let ai = Arc::new(MockAi::new());
        let pipeline = DocumentPipeline::new(store.clone(), Arc::new(StaticDownloader(b"Road works in Namur")), ai.clone(), config());

        assert_eq!(pipeline.advance(doc.id).await.unwrap(), StageRun::Completed);

        let done = store.find_document(doc.id).await.unwrap().unwrap();
        assert_eq!(done.state, DocumentState::Analyzed);
        assert_eq!(done.extracted_text.as_deref(), Some("Road works in Namur"));
        assert_eq!(done.ai_analysis.as_deref(), Some("Analysis of 4 words"));
        assert_eq!(done.file_size, Some(19));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let doc = seeded(&store).await;
        let pipeline = DocumentPipeline::new(store.clone(), Arc::new(StaticDownloader(b"   ")), Arc::new(MockAi::new()), config());

        assert_eq!(pipeline.advance(doc.id).await.unwrap(), StageRun::Failed);
        let failed = store.find_document(doc.id).await.unwrap().unwrap();
        assert_eq!(failed.state, DocumentState::ExtractionFailed);
        assert_eq!(failed.attempt_count, 1);
        assert!(failed.last_error.is_some());
    }

    #[tokio::test]
    async fn test_stale_expected_state_is_a_conflict() {
        let store = Arc::new(MemoryStore::new());
        let doc = seeded(&store).await;
        let pipeline = DocumentPipeline::new(store.clone(), Arc::new(StaticDownloader(b"x")), Arc::new(MockAi::new()), config());

        let mut moved = doc.clone();
        moved.begin(Stage::Download, Utc::now()).unwrap();
        store.update_document(&moved, DocumentState::Discovered).await.unwrap();

        // Another worker holds it in flight
        let err = pipeline.redownload(doc.id).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_recover_stalled() {
        let store = Arc::new(MemoryStore::new());
        let doc = seeded(&store).await;
        let mut stuck = doc.clone();
        stuck.begin(Stage::Download, Utc::now() - ChronoDuration::hours(2)).unwrap();
        store.update_document(&stuck, DocumentState::Discovered).await.unwrap();

        let pipeline = DocumentPipeline::new(store.clone(), Arc::new(StaticDownloader(b"x")), Arc::new(MockAi::new()), config());
        assert_eq!(pipeline.recover_stalled(ChronoDuration::hours(1)).await.unwrap(), 1);

        let recovered = store.find_document(doc.id).await.unwrap().unwrap();
        assert_eq!(recovered.state, DocumentState::DownloadFailed);
        assert_eq!(recovered.last_error.as_deref(), Some("interrupted"));
    }
}
