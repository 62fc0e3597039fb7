//! Shared fixtures for the ingestion integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use tenderwatch_common::ai::MockAi;
use tenderwatch_common::config::{IngestionConfig, MatchingConfig};
use tenderwatch_common::db::{MemoryStore, Store};
use tenderwatch_common::errors::{AppError, Result};
use tenderwatch_common::model::{
    CanonicalNotice, DocumentState, IdentityKey, ImportRun, MatchUpsert, NormalizedPayload, NoticeDetail,
    NoticeDocument, NoticeLot, TranslationEntry, Watchlist, WatchlistMatch,
};
use tenderwatch_common::queue::MemorySignalSink;
use tenderwatch_common::retry::RetryPolicy;
use tenderwatch_ingestion::{IngestionProcessor, MatchingEngine, TranslationGateway};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub signals: Arc<MemorySignalSink>,
    pub ai: Arc<MockAi>,
    pub processor: IngestionProcessor,
}

pub fn harness_with(ai: MockAi) -> Harness {
    let store = Arc::new(MemoryStore::new());
    harness_on(store.clone(), store, ai)
}

pub fn harness() -> Harness {
    harness_with(MockAi::new())
}

/// Processor writing through `backend` while tests inspect `store`.
pub fn harness_on(store: Arc<MemoryStore>, backend: Arc<dyn Store>, ai: MockAi) -> Harness {
    let signals = Arc::new(MemorySignalSink::new());
    let ai = Arc::new(ai);
    let gateway = TranslationGateway::new(
        backend.clone(),
        ai.clone(),
        vec!["fr".into(), "nl".into(), "en".into()],
        RetryPolicy::immediate(2),
        Duration::from_millis(100),
    );
    let matcher = MatchingEngine::new(backend.clone(), gateway, signals.clone(), MatchingConfig::default());
    let processor = IngestionProcessor::new(backend, signals.clone(), matcher, IngestionConfig::default());
    Harness {
        store,
        signals,
        ai,
        processor,
    }
}

pub fn road_works() -> NormalizedPayload {
    NormalizedPayload {
        source: "TED".into(),
        source_id: "1".into(),
        title: Some("Road works".into()),
        cpv_main: Some("45233000".into()),
        country: Some("BE".into()),
        estimated_value: Some(500_000.0),
        ..Default::default()
    }
}

pub fn watchlist(name: &str) -> Watchlist {
    Watchlist::new(name, Utc::now())
}

pub fn set(items: &[&str]) -> std::collections::BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Delegates to a `MemoryStore` with scripted interference: a competing
/// writer that commits right before the first notice save, and detail
/// writes that fail a set number of times.
pub struct ScriptedStore {
    inner: Arc<MemoryStore>,
    rival: Option<NormalizedPayload>,
    raced: AtomicBool,
    detail_failures: AtomicU32,
}

impl ScriptedStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            rival: None,
            raced: AtomicBool::new(false),
            detail_failures: AtomicU32::new(0),
        }
    }

    /// The processor loses the version race to `rival` exactly once.
    pub fn racing(inner: Arc<MemoryStore>, rival: NormalizedPayload) -> Self {
        Self {
            rival: Some(rival),
            ..Self::new(inner)
        }
    }

    /// The next `n` notice detail writes fail after the notice is saved.
    pub fn failing_detail_writes(inner: Arc<MemoryStore>, n: u32) -> Self {
        let store = Self::new(inner);
        store.detail_failures.store(n, Ordering::SeqCst);
        store
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn find_notice(&self, key: &IdentityKey) -> Result<Option<CanonicalNotice>> {
        self.inner.find_notice(key).await
    }

    async fn get_notice(&self, id: Uuid) -> Result<Option<CanonicalNotice>> {
        self.inner.get_notice(id).await
    }

    async fn save_notice(&self, notice: &CanonicalNotice, expected_version: Option<i64>) -> Result<()> {
        if let Some(rival) = &self.rival {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let key = rival.check()?;
                let existing = self.inner.find_notice(&key).await?;
                let expected = existing.as_ref().map(|n| n.version);
                let merged = tenderwatch_ingestion::merge(existing, rival, Utc::now())?;
                self.inner.save_notice(&merged.notice, expected).await?;
            }
        }
        self.inner.save_notice(notice, expected_version).await
    }

    async fn delete_notice(&self, id: Uuid) -> Result<bool> {
        self.inner.delete_notice(id).await
    }

    async fn notices_missing_summary(&self, limit: u64) -> Result<Vec<CanonicalNotice>> {
        self.inner.notices_missing_summary(limit).await
    }

    async fn store_notice_summary(
        &self,
        id: Uuid,
        expected_version: i64,
        summary: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .store_notice_summary(id, expected_version, summary, generated_at)
            .await
    }

    async fn upsert_notice_detail(&self, detail: &NoticeDetail) -> Result<()> {
        let failing = self
            .detail_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::DatabaseConnection {
                message: "connection reset by peer".into(),
            });
        }
        self.inner.upsert_notice_detail(detail).await
    }

    async fn find_notice_detail(&self, notice_id: Uuid, source: &str) -> Result<Option<NoticeDetail>> {
        self.inner.find_notice_detail(notice_id, source).await
    }

    async fn list_lots(&self, notice_id: Uuid) -> Result<Vec<NoticeLot>> {
        self.inner.list_lots(notice_id).await
    }

    async fn upsert_lot(&self, lot: &NoticeLot) -> Result<()> {
        self.inner.upsert_lot(lot).await
    }

    async fn insert_document_if_absent(&self, document: &NoticeDocument) -> Result<bool> {
        self.inner.insert_document_if_absent(document).await
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<NoticeDocument>> {
        self.inner.find_document(id).await
    }

    async fn list_documents(&self, notice_id: Uuid) -> Result<Vec<NoticeDocument>> {
        self.inner.list_documents(notice_id).await
    }

    async fn documents_in_states(&self, states: &[DocumentState], limit: u64) -> Result<Vec<NoticeDocument>> {
        self.inner.documents_in_states(states, limit).await
    }

    async fn update_document(&self, document: &NoticeDocument, expected_state: DocumentState) -> Result<()> {
        self.inner.update_document(document, expected_state).await
    }

    async fn enabled_watchlists(&self) -> Result<Vec<Watchlist>> {
        self.inner.enabled_watchlists().await
    }

    async fn upsert_match(&self, m: &WatchlistMatch) -> Result<MatchUpsert> {
        self.inner.upsert_match(m).await
    }

    async fn find_match(&self, watchlist_id: Uuid, notice_id: Uuid) -> Result<Option<WatchlistMatch>> {
        self.inner.find_match(watchlist_id, notice_id).await
    }

    async fn delete_match(&self, watchlist_id: Uuid, notice_id: Uuid) -> Result<bool> {
        self.inner.delete_match(watchlist_id, notice_id).await
    }

    async fn insert_import_run(&self, run: &ImportRun) -> Result<()> {
        self.inner.insert_import_run(run).await
    }

    async fn complete_import_run(&self, run: &ImportRun) -> Result<()> {
        self.inner.complete_import_run(run).await
    }

    async fn find_import_run(&self, id: Uuid) -> Result<Option<ImportRun>> {
        self.inner.find_import_run(id).await
    }

    async fn open_import_runs_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ImportRun>> {
        self.inner.open_import_runs_before(cutoff).await
    }

    async fn find_translation(&self, key: &str) -> Result<Option<TranslationEntry>> {
        self.inner.find_translation(key).await
    }

    async fn insert_translation_if_absent(&self, entry: &TranslationEntry) -> Result<bool> {
        self.inner.insert_translation_if_absent(entry).await
    }

    async fn put_curated_translation(&self, entry: &TranslationEntry) -> Result<()> {
        self.inner.put_curated_translation(entry).await
    }
}
