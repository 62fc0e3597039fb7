//! Ingestion processor
//!
//! Drives one batch from a connector: every payload is resolved, merged
//! under its identity lock, persisted with an optimistic version check,
//! and matched against the enabled watchlists. Items run concurrently up
//! to the worker pool size; no item's failure aborts the batch.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use tenderwatch_common::config::IngestionConfig;
use tenderwatch_common::db::Store;
use tenderwatch_common::errors::{AppError, Result};
use tenderwatch_common::locks::KeyedLocks;
use tenderwatch_common::metrics;
use tenderwatch_common::model::{
    CanonicalNotice, IdentityKey, ImportRun, NormalizedPayload, NoticeDetail, NoticeDocument, Watchlist,
};
use tenderwatch_common::queue::{Signal, SignalSink};

use crate::matching::MatchingEngine;
use crate::merge::{merge, merge_lots, Changeset};
use crate::tracker::{ImportRunTracker, Outcome};

/// A committed merge.
#[derive(Debug, Clone)]
pub struct IngestedNotice {
    pub notice: CanonicalNotice,
    pub changes: Changeset,
    pub created: bool,
    pub documents_discovered: usize,
}

/// One raw item of a batch. Items that failed to deserialize still count
/// against the run.
#[derive(Debug)]
pub struct BatchItem {
    source_id: Option<String>,
    payload: Result<NormalizedPayload>,
}

impl BatchItem {
    pub fn from_json(value: serde_json::Value) -> Self {
        let source_id = value
            .get("source_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let payload = serde_json::from_value(value).map_err(|e| AppError::validation(e.to_string(), None));
        Self { source_id, payload }
    }
}

impl From<NormalizedPayload> for BatchItem {
    fn from(payload: NormalizedPayload) -> Self {
        Self {
            source_id: Some(payload.source_id.clone()),
            payload: Ok(payload),
        }
    }
}

pub struct IngestionProcessor {
    store: Arc<dyn Store>,
    signals: Arc<dyn SignalSink>,
    matcher: MatchingEngine,
    tracker: ImportRunTracker,
    locks: KeyedLocks<IdentityKey>,
    config: IngestionConfig,
}

impl IngestionProcessor {
    pub fn new(
        store: Arc<dyn Store>,
        signals: Arc<dyn SignalSink>,
        matcher: MatchingEngine,
        config: IngestionConfig,
    ) -> Self {
        Self {
            tracker: ImportRunTracker::new(store.clone()),
            store,
            signals,
            matcher,
            locks: KeyedLocks::new(),
            config,
        }
    }

    pub fn tracker(&self) -> &ImportRunTracker {
        &self.tracker
    }

    pub fn matcher(&self) -> &MatchingEngine {
        &self.matcher
    }

    /// Ingest one batch for `source` inside an import run.
    #[instrument(skip(self, search_criteria, items), fields(items = items.len()))]
    pub async fn ingest_batch(
        &self,
        source: &str,
        search_criteria: serde_json::Value,
        items: Vec<BatchItem>,
    ) -> Result<ImportRun> {
        let mut handle = self.tracker.start(source, search_criteria).await?;
        let run_source = handle.source().to_string();

        // One snapshot of the watchlists per batch
        let watchlists = match self.store.enabled_watchlists().await {
            Ok(watchlists) => watchlists,
            Err(e) => {
                warn!(error = %e, "Failed to load watchlists, batch ingested without matching");
                Vec::new()
            }
        };

        info!(
            run_id = %handle.id(),
            source = %run_source,
            watchlists = watchlists.len(),
            "Ingesting batch"
        );

        let mut results = stream::iter(items)
            .map(|item| {
                let watchlists = &watchlists;
                let run_source = &run_source;
                async move {
                    let source_id = item.source_id;
                    let result = match item.payload {
                        Ok(payload) => self.ingest_for_source(run_source, payload, watchlists).await,
                        Err(e) => Err(e),
                    };
                    (source_id, result)
                }
            })
            .buffer_unordered(self.config.worker_pool_size.max(1));

        while let Some((source_id, result)) = results.next().await {
            let outcome = match result {
                Ok(ingested) if ingested.created => Outcome::Created,
                Ok(_) => Outcome::Updated,
                Err(e) => Outcome::errored(source_id, e),
            };
            self.tracker.record_outcome(&mut handle, outcome);
        }

        self.tracker.finish(handle).await
    }

    async fn ingest_for_source(
        &self,
        run_source: &str,
        payload: NormalizedPayload,
        watchlists: &[Watchlist],
    ) -> Result<IngestedNotice> {
        if !payload.source.trim().eq_ignore_ascii_case(run_source) {
            return Err(AppError::validation(
                format!("payload source '{}' does not belong to a {} run", payload.source, run_source),
                Some("source"),
            ));
        }
        self.ingest_one(payload, watchlists).await
    }

    /// Merge and persist one payload, then match it under the same
    /// identity lock.
    pub async fn ingest_one(&self, payload: NormalizedPayload, watchlists: &[Watchlist]) -> Result<IngestedNotice> {
        let key = payload.check()?;
        let guard = self.locks.lock(key.clone()).await;

        let mut conflicts = 0;
        let outcome = loop {
            let existing = self.store.find_notice(&key).await?;
            let expected_version = existing.as_ref().map(|n| n.version);
            let outcome = merge(existing, &payload, Utc::now())?;

            match self.store.save_notice(&outcome.notice, expected_version).await {
                Ok(()) => break outcome,
                Err(e) if e.is_conflict() && conflicts < self.config.conflict_retries => {
                    conflicts += 1;
                    metrics::record_merge_conflict(key.source());
                    debug!(identity = %key, attempt = conflicts, "Merge lost a race, retrying with a fresh read");
                }
                Err(e) => {
                    if e.is_conflict() {
                        metrics::record_merge_conflict(key.source());
                    }
                    return Err(e);
                }
            }
        };

        let notice = outcome.notice;
        let now = Utc::now();

        self.store
            .upsert_notice_detail(&NoticeDetail {
                notice_id: notice.id,
                source: notice.source.clone(),
                raw_payload: notice.raw_payload.clone(),
                fetched_at: payload.fetched_at.unwrap_or(now),
            })
            .await?;

        if !payload.lots.is_empty() {
            let existing = self.store.list_lots(notice.id).await?;
            for lot in merge_lots(notice.id, &existing, &payload.lots) {
                self.store.upsert_lot(&lot).await?;
            }
        }

        let mut documents_discovered = 0;
        for doc in &payload.documents {
            let document = NoticeDocument::discovered(
                notice.id,
                doc.url.trim().to_string(),
                doc.title.clone(),
                doc.lot_ref.clone(),
                now,
            );
            if self.store.insert_document_if_absent(&document).await? {
                documents_discovered += 1;
            }
        }

        metrics::record_notice(&notice.source, outcome.created);

        if outcome.changes.text_changed() {
            self.publish(Signal::Reindex { notice_id: notice.id }).await;
        }

        // Runs on every committed sighting, so an earlier sighting that
        // failed after its save is matched now. Unchanged scores are not
        // rewritten. The identity lock stays held until the match rows
        // reflect this version of the notice.
        if let Err(e) = self.matcher.match_notice(&notice, watchlists).await {
            warn!(notice_id = %notice.id, error = %e, "Matching failed after merge");
        }

        drop(guard);

        debug!(
            identity = %key,
            created = outcome.created,
            changed = ?outcome.changes.fields().collect::<Vec<_>>(),
            documents_discovered,
            "Notice ingested"
        );

        Ok(IngestedNotice {
            notice,
            changes: outcome.changes,
            created: outcome.created,
            documents_discovered,
        })
    }

    async fn publish(&self, signal: Signal) {
        if let Err(e) = self.signals.publish(&signal).await {
            warn!(kind = signal.kind(), error = %e, "Failed to publish signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tenderwatch_common::ai::MockAi;
    use tenderwatch_common::config::MatchingConfig;
    use tenderwatch_common::db::MemoryStore;
    use tenderwatch_common::model::{DocumentRef, DocumentState, LotPayload};
    use tenderwatch_common::queue::MemorySignalSink;
    use tenderwatch_common::retry::RetryPolicy;

    use crate::translation::TranslationGateway;

    fn processor() -> (Arc<MemoryStore>, Arc<MemorySignalSink>, IngestionProcessor) {
        let store = Arc::new(MemoryStore::new());
        let signals = Arc::new(MemorySignalSink::new());
        let gateway = TranslationGateway::new(
            store.clone(),
            Arc::new(MockAi::new()),
            vec!["fr".into()],
            RetryPolicy::immediate(1),
            Duration::from_millis(50),
        );
        let matcher = MatchingEngine::new(store.clone(), gateway, signals.clone(), MatchingConfig::default());
        let processor = IngestionProcessor::new(store.clone(), signals.clone(), matcher, IngestionConfig::default());
        (store, signals, processor)
    }

    fn payload(id: &str) -> NormalizedPayload {
        NormalizedPayload {
            source: "TED".into(),
            source_id: id.into(),
            title: Some(format!("Notice {id}")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_batch_counts_created_updated_and_errors() {
        let (store, _, processor) = processor();
        let items = vec![
            BatchItem::from(payload("1")),
            BatchItem::from(payload("2")),
            BatchItem::from_json(serde_json::json!({"source": "TED", "source_id": "3", "estimated_value": "lots"})),
            BatchItem::from(NormalizedPayload {
                title: None,
                ..payload("4")
            }),
        ];
        let run = processor.ingest_batch("TED", serde_json::Value::Null, items).await.unwrap();
        assert_eq!(run.created_count, 2);
        assert_eq!(run.error_count, 2);
        assert!(run.completed_at.is_some());

        let again = processor
            .ingest_batch("TED", serde_json::Value::Null, vec![BatchItem::from(payload("1"))])
            .await
            .unwrap();
        assert_eq!(again.updated_count, 1);
        assert_eq!(store.notice_count(), 2);
        assert!(run.errors.iter().any(|e| e.source_id.as_deref() == Some("3")));
    }

    #[tokio::test]
    async fn test_foreign_source_rejected() {
        let (_, _, processor) = processor();
        let mut p = payload("1");
        p.source = "BOSA".into();
        let run = processor
            .ingest_batch("TED", serde_json::Value::Null, vec![BatchItem::from(p)])
            .await
            .unwrap();
        assert_eq!(run.error_count, 1);
    }

    #[tokio::test]
    async fn test_documents_and_lots_persisted() {
        let (store, _, processor) = processor();
        let mut p = payload("1");
        p.documents = vec![DocumentRef {
            url: "https://example.org/specifications.pdf".into(),
            title: Some("Specifications".into()),
            lot_ref: None,
        }];
        p.lots = vec![LotPayload {
            lot_ref: "1".into(),
            title: Some("Lot 1".into()),
            ..Default::default()
        }];

        let first = processor.ingest_one(p.clone(), &[]).await.unwrap();
        assert_eq!(first.documents_discovered, 1);

        let second = processor.ingest_one(p, &[]).await.unwrap();
        assert_eq!(second.documents_discovered, 0);

        let docs = store.list_documents(first.notice.id).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].state, DocumentState::Discovered);
        assert_eq!(store.list_lots(first.notice.id).await.unwrap().len(), 1);
        assert!(store
            .find_notice_detail(first.notice.id, "TED")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_reindex_signal_on_text_change_only() {
        let (_, signals, processor) = processor();
        let created = processor.ingest_one(payload("1"), &[]).await.unwrap();
        assert_eq!(signals.reindexed(created.notice.id), 1);

        processor.ingest_one(payload("1"), &[]).await.unwrap();
        assert_eq!(signals.reindexed(created.notice.id), 1);

        let mut amended = payload("1");
        amended.description = Some("Now with a description".into());
        processor.ingest_one(amended, &[]).await.unwrap();
        assert_eq!(signals.reindexed(created.notice.id), 2);
    }
}
