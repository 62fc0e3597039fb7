//! In-process `Store` with the same constraints as the Postgres schema.
//!
//! Used by tests and by dry runs of the ingestion CLI.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::store::Store;
use crate::errors::{AppError, Result};
use crate::model::{
    CanonicalNotice, DocumentState, IdentityKey, ImportRun, MatchUpsert, NoticeDetail,
    NoticeDocument, NoticeLot, TranslationEntry, Watchlist, WatchlistMatch,
};

#[derive(Default)]
struct Tables {
    notices: HashMap<Uuid, CanonicalNotice>,
    details: HashMap<(Uuid, String), NoticeDetail>,
    lots: HashMap<Uuid, NoticeLot>,
    documents: HashMap<Uuid, NoticeDocument>,
    watchlists: HashMap<Uuid, Watchlist>,
    matches: HashMap<(Uuid, Uuid), WatchlistMatch>,
    import_runs: HashMap<Uuid, ImportRun>,
    translations: HashMap<String, TranslationEntry>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Watchlists are owned elsewhere; tests seed them directly.
    pub fn insert_watchlist(&self, watchlist: Watchlist) {
        self.tables().watchlists.insert(watchlist.id, watchlist);
    }

    pub fn delete_watchlist(&self, id: Uuid) -> bool {
        let mut tables = self.tables();
        tables.matches.retain(|(watchlist_id, _), _| *watchlist_id != id);
        tables.watchlists.remove(&id).is_some()
    }

    pub fn notice_count(&self) -> usize {
        self.tables().notices.len()
    }

    pub fn matches(&self) -> Vec<WatchlistMatch> {
        let mut all: Vec<_> = self.tables().matches.values().cloned().collect();
        all.sort_by_key(|m| (m.watchlist_id, m.notice_id));
        all
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_notice(&self, key: &IdentityKey) -> Result<Option<CanonicalNotice>> {
        Ok(self
            .tables()
            .notices
            .values()
            .find(|n| n.source == key.source() && n.source_id == key.source_id())
            .cloned())
    }

    async fn get_notice(&self, id: Uuid) -> Result<Option<CanonicalNotice>> {
        Ok(self.tables().notices.get(&id).cloned())
    }

    async fn save_notice(&self, notice: &CanonicalNotice, expected_version: Option<i64>) -> Result<()> {
        let mut tables = self.tables();
        match expected_version {
            None => {
                let taken = tables
                    .notices
                    .values()
                    .any(|n| n.source == notice.source && n.source_id == notice.source_id);
                if taken || tables.notices.contains_key(&notice.id) {
                    return Err(AppError::conflict(format!(
                        "notice {} already exists",
                        notice.identity()
                    )));
                }
            }
            Some(expected) => {
                let current = tables
                    .notices
                    .get(&notice.id)
                    .ok_or_else(|| AppError::not_found("notice", notice.id))?;
                if current.version != expected {
                    return Err(AppError::conflict(format!(
                        "notice {} version {} != expected {}",
                        notice.identity(),
                        current.version,
                        expected
                    )));
                }
            }
        }
        tables.notices.insert(notice.id, notice.clone());
        Ok(())
    }

    async fn delete_notice(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables();
        tables.details.retain(|(notice_id, _), _| *notice_id != id);
        tables.lots.retain(|_, lot| lot.notice_id != id);
        tables.documents.retain(|_, doc| doc.notice_id != id);
        tables.matches.retain(|(_, notice_id), _| *notice_id != id);
        Ok(tables.notices.remove(&id).is_some())
    }

    async fn notices_missing_summary(&self, limit: u64) -> Result<Vec<CanonicalNotice>> {
        let mut missing: Vec<_> = self
            .tables()
            .notices
            .values()
            .filter(|n| n.ai_summary.is_none())
            .cloned()
            .collect();
        missing.sort_by_key(|n| (n.last_seen_at, n.id));
        missing.truncate(limit as usize);
        Ok(missing)
    }

    async fn store_notice_summary(
        &self,
        id: Uuid,
        expected_version: i64,
        summary: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables();
        let notice = tables
            .notices
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found("notice", id))?;
        if notice.version != expected_version {
            return Err(AppError::conflict(format!("notice {} changed during summarization", id)));
        }
        notice.ai_summary = Some(summary.to_string());
        notice.ai_summary_generated_at = Some(generated_at);
        notice.version += 1;
        Ok(())
    }

    async fn upsert_notice_detail(&self, detail: &NoticeDetail) -> Result<()> {
        self.tables()
            .details
            .insert((detail.notice_id, detail.source.clone()), detail.clone());
        Ok(())
    }

    async fn find_notice_detail(&self, notice_id: Uuid, source: &str) -> Result<Option<NoticeDetail>> {
        Ok(self.tables().details.get(&(notice_id, source.to_string())).cloned())
    }

    async fn list_lots(&self, notice_id: Uuid) -> Result<Vec<NoticeLot>> {
        let mut lots: Vec<_> = self
            .tables()
            .lots
            .values()
            .filter(|lot| lot.notice_id == notice_id)
            .cloned()
            .collect();
        lots.sort_by(|a, b| a.lot_ref.cmp(&b.lot_ref));
        Ok(lots)
    }

    async fn upsert_lot(&self, lot: &NoticeLot) -> Result<()> {
        let mut tables = self.tables();
        let existing = tables
            .lots
            .values()
            .find(|l| l.notice_id == lot.notice_id && l.lot_ref == lot.lot_ref)
            .map(|l| l.id);
        let mut row = lot.clone();
        if let Some(id) = existing {
            row.id = id;
        }
        tables.lots.insert(row.id, row);
        Ok(())
    }

    async fn insert_document_if_absent(&self, document: &NoticeDocument) -> Result<bool> {
        let mut tables = self.tables();
        let exists = tables
            .documents
            .values()
            .any(|d| d.notice_id == document.notice_id && d.url == document.url);
        if exists {
            return Ok(false);
        }
        tables.documents.insert(document.id, document.clone());
        Ok(true)
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<NoticeDocument>> {
        Ok(self.tables().documents.get(&id).cloned())
    }

    async fn list_documents(&self, notice_id: Uuid) -> Result<Vec<NoticeDocument>> {
        let mut docs: Vec<_> = self
            .tables()
            .documents
            .values()
            .filter(|d| d.notice_id == notice_id)
            .cloned()
            .collect();
        docs.sort_by_key(|d| (d.discovered_at, d.id));
        Ok(docs)
    }

    async fn documents_in_states(&self, states: &[DocumentState], limit: u64) -> Result<Vec<NoticeDocument>> {
        let mut docs: Vec<_> = self
            .tables()
            .documents
            .values()
            .filter(|d| states.contains(&d.state))
            .cloned()
            .collect();
        docs.sort_by_key(|d| (d.discovered_at, d.id));
        docs.truncate(limit as usize);
        Ok(docs)
    }

    async fn update_document(&self, document: &NoticeDocument, expected_state: DocumentState) -> Result<()> {
        let mut tables = self.tables();
        let current = tables
            .documents
            .get(&document.id)
            .ok_or_else(|| AppError::not_found("document", document.id))?;
        if current.state != expected_state {
            return Err(AppError::conflict(format!(
                "document {} is {} not {}",
                document.id, current.state, expected_state
            )));
        }
        tables.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn enabled_watchlists(&self) -> Result<Vec<Watchlist>> {
        let mut lists: Vec<_> = self
            .tables()
            .watchlists
            .values()
            .filter(|w| w.enabled)
            .cloned()
            .collect();
        lists.sort_by_key(|w| (w.created_at, w.id));
        Ok(lists)
    }

    async fn upsert_match(&self, m: &WatchlistMatch) -> Result<MatchUpsert> {
        let mut tables = self.tables();
        match tables.matches.entry((m.watchlist_id, m.notice_id)) {
            Entry::Vacant(slot) => {
                slot.insert(m.clone());
                Ok(MatchUpsert::Created)
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.relevance_score == m.relevance_score && existing.matched_on == m.matched_on {
                    return Ok(MatchUpsert::Unchanged);
                }
                existing.relevance_score = m.relevance_score;
                existing.matched_on = m.matched_on.clone();
                existing.updated_at = m.updated_at;
                Ok(MatchUpsert::Updated)
            }
        }
    }

    async fn find_match(&self, watchlist_id: Uuid, notice_id: Uuid) -> Result<Option<WatchlistMatch>> {
        Ok(self.tables().matches.get(&(watchlist_id, notice_id)).cloned())
    }

    async fn delete_match(&self, watchlist_id: Uuid, notice_id: Uuid) -> Result<bool> {
        Ok(self.tables().matches.remove(&(watchlist_id, notice_id)).is_some())
    }

    async fn insert_import_run(&self, run: &ImportRun) -> Result<()> {
        let mut tables = self.tables();
        if tables.import_runs.contains_key(&run.id) {
            return Err(AppError::conflict(format!("import run {} already exists", run.id)));
        }
        tables.import_runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn complete_import_run(&self, run: &ImportRun) -> Result<()> {
        let mut tables = self.tables();
        let stored = tables
            .import_runs
            .get_mut(&run.id)
            .ok_or_else(|| AppError::not_found("import_run", run.id))?;
        if stored.is_terminal() {
            return Err(AppError::conflict(format!("import run {} is already completed", run.id)));
        }
        *stored = run.clone();
        Ok(())
    }

    async fn find_import_run(&self, id: Uuid) -> Result<Option<ImportRun>> {
        Ok(self.tables().import_runs.get(&id).cloned())
    }

    async fn open_import_runs_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ImportRun>> {
        let mut runs: Vec<_> = self
            .tables()
            .import_runs
            .values()
            .filter(|r| !r.is_terminal() && r.started_at < cutoff)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    async fn find_translation(&self, key: &str) -> Result<Option<TranslationEntry>> {
        Ok(self.tables().translations.get(key).cloned())
    }

    async fn insert_translation_if_absent(&self, entry: &TranslationEntry) -> Result<bool> {
        let mut tables = self.tables();
        if tables.translations.contains_key(&entry.key) {
            return Ok(false);
        }
        tables.translations.insert(entry.key.clone(), entry.clone());
        Ok(true)
    }

    async fn put_curated_translation(&self, entry: &TranslationEntry) -> Result<()> {
        let mut tables = self.tables();
        let created_at = tables
            .translations
            .get(&entry.key)
            .map(|e| e.created_at)
            .unwrap_or(entry.created_at);
        let mut row = entry.clone();
        row.created_at = created_at;
        tables.translations.insert(entry.key.clone(), row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn notice(source_id: &str) -> CanonicalNotice {
        let now = Utc::now();
        CanonicalNotice {
            id: Uuid::new_v4(),
            source: "TED".into(),
            source_id: source_id.into(),
            title: "Road works".into(),
            description: None,
            buyer_names: BTreeSet::new(),
            country: Some("BE".into()),
            languages: BTreeSet::new(),
            cpv_main: Some("45233000".into()),
            cpv_additional: vec![],
            nuts_codes: BTreeSet::new(),
            keywords: BTreeSet::new(),
            procedure_type: None,
            notice_type: None,
            estimated_value: None,
            currency: None,
            winner_name: None,
            award_value: None,
            award_date: None,
            tenders_received: None,
            award_criteria: None,
            published_at: None,
            deadline: None,
            status: Default::default(),
            first_seen_at: now,
            last_seen_at: now,
            raw_payload: serde_json::Value::Null,
            ai_summary: None,
            ai_summary_generated_at: None,
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_identity_is_unique() {
        let store = MemoryStore::new();
        store.save_notice(&notice("1"), None).await.unwrap();
        let err = store.save_notice(&notice("1"), None).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.notice_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = MemoryStore::new();
        let mut n = notice("1");
        store.save_notice(&n, None).await.unwrap();

        n.version = 2;
        store.save_notice(&n, Some(1)).await.unwrap();

        n.version = 3;
        let err = store.save_notice(&n, Some(1)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_notice_cascades() {
        let store = MemoryStore::new();
        let n = notice("1");
        store.save_notice(&n, None).await.unwrap();

        let doc = NoticeDocument::discovered(n.id, "https://example.org/a.pdf".into(), None, None, Utc::now());
        assert!(store.insert_document_if_absent(&doc).await.unwrap());

        let now = Utc::now();
        let m = WatchlistMatch {
            id: Uuid::new_v4(),
            watchlist_id: Uuid::new_v4(),
            notice_id: n.id,
            matched_on: "country: BE".into(),
            relevance_score: 100,
            created_at: now,
            updated_at: now,
        };
        store.upsert_match(&m).await.unwrap();

        assert!(store.delete_notice(n.id).await.unwrap());
        assert!(store.list_documents(n.id).await.unwrap().is_empty());
        assert!(store.matches().is_empty());
    }

    #[tokio::test]
    async fn test_document_url_is_unique_per_notice() {
        let store = MemoryStore::new();
        let notice_id = Uuid::new_v4();
        let url = "https://example.org/a.pdf".to_string();
        let first = NoticeDocument::discovered(notice_id, url.clone(), None, None, Utc::now());
        let again = NoticeDocument::discovered(notice_id, url, None, None, Utc::now());
        assert!(store.insert_document_if_absent(&first).await.unwrap());
        assert!(!store.insert_document_if_absent(&again).await.unwrap());
    }

    #[tokio::test]
    async fn test_document_update_checks_state() {
        let store = MemoryStore::new();
        let mut doc = NoticeDocument::discovered(
            Uuid::new_v4(),
            "https://example.org/a.pdf".into(),
            None,
            None,
            Utc::now(),
        );
        store.insert_document_if_absent(&doc).await.unwrap();
        doc.begin(crate::model::Stage::Download, Utc::now()).unwrap();

        let err = store
            .update_document(&doc, DocumentState::Downloading)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        store.update_document(&doc, DocumentState::Discovered).await.unwrap();
    }

    #[tokio::test]
    async fn test_match_upsert_outcomes() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut m = WatchlistMatch {
            id: Uuid::new_v4(),
            watchlist_id: Uuid::new_v4(),
            notice_id: Uuid::new_v4(),
            matched_on: "keyword: road".into(),
            relevance_score: 110,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(store.upsert_match(&m).await.unwrap(), MatchUpsert::Created);
        assert_eq!(store.upsert_match(&m).await.unwrap(), MatchUpsert::Unchanged);

        let original_id = m.id;
        m.id = Uuid::new_v4();
        m.relevance_score = 130;
        assert_eq!(store.upsert_match(&m).await.unwrap(), MatchUpsert::Updated);

        let stored = store.matches();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, original_id);
        assert_eq!(stored[0].relevance_score, 130);
    }

    #[tokio::test]
    async fn test_completed_run_is_frozen() {
        let store = MemoryStore::new();
        let mut run = ImportRun {
            id: Uuid::new_v4(),
            source: "TED".into(),
            started_at: Utc::now(),
            completed_at: None,
            created_count: 0,
            updated_count: 0,
            error_count: 0,
            errors: vec![],
            search_criteria: serde_json::json!({}),
        };
        store.insert_import_run(&run).await.unwrap();
        run.completed_at = Some(Utc::now());
        store.complete_import_run(&run).await.unwrap();
        assert!(store.complete_import_run(&run).await.unwrap_err().is_conflict());
    }
}
