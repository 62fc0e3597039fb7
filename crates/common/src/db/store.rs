//! Persistence boundary
//!
//! Every durable record the core reads or writes goes through `Store`.
//! Implementations must enforce the same unique constraints:
//! - notices on `(source, source_id)`
//! - lots on `(notice_id, lot_ref)`
//! - documents on `(notice_id, url)`
//! - matches on `(watchlist_id, notice_id)`
//! - translations on the normalized key

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::model::{
    CanonicalNotice, DocumentState, IdentityKey, ImportRun, MatchUpsert, NoticeDetail,
    NoticeDocument, NoticeLot, TranslationEntry, Watchlist, WatchlistMatch,
};

#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Notices
    // ------------------------------------------------------------------

    async fn find_notice(&self, key: &IdentityKey) -> Result<Option<CanonicalNotice>>;

    async fn get_notice(&self, id: Uuid) -> Result<Option<CanonicalNotice>>;

    /// Insert when `expected_version` is `None`, otherwise overwrite only if
    /// the stored version still equals it. Both cases fail with
    /// `AppError::Conflict` when the race is lost.
    async fn save_notice(&self, notice: &CanonicalNotice, expected_version: Option<i64>) -> Result<()>;

    /// Removes lots, documents, details and matches with it.
    async fn delete_notice(&self, id: Uuid) -> Result<bool>;

    async fn notices_missing_summary(&self, limit: u64) -> Result<Vec<CanonicalNotice>>;

    /// Version-checked like `save_notice`; bumps the version.
    async fn store_notice_summary(
        &self,
        id: Uuid,
        expected_version: i64,
        summary: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn upsert_notice_detail(&self, detail: &NoticeDetail) -> Result<()>;

    async fn find_notice_detail(&self, notice_id: Uuid, source: &str) -> Result<Option<NoticeDetail>>;

    // ------------------------------------------------------------------
    // Lots
    // ------------------------------------------------------------------

    async fn list_lots(&self, notice_id: Uuid) -> Result<Vec<NoticeLot>>;

    async fn upsert_lot(&self, lot: &NoticeLot) -> Result<()>;

    // ------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------

    /// `false` when the notice already references this URL.
    async fn insert_document_if_absent(&self, document: &NoticeDocument) -> Result<bool>;

    async fn find_document(&self, id: Uuid) -> Result<Option<NoticeDocument>>;

    async fn list_documents(&self, notice_id: Uuid) -> Result<Vec<NoticeDocument>>;

    /// Oldest discoveries first.
    async fn documents_in_states(&self, states: &[DocumentState], limit: u64) -> Result<Vec<NoticeDocument>>;

    /// Compare-and-set on the stored state.
    async fn update_document(&self, document: &NoticeDocument, expected_state: DocumentState) -> Result<()>;

    // ------------------------------------------------------------------
    // Watchlists and matches
    // ------------------------------------------------------------------

    async fn enabled_watchlists(&self) -> Result<Vec<Watchlist>>;

    /// Create the pair, or re-score it in place.
    async fn upsert_match(&self, m: &WatchlistMatch) -> Result<MatchUpsert>;

    async fn find_match(&self, watchlist_id: Uuid, notice_id: Uuid) -> Result<Option<WatchlistMatch>>;

    async fn delete_match(&self, watchlist_id: Uuid, notice_id: Uuid) -> Result<bool>;

    // ------------------------------------------------------------------
    // Import runs
    // ------------------------------------------------------------------

    async fn insert_import_run(&self, run: &ImportRun) -> Result<()>;

    /// Persist counters and `completed_at`. Conflict if already completed.
    async fn complete_import_run(&self, run: &ImportRun) -> Result<()>;

    async fn find_import_run(&self, id: Uuid) -> Result<Option<ImportRun>>;

    async fn open_import_runs_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ImportRun>>;

    // ------------------------------------------------------------------
    // Translation cache
    // ------------------------------------------------------------------

    async fn find_translation(&self, key: &str) -> Result<Option<TranslationEntry>>;

    /// `false` when an entry for the key already exists.
    async fn insert_translation_if_absent(&self, entry: &TranslationEntry) -> Result<bool>;

    /// Insert or overwrite with a curated entry.
    async fn put_curated_translation(&self, entry: &TranslationEntry) -> Result<()>;
}
