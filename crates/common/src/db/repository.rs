//! Repository pattern for database operations
//!
//! Postgres implementation of `Store`. Reads that feed a merge or a stage
//! transition go to the primary so the version/state they carry is current;
//! listing queries may use the replica.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, SqlErr, Statement,
};
use uuid::Uuid;

use crate::db::models::*;
use crate::db::store::Store;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::model::{
    CanonicalNotice, DocumentState, IdentityKey, ImportRun, MatchUpsert, NoticeDetail,
    NoticeDocument, NoticeLot, TranslationEntry, Watchlist, WatchlistMatch,
};

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

/// Unique violations lose an identity race; everything else is persistence.
fn unique_as_conflict(err: DbErr, what: impl std::fmt::Display) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => {
            AppError::conflict(format!("{} already exists: {}", what, detail))
        }
        _ => err.into(),
    }
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

#[async_trait]
impl Store for Repository {
    // ========================================================================
    // Notice Operations
    // ========================================================================

    async fn find_notice(&self, key: &IdentityKey) -> Result<Option<CanonicalNotice>> {
        NoticeEntity::find()
            .filter(NoticeColumn::Source.eq(key.source()))
            .filter(NoticeColumn::SourceId.eq(key.source_id()))
            .one(self.write_conn())
            .await?
            .map(NoticeRow::into_domain)
            .transpose()
    }

    async fn get_notice(&self, id: Uuid) -> Result<Option<CanonicalNotice>> {
        NoticeEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .map(NoticeRow::into_domain)
            .transpose()
    }

    async fn save_notice(&self, notice: &CanonicalNotice, expected_version: Option<i64>) -> Result<()> {
        let model = NoticeActiveModel::from_domain(notice)?;

        match expected_version {
            None => {
                NoticeEntity::insert(model)
                    .exec_without_returning(self.write_conn())
                    .await
                    .map_err(|e| unique_as_conflict(e, notice.identity()))?;
            }
            Some(expected) => {
                let result = NoticeEntity::update_many()
                    .set(model)
                    .filter(NoticeColumn::Id.eq(notice.id))
                    .filter(NoticeColumn::Version.eq(expected))
                    .exec(self.write_conn())
                    .await?;

                if result.rows_affected == 0 {
                    return Err(AppError::conflict(format!(
                        "notice {} no longer at version {}",
                        notice.identity(),
                        expected
                    )));
                }
            }
        }
        Ok(())
    }

    async fn delete_notice(&self, id: Uuid) -> Result<bool> {
        // lots, documents, details and matches go with it (ON DELETE CASCADE)
        let result = NoticeEntity::delete_by_id(id).exec(self.write_conn()).await?;
        Ok(result.rows_affected > 0)
    }

    async fn notices_missing_summary(&self, limit: u64) -> Result<Vec<CanonicalNotice>> {
        NoticeEntity::find()
            .filter(NoticeColumn::AiSummary.is_null())
            .order_by_asc(NoticeColumn::LastSeenAt)
            .order_by_asc(NoticeColumn::Id)
            .limit(limit)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(NoticeRow::into_domain)
            .collect()
    }

    async fn store_notice_summary(
        &self,
        id: Uuid,
        expected_version: i64,
        summary: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = NoticeEntity::update_many()
            .col_expr(NoticeColumn::AiSummary, Expr::value(summary.to_string()))
            .col_expr(NoticeColumn::AiSummaryGeneratedAt, Expr::value(generated_at))
            .col_expr(NoticeColumn::Version, Expr::col(NoticeColumn::Version).add(1))
            .filter(NoticeColumn::Id.eq(id))
            .filter(NoticeColumn::Version.eq(expected_version))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::conflict(format!("notice {} changed during summarization", id)));
        }
        Ok(())
    }

    async fn upsert_notice_detail(&self, detail: &NoticeDetail) -> Result<()> {
        NoticeDetailEntity::insert(NoticeDetailActiveModel::from(detail))
            .on_conflict(
                OnConflict::columns([NoticeDetailColumn::NoticeId, NoticeDetailColumn::Source])
                    .update_columns([NoticeDetailColumn::RawPayload, NoticeDetailColumn::FetchedAt])
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;
        Ok(())
    }

    async fn find_notice_detail(&self, notice_id: Uuid, source: &str) -> Result<Option<NoticeDetail>> {
        Ok(NoticeDetailEntity::find_by_id((notice_id, source.to_string()))
            .one(self.read_conn())
            .await?
            .map(Into::into))
    }

    // ========================================================================
    // Lot Operations
    // ========================================================================

    async fn list_lots(&self, notice_id: Uuid) -> Result<Vec<NoticeLot>> {
        NoticeLotEntity::find()
            .filter(NoticeLotColumn::NoticeId.eq(notice_id))
            .order_by_asc(NoticeLotColumn::LotRef)
            .all(self.write_conn())
            .await?
            .into_iter()
            .map(NoticeLotRow::into_domain)
            .collect()
    }

    async fn upsert_lot(&self, lot: &NoticeLot) -> Result<()> {
        NoticeLotEntity::insert(NoticeLotActiveModel::from_domain(lot)?)
            .on_conflict(
                OnConflict::columns([NoticeLotColumn::NoticeId, NoticeLotColumn::LotRef])
                    .update_columns([
                        NoticeLotColumn::Title,
                        NoticeLotColumn::Description,
                        NoticeLotColumn::CpvCodes,
                        NoticeLotColumn::NutsCodes,
                        NoticeLotColumn::EstimatedValue,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;
        Ok(())
    }

    // ========================================================================
    // Document Operations
    // ========================================================================

    async fn insert_document_if_absent(&self, document: &NoticeDocument) -> Result<bool> {
        let inserted = NoticeDocumentEntity::insert(NoticeDocumentActiveModel::from(document))
            .on_conflict(
                OnConflict::columns([NoticeDocumentColumn::NoticeId, NoticeDocumentColumn::Url])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await;

        match inserted {
            Ok(rows) => Ok(rows > 0),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_document(&self, id: Uuid) -> Result<Option<NoticeDocument>> {
        NoticeDocumentEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .map(NoticeDocumentRow::into_domain)
            .transpose()
    }

    async fn list_documents(&self, notice_id: Uuid) -> Result<Vec<NoticeDocument>> {
        NoticeDocumentEntity::find()
            .filter(NoticeDocumentColumn::NoticeId.eq(notice_id))
            .order_by_asc(NoticeDocumentColumn::DiscoveredAt)
            .order_by_asc(NoticeDocumentColumn::Id)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(NoticeDocumentRow::into_domain)
            .collect()
    }

    async fn documents_in_states(&self, states: &[DocumentState], limit: u64) -> Result<Vec<NoticeDocument>> {
        let states: Vec<&str> = states.iter().map(|s| s.as_str()).collect();

        NoticeDocumentEntity::find()
            .filter(NoticeDocumentColumn::State.is_in(states))
            .order_by_asc(NoticeDocumentColumn::DiscoveredAt)
            .order_by_asc(NoticeDocumentColumn::Id)
            .limit(limit)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(NoticeDocumentRow::into_domain)
            .collect()
    }

    async fn update_document(&self, document: &NoticeDocument, expected_state: DocumentState) -> Result<()> {
        let result = NoticeDocumentEntity::update_many()
            .set(NoticeDocumentActiveModel::from(document))
            .filter(NoticeDocumentColumn::Id.eq(document.id))
            .filter(NoticeDocumentColumn::State.eq(expected_state.as_str()))
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::conflict(format!(
                "document {} is no longer {}",
                document.id, expected_state
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Watchlist Operations
    // ========================================================================

    async fn enabled_watchlists(&self) -> Result<Vec<Watchlist>> {
        WatchlistEntity::find()
            .filter(WatchlistColumn::Enabled.eq(true))
            .order_by_asc(WatchlistColumn::CreatedAt)
            .order_by_asc(WatchlistColumn::Id)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(WatchlistRow::into_domain)
            .collect()
    }

    async fn upsert_match(&self, m: &WatchlistMatch) -> Result<MatchUpsert> {
        // The WHERE clause skips no-op updates, so no row comes back when
        // score and explanation are unchanged. xmax = 0 only on insert.
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            INSERT INTO watchlist_matches (
                id, watchlist_id, notice_id, matched_on, relevance_score, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (watchlist_id, notice_id) DO UPDATE
            SET matched_on = EXCLUDED.matched_on,
                relevance_score = EXCLUDED.relevance_score,
                updated_at = EXCLUDED.updated_at
            WHERE watchlist_matches.matched_on IS DISTINCT FROM EXCLUDED.matched_on
               OR watchlist_matches.relevance_score IS DISTINCT FROM EXCLUDED.relevance_score
            RETURNING (xmax = 0) AS inserted
            "#,
            vec![
                m.id.into(),
                m.watchlist_id.into(),
                m.notice_id.into(),
                m.matched_on.clone().into(),
                m.relevance_score.into(),
                m.created_at.into(),
                m.updated_at.into(),
            ],
        );

        let row = self.write_conn().query_one(stmt).await?;

        match row {
            None => Ok(MatchUpsert::Unchanged),
            Some(row) => {
                let inserted: bool = row.try_get("", "inserted")?;
                Ok(if inserted { MatchUpsert::Created } else { MatchUpsert::Updated })
            }
        }
    }

    async fn find_match(&self, watchlist_id: Uuid, notice_id: Uuid) -> Result<Option<WatchlistMatch>> {
        Ok(WatchlistMatchEntity::find()
            .filter(WatchlistMatchColumn::WatchlistId.eq(watchlist_id))
            .filter(WatchlistMatchColumn::NoticeId.eq(notice_id))
            .one(self.read_conn())
            .await?
            .map(Into::into))
    }

    async fn delete_match(&self, watchlist_id: Uuid, notice_id: Uuid) -> Result<bool> {
        let result = WatchlistMatchEntity::delete_many()
            .filter(WatchlistMatchColumn::WatchlistId.eq(watchlist_id))
            .filter(WatchlistMatchColumn::NoticeId.eq(notice_id))
            .exec(self.write_conn())
            .await?;
        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Import Run Operations
    // ========================================================================

    async fn insert_import_run(&self, run: &ImportRun) -> Result<()> {
        ImportRunEntity::insert(ImportRunActiveModel::from_domain(run)?)
            .exec_without_returning(self.write_conn())
            .await
            .map_err(|e| unique_as_conflict(e, format!("import run {}", run.id)))?;
        Ok(())
    }

    async fn complete_import_run(&self, run: &ImportRun) -> Result<()> {
        let result = ImportRunEntity::update_many()
            .set(ImportRunActiveModel::from_domain(run)?)
            .filter(ImportRunColumn::Id.eq(run.id))
            .filter(ImportRunColumn::CompletedAt.is_null())
            .exec(self.write_conn())
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::conflict(format!(
                "import run {} is missing or already completed",
                run.id
            )));
        }
        Ok(())
    }

    async fn find_import_run(&self, id: Uuid) -> Result<Option<ImportRun>> {
        ImportRunEntity::find_by_id(id)
            .one(self.read_conn())
            .await?
            .map(ImportRunRow::into_domain)
            .transpose()
    }

    async fn open_import_runs_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ImportRun>> {
        ImportRunEntity::find()
            .filter(ImportRunColumn::CompletedAt.is_null())
            .filter(ImportRunColumn::StartedAt.lt(cutoff))
            .order_by_asc(ImportRunColumn::StartedAt)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(ImportRunRow::into_domain)
            .collect()
    }

    // ========================================================================
    // Translation Cache Operations
    // ========================================================================

    async fn find_translation(&self, key: &str) -> Result<Option<TranslationEntry>> {
        TranslationEntity::find_by_id(key.to_string())
            .one(self.read_conn())
            .await?
            .map(TranslationRow::into_domain)
            .transpose()
    }

    async fn insert_translation_if_absent(&self, entry: &TranslationEntry) -> Result<bool> {
        let inserted = TranslationEntity::insert(TranslationActiveModel::from(entry))
            .on_conflict(OnConflict::column(TranslationColumn::Key).do_nothing().to_owned())
            .exec_without_returning(self.write_conn())
            .await;

        match inserted {
            Ok(rows) => Ok(rows > 0),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_curated_translation(&self, entry: &TranslationEntry) -> Result<()> {
        TranslationEntity::insert(TranslationActiveModel::from(entry))
            .on_conflict(
                OnConflict::column(TranslationColumn::Key)
                    .update_columns([
                        TranslationColumn::Fr,
                        TranslationColumn::Nl,
                        TranslationColumn::En,
                        TranslationColumn::Provenance,
                        TranslationColumn::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;
        Ok(())
    }
}
