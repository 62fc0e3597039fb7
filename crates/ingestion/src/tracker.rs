//! Import Run Tracker
//!
//! One run per batch per source. Counters accumulate in memory and are
//! written once, by `finish`. A run whose process dies stays open; the
//! `stale-runs` command reports those.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use tenderwatch_common::db::Store;
use tenderwatch_common::errors::{AppError, Result};
use tenderwatch_common::metrics;
use tenderwatch_common::model::{ImportErrorEntry, ImportRun};

/// Per-item result fed into a run.
#[derive(Debug)]
pub enum Outcome {
    Created,
    Updated,
    Errored {
        source_id: Option<String>,
        error: AppError,
    },
}

impl Outcome {
    pub fn errored(source_id: Option<String>, error: AppError) -> Self {
        Outcome::Errored { source_id, error }
    }
}

/// An open run. Consumed by `finish`, so a finished run cannot be fed.
#[derive(Debug)]
pub struct RunHandle {
    run: ImportRun,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.run.id
    }

    pub fn source(&self) -> &str {
        &self.run.source
    }

    /// Counters so far.
    pub fn snapshot(&self) -> &ImportRun {
        &self.run
    }
}

#[derive(Clone)]
pub struct ImportRunTracker {
    store: Arc<dyn Store>,
}

impl ImportRunTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist an open run for `source`.
    pub async fn start(&self, source: &str, search_criteria: serde_json::Value) -> Result<RunHandle> {
        let source = source.trim();
        if source.is_empty() {
            return Err(AppError::validation("source is empty", Some("source")));
        }

        let run = ImportRun {
            id: Uuid::new_v4(),
            source: source.to_uppercase(),
            started_at: Utc::now(),
            completed_at: None,
            created_count: 0,
            updated_count: 0,
            error_count: 0,
            errors: Vec::new(),
            search_criteria,
        };

        self.store.insert_import_run(&run).await?;
        info!(run_id = %run.id, source = %run.source, "Import run started");

        Ok(RunHandle { run })
    }

    pub fn record_outcome(&self, handle: &mut RunHandle, outcome: Outcome) {
        let run = &mut handle.run;
        match outcome {
            Outcome::Created => run.created_count += 1,
            Outcome::Updated => run.updated_count += 1,
            Outcome::Errored { source_id, error } => {
                run.error_count += 1;
                metrics::record_import_error(&run.source, error.kind().as_str());
                warn!(
                    run_id = %run.id,
                    source_id = source_id.as_deref().unwrap_or("-"),
                    error = %error,
                    "Import item failed"
                );
                run.errors
                    .push(ImportErrorEntry::from_error(source_id, &error, Utc::now()));
            }
        }
    }

    /// Set `completed_at` and persist the final counters.
    pub async fn finish(&self, handle: RunHandle) -> Result<ImportRun> {
        let mut run = handle.run;
        let completed_at = Utc::now().max(run.started_at);
        run.completed_at = Some(completed_at);

        self.store.complete_import_run(&run).await?;

        let elapsed = (completed_at - run.started_at).num_milliseconds() as f64 / 1000.0;
        metrics::record_import_batch(&run.source, elapsed);

        info!(
            run_id = %run.id,
            source = %run.source,
            created = run.created_count,
            updated = run.updated_count,
            errors = run.error_count,
            "Import run completed"
        );

        Ok(run)
    }

    /// Runs still open after `older_than`. The tracker never closes them.
    pub async fn stale_runs(&self, older_than: Duration, now: DateTime<Utc>) -> Result<Vec<ImportRun>> {
        self.store.open_import_runs_before(now - older_than).await
    }
}
