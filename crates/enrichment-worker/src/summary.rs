//! Summary refresher
//!
//! Fills `ai_summary` on notices that have none, either because they are new
//! or because a text change cleared it. The summary is stored against the
//! version it was generated from; a notice amended meanwhile keeps its empty
//! summary and is picked up again next round.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use tenderwatch_common::ai::Summarizer;
use tenderwatch_common::db::Store;
use tenderwatch_common::errors::Result;
use tenderwatch_common::metrics::ExternalCallTimer;
use tenderwatch_common::model::CanonicalNotice;
use tenderwatch_common::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryReport {
    pub summarized: usize,
    /// Notice changed while its summary was generated
    pub stale: usize,
    pub failed: usize,
}

pub struct SummaryRefresher {
    store: Arc<dyn Store>,
    summarizer: Arc<dyn Summarizer>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl SummaryRefresher {
    pub fn new(store: Arc<dyn Store>, summarizer: Arc<dyn Summarizer>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            store,
            summarizer,
            retry,
            timeout,
        }
    }

    pub async fn refresh(&self, limit: u64) -> Result<SummaryReport> {
        let notices = self.store.notices_missing_summary(limit).await?;
        let mut report = SummaryReport::default();

        for notice in notices {
            match self.summarize(&notice).await {
                Ok(true) => report.summarized += 1,
                Ok(false) => report.stale += 1,
                Err(e) => {
                    warn!(notice_id = %notice.id, error = %e, "Summary generation failed");
                    report.failed += 1;
                }
            }
        }

        if report != SummaryReport::default() {
            info!(
                summarized = report.summarized,
                stale = report.stale,
                failed = report.failed,
                "Summary refresh complete"
            );
        }
        Ok(report)
    }

    async fn summarize(&self, notice: &CanonicalNotice) -> Result<bool> {
        let input = notice.summary_input();

        let timer = ExternalCallTimer::start("summarize");
        let result = with_retry(&self.retry, "summarize", self.timeout, || self.summarizer.summarize(&input)).await;
        timer.finish(result.is_ok());
        let summary = result?;

        match self
            .store
            .store_notice_summary(notice.id, notice.version, &summary, Utc::now())
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => {
                debug!(notice_id = %notice.id, version = notice.version, "Notice changed during summarization");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
