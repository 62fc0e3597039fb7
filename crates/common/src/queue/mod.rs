//! Outbound signals over SQS
//!
//! Provides:
//! - The `Signal` messages consumed by the search indexer and the
//!   notification digester
//! - An SQS sink (JSON bodies, one queue per signal kind)
//! - An in-memory sink for tests and dry runs
//!
//! Publishing is best effort: callers log failures and carry on.

use crate::config::QueueConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_sqs::Client as SqsClient;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    /// Title or description changed; the search index must be refreshed.
    Reindex { notice_id: Uuid },

    /// A watchlist match was created or re-scored.
    MatchUpserted {
        watchlist_id: Uuid,
        notice_id: Uuid,
        relevance_score: i32,
        matched_on: String,
        created: bool,
    },
}

impl Signal {
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Reindex { .. } => "reindex",
            Signal::MatchUpserted { .. } => "match_upserted",
        }
    }
}

#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn publish(&self, signal: &Signal) -> Result<()>;
}

/// SQS Queue client wrapper
pub struct SqsSignalSink {
    client: SqsClient,
    reindex_url: Option<String>,
    match_url: Option<String>,
}

impl SqsSignalSink {
    /// Create a new sink from the default AWS environment
    pub async fn new(config: &QueueConfig) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self::with_client(client, config))
    }

    /// Create with an existing SQS client
    pub fn with_client(client: SqsClient, config: &QueueConfig) -> Self {
        Self {
            client,
            reindex_url: config.reindex_queue_url.clone(),
            match_url: config.match_queue_url.clone(),
        }
    }

    fn queue_url(&self, signal: &Signal) -> Option<&str> {
        match signal {
            Signal::Reindex { .. } => self.reindex_url.as_deref(),
            Signal::MatchUpserted { .. } => self.match_url.as_deref(),
        }
    }
}

#[async_trait]
impl SignalSink for SqsSignalSink {
    async fn publish(&self, signal: &Signal) -> Result<()> {
        let Some(url) = self.queue_url(signal) else {
            debug!(kind = signal.kind(), "No queue configured, signal dropped");
            return Ok(());
        };

        let body = serde_json::to_string(signal).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize signal: {}", e),
        })?;

        let result = self
            .client
            .send_message()
            .queue_url(url)
            .message_body(&body)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send signal: {}", e),
            })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, kind = signal.kind(), "Signal sent to queue");

        Ok(())
    }
}

/// Records every published signal.
#[derive(Default)]
pub struct MemorySignalSink {
    signals: Mutex<Vec<Signal>>,
}

impl MemorySignalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn reindexed(&self, notice_id: Uuid) -> usize {
        self.signals()
            .iter()
            .filter(|s| matches!(s, Signal::Reindex { notice_id: id } if *id == notice_id))
            .count()
    }
}

#[async_trait]
impl SignalSink for MemorySignalSink {
    async fn publish(&self, signal: &Signal) -> Result<()> {
        self.signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(signal.clone());
        Ok(())
    }
}
