//! Import runs: one per ingestion batch per source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{AppError, ErrorCode, ErrorKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportErrorEntry {
    pub source_id: Option<String>,
    pub code: ErrorCode,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ImportErrorEntry {
    pub fn from_error(source_id: Option<String>, error: &AppError, at: DateTime<Utc>) -> Self {
        Self {
            source_id,
            code: error.code(),
            kind: error.kind(),
            message: error.to_string(),
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    /// Set once, when the run reaches its terminal state
    pub completed_at: Option<DateTime<Utc>>,
    pub created_count: i32,
    pub updated_count: i32,
    pub error_count: i32,
    pub errors: Vec<ImportErrorEntry>,
    /// Criteria the connector used to fetch the batch
    pub search_criteria: serde_json::Value,
}

impl ImportRun {
    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn processed(&self) -> i32 {
        self.created_count + self.updated_count + self.error_count
    }
}
