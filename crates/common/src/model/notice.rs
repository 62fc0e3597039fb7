//! Canonical notice and the records it owns.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::codes::normalize_cpv;
use super::identity::IdentityKey;
use crate::errors::AppError;

/// Lifecycle of a notice as reported by its source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeStatus {
    #[default]
    Active,
    Closed,
    Awarded,
    Cancelled,
}

impl NoticeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeStatus::Active => "active",
            NoticeStatus::Closed => "closed",
            NoticeStatus::Awarded => "awarded",
            NoticeStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for NoticeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoticeStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(NoticeStatus::Active),
            "closed" => Ok(NoticeStatus::Closed),
            "awarded" => Ok(NoticeStatus::Awarded),
            "cancelled" => Ok(NoticeStatus::Cancelled),
            other => Err(AppError::validation(
                format!("unknown notice status '{other}'"),
                Some("status"),
            )),
        }
    }
}

/// Award fields are only kept once a notice is an award notice.
pub fn is_award_notice_type(notice_type: &str) -> bool {
    let lower = notice_type.trim().to_lowercase();
    lower.contains("award") || lower == "can" || lower == "result" || lower.starts_with("result")
}

/// One reconciled record per real-world notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalNotice {
    pub id: Uuid,
    pub source: String,
    pub source_id: String,

    pub title: String,
    pub description: Option<String>,
    pub buyer_names: BTreeSet<String>,
    pub country: Option<String>,
    pub languages: BTreeSet<String>,

    pub cpv_main: Option<String>,
    pub cpv_additional: Vec<String>,
    pub nuts_codes: BTreeSet<String>,
    pub keywords: BTreeSet<String>,

    pub procedure_type: Option<String>,
    pub notice_type: Option<String>,
    pub estimated_value: Option<f64>,
    pub currency: Option<String>,

    pub winner_name: Option<String>,
    pub award_value: Option<f64>,
    pub award_date: Option<NaiveDate>,
    pub tenders_received: Option<i32>,
    pub award_criteria: Option<String>,

    pub published_at: Option<NaiveDate>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: NoticeStatus,

    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,

    /// Latest payload, kept for audit and replay
    pub raw_payload: serde_json::Value,

    pub ai_summary: Option<String>,
    pub ai_summary_generated_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency token, bumped on every committed write
    pub version: i64,
}

impl CanonicalNotice {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::from_stored(&self.source, &self.source_id)
    }

    /// Main code first, then additional codes in recorded order.
    pub fn cpv_codes(&self) -> impl Iterator<Item = &str> {
        self.cpv_main
            .iter()
            .chain(self.cpv_additional.iter())
            .map(String::as_str)
    }

    pub fn is_award_notice(&self) -> bool {
        self.notice_type.as_deref().is_some_and(is_award_notice_type)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == NoticeStatus::Cancelled
    }

    /// Text handed to the summarizer.
    pub fn summary_input(&self) -> String {
        match &self.description {
            Some(description) => format!("{}\n\n{}", self.title, description),
            None => self.title.clone(),
        }
    }

    pub fn has_cpv(&self, code: &str) -> bool {
        normalize_cpv(code).is_some_and(|c| self.cpv_codes().any(|own| own == c))
    }
}

/// Latest raw payload per source for a notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeDetail {
    pub notice_id: Uuid,
    pub source: String,
    pub raw_payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

/// Sub-award unit owned by a notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeLot {
    pub id: Uuid,
    pub notice_id: Uuid,
    pub lot_ref: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub cpv_codes: Vec<String>,
    pub nuts_codes: BTreeSet<String>,
    pub estimated_value: Option<f64>,
}
