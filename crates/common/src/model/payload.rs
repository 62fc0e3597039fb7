//! Connector payload
//!
//! What a source connector hands over for one notice after normalizing the
//! source's wire format. Everything except the identity is optional: a
//! partial re-fetch simply omits what it did not see.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::codes::normalize_country;
use super::identity::IdentityKey;
use super::notice::NoticeStatus;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct NormalizedPayload {
    #[validate(length(min = 1, max = 64))]
    pub source: String,

    #[validate(length(min = 1, max = 256))]
    pub source_id: String,

    #[validate(length(max = 2000))]
    pub title: Option<String>,

    pub description: Option<String>,

    #[serde(default)]
    pub buyer_names: Vec<String>,

    /// ISO 3166-1 alpha-2, compared after trimming
    pub country: Option<String>,

    #[serde(default)]
    pub languages: Vec<String>,

    pub cpv_main: Option<String>,

    #[serde(default)]
    pub cpv_additional: Vec<String>,

    #[serde(default)]
    pub nuts: Vec<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    pub procedure_type: Option<String>,

    pub notice_type: Option<String>,

    #[validate(range(min = 0.0))]
    pub estimated_value: Option<f64>,

    pub currency: Option<String>,

    pub published_at: Option<NaiveDate>,

    pub deadline: Option<DateTime<Utc>>,

    pub status: Option<NoticeStatus>,

    #[serde(default)]
    #[validate(nested)]
    pub documents: Vec<DocumentRef>,

    #[serde(default)]
    #[validate(nested)]
    pub lots: Vec<LotPayload>,

    #[validate(nested)]
    pub award: Option<AwardFields>,

    /// When the connector fetched this payload
    pub fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DocumentRef {
    #[validate(url)]
    pub url: String,
    pub title: Option<String>,
    pub lot_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct LotPayload {
    #[validate(length(min = 1, max = 64))]
    pub lot_ref: String,
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub cpv_codes: Vec<String>,
    #[serde(default)]
    pub nuts_codes: Vec<String>,
    #[validate(range(min = 0.0))]
    pub estimated_value: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct AwardFields {
    pub winner_name: Option<String>,
    #[validate(range(min = 0.0))]
    pub award_value: Option<f64>,
    pub award_date: Option<NaiveDate>,
    #[validate(range(min = 0))]
    pub tenders_received: Option<i32>,
    pub award_criteria: Option<String>,
}

impl NormalizedPayload {
    /// Validate field constraints and resolve the identity in one step.
    pub fn check(&self) -> Result<IdentityKey> {
        self.validate()?;
        if let Some(country) = self.country.as_deref().and_then(normalize_country) {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(AppError::validation(
                    format!("country '{}' is not a two-letter code", country),
                    Some("country"),
                ));
            }
        }
        IdentityKey::resolve(&self.source, &self.source_id)
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
