//! Watchlists and the matches they accumulate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Saved match criteria. Conjunctive across dimensions, disjunctive within
/// one. An empty dimension does not constrain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: Uuid,
    /// `None` for anonymous, pre-auth watchlists
    pub owner_id: Option<Uuid>,
    pub name: String,
    pub keywords: BTreeSet<String>,
    pub countries: BTreeSet<String>,
    pub cpv_prefixes: BTreeSet<String>,
    pub sources: BTreeSet<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Watchlist {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: None,
            name: name.into(),
            keywords: BTreeSet::new(),
            countries: BTreeSet::new(),
            cpv_prefixes: BTreeSet::new(),
            sources: BTreeSet::new(),
            min_value: None,
            max_value: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_value_range(&self) -> bool {
        self.min_value.is_some() || self.max_value.is_some()
    }

    /// A watchlist with no criteria at all never matches.
    pub fn has_criteria(&self) -> bool {
        !self.keywords.is_empty()
            || !self.countries.is_empty()
            || !self.cpv_prefixes.is_empty()
            || !self.sources.is_empty()
            || self.has_value_range()
    }
}

/// One row per (watchlist, notice). Re-scored in place, never duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchlistMatch {
    pub id: Uuid,
    pub watchlist_id: Uuid,
    pub notice_id: Uuid,
    pub matched_on: String,
    pub relevance_score: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchUpsert {
    Created,
    Updated,
    Unchanged,
}
