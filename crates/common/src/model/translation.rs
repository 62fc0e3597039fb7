//! Keyword translation cache entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Ai,
    Curated,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Ai => "ai",
            Provenance::Curated => "curated",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(Provenance::Ai),
            "curated" => Ok(Provenance::Curated),
            other => Err(AppError::validation(
                format!("unknown provenance '{other}'"),
                Some("provenance"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationEntry {
    /// Normalized keyword, unique
    pub key: String,
    pub fr: Option<String>,
    pub nl: Option<String>,
    pub en: Option<String>,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TranslationEntry {
    pub fn get(&self, lang: &str) -> Option<&str> {
        match lang {
            "fr" => self.fr.as_deref(),
            "nl" => self.nl.as_deref(),
            "en" => self.en.as_deref(),
            _ => None,
        }
    }

    pub fn set(&mut self, lang: &str, text: String) {
        match lang {
            "fr" => self.fr = Some(text),
            "nl" => self.nl = Some(text),
            "en" => self.en = Some(text),
            _ => {}
        }
    }
}

/// Lowercase, trimmed, inner whitespace collapsed.
pub fn normalize_keyword(keyword: &str) -> String {
    keyword
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
