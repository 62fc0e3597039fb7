//! Identity Resolver
//!
//! A notice is identified by the source that published it and the identifier
//! that source assigned. Sources are upper-cased so `ted` and `TED` collapse.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    source: String,
    source_id: String,
}

impl IdentityKey {
    /// Derive the identity key. Fails only when either part is blank.
    pub fn resolve(source: &str, source_id: &str) -> Result<Self> {
        let source = source.trim();
        let source_id = source_id.trim();

        if source.is_empty() {
            return Err(AppError::validation("source is empty", Some("source")));
        }
        if source_id.is_empty() {
            return Err(AppError::validation("source_id is empty", Some("source_id")));
        }

        Ok(Self {
            source: source.to_uppercase(),
            source_id: source_id.to_string(),
        })
    }

    /// Rebuild a key from columns that were written through `resolve`.
    pub(crate) fn from_stored(source: &str, source_id: &str) -> Self {
        Self {
            source: source.to_string(),
            source_id: source_id.to_string(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.source_id)
    }
}
