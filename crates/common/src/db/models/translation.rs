//! Keyword translation cache entity

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::errors::Result as AppResult;
use crate::model::TranslationEntry;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "translation_cache")]
pub struct Model {
    /// Normalized keyword
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub key: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub fr: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub nl: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub en: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub provenance: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_domain(self) -> AppResult<TranslationEntry> {
        Ok(TranslationEntry {
            key: self.key,
            fr: self.fr,
            nl: self.nl,
            en: self.en,
            provenance: self.provenance.parse()?,
            created_at: self.created_at.with_timezone(&Utc),
            updated_at: self.updated_at.with_timezone(&Utc),
        })
    }
}

impl From<&TranslationEntry> for ActiveModel {
    fn from(entry: &TranslationEntry) -> Self {
        Self {
            key: Set(entry.key.clone()),
            fr: Set(entry.fr.clone()),
            nl: Set(entry.nl.clone()),
            en: Set(entry.en.clone()),
            provenance: Set(entry.provenance.as_str().to_string()),
            created_at: Set(entry.created_at.into()),
            updated_at: Set(entry.updated_at.into()),
        }
    }
}
