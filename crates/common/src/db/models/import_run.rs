//! Import run entity

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use super::{from_json, to_json};
use crate::errors::Result as AppResult;
use crate::model::ImportRun;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "import_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub source: String,

    pub started_at: DateTimeWithTimeZone,

    pub completed_at: Option<DateTimeWithTimeZone>,

    pub created_count: i32,

    pub updated_count: i32,

    pub error_count: i32,

    /// Structured per-item errors
    #[sea_orm(column_type = "JsonBinary")]
    pub errors: Json,

    #[sea_orm(column_type = "JsonBinary")]
    pub search_criteria: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_domain(self) -> AppResult<ImportRun> {
        Ok(ImportRun {
            id: self.id,
            source: self.source,
            started_at: self.started_at.with_timezone(&Utc),
            completed_at: self.completed_at.map(|d| d.with_timezone(&Utc)),
            created_count: self.created_count,
            updated_count: self.updated_count,
            error_count: self.error_count,
            errors: from_json(self.errors)?,
            search_criteria: self.search_criteria,
        })
    }
}

impl ActiveModel {
    pub fn from_domain(run: &ImportRun) -> AppResult<Self> {
        Ok(Self {
            id: Set(run.id),
            source: Set(run.source.clone()),
            started_at: Set(run.started_at.into()),
            completed_at: Set(run.completed_at.map(Into::into)),
            created_count: Set(run.created_count),
            updated_count: Set(run.updated_count),
            error_count: Set(run.error_count),
            errors: Set(to_json(&run.errors)?),
            search_criteria: Set(run.search_criteria.clone()),
        })
    }
}
