//! Notice document entity with pipeline state

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::errors::Result as AppResult;
use crate::model::NoticeDocument;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notice_documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub notice_id: Uuid,

    #[sea_orm(column_type = "Text", nullable)]
    pub lot_ref: Option<String>,

    /// Unique per notice
    #[sea_orm(column_type = "Text")]
    pub url: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub state: String,

    pub attempt_count: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub content_type: Option<String>,

    pub file_size: Option<i64>,

    #[sea_orm(column_type = "Text", nullable)]
    pub sha256: Option<String>,

    pub downloaded_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub extracted_text: Option<String>,

    pub extracted_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub ai_analysis: Option<String>,

    pub ai_analysis_generated_at: Option<DateTimeWithTimeZone>,

    pub discovered_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::notice::Entity",
        from = "Column::NoticeId",
        to = "super::notice::Column::Id",
        on_delete = "Cascade"
    )]
    Notice,
}

impl Related<super::notice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Notice.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_domain(self) -> AppResult<NoticeDocument> {
        Ok(NoticeDocument {
            id: self.id,
            notice_id: self.notice_id,
            lot_ref: self.lot_ref,
            url: self.url,
            title: self.title,
            state: self.state.parse()?,
            attempt_count: self.attempt_count,
            last_error: self.last_error,
            content_type: self.content_type,
            file_size: self.file_size,
            sha256: self.sha256,
            downloaded_at: self.downloaded_at.map(|d| d.with_timezone(&Utc)),
            extracted_text: self.extracted_text,
            extracted_at: self.extracted_at.map(|d| d.with_timezone(&Utc)),
            ai_analysis: self.ai_analysis,
            ai_analysis_generated_at: self.ai_analysis_generated_at.map(|d| d.with_timezone(&Utc)),
            discovered_at: self.discovered_at.with_timezone(&Utc),
            updated_at: self.updated_at.with_timezone(&Utc),
        })
    }
}

impl From<&NoticeDocument> for ActiveModel {
    fn from(doc: &NoticeDocument) -> Self {
        Self {
            id: Set(doc.id),
            notice_id: Set(doc.notice_id),
            lot_ref: Set(doc.lot_ref.clone()),
            url: Set(doc.url.clone()),
            title: Set(doc.title.clone()),
            state: Set(doc.state.as_str().to_string()),
            attempt_count: Set(doc.attempt_count),
            last_error: Set(doc.last_error.clone()),
            content_type: Set(doc.content_type.clone()),
            file_size: Set(doc.file_size),
            sha256: Set(doc.sha256.clone()),
            downloaded_at: Set(doc.downloaded_at.map(Into::into)),
            extracted_text: Set(doc.extracted_text.clone()),
            extracted_at: Set(doc.extracted_at.map(Into::into)),
            ai_analysis: Set(doc.ai_analysis.clone()),
            ai_analysis_generated_at: Set(doc.ai_analysis_generated_at.map(Into::into)),
            discovered_at: Set(doc.discovered_at.into()),
            updated_at: Set(doc.updated_at.into()),
        }
    }
}
