//! Canonical notice entity

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use super::{from_json, to_json};
use crate::errors::Result as AppResult;
use crate::model::CanonicalNotice;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notices")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique together with `source_id`
    #[sea_orm(column_type = "Text")]
    pub source: String,

    #[sea_orm(column_type = "Text")]
    pub source_id: String,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub buyer_names: Json,

    #[sea_orm(column_type = "Text", nullable)]
    pub country: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub languages: Json,

    #[sea_orm(column_type = "Text", nullable)]
    pub cpv_main: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub cpv_additional: Json,

    #[sea_orm(column_type = "JsonBinary")]
    pub nuts_codes: Json,

    #[sea_orm(column_type = "JsonBinary")]
    pub keywords: Json,

    #[sea_orm(column_type = "Text", nullable)]
    pub procedure_type: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub notice_type: Option<String>,

    pub estimated_value: Option<f64>,

    #[sea_orm(column_type = "Text", nullable)]
    pub currency: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub winner_name: Option<String>,

    pub award_value: Option<f64>,

    pub award_date: Option<Date>,

    pub tenders_received: Option<i32>,

    #[sea_orm(column_type = "Text", nullable)]
    pub award_criteria: Option<String>,

    pub published_at: Option<Date>,

    pub deadline: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub first_seen_at: DateTimeWithTimeZone,

    pub last_seen_at: DateTimeWithTimeZone,

    #[sea_orm(column_type = "JsonBinary")]
    pub raw_payload: Json,

    #[sea_orm(column_type = "Text", nullable)]
    pub ai_summary: Option<String>,

    pub ai_summary_generated_at: Option<DateTimeWithTimeZone>,

    pub version: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::notice_lot::Entity")]
    Lots,

    #[sea_orm(has_many = "super::notice_document::Entity")]
    Documents,

    #[sea_orm(has_many = "super::notice_detail::Entity")]
    Details,
}

impl Related<super::notice_lot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lots.def()
    }
}

impl Related<super::notice_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Documents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_domain(self) -> AppResult<CanonicalNotice> {
        Ok(CanonicalNotice {
            id: self.id,
            source: self.source,
            source_id: self.source_id,
            title: self.title,
            description: self.description,
            buyer_names: from_json(self.buyer_names)?,
            country: self.country,
            languages: from_json(self.languages)?,
            cpv_main: self.cpv_main,
            cpv_additional: from_json(self.cpv_additional)?,
            nuts_codes: from_json(self.nuts_codes)?,
            keywords: from_json(self.keywords)?,
            procedure_type: self.procedure_type,
            notice_type: self.notice_type,
            estimated_value: self.estimated_value,
            currency: self.currency,
            winner_name: self.winner_name,
            award_value: self.award_value,
            award_date: self.award_date,
            tenders_received: self.tenders_received,
            award_criteria: self.award_criteria,
            published_at: self.published_at,
            deadline: self.deadline.map(|d| d.with_timezone(&Utc)),
            status: self.status.parse()?,
            first_seen_at: self.first_seen_at.with_timezone(&Utc),
            last_seen_at: self.last_seen_at.with_timezone(&Utc),
            raw_payload: self.raw_payload,
            ai_summary: self.ai_summary,
            ai_summary_generated_at: self.ai_summary_generated_at.map(|d| d.with_timezone(&Utc)),
            version: self.version,
        })
    }
}

impl ActiveModel {
    pub fn from_domain(notice: &CanonicalNotice) -> AppResult<Self> {
        Ok(Self {
            id: Set(notice.id),
            source: Set(notice.source.clone()),
            source_id: Set(notice.source_id.clone()),
            title: Set(notice.title.clone()),
            description: Set(notice.description.clone()),
            buyer_names: Set(to_json(&notice.buyer_names)?),
            country: Set(notice.country.clone()),
            languages: Set(to_json(&notice.languages)?),
            cpv_main: Set(notice.cpv_main.clone()),
            cpv_additional: Set(to_json(&notice.cpv_additional)?),
            nuts_codes: Set(to_json(&notice.nuts_codes)?),
            keywords: Set(to_json(&notice.keywords)?),
            procedure_type: Set(notice.procedure_type.clone()),
            notice_type: Set(notice.notice_type.clone()),
            estimated_value: Set(notice.estimated_value),
            currency: Set(notice.currency.clone()),
            winner_name: Set(notice.winner_name.clone()),
            award_value: Set(notice.award_value),
            award_date: Set(notice.award_date),
            tenders_received: Set(notice.tenders_received),
            award_criteria: Set(notice.award_criteria.clone()),
            published_at: Set(notice.published_at),
            deadline: Set(notice.deadline.map(Into::into)),
            status: Set(notice.status.as_str().to_string()),
            first_seen_at: Set(notice.first_seen_at.into()),
            last_seen_at: Set(notice.last_seen_at.into()),
            raw_payload: Set(notice.raw_payload.clone()),
            ai_summary: Set(notice.ai_summary.clone()),
            ai_summary_generated_at: Set(notice.ai_summary_generated_at.map(Into::into)),
            version: Set(notice.version),
        })
    }
}
