//! Latest raw payload per (notice, source)

use chrono::Utc;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use crate::model::NoticeDetail;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notice_details")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub notice_id: Uuid,

    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub source: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub raw_payload: Json,

    pub fetched_at: DateTimeWithTimeZone,
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

impl From<Model> for NoticeDetail {
    fn from(row: Model) -> Self {
        Self {
            notice_id: row.notice_id,
            source: row.source,
            raw_payload: row.raw_payload,
            fetched_at: row.fetched_at.with_timezone(&Utc),
        }
    }
}

impl From<&NoticeDetail> for ActiveModel {
    fn from(detail: &NoticeDetail) -> Self {
        Self {
            notice_id: Set(detail.notice_id),
            source: Set(detail.source.clone()),
            raw_payload: Set(detail.raw_payload.clone()),
            fetched_at: Set(detail.fetched_at.into()),
        }
    }
}
