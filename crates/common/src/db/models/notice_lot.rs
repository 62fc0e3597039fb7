//! Lot entity, owned by a notice

use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

use super::{from_json, to_json};
use crate::errors::Result as AppResult;
use crate::model::NoticeLot;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notice_lots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub notice_id: Uuid,

    /// Unique per notice
    #[sea_orm(column_type = "Text")]
    pub lot_ref: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub cpv_codes: Json,

    #[sea_orm(column_type = "JsonBinary")]
    pub nuts_codes: Json,

    pub estimated_value: Option<f64>,
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
    pub fn into_domain(self) -> AppResult<NoticeLot> {
        Ok(NoticeLot {
            id: self.id,
            notice_id: self.notice_id,
            lot_ref: self.lot_ref,
            title: self.title,
            description: self.description,
            cpv_codes: from_json(self.cpv_codes)?,
            nuts_codes: from_json(self.nuts_codes)?,
            estimated_value: self.estimated_value,
        })
    }
}

impl ActiveModel {
    pub fn from_domain(lot: &NoticeLot) -> AppResult<Self> {
        Ok(Self {
            id: Set(lot.id),
            notice_id: Set(lot.notice_id),
            lot_ref: Set(lot.lot_ref.clone()),
            title: Set(lot.title.clone()),
            description: Set(lot.description.clone()),
            cpv_codes: Set(to_json(&lot.cpv_codes)?),
            nuts_codes: Set(to_json(&lot.nuts_codes)?),
            estimated_value: Set(lot.estimated_value),
        })
    }
}
