//! Watchlist entity
//!
//! Rows are owned by account management; this crate only reads them.

use chrono::Utc;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::from_json;
use crate::errors::Result as AppResult;
use crate::model::Watchlist;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "watchlists")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub owner_id: Option<Uuid>,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub keywords: Json,

    #[sea_orm(column_type = "JsonBinary")]
    pub countries: Json,

    #[sea_orm(column_type = "JsonBinary")]
    pub cpv_prefixes: Json,

    #[sea_orm(column_type = "JsonBinary")]
    pub sources: Json,

    pub min_value: Option<f64>,

    pub max_value: Option<f64>,

    pub enabled: bool,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::watchlist_match::Entity")]
    Matches,
}

impl Related<super::watchlist_match::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Matches.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn into_domain(self) -> AppResult<Watchlist> {
        Ok(Watchlist {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            keywords: from_json(self.keywords)?,
            countries: from_json(self.countries)?,
            cpv_prefixes: from_json(self.cpv_prefixes)?,
            sources: from_json(self.sources)?,
            min_value: self.min_value,
            max_value: self.max_value,
            enabled: self.enabled,
            created_at: self.created_at.with_timezone(&Utc),
            updated_at: self.updated_at.with_timezone(&Utc),
        })
    }
}
