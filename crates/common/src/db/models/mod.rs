//! SeaORM entity models
//!
//! Set- and list-valued columns are JSONB arrays. Each entity converts to and
//! from its domain type in `crate::model`.

mod import_run;
mod notice;
mod notice_detail;
mod notice_document;
mod notice_lot;
mod translation;
mod watchlist;
mod watchlist_match;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::Result;

pub use notice::{
    Entity as NoticeEntity,
    Model as NoticeRow,
    ActiveModel as NoticeActiveModel,
    Column as NoticeColumn,
};

pub use notice_detail::{
    Entity as NoticeDetailEntity,
    Model as NoticeDetailRow,
    ActiveModel as NoticeDetailActiveModel,
    Column as NoticeDetailColumn,
};

pub use notice_lot::{
    Entity as NoticeLotEntity,
    Model as NoticeLotRow,
    ActiveModel as NoticeLotActiveModel,
    Column as NoticeLotColumn,
};

pub use notice_document::{
    Entity as NoticeDocumentEntity,
    Model as NoticeDocumentRow,
    ActiveModel as NoticeDocumentActiveModel,
    Column as NoticeDocumentColumn,
};

pub use watchlist::{
    Entity as WatchlistEntity,
    Model as WatchlistRow,
    ActiveModel as WatchlistActiveModel,
    Column as WatchlistColumn,
};

pub use watchlist_match::{
    Entity as WatchlistMatchEntity,
    Model as WatchlistMatchRow,
    ActiveModel as WatchlistMatchActiveModel,
    Column as WatchlistMatchColumn,
};

pub use import_run::{
    Entity as ImportRunEntity,
    Model as ImportRunRow,
    ActiveModel as ImportRunActiveModel,
    Column as ImportRunColumn,
};

pub use translation::{
    Entity as TranslationEntity,
    Model as TranslationRow,
    ActiveModel as TranslationActiveModel,
    Column as TranslationColumn,
};

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}
