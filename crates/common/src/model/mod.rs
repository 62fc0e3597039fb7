//! Domain model shared by ingestion and the enrichment worker

pub mod codes;
mod document;
mod identity;
mod import_run;
mod notice;
mod payload;
mod translation;
mod watchlist;

pub use document::{DocumentState, DownloadOutcome, DownloadedContent, NoticeDocument, Stage};
pub use identity::IdentityKey;
pub use import_run::{ImportErrorEntry, ImportRun};
pub use notice::{is_award_notice_type, CanonicalNotice, NoticeDetail, NoticeLot, NoticeStatus};
pub use payload::{AwardFields, DocumentRef, LotPayload, NormalizedPayload};
pub use translation::{normalize_keyword, Provenance, TranslationEntry};
pub use watchlist::{MatchUpsert, Watchlist, WatchlistMatch};
