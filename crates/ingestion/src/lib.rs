//! TenderWatch Ingestion
//!
//! Turns connector payloads into canonical notices:
//! - Identity resolution and the canonical merge (`merge`)
//! - Import run bookkeeping (`tracker`)
//! - Watchlist matching with the keyword translation cache (`matching`,
//!   `translation`)
//! - The batch processor tying them together (`processor`)

pub mod errors;
pub mod input;
pub mod matching;
pub mod merge;
pub mod processor;
pub mod tracker;
pub mod translation;

pub use errors::IngestionError;
pub use matching::{MatchResult, MatchingEngine, ScoredMatch};
pub use merge::{merge, merge_lots, Changeset, MergeOutcome, MergeStrategy, MERGE_POLICY};
pub use processor::{BatchItem, IngestedNotice, IngestionProcessor};
pub use tracker::{ImportRunTracker, Outcome, RunHandle};
pub use translation::TranslationGateway;

use std::sync::Arc;
use tenderwatch_common::ai::Translator;
use tenderwatch_common::config::AppConfig;
use tenderwatch_common::db::Store;
use tenderwatch_common::queue::SignalSink;

/// Wire the processor from configuration and its collaborators.
pub fn build_processor(
    config: &AppConfig,
    store: Arc<dyn Store>,
    signals: Arc<dyn SignalSink>,
    translator: Arc<dyn Translator>,
) -> IngestionProcessor {
    let gateway = TranslationGateway::new(
        store.clone(),
        translator,
        config.matching.translation_languages.clone(),
        config.matching.translation_retry(),
        config.translation_timeout(),
    );
    let matcher = MatchingEngine::new(store.clone(), gateway, signals.clone(), config.matching.clone());
    IngestionProcessor::new(store, signals, matcher, config.ingestion.clone())
}
