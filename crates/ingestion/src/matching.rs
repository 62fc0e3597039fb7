//! Watchlist Matching Engine
//!
//! A notice matches a watchlist when every specified dimension is satisfied.
//! Dimensions are checked in a fixed order (country, CPV, source, value,
//! keywords), which is also the order `matched_on` is chosen in. Keywords go
//! last so translations are only fetched for otherwise matching pairs.
//!
//! Scoring is a pure function of the notice, the watchlist and the cached
//! translations, so re-matching unchanged inputs never moves a score.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use tenderwatch_common::config::MatchingConfig;
use tenderwatch_common::db::Store;
use tenderwatch_common::errors::{AppError, Result};
use tenderwatch_common::metrics;
use tenderwatch_common::model::codes::{cpv_prefix_depth, normalize_country, normalize_cpv};
use tenderwatch_common::model::{normalize_keyword, CanonicalNotice, MatchUpsert, Watchlist, WatchlistMatch};
use tenderwatch_common::queue::{Signal, SignalSink};

use crate::translation::TranslationGateway;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMatch {
    pub watchlist_id: Uuid,
    pub notice_id: Uuid,
    pub matched_on: String,
    pub relevance_score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub scored: ScoredMatch,
    pub upsert: MatchUpsert,
}

/// Where a keyword was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hit {
    Title,
    Description,
}

#[derive(Debug, Default)]
struct KeywordHits {
    first: Option<String>,
    count: usize,
    in_title: bool,
}

fn find_in(notice_text: &NoticeText, needle: &str) -> Option<Hit> {
    if needle.is_empty() {
        None
    } else if notice_text.title.contains(needle) {
        Some(Hit::Title)
    } else if notice_text.description.contains(needle) {
        Some(Hit::Description)
    } else {
        None
    }
}

struct NoticeText {
    title: String,
    description: String,
}

impl NoticeText {
    fn of(notice: &CanonicalNotice) -> Self {
        Self {
            title: notice.title.to_lowercase(),
            description: notice.description.as_deref().unwrap_or_default().to_lowercase(),
        }
    }
}

/// Deepest watchlist prefix any of the notice's codes starts with. Ties go
/// to the lexicographically smallest prefix.
fn best_cpv_prefix(notice: &CanonicalNotice, watchlist: &Watchlist) -> Option<String> {
    let mut best: Option<String> = None;
    for prefix in watchlist.cpv_prefixes.iter().filter_map(|p| normalize_cpv(p)) {
        if !notice.cpv_codes().any(|code| code.starts_with(&prefix)) {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => {
                let (depth, current_depth) = (cpv_prefix_depth(&prefix), cpv_prefix_depth(current));
                depth > current_depth || (depth == current_depth && prefix < *current)
            }
        };
        if better {
            best = Some(prefix);
        }
    }
    best
}

fn value_in_range(value: Option<f64>, watchlist: &Watchlist) -> bool {
    if !watchlist.has_value_range() {
        return true;
    }
    let Some(value) = value else {
        return false;
    };
    watchlist.min_value.map_or(true, |min| value >= min) && watchlist.max_value.map_or(true, |max| value <= max)
}

fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{:.2}", value)
    }
}

#[derive(Clone)]
pub struct MatchingEngine {
    store: Arc<dyn Store>,
    translations: TranslationGateway,
    signals: Arc<dyn SignalSink>,
    config: MatchingConfig,
}

impl MatchingEngine {
    pub fn new(
        store: Arc<dyn Store>,
        translations: TranslationGateway,
        signals: Arc<dyn SignalSink>,
        config: MatchingConfig,
    ) -> Self {
        Self {
            store,
            translations,
            signals,
            config,
        }
    }

    /// Score `notice` against every enabled watchlist.
    pub async fn evaluate(&self, notice: &CanonicalNotice, watchlists: &[Watchlist]) -> Result<Vec<ScoredMatch>> {
        let mut matches = Vec::new();
        for watchlist in watchlists {
            if let Some(scored) = self.evaluate_one(notice, watchlist).await? {
                matches.push(scored);
            }
        }
        Ok(matches)
    }

    pub async fn evaluate_one(&self, notice: &CanonicalNotice, watchlist: &Watchlist) -> Result<Option<ScoredMatch>> {
        if !watchlist.enabled || !watchlist.has_criteria() {
            return Ok(None);
        }

        let mut matched_on: Option<String> = None;

        if !watchlist.countries.is_empty() {
            let Some(country) = notice.country.as_deref() else {
                return Ok(None);
            };
            if !watchlist
                .countries
                .iter()
                .filter_map(|c| normalize_country(c))
                .any(|c| c == country)
            {
                return Ok(None);
            }
            matched_on.get_or_insert_with(|| format!("country: {}", country));
        }

        let mut cpv_depth = 0;
        if !watchlist.cpv_prefixes.is_empty() {
            let Some(prefix) = best_cpv_prefix(notice, watchlist) else {
                return Ok(None);
            };
            cpv_depth = cpv_prefix_depth(&prefix);
            matched_on.get_or_insert_with(|| format!("cpv: {}", prefix));
        }

        if !watchlist.sources.is_empty() {
            if !watchlist
                .sources
                .iter()
                .any(|s| s.trim().eq_ignore_ascii_case(&notice.source))
            {
                return Ok(None);
            }
            matched_on.get_or_insert_with(|| format!("source: {}", notice.source));
        }

        if watchlist.has_value_range() {
            if !value_in_range(notice.estimated_value, watchlist) {
                return Ok(None);
            }
            if let Some(value) = notice.estimated_value {
                matched_on.get_or_insert_with(|| format!("value: {}", format_value(value)));
            }
        }

        let mut hits = KeywordHits::default();
        if !watchlist.keywords.is_empty() {
            hits = self.keyword_hits(notice, watchlist).await?;
            let Some(first) = hits.first.as_deref() else {
                return Ok(None);
            };
            matched_on.get_or_insert_with(|| format!("keyword: {}", first));
        }

        let Some(matched_on) = matched_on else {
            return Ok(None);
        };

        Ok(Some(ScoredMatch {
            watchlist_id: watchlist.id,
            notice_id: notice.id,
            matched_on,
            relevance_score: self.score(&hits, cpv_depth),
        }))
    }

    fn score(&self, hits: &KeywordHits, cpv_depth: usize) -> i32 {
        let mut score = self.config.base_score;
        if hits.count > 1 {
            score += self.config.extra_keyword_bonus * (hits.count as i32 - 1);
        }
        if hits.in_title {
            score += self.config.title_bonus;
        }
        if cpv_depth >= 4 {
            score += self.config.cpv_precision_bonus;
        }
        score.min(self.config.max_score)
    }

    async fn keyword_hits(&self, notice: &CanonicalNotice, watchlist: &Watchlist) -> Result<KeywordHits> {
        let text = NoticeText::of(notice);
        let mut hits = KeywordHits::default();

        let mut keywords: Vec<String> = watchlist
            .keywords
            .iter()
            .map(|k| normalize_keyword(k))
            .filter(|k| !k.is_empty())
            .collect();
        keywords.sort();
        keywords.dedup();

        for keyword in keywords {
            let hit = match find_in(&text, &keyword) {
                Some(hit) => Some(hit),
                None => self.translated_hit(notice, &text, &keyword).await?,
            };

            if let Some(hit) = hit {
                hits.count += 1;
                hits.in_title |= hit == Hit::Title;
                hits.first.get_or_insert(keyword);
            }
        }

        Ok(hits)
    }

    /// Try the keyword's cached translations in the languages the notice
    /// was published in.
    async fn translated_hit(&self, notice: &CanonicalNotice, text: &NoticeText, keyword: &str) -> Result<Option<Hit>> {
        for lang in &notice.languages {
            let Some(translated) = self.translations.translation_for(keyword, lang).await? else {
                continue;
            };
            if let Some(hit) = find_in(text, &normalize_keyword(&translated)) {
                debug!(keyword, lang = %lang, translated = %translated, "Keyword matched through translation");
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    /// Evaluate and persist. Existing matches are re-scored in place; pairs
    /// that no longer match are left alone.
    #[instrument(skip(self, notice, watchlists), fields(notice_id = %notice.id))]
    pub async fn match_notice(&self, notice: &CanonicalNotice, watchlists: &[Watchlist]) -> Result<Vec<MatchResult>> {
        let scored = self.evaluate(notice, watchlists).await?;
        let mut results = Vec::with_capacity(scored.len());

        for scored in scored {
            let now = Utc::now();
            let row = WatchlistMatch {
                id: Uuid::new_v4(),
                watchlist_id: scored.watchlist_id,
                notice_id: scored.notice_id,
                matched_on: scored.matched_on.clone(),
                relevance_score: scored.relevance_score,
                created_at: now,
                updated_at: now,
            };

            let upsert = self.store.upsert_match(&row).await?;
            if upsert != MatchUpsert::Unchanged {
                let created = upsert == MatchUpsert::Created;
                metrics::record_match(created);
                self.publish(Signal::MatchUpserted {
                    watchlist_id: scored.watchlist_id,
                    notice_id: scored.notice_id,
                    relevance_score: scored.relevance_score,
                    matched_on: scored.matched_on.clone(),
                    created,
                })
                .await;
            }

            results.push(MatchResult { scored, upsert });
        }

        if !results.is_empty() {
            info!(matches = results.len(), "Notice matched watchlists");
        }

        Ok(results)
    }

    /// Re-match one stored notice against the current watchlists.
    pub async fn rematch(&self, notice_id: Uuid) -> Result<Vec<MatchResult>> {
        let notice = self
            .store
            .get_notice(notice_id)
            .await?
            .ok_or_else(|| AppError::not_found("notice", notice_id))?;
        let watchlists = self.store.enabled_watchlists().await?;
        self.match_notice(&notice, &watchlists).await
    }

    async fn publish(&self, signal: Signal) {
        if let Err(e) = self.signals.publish(&signal).await {
            warn!(kind = signal.kind(), error = %e, "Failed to publish signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use tenderwatch_common::ai::MockAi;
    use tenderwatch_common::db::MemoryStore;
    use tenderwatch_common::model::NoticeStatus;
    use tenderwatch_common::queue::MemorySignalSink;
    use tenderwatch_common::retry::RetryPolicy;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn notice() -> CanonicalNotice {
        let now = Utc::now();
        CanonicalNotice {
            id: Uuid::new_v4(),
            source: "TED".into(),
            source_id: "1".into(),
            title: "Road works".into(),
            description: Some("Resurfacing of the N4 between Namur and Arlon".into()),
            buyer_names: BTreeSet::new(),
            country: Some("BE".into()),
            languages: set(&["fr"]),
            cpv_main: Some("45233000".into()),
            cpv_additional: vec!["45233222".into()],
            nuts_codes: BTreeSet::new(),
            keywords: BTreeSet::new(),
            procedure_type: None,
            notice_type: None,
            estimated_value: Some(500_000.0),
            currency: Some("EUR".into()),
            winner_name: None,
            award_value: None,
            award_date: None,
            tenders_received: None,
            award_criteria: None,
            published_at: None,
            deadline: None,
            status: NoticeStatus::Active,
            first_seen_at: now,
            last_seen_at: now,
            raw_payload: serde_json::Value::Null,
            ai_summary: None,
            ai_summary_generated_at: None,
            version: 1,
        }
    }

    fn engine(ai: MockAi) -> (Arc<MemoryStore>, Arc<MemorySignalSink>, MatchingEngine) {
        let store = Arc::new(MemoryStore::new());
        let signals = Arc::new(MemorySignalSink::new());
        let gateway = TranslationGateway::new(
            store.clone(),
            Arc::new(ai),
            vec!["fr".into(), "nl".into(), "en".into()],
            RetryPolicy::immediate(1),
            Duration::from_millis(100),
        );
        let engine = MatchingEngine::new(store.clone(), gateway, signals.clone(), MatchingConfig::default());
        (store, signals, engine)
    }

    fn watchlist() -> Watchlist {
        Watchlist::new("roads", Utc::now())
    }

    #[tokio::test]
    async fn test_country_and_cpv_match() {
        let (_, _, engine) = engine(MockAi::new());
        let mut wl = watchlist();
        wl.countries = set(&["be"]);
        wl.cpv_prefixes = set(&["4523"]);

        let scored = engine.evaluate_one(&notice(), &wl).await.unwrap().unwrap();
        assert_eq!(scored.matched_on, "country: BE");
        assert_eq!(scored.relevance_score, 105);
    }

    #[tokio::test]
    async fn test_null_country_fails_country_constraint() {
        let (_, _, engine) = engine(MockAi::new());
        let mut wl = watchlist();
        wl.countries = set(&["BE"]);
        let mut n = notice();
        n.country = None;
        assert!(engine.evaluate_one(&n, &wl).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deepest_cpv_prefix_wins() {
        let (_, _, engine) = engine(MockAi::new());
        let mut wl = watchlist();
        wl.cpv_prefixes = set(&["45", "452332", "4523"]);
        let scored = engine.evaluate_one(&notice(), &wl).await.unwrap().unwrap();
        assert_eq!(scored.matched_on, "cpv: 452332");

        wl.cpv_prefixes = set(&["45"]);
        let shallow = engine.evaluate_one(&notice(), &wl).await.unwrap().unwrap();
        assert_eq!(shallow.relevance_score, 100);
    }

    #[tokio::test]
    async fn test_value_range() {
        let (_, _, engine) = engine(MockAi::new());
        let mut wl = watchlist();
        wl.min_value = Some(100_000.0);
        wl.max_value = Some(1_000_000.0);
        let scored = engine.evaluate_one(&notice(), &wl).await.unwrap().unwrap();
        assert_eq!(scored.matched_on, "value: 500000");

        let mut no_value = notice();
        no_value.estimated_value = None;
        assert!(engine.evaluate_one(&no_value, &wl).await.unwrap().is_none());

        wl.max_value = Some(400_000.0);
        assert!(engine.evaluate_one(&notice(), &wl).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keyword_scoring() {
        let (_, _, engine) = engine(MockAi::new());
        let mut wl = watchlist();
        wl.keywords = set(&["Road", "resurfacing", "namur", "tunnel"]);

        let scored = engine.evaluate_one(&notice(), &wl).await.unwrap().unwrap();
        assert_eq!(scored.matched_on, "keyword: namur");
        // three hits, one of them in the title
        assert_eq!(scored.relevance_score, 100 + 20 * 2 + 10);
    }

    #[tokio::test]
    async fn test_description_only_hit_has_no_title_bonus() {
        let (_, _, engine) = engine(MockAi::new());
        let mut wl = watchlist();
        wl.keywords = set(&["arlon"]);
        let scored = engine.evaluate_one(&notice(), &wl).await.unwrap().unwrap();
        assert_eq!(scored.relevance_score, 100);
    }

    #[tokio::test]
    async fn test_score_is_capped() {
        let (_, _, engine) = engine(MockAi::new());
        let mut wl = watchlist();
        wl.keywords = set(&["road", "works", "resurfacing", "n4", "namur", "arlon", "between"]);
        let scored = engine.evaluate_one(&notice(), &wl).await.unwrap().unwrap();
        assert_eq!(scored.relevance_score, 200);
    }

    #[tokio::test]
    async fn test_keyword_matches_through_translation() {
        let ai = MockAi::new().with_translation("roadworks", "fr", "travaux routiers");
        let (_, _, engine) = engine(ai);
        let mut n = notice();
        n.title = "Travaux routiers".into();
        n.description = None;

        let mut wl = watchlist();
        wl.keywords = set(&["roadworks"]);
        let scored = engine.evaluate_one(&n, &wl).await.unwrap().unwrap();
        assert_eq!(scored.matched_on, "keyword: roadworks");
        assert_eq!(scored.relevance_score, 110);
    }

    #[tokio::test]
    async fn test_translation_timeout_is_no_match() {
        let ai = MockAi::new().with_translation("roadworks", "fr", "travaux routiers");
        ai.set_delay(Duration::from_secs(2));
        let (store, _, engine) = engine(ai);
        let mut n = notice();
        n.title = "Travaux routiers".into();

        let mut wl = watchlist();
        wl.keywords = set(&["roadworks"]);
        assert!(engine.evaluate_one(&n, &wl).await.unwrap().is_none());
        assert!(store.find_translation("roadworks").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_or_disabled_watchlist_never_matches() {
        let (_, _, engine) = engine(MockAi::new());
        assert!(engine.evaluate_one(&notice(), &watchlist()).await.unwrap().is_none());

        let mut wl = watchlist();
        wl.countries = set(&["BE"]);
        wl.enabled = false;
        assert!(engine.evaluate_one(&notice(), &wl).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evaluation_is_deterministic() {
        let (_, _, engine) = engine(MockAi::new());
        let mut wl = watchlist();
        wl.keywords = set(&["road", "namur"]);
        wl.cpv_prefixes = set(&["4523"]);
        let n = notice();

        let first = engine.evaluate(&n, std::slice::from_ref(&wl)).await.unwrap();
        let second = engine.evaluate(&n, std::slice::from_ref(&wl)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_match_notice_upserts_once() {
        let (store, signals, engine) = engine(MockAi::new());
        let mut wl = watchlist();
        wl.countries = set(&["BE"]);
        let n = notice();

        let first = engine.match_notice(&n, std::slice::from_ref(&wl)).await.unwrap();
        assert_eq!(first[0].upsert, MatchUpsert::Created);

        let second = engine.match_notice(&n, std::slice::from_ref(&wl)).await.unwrap();
        assert_eq!(second[0].upsert, MatchUpsert::Unchanged);

        wl.keywords = set(&["road"]);
        let third = engine.match_notice(&n, std::slice::from_ref(&wl)).await.unwrap();
        assert_eq!(third[0].upsert, MatchUpsert::Updated);

        assert_eq!(store.matches().len(), 1);
        assert_eq!(signals.signals().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_match_is_kept() {
        let (store, _, engine) = engine(MockAi::new());
        let mut wl = watchlist();
        wl.countries = set(&["BE"]);
        let n = notice();
        engine.match_notice(&n, std::slice::from_ref(&wl)).await.unwrap();

        wl.countries = set(&["NL"]);
        let results = engine.match_notice(&n, std::slice::from_ref(&wl)).await.unwrap();
        assert!(results.is_empty());
        assert!(store.find_match(wl.id, n.id).await.unwrap().is_some());
    }
}
