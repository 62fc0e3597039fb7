//! End-to-end ingestion scenarios against the in-memory store.

mod support;

use chrono::{Duration, Utc};
use std::sync::Arc;

use tenderwatch_common::ai::MockAi;
use tenderwatch_common::db::{MemoryStore, Store};
use tenderwatch_common::model::{IdentityKey, MatchUpsert};
use tenderwatch_common::queue::Signal;
use tenderwatch_ingestion::{merge, BatchItem};

use support::{harness, harness_on, harness_with, road_works, set, watchlist, ScriptedStore};

#[tokio::test]
async fn scenario_a_create_and_match() {
    let h = harness();
    let mut wl = watchlist("Belgian roads");
    wl.cpv_prefixes = set(&["4523"]);
    wl.countries = set(&["BE"]);
    h.store.insert_watchlist(wl.clone());

    let run = h
        .processor
        .ingest_batch("TED", serde_json::Value::Null, vec![BatchItem::from(road_works())])
        .await
        .unwrap();
    assert_eq!(run.created_count, 1);
    assert_eq!(h.store.notice_count(), 1);

    let matches = h.store.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].watchlist_id, wl.id);
    assert!(matches[0].relevance_score >= 100);

    let notified = h
        .signals
        .signals()
        .into_iter()
        .filter(|s| matches!(s, Signal::MatchUpserted { created: true, .. }))
        .count();
    assert_eq!(notified, 1);
}

#[tokio::test]
async fn scenario_b_amended_title() {
    let h = harness();
    let first = h.processor.ingest_one(road_works(), &[]).await.unwrap();

    // A summary generated in the meantime
    h.store
        .store_notice_summary(first.notice.id, first.notice.version, "Resurfacing", Utc::now())
        .await
        .unwrap();

    let mut amended = road_works();
    amended.title = Some("Road works (amended)".into());
    let second = h.processor.ingest_one(amended, &[]).await.unwrap();

    assert_eq!(second.notice.id, first.notice.id);
    assert!(second.notice.last_seen_at >= first.notice.last_seen_at);
    assert!(second.changes.contains("title"));

    let stored = h.store.get_notice(first.notice.id).await.unwrap().unwrap();
    assert_eq!(stored.title, "Road works (amended)");
    assert!(stored.ai_summary.is_none());
    assert!(stored.ai_summary_generated_at.is_none());
    assert_eq!(h.signals.reindexed(first.notice.id), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_d_concurrent_sightings_union() {
    let h = Arc::new(harness());

    let mut a = road_works();
    a.cpv_additional = vec!["45233100".into(), "45233200".into()];
    let mut b = road_works();
    b.cpv_additional = vec!["45233300".into()];

    let (ha, hb) = (h.clone(), h.clone());
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { ha.processor.ingest_one(a, &[]).await }),
        tokio::spawn(async move { hb.processor.ingest_one(b, &[]).await }),
    );
    let (ra, rb) = (ra.unwrap().unwrap(), rb.unwrap().unwrap());
    assert_eq!(ra.notice.id, rb.notice.id);
    assert!(ra.created ^ rb.created);

    let key = IdentityKey::resolve("TED", "1").unwrap();
    let stored = h.store.find_notice(&key).await.unwrap().unwrap();
    let codes: std::collections::BTreeSet<_> = stored.cpv_additional.iter().cloned().collect();
    assert_eq!(codes, set(&["45233100", "45233200", "45233300"]));
}

#[tokio::test]
async fn lost_version_race_is_retried_with_fresh_read() {
    let store = Arc::new(MemoryStore::new());

    let mut rival = road_works();
    rival.cpv_additional = vec!["45233300".into()];
    let backend = Arc::new(ScriptedStore::racing(store.clone(), rival));
    let h = harness_on(store.clone(), backend, MockAi::new());

    let mut mine = road_works();
    mine.cpv_additional = vec!["45233100".into()];
    let ingested = h.processor.ingest_one(mine, &[]).await.unwrap();

    // The rival created the notice, so this sighting became an update
    assert!(!ingested.created);
    assert_eq!(store.notice_count(), 1);
    assert_eq!(ingested.notice.cpv_additional, vec!["45233300", "45233100"]);
}

#[tokio::test]
async fn sighting_after_failed_detail_write_is_matched() {
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(ScriptedStore::failing_detail_writes(store.clone(), 1));
    let h = harness_on(store.clone(), backend, MockAi::new());

    let mut wl = watchlist("Belgian roads");
    wl.countries = set(&["BE"]);
    store.insert_watchlist(wl.clone());

    // The notice is saved, then the detail write fails
    let first = h
        .processor
        .ingest_batch("TED", serde_json::Value::Null, vec![BatchItem::from(road_works())])
        .await
        .unwrap();
    assert_eq!(first.error_count, 1);
    assert_eq!(store.notice_count(), 1);
    assert!(store.matches().is_empty());

    // Nothing changed on the notice, but it has never been matched
    let second = h
        .processor
        .ingest_batch("TED", serde_json::Value::Null, vec![BatchItem::from(road_works())])
        .await
        .unwrap();
    assert_eq!(second.updated_count, 1);
    assert_eq!(second.error_count, 0);

    let matches = store.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].watchlist_id, wl.id);
    assert_eq!(matches[0].matched_on, "country: BE");

    let notified = h
        .signals
        .signals()
        .into_iter()
        .filter(|s| matches!(s, Signal::MatchUpserted { created: true, .. }))
        .count();
    assert_eq!(notified, 1);
}

#[tokio::test]
async fn unchanged_sighting_does_not_renotify() {
    let h = harness();
    let mut wl = watchlist("belgium");
    wl.countries = set(&["BE"]);

    h.processor.ingest_one(road_works(), &[wl.clone()]).await.unwrap();
    h.processor.ingest_one(road_works(), &[wl.clone()]).await.unwrap();

    assert_eq!(h.store.matches().len(), 1);
    let upserts = h
        .signals
        .signals()
        .into_iter()
        .filter(|s| matches!(s, Signal::MatchUpserted { .. }))
        .count();
    assert_eq!(upserts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_amendments_leave_score_of_final_text() {
    let h = Arc::new(harness());
    let mut wl = watchlist("roads");
    wl.keywords = set(&["road"]);

    // Alternate between a keyword hit in the title and one in the description
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let h = h.clone();
            let wl = wl.clone();
            let mut p = road_works();
            p.description = Some("Road works on the N4".into());
            if i % 2 == 1 {
                p.title = Some(format!("Resurfacing of the N4, phase {i}"));
            } else {
                p.title = Some(format!("Road works, phase {i}"));
            }
            tokio::spawn(async move { h.processor.ingest_one(p, &[wl]).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let key = IdentityKey::resolve("TED", "1").unwrap();
    let stored = h.store.find_notice(&key).await.unwrap().unwrap();
    let expected = h
        .processor
        .matcher()
        .evaluate_one(&stored, &wl)
        .await
        .unwrap()
        .unwrap();

    let persisted = h.store.find_match(wl.id, stored.id).await.unwrap().unwrap();
    assert_eq!(persisted.relevance_score, expected.relevance_score);
    assert_eq!(persisted.matched_on, expected.matched_on);
    assert_eq!(h.store.matches().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_sightings_lose_nothing() {
    let h = harness();
    let items: Vec<BatchItem> = (0..20)
        .map(|i| {
            let mut p = road_works();
            p.nuts = vec![format!("BE{:03}", i)];
            BatchItem::from(p)
        })
        .collect();

    let run = h
        .processor
        .ingest_batch("TED", serde_json::Value::Null, items)
        .await
        .unwrap();
    assert_eq!(run.created_count, 1);
    assert_eq!(run.updated_count, 19);
    assert_eq!(run.error_count, 0);

    let key = IdentityKey::resolve("TED", "1").unwrap();
    let stored = h.store.find_notice(&key).await.unwrap().unwrap();
    assert_eq!(stored.nuts_codes.len(), 20);
}

#[tokio::test]
async fn reingesting_same_payload_is_idempotent() {
    let h = harness();
    let first = h.processor.ingest_one(road_works(), &[]).await.unwrap();
    let second = h.processor.ingest_one(road_works(), &[]).await.unwrap();

    assert!(second.changes.is_empty());
    let mut expected = first.notice.clone();
    expected.last_seen_at = second.notice.last_seen_at;
    expected.version = second.notice.version;
    assert_eq!(second.notice, expected);
}

#[tokio::test]
async fn subset_reingest_keeps_codes() {
    let h = harness();
    let mut full = road_works();
    full.cpv_additional = vec!["45233100".into(), "45233200".into()];
    full.nuts = vec!["BE100".into(), "BE211".into()];
    h.processor.ingest_one(full, &[]).await.unwrap();

    let mut subset = road_works();
    subset.cpv_additional = vec!["45233200".into()];
    subset.nuts = vec!["BE211".into()];
    let again = h.processor.ingest_one(subset, &[]).await.unwrap();

    assert_eq!(again.notice.cpv_additional, vec!["45233100", "45233200"]);
    assert_eq!(again.notice.nuts_codes, set(&["BE100", "BE211"]));
}

#[tokio::test]
async fn first_seen_never_moves() {
    let store = MemoryStore::new();
    let t0 = Utc::now() - Duration::days(30);
    let created = merge(None, &road_works(), t0).unwrap().notice;
    store.save_notice(&created, None).await.unwrap();

    let mut current = created.clone();
    for day in 1..10 {
        let mut p = road_works();
        p.estimated_value = Some(500_000.0 + day as f64);
        let next = merge(Some(current.clone()), &p, t0 + Duration::days(day)).unwrap().notice;
        store.save_notice(&next, Some(current.version)).await.unwrap();
        current = next;
    }

    let stored = store.get_notice(created.id).await.unwrap().unwrap();
    assert_eq!(stored.first_seen_at, t0);
    assert!(stored.first_seen_at <= stored.last_seen_at);
}

#[tokio::test]
async fn rematch_never_duplicates() {
    let h = harness();
    let mut wl = watchlist("roads");
    wl.keywords = set(&["road"]);
    h.store.insert_watchlist(wl.clone());

    let ingested = h
        .processor
        .ingest_one(road_works(), &[wl.clone()])
        .await
        .unwrap();

    for _ in 0..3 {
        let results = h.processor.matcher().rematch(ingested.notice.id).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].upsert, MatchUpsert::Unchanged);
    }
    assert_eq!(h.store.matches().len(), 1);
}

#[tokio::test]
async fn translated_keyword_matches_french_notice() {
    let ai = MockAi::new().with_translation("road works", "fr", "travaux routiers");
    let h = harness_with(ai);

    let mut wl = watchlist("roads");
    wl.keywords = set(&["Road Works"]);
    h.store.insert_watchlist(wl.clone());

    let mut p = road_works();
    p.source_id = "fr-1".into();
    p.title = Some("Travaux routiers à Namur".into());
    p.languages = vec!["FRA".into()];

    h.processor
        .ingest_batch("TED", serde_json::Value::Null, vec![BatchItem::from(p)])
        .await
        .unwrap();

    let matches = h.store.matches();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].matched_on, "keyword: road works");
    assert_eq!(h.ai.translate_calls(), 1);
    assert!(h.store.find_translation("road works").await.unwrap().is_some());
}

#[tokio::test]
async fn deleting_notice_cascades_matches() {
    let h = harness();
    let mut wl = watchlist("belgium");
    wl.countries = set(&["BE"]);
    let ingested = h.processor.ingest_one(road_works(), &[wl.clone()]).await.unwrap();
    assert_eq!(h.store.matches().len(), 1);

    assert!(h.store.delete_notice(ingested.notice.id).await.unwrap());
    assert!(h.store.matches().is_empty());
}
