//! Canonical Merge Engine
//!
//! Reconciles an incoming payload with the stored record for its identity.
//! Every notice field has exactly one entry in [`MERGE_POLICY`]:
//!
//! | strategy    | behaviour                                                   |
//! |-------------|-------------------------------------------------------------|
//! | `Overwrite` | replaced when the incoming value is present, else untouched |
//! | `Union`     | set union, never shrinks                                    |
//! | `Immutable` | written once at creation                                    |
//! | `Bump`      | replaced on every sighting, never reported as a change      |
//! | `Derived`   | maintained by the engine from other fields                  |
//!
//! Award fields are `Overwrite`, but only once the notice type is an award type.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use tenderwatch_common::errors::{AppError, Result};
use tenderwatch_common::model::codes::{
    clean_text, normalize_country, normalize_cpv, normalize_language, normalize_list, normalize_nuts,
    normalize_set,
};
use tenderwatch_common::model::{
    normalize_keyword, CanonicalNotice, LotPayload, NormalizedPayload, NoticeLot, NoticeStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Overwrite,
    Union,
    Immutable,
    Bump,
    Derived,
}

pub const MERGE_POLICY: &[(&str, MergeStrategy)] = &[
    ("id", MergeStrategy::Immutable),
    ("source", MergeStrategy::Immutable),
    ("source_id", MergeStrategy::Immutable),
    ("first_seen_at", MergeStrategy::Immutable),
    ("title", MergeStrategy::Overwrite),
    ("description", MergeStrategy::Overwrite),
    ("country", MergeStrategy::Overwrite),
    ("cpv_main", MergeStrategy::Overwrite),
    ("procedure_type", MergeStrategy::Overwrite),
    ("notice_type", MergeStrategy::Overwrite),
    ("estimated_value", MergeStrategy::Overwrite),
    ("currency", MergeStrategy::Overwrite),
    ("published_at", MergeStrategy::Overwrite),
    ("deadline", MergeStrategy::Overwrite),
    ("status", MergeStrategy::Overwrite),
    ("winner_name", MergeStrategy::Overwrite),
    ("award_value", MergeStrategy::Overwrite),
    ("award_date", MergeStrategy::Overwrite),
    ("tenders_received", MergeStrategy::Overwrite),
    ("award_criteria", MergeStrategy::Overwrite),
    ("buyer_names", MergeStrategy::Union),
    ("languages", MergeStrategy::Union),
    ("cpv_additional", MergeStrategy::Union),
    ("nuts_codes", MergeStrategy::Union),
    ("keywords", MergeStrategy::Union),
    ("last_seen_at", MergeStrategy::Bump),
    ("raw_payload", MergeStrategy::Bump),
    ("ai_summary", MergeStrategy::Derived),
    ("ai_summary_generated_at", MergeStrategy::Derived),
    ("version", MergeStrategy::Derived),
];

pub fn strategy_for(field: &str) -> Option<MergeStrategy> {
    MERGE_POLICY
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, strategy)| *strategy)
}

/// Fields whose value changed in one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    fields: BTreeSet<&'static str>,
}

impl Changeset {
    fn record(&mut self, field: &'static str) {
        self.fields.insert(field);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().copied()
    }

    /// Title or description moved: the AI summary is stale and the search
    /// index must be refreshed.
    pub fn text_changed(&self) -> bool {
        self.contains("title") || self.contains("description")
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub notice: CanonicalNotice,
    pub changes: Changeset,
    pub created: bool,
}

fn overwrite<T: PartialEq>(changes: &mut Changeset, field: &'static str, current: &mut T, incoming: Option<T>) {
    if let Some(value) = incoming {
        if *current != value {
            *current = value;
            changes.record(field);
        }
    }
}

fn overwrite_opt<T: PartialEq>(
    changes: &mut Changeset,
    field: &'static str,
    current: &mut Option<T>,
    incoming: Option<T>,
) {
    if let Some(value) = incoming {
        if current.as_ref() != Some(&value) {
            *current = Some(value);
            changes.record(field);
        }
    }
}

fn union_set(changes: &mut Changeset, field: &'static str, current: &mut BTreeSet<String>, incoming: BTreeSet<String>) {
    let before = current.len();
    current.extend(incoming);
    if current.len() != before {
        changes.record(field);
    }
}

fn union_list(changes: &mut Changeset, field: &'static str, current: &mut Vec<String>, incoming: Vec<String>) {
    let mut grew = false;
    for code in incoming {
        if !current.contains(&code) {
            current.push(code);
            grew = true;
        }
    }
    if grew {
        changes.record(field);
    }
}

fn opt_text(value: &Option<String>) -> Option<String> {
    value.as_deref().and_then(clean_text)
}

fn blank(incoming: &NormalizedPayload, now: DateTime<Utc>) -> Result<CanonicalNotice> {
    let key = incoming.check()?;
    Ok(CanonicalNotice {
        id: Uuid::new_v4(),
        source: key.source().to_string(),
        source_id: key.source_id().to_string(),
        title: String::new(),
        description: None,
        buyer_names: BTreeSet::new(),
        country: None,
        languages: BTreeSet::new(),
        cpv_main: None,
        cpv_additional: Vec::new(),
        nuts_codes: BTreeSet::new(),
        keywords: BTreeSet::new(),
        procedure_type: None,
        notice_type: None,
        estimated_value: None,
        currency: None,
        winner_name: None,
        award_value: None,
        award_date: None,
        tenders_received: None,
        award_criteria: None,
        published_at: None,
        deadline: None,
        status: NoticeStatus::default(),
        first_seen_at: now,
        last_seen_at: now,
        raw_payload: serde_json::Value::Null,
        ai_summary: None,
        ai_summary_generated_at: None,
        version: 0,
    })
}

/// Merge `incoming` into `existing`, or create the notice when absent.
///
/// Creation requires a title. The returned notice carries the next version;
/// persist it against the version `existing` had.
pub fn merge(
    existing: Option<CanonicalNotice>,
    incoming: &NormalizedPayload,
    now: DateTime<Utc>,
) -> Result<MergeOutcome> {
    let key = incoming.check()?;
    let created = existing.is_none();

    let mut notice = match existing {
        Some(notice) => {
            if notice.identity() != key {
                return Err(AppError::validation(
                    format!("payload {} does not belong to notice {}", key, notice.identity()),
                    Some("source_id"),
                ));
            }
            notice
        }
        None => {
            if opt_text(&incoming.title).is_none() {
                return Err(AppError::MissingField {
                    field: "title".to_string(),
                });
            }
            blank(incoming, now)?
        }
    };

    let mut changes = Changeset::default();

    overwrite(&mut changes, "title", &mut notice.title, opt_text(&incoming.title));
    overwrite_opt(&mut changes, "description", &mut notice.description, opt_text(&incoming.description));
    overwrite_opt(
        &mut changes,
        "country",
        &mut notice.country,
        incoming.country.as_deref().and_then(normalize_country),
    );
    overwrite_opt(
        &mut changes,
        "cpv_main",
        &mut notice.cpv_main,
        incoming.cpv_main.as_deref().and_then(normalize_cpv),
    );
    overwrite_opt(&mut changes, "procedure_type", &mut notice.procedure_type, opt_text(&incoming.procedure_type));
    overwrite_opt(&mut changes, "notice_type", &mut notice.notice_type, opt_text(&incoming.notice_type));
    overwrite_opt(&mut changes, "estimated_value", &mut notice.estimated_value, incoming.estimated_value);
    overwrite_opt(
        &mut changes,
        "currency",
        &mut notice.currency,
        incoming.currency.as_deref().and_then(clean_text).map(|c| c.to_uppercase()),
    );
    overwrite_opt(&mut changes, "published_at", &mut notice.published_at, incoming.published_at);
    overwrite_opt(&mut changes, "deadline", &mut notice.deadline, incoming.deadline);
    overwrite(&mut changes, "status", &mut notice.status, incoming.status);

    union_set(
        &mut changes,
        "buyer_names",
        &mut notice.buyer_names,
        normalize_set(&incoming.buyer_names, clean_text),
    );
    union_set(
        &mut changes,
        "languages",
        &mut notice.languages,
        normalize_set(&incoming.languages, normalize_language),
    );
    union_list(
        &mut changes,
        "cpv_additional",
        &mut notice.cpv_additional,
        normalize_list(&incoming.cpv_additional, normalize_cpv),
    );
    union_set(&mut changes, "nuts_codes", &mut notice.nuts_codes, normalize_set(&incoming.nuts, normalize_nuts));
    union_set(
        &mut changes,
        "keywords",
        &mut notice.keywords,
        normalize_set(&incoming.keywords, |k| Some(normalize_keyword(k)).filter(|k| !k.is_empty())),
    );

    if let Some(award) = incoming.award.as_ref().filter(|_| notice.is_award_notice()) {
        overwrite_opt(&mut changes, "winner_name", &mut notice.winner_name, opt_text(&award.winner_name));
        overwrite_opt(&mut changes, "award_value", &mut notice.award_value, award.award_value);
        overwrite_opt(&mut changes, "award_date", &mut notice.award_date, award.award_date);
        overwrite_opt(&mut changes, "tenders_received", &mut notice.tenders_received, award.tenders_received);
        overwrite_opt(&mut changes, "award_criteria", &mut notice.award_criteria, opt_text(&award.award_criteria));
    }

    if changes.text_changed() {
        notice.ai_summary = None;
        notice.ai_summary_generated_at = None;
    }

    notice.last_seen_at = now.max(notice.first_seen_at);
    notice.raw_payload = incoming.snapshot();
    notice.version += 1;

    Ok(MergeOutcome {
        notice,
        changes,
        created,
    })
}

/// Lots to write after merging `incoming` by `lot_ref`. Unchanged lots are
/// left out; new lots get fresh ids.
pub fn merge_lots(notice_id: Uuid, existing: &[NoticeLot], incoming: &[LotPayload]) -> Vec<NoticeLot> {
    let mut working: BTreeMap<String, (NoticeLot, bool)> = existing
        .iter()
        .map(|lot| (lot.lot_ref.clone(), (lot.clone(), false)))
        .collect();

    for payload in incoming {
        let Some(lot_ref) = clean_text(&payload.lot_ref) else {
            continue;
        };

        let (lot, dirty) = working.entry(lot_ref.clone()).or_insert_with(|| {
            (
                NoticeLot {
                    id: Uuid::new_v4(),
                    notice_id,
                    lot_ref,
                    title: None,
                    description: None,
                    cpv_codes: Vec::new(),
                    nuts_codes: BTreeSet::new(),
                    estimated_value: None,
                },
                true,
            )
        });

        let mut changes = Changeset::default();
        overwrite_opt(&mut changes, "title", &mut lot.title, opt_text(&payload.title));
        overwrite_opt(&mut changes, "description", &mut lot.description, opt_text(&payload.description));
        overwrite_opt(&mut changes, "estimated_value", &mut lot.estimated_value, payload.estimated_value);
        union_list(
            &mut changes,
            "cpv_codes",
            &mut lot.cpv_codes,
            normalize_list(&payload.cpv_codes, normalize_cpv),
        );
        union_set(
            &mut changes,
            "nuts_codes",
            &mut lot.nuts_codes,
            normalize_set(&payload.nuts_codes, normalize_nuts),
        );

        *dirty |= !changes.is_empty();
    }

    working
        .into_values()
        .filter_map(|(lot, dirty)| dirty.then_some(lot))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tenderwatch_common::model::AwardFields;

    fn payload() -> NormalizedPayload {
        NormalizedPayload {
            source: "TED".into(),
            source_id: "1".into(),
            title: Some("Road works".into()),
            cpv_main: Some("45233000".into()),
            cpv_additional: vec!["45233100".into()],
            nuts: vec!["BE100".into()],
            country: Some("BE".into()),
            estimated_value: Some(500_000.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_policy_covers_every_field() {
        let notice = merge(None, &payload(), Utc::now()).unwrap().notice;
        let json = serde_json::to_value(&notice).unwrap();
        for field in json.as_object().unwrap().keys() {
            assert!(strategy_for(field).is_some(), "no merge strategy for {field}");
        }
        assert_eq!(json.as_object().unwrap().len(), MERGE_POLICY.len());
    }

    #[test]
    fn test_create_sets_seen_timestamps() {
        let now = Utc::now();
        let outcome = merge(None, &payload(), now).unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.notice.first_seen_at, now);
        assert_eq!(outcome.notice.last_seen_at, now);
        assert_eq!(outcome.notice.version, 1);
        assert!(outcome.changes.contains("title"));
    }

    #[test]
    fn test_create_requires_title() {
        let mut p = payload();
        p.title = Some("   ".into());
        assert!(matches!(merge(None, &p, Utc::now()), Err(AppError::MissingField { .. })));
    }

    #[test]
    fn test_second_merge_is_idempotent() {
        let t0 = Utc::now();
        let first = merge(None, &payload(), t0).unwrap().notice;
        let second = merge(Some(first.clone()), &payload(), t0 + Duration::hours(1)).unwrap();

        assert!(second.changes.is_empty());
        assert!(!second.created);
        assert_eq!(second.notice.last_seen_at, t0 + Duration::hours(1));

        let mut expected = first;
        expected.last_seen_at = second.notice.last_seen_at;
        expected.version = second.notice.version;
        assert_eq!(second.notice, expected);
    }

    #[test]
    fn test_partial_payload_never_nulls() {
        let t0 = Utc::now();
        let first = merge(None, &payload(), t0).unwrap().notice;

        let partial = NormalizedPayload {
            source: "ted".into(),
            source_id: "1".into(),
            ..Default::default()
        };
        let second = merge(Some(first), &partial, t0).unwrap().notice;
        assert_eq!(second.title, "Road works");
        assert_eq!(second.estimated_value, Some(500_000.0));
        assert_eq!(second.country.as_deref(), Some("BE"));
    }

    #[test]
    fn test_arrays_only_grow() {
        let t0 = Utc::now();
        let mut first_payload = payload();
        first_payload.cpv_additional = vec!["45233100".into(), "45233200".into()];
        let first = merge(None, &first_payload, t0).unwrap().notice;

        let mut subset = payload();
        subset.cpv_additional = vec!["45233200-1".into()];
        subset.nuts = vec![];
        let second = merge(Some(first), &subset, t0).unwrap();

        assert_eq!(second.notice.cpv_additional, vec!["45233100", "45233200"]);
        assert!(second.notice.nuts_codes.contains("BE100"));
        assert!(!second.changes.contains("cpv_additional"));
    }

    #[test]
    fn test_title_change_clears_summary() {
        let t0 = Utc::now();
        let mut first = merge(None, &payload(), t0).unwrap().notice;
        first.ai_summary = Some("old".into());
        first.ai_summary_generated_at = Some(t0);

        let mut amended = payload();
        amended.title = Some("Road works (amended)".into());
        let second = merge(Some(first.clone()), &amended, t0 + Duration::minutes(5)).unwrap();

        assert_eq!(second.notice.id, first.id);
        assert!(second.changes.contains("title"));
        assert!(second.changes.text_changed());
        assert!(second.notice.ai_summary.is_none());
        assert!(second.notice.ai_summary_generated_at.is_none());
    }

    #[test]
    fn test_first_seen_is_immutable() {
        let t0 = Utc::now();
        let mut notice = merge(None, &payload(), t0).unwrap().notice;
        for hours in 1..5 {
            let mut p = payload();
            p.title = Some(format!("Road works v{hours}"));
            notice = merge(Some(notice), &p, t0 + Duration::hours(hours)).unwrap().notice;
        }
        assert_eq!(notice.first_seen_at, t0);
        assert!(notice.first_seen_at <= notice.last_seen_at);
    }

    #[test]
    fn test_award_fields_gated_on_notice_type() {
        let t0 = Utc::now();
        let mut p = payload();
        p.award = Some(AwardFields {
            winner_name: Some("Acme NV".into()),
            award_value: Some(450_000.0),
            ..Default::default()
        });

        let contract = merge(None, &p, t0).unwrap().notice;
        assert!(contract.winner_name.is_none());

        p.notice_type = Some("Contract award notice".into());
        let award = merge(Some(contract), &p, t0).unwrap();
        assert_eq!(award.notice.winner_name.as_deref(), Some("Acme NV"));
        assert!(award.changes.contains("award_value"));
    }

    #[test]
    fn test_codes_are_normalized() {
        let mut p = payload();
        p.cpv_main = Some("45233000-6".into());
        p.nuts = vec!["be-100".into()];
        p.languages = vec!["FRA".into(), "nl".into()];
        let notice = merge(None, &p, Utc::now()).unwrap().notice;
        assert_eq!(notice.cpv_main.as_deref(), Some("45233000"));
        assert!(notice.nuts_codes.contains("BE100"));
        assert_eq!(notice.languages.iter().collect::<Vec<_>>(), vec!["fr", "nl"]);
    }

    #[test]
    fn test_foreign_identity_rejected() {
        let first = merge(None, &payload(), Utc::now()).unwrap().notice;
        let mut other = payload();
        other.source_id = "2".into();
        assert!(merge(Some(first), &other, Utc::now()).is_err());
    }

    #[test]
    fn test_lots_merged_by_ref() {
        let notice_id = Uuid::new_v4();
        let first = merge_lots(
            notice_id,
            &[],
            &[LotPayload {
                lot_ref: "LOT-1".into(),
                title: Some("Asphalt".into()),
                cpv_codes: vec!["45233222".into()],
                ..Default::default()
            }],
        );
        assert_eq!(first.len(), 1);

        let unchanged = merge_lots(
            notice_id,
            &first,
            &[LotPayload {
                lot_ref: "LOT-1".into(),
                ..Default::default()
            }],
        );
        assert!(unchanged.is_empty());

        let grown = merge_lots(
            notice_id,
            &first,
            &[LotPayload {
                lot_ref: "LOT-1".into(),
                cpv_codes: vec!["45233223".into()],
                ..Default::default()
            }],
        );
        assert_eq!(grown.len(), 1);
        assert_eq!(grown[0].id, first[0].id);
        assert_eq!(grown[0].title.as_deref(), Some("Asphalt"));
        assert_eq!(grown[0].cpv_codes, vec!["45233222", "45233223"]);
    }
}
