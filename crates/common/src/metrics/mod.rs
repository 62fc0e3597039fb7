//! Metrics and observability utilities
//!
//! Prometheus metrics with a shared `tenderwatch` prefix. The binaries
//! install the exporter; library code only records.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all TenderWatch metrics
pub const METRICS_PREFIX: &str = "tenderwatch";

/// Buckets for external call latency (downloads, AI, translation)
pub const EXTERNAL_CALL_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
    120.0,  // 120s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Ingestion
    describe_counter!(
        format!("{}_notices_created_total", METRICS_PREFIX),
        Unit::Count,
        "Canonical notices created"
    );

    describe_counter!(
        format!("{}_notices_updated_total", METRICS_PREFIX),
        Unit::Count,
        "Canonical notices reconciled with an existing record"
    );

    describe_counter!(
        format!("{}_merge_conflicts_total", METRICS_PREFIX),
        Unit::Count,
        "Merges that lost an identity race"
    );

    describe_counter!(
        format!("{}_import_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Per-item import errors"
    );

    describe_histogram!(
        format!("{}_import_batch_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Import batch duration in seconds"
    );

    // Matching
    describe_counter!(
        format!("{}_matches_upserted_total", METRICS_PREFIX),
        Unit::Count,
        "Watchlist matches created or re-scored"
    );

    describe_counter!(
        format!("{}_translation_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Translation cache hits"
    );

    describe_counter!(
        format!("{}_translation_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Translation cache misses"
    );

    // Document pipeline
    describe_counter!(
        format!("{}_document_transitions_total", METRICS_PREFIX),
        Unit::Count,
        "Document pipeline state transitions"
    );

    describe_histogram!(
        format!("{}_external_call_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "External collaborator call latency in seconds"
    );

    tracing::info!("Metrics registered");
}

/// Helper to time one external call
pub struct ExternalCallTimer {
    start: Instant,
    service: &'static str,
}

impl ExternalCallTimer {
    pub fn start(service: &'static str) -> Self {
        Self {
            start: Instant::now(),
            service,
        }
    }

    pub fn finish(self, success: bool) {
        let status = if success { "success" } else { "error" };

        histogram!(
            format!("{}_external_call_duration_seconds", METRICS_PREFIX),
            "service" => self.service,
            "status" => status
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

/// Record a per-item merge outcome
pub fn record_notice(source: &str, created: bool) {
    let name = if created { "notices_created_total" } else { "notices_updated_total" };

    counter!(
        format!("{}_{}", METRICS_PREFIX, name),
        "source" => source.to_string()
    )
    .increment(1);
}

pub fn record_merge_conflict(source: &str) {
    counter!(
        format!("{}_merge_conflicts_total", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .increment(1);
}

pub fn record_import_error(source: &str, kind: &str) {
    counter!(
        format!("{}_import_errors_total", METRICS_PREFIX),
        "source" => source.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

pub fn record_import_batch(source: &str, duration_secs: f64) {
    histogram!(
        format!("{}_import_batch_duration_seconds", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .record(duration_secs);
}

pub fn record_match(created: bool) {
    let outcome = if created { "created" } else { "updated" };

    counter!(
        format!("{}_matches_upserted_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

/// Helper to record translation cache metrics
pub fn record_translation_cache(hit: bool) {
    if hit {
        counter!(format!("{}_translation_cache_hits_total", METRICS_PREFIX)).increment(1);
    } else {
        counter!(format!("{}_translation_cache_misses_total", METRICS_PREFIX)).increment(1);
    }
}

pub fn record_document_transition(state: &str) {
    counter!(
        format!("{}_document_transitions_total", METRICS_PREFIX),
        "state" => state.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_call_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in EXTERNAL_CALL_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every helper is a no-op
        ExternalCallTimer::start("download").finish(true);
        record_notice("TED", true);
        record_translation_cache(false);
    }
}
