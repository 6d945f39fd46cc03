//! # Reaper Metrics
//!
//! A thin, typed facade over the `metrics` crate's macros. Every metric
//! named in the specification (§6) gets exactly one recorder method here,
//! so call sites across the workspace never hardcode a metric name
//! string and never risk a typo splitting one logical series into two.
//!
//! This crate does not install a recorder. The two services install a
//! `metrics-exporter-prometheus` recorder during bootstrap; everywhere
//! else (tests, the CLI) these calls are harmless no-ops against the
//! default recorder.

use std::time::Duration;

use reaper_core::Effect;

const EVALUATIONS_TOTAL: &str = "evaluations_total";
const EVALUATE_DURATION_SECONDS: &str = "evaluate_duration_seconds";
const AUDIT_CHANNEL_FULL_TOTAL: &str = "audit_channel_full_total";
const AUDIT_FAILURES_TOTAL: &str = "audit_failures_total";
const AUDIT_WAL_ENTRIES: &str = "audit_wal_entries";
const POLICY_CACHE_LAST_UPDATE: &str = "policy_cache_last_update";

/// Records the named metrics from spec §6 through whatever `metrics`
/// recorder is currently installed.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// `evaluations_total{reason, effect}`.
    pub fn record_evaluation(&self, reason: &str, effect: Effect) {
        metrics_core::counter!(
            EVALUATIONS_TOTAL,
            "reason" => reason.to_string(),
            "effect" => effect_label(effect),
        )
        .increment(1);
    }

    /// `evaluate_duration_seconds` histogram.
    pub fn record_evaluate_duration(&self, elapsed: Duration) {
        metrics_core::histogram!(EVALUATE_DURATION_SECONDS).record(elapsed.as_secs_f64());
    }

    /// `audit_channel_full_total` counter, incremented once per dropped
    /// async audit entry.
    pub fn record_audit_channel_full(&self) {
        metrics_core::counter!(AUDIT_CHANNEL_FULL_TOTAL).increment(1);
    }

    /// `audit_failures_total{reason}` counter.
    pub fn record_audit_failure(&self, reason: &str) {
        metrics_core::counter!(AUDIT_FAILURES_TOTAL, "reason" => reason.to_string()).increment(1);
    }

    /// `audit_wal_entries` gauge: the journal's current line count.
    pub fn set_audit_wal_entries(&self, count: usize) {
        #[allow(clippy::cast_precision_loss)]
        metrics_core::gauge!(AUDIT_WAL_ENTRIES).set(count as f64);
    }

    /// `policy_cache_last_update` gauge, unix seconds.
    pub fn set_cache_last_update(&self, unix_seconds: i64) {
        #[allow(clippy::cast_precision_loss)]
        metrics_core::gauge!(POLICY_CACHE_LAST_UPDATE).set(unix_seconds as f64);
    }
}

fn effect_label(effect: Effect) -> &'static str {
    match effect {
        Effect::DefaultDeny => "default_deny",
        Effect::Allow => "allow",
        Effect::Deny => "deny",
        Effect::SystemBypass => "system_bypass",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // No recorder is installed in unit tests; the default no-op recorder
    // makes these calls inert. The tests below exist to pin the facade's
    // method signatures against the metric table in spec §6, not to
    // assert recorded values.

    #[test]
    fn recording_evaluation_does_not_panic() {
        let recorder = MetricsRecorder::new();
        recorder.record_evaluation("system bypass", Effect::SystemBypass);
        recorder.record_evaluation("forbid policy satisfied", Effect::Deny);
    }

    #[test]
    fn recording_duration_does_not_panic() {
        MetricsRecorder::new().record_evaluate_duration(Duration::from_micros(42));
    }

    #[test]
    fn recording_audit_signals_does_not_panic() {
        let recorder = MetricsRecorder::new();
        recorder.record_audit_channel_full();
        recorder.record_audit_failure("wal_failed");
        recorder.set_audit_wal_entries(3);
        recorder.set_cache_last_update(1_700_000_000);
    }

    #[test]
    fn effect_label_matches_wire_format() {
        assert_eq!(effect_label(Effect::DefaultDeny), "default_deny");
        assert_eq!(effect_label(Effect::Allow), "allow");
        assert_eq!(effect_label(Effect::Deny), "deny");
        assert_eq!(effect_label(Effect::SystemBypass), "system_bypass");
    }
}
