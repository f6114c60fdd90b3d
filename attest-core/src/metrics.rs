//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `attest_transactions_recorded_total` - Transactions written to the vault
//! - `attest_rule_rejections_total{rule}` - Rule engine rejections by rule id
//! - `attest_notary_commits_total` - Transactions committed by the notary
//! - `attest_notary_conflicts_total` - Double-spend attempts refused by the notary
//! - `attest_flow_duration_seconds{flow}` - Duration of initiated flows

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
///
/// Every instance owns a private registry, so several nodes can live in one
/// process (tests, the demo) without clashing on metric names.
#[derive(Clone)]
pub struct Metrics {
    /// Transactions recorded
    pub transactions_recorded: IntCounter,

    /// Rule rejections by rule id
    pub rule_rejections: IntCounterVec,

    /// Notary commits
    pub notary_commits: IntCounter,

    /// Notary conflicts
    pub notary_conflicts: IntCounter,

    /// Flow duration histogram
    pub flow_duration: HistogramVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_recorded = IntCounter::new(
            "attest_transactions_recorded_total",
            "Transactions written to the vault",
        )?;
        registry.register(Box::new(transactions_recorded.clone()))?;

        let rule_rejections = IntCounterVec::new(
            Opts::new(
                "attest_rule_rejections_total",
                "Rule engine rejections by rule id",
            ),
            &["rule"],
        )?;
        registry.register(Box::new(rule_rejections.clone()))?;

        let notary_commits = IntCounter::new(
            "attest_notary_commits_total",
            "Transactions committed by the notary",
        )?;
        registry.register(Box::new(notary_commits.clone()))?;

        let notary_conflicts = IntCounter::new(
            "attest_notary_conflicts_total",
            "Double-spend attempts refused by the notary",
        )?;
        registry.register(Box::new(notary_conflicts.clone()))?;

        let flow_duration = HistogramVec::new(
            HistogramOpts::new("attest_flow_duration_seconds", "Duration of initiated flows")
                .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]),
            &["flow"],
        )?;
        registry.register(Box::new(flow_duration.clone()))?;

        Ok(Self {
            transactions_recorded,
            rule_rejections,
            notary_commits,
            notary_conflicts,
            flow_duration,
            registry,
        })
    }

    /// Record a vault write
    pub fn record_transaction(&self) {
        self.transactions_recorded.inc();
    }

    /// Record a rule rejection
    pub fn record_rejection(&self, rule: &str) {
        self.rule_rejections.with_label_values(&[rule]).inc();
    }

    /// Record a notary commit
    pub fn record_commit(&self) {
        self.notary_commits.inc();
    }

    /// Record a notary conflict
    pub fn record_conflict(&self) {
        self.notary_conflicts.inc();
    }

    /// Record the duration of a finished flow
    pub fn record_flow_duration(&self, flow: &str, duration_seconds: f64) {
        self.flow_duration
            .with_label_values(&[flow])
            .observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("transactions_recorded", &self.transactions_recorded.get())
            .field("notary_commits", &self.notary_commits.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_per_instance() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();

        a.record_transaction();
        a.record_transaction();
        assert_eq!(a.transactions_recorded.get(), 2);
        assert_eq!(b.transactions_recorded.get(), 0);
    }

    #[test]
    fn test_rejections_by_rule() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection("membership.issue.signers");
        metrics.record_rejection("membership.issue.signers");
        metrics.record_rejection("attestation.issue.self-attestation");

        assert_eq!(
            metrics
                .rule_rejections
                .with_label_values(&["membership.issue.signers"])
                .get(),
            2
        );
    }

    #[test]
    fn test_render_contains_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.record_commit();
        metrics.record_conflict();
        metrics.record_flow_duration("issue_membership", 0.01);

        let text = metrics.render();
        assert!(text.contains("attest_notary_commits_total 1"));
        assert!(text.contains("attest_flow_duration_seconds"));
    }
}
