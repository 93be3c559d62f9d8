//! Run verdicts from final metrics, thresholds and the fairness check

use crate::threshold::{Aggregate, Threshold, ThresholdResult};
use serde::{Deserialize, Serialize};
use shop_bench_core::{
    ClientSummary, FairnessVerdict, MetricSummary, ResultSink, RunOutcome, SinkSnapshot,
    StopReason,
};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Final report of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Scenario name
    pub scenario: String,
    /// The run was truncated by a deadline or interrupt
    pub partial: bool,
    /// Why the run ended; `None` when setup aborted it
    pub stop_reason: Option<StopReason>,
    /// Wall-clock run time in seconds
    pub elapsed_secs: f64,
    /// Highest number of simultaneously active clients
    pub peak_concurrency: usize,
    /// Client totals
    pub clients: ClientSummary,
    /// Every metric and tagged series
    pub metrics: BTreeMap<String, MetricSummary>,
    /// Threshold outcomes in declaration order
    pub thresholds: Vec<ThresholdResult>,
    /// FIFO check result, for scenarios that run one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fairness: Option<FairnessVerdict>,
    /// Why setup aborted the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
    /// Overall verdict
    pub passed: bool,
}

impl Report {
    /// Threshold outcomes that failed
    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    /// The fairness check ran and found at least one violation
    pub fn fairness_violated(&self) -> bool {
        self.fairness.as_ref().is_some_and(|v| !v.is_fair())
    }
}

/// Turns final run state into a [`Report`]
///
/// Generation has no side effects beyond logging: the same snapshot,
/// outcome and verdict always produce the same report.
#[derive(Debug, Clone, Default)]
pub struct ReportGenerator {
    scenario: String,
    thresholds: Vec<Threshold>,
}

impl ReportGenerator {
    /// Generator for a named scenario
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            thresholds: Vec::new(),
        }
    }

    /// Add thresholds
    pub fn with_thresholds(mut self, thresholds: impl IntoIterator<Item = Threshold>) -> Self {
        self.thresholds.extend(thresholds);
        self
    }

    /// Declared thresholds
    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    /// Percentiles thresholds need beyond those every trend summary carries
    pub fn extra_percentiles(&self) -> Vec<f64> {
        let mut extra: Vec<f64> = self
            .thresholds
            .iter()
            .filter_map(|t| match t.aggregate() {
                Aggregate::Percentile(p) if ![50.0, 90.0, 95.0, 99.0].contains(&p) => Some(p),
                _ => None,
            })
            .collect();
        extra.sort_by(f64::total_cmp);
        extra.dedup();
        extra
    }

    /// Snapshot the sink with every percentile the thresholds need
    pub fn snapshot(&self, sink: &ResultSink, run: &RunOutcome) -> SinkSnapshot {
        sink.snapshot(run.elapsed, &self.extra_percentiles())
    }

    /// Report for a run that executed, however it ended
    pub fn generate(
        &self,
        snapshot: &SinkSnapshot,
        run: &RunOutcome,
        fairness: Option<&FairnessVerdict>,
    ) -> Report {
        let thresholds: Vec<ThresholdResult> = self
            .thresholds
            .iter()
            .map(|t| t.evaluate(snapshot))
            .collect();

        for result in thresholds.iter().filter(|t| !t.passed) {
            warn!(
                threshold = %result.name,
                observed = ?result.observed,
                "Threshold failed"
            );
        }
        if let Some(verdict) = fairness.filter(|v| !v.is_fair()) {
            warn!(
                violations = verdict.violations.len(),
                false_positives = ?verdict.false_positives,
                false_negatives = ?verdict.false_negatives,
                oversold = verdict.oversold,
                "Fairness violated"
            );
        }

        let passed = thresholds.iter().all(|t| t.passed) && fairness.map_or(true, |v| v.is_fair());

        info!(
            scenario = %self.scenario,
            passed,
            partial = run.partial,
            stop_reason = ?run.stop_reason,
            "Report generated"
        );

        Report {
            scenario: self.scenario.clone(),
            partial: run.partial,
            stop_reason: Some(run.stop_reason),
            elapsed_secs: run.elapsed.as_secs_f64(),
            peak_concurrency: run.peak_concurrency,
            clients: run.clients.clone(),
            metrics: snapshot.metrics.clone(),
            thresholds,
            fairness: fairness.cloned(),
            setup_error: None,
            passed,
        }
    }

    /// Report for a run that setup aborted before any client started
    pub fn aborted(&self, setup_error: impl Into<String>) -> Report {
        let setup_error = setup_error.into();
        warn!(scenario = %self.scenario, error = %setup_error, "Run aborted during setup");

        let empty = SinkSnapshot::default();
        Report {
            scenario: self.scenario.clone(),
            partial: true,
            stop_reason: None,
            elapsed_secs: 0.0,
            peak_concurrency: 0,
            clients: ClientSummary::default(),
            metrics: BTreeMap::new(),
            thresholds: self.thresholds.iter().map(|t| t.evaluate(&empty)).collect(),
            fairness: None,
            setup_error: Some(setup_error),
            passed: false,
        }
    }
}
