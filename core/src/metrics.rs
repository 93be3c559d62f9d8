//! Result sink: concurrent metric aggregation and percentile estimation
//!
//! Every metric is an independent aggregator behind its own synchronization:
//! counters and rates are plain atomics, trends take a short per-metric lock
//! around an HdrHistogram. The registry lock is only written when a metric
//! name is seen for the first time.

use crate::outcome::RequestOutcome;
use crate::response::TransportErrorKind;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Names of the metrics the sink maintains on its own
pub mod names {
    /// Counter: requests attempted
    pub const HTTP_REQS: &str = "http_reqs";
    /// Trend: request latency in milliseconds
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    /// Rate: share of requests that did not succeed
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    /// Rate: share of requests that did not succeed, untagged
    pub const ERROR_RATE: &str = "error_rate";
    /// Counter: requests that got no status at all
    pub const TRANSPORT_ERRORS: &str = "transport_errors";
    /// Counter: transport timeouts
    pub const STATUS_TIMEOUT: &str = "status_timeout";
    /// Counter: 502 responses
    pub const STATUS_BAD_GATEWAY: &str = "status_502_bad_gateway";
    /// Counter: 503 responses
    pub const STATUS_UNAVAILABLE: &str = "status_503_unavailable";
    /// Counter: responses whose body matched a resource-exhaustion marker
    pub const RESOURCE_EXHAUSTED: &str = "resource_exhausted";
    /// Counter: completed client iterations
    pub const ITERATIONS: &str = "iterations";
    /// Trend: iteration duration in milliseconds
    pub const ITERATION_DURATION: &str = "iteration_duration";
    /// Counter: clients that could not obtain a session
    pub const CLIENT_SETUP_FAILED: &str = "client_setup_failed";

    /// Trend: latency of order placement in milliseconds
    pub const ORDER_DURATION: &str = "order_duration";
    /// Counter: tracked requests that succeeded
    pub const SUCCESS_COUNT: &str = "success_count";
    /// Counter: tracked requests that failed
    pub const FAIL_COUNT: &str = "fail_count";
    /// Counter: tracked requests that timed out
    pub const TIMEOUT_COUNT: &str = "timeout_count";
    /// Counter: tracked requests answered with a 5xx
    pub const SERVER_ERROR_COUNT: &str = "server_error_count";
    /// Counter: tracked requests rejected for lack of stock
    pub const STOCK_ERROR_COUNT: &str = "stock_error_count";
}

/// Extra series recorded for every outcome of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSeries {
    /// Request name the series follow
    pub request: String,
    /// Trend of latencies
    pub duration: String,
    /// Counter of successes
    pub success: String,
    /// Counter of failures
    pub failure: String,
    /// Counter of transport timeouts
    pub timeout: String,
    /// Counter of 5xx responses
    pub server_error: String,
    /// Counter of resource-exhaustion rejections
    pub exhausted: String,
}

impl RequestSeries {
    /// Order placement series: `order_duration`, `success_count`,
    /// `fail_count`, `timeout_count`, `server_error_count`, `stock_error_count`
    pub fn orders(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            duration: names::ORDER_DURATION.into(),
            success: names::SUCCESS_COUNT.into(),
            failure: names::FAIL_COUNT.into(),
            timeout: names::TIMEOUT_COUNT.into(),
            server_error: names::SERVER_ERROR_COUNT.into(),
            exhausted: names::STOCK_ERROR_COUNT.into(),
        }
    }

    fn counters(&self) -> [&str; 5] {
        [
            self.success.as_str(),
            self.failure.as_str(),
            self.timeout.as_str(),
            self.server_error.as_str(),
            self.exhausted.as_str(),
        ]
    }
}

/// Aggregator type of a metric, fixed when the name is first recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Monotonic sum of non-negative integers
    Counter,
    /// Ratio of non-zero observations to all observations
    Rate,
    /// Distribution of values
    Trend,
}

// Trend values are stored in the histogram in microseconds of the recorded
// unit, up to one hour of milliseconds.
const TREND_SCALE: f64 = 1000.0;
const TREND_MAX: u64 = 3_600_000_000;
const TREND_SIGFIG: u8 = 3;

struct TrendState {
    histogram: hdrhistogram::Histogram<u64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl TrendState {
    fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, TREND_MAX, TREND_SIGFIG)
            .expect("constant histogram bounds are valid");
        Self {
            histogram,
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    fn observe(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.histogram
            .saturating_record((value.max(0.0) * TREND_SCALE).round() as u64);
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let q = (p / 100.0).clamp(0.0, 1.0);
        let value = self.histogram.value_at_quantile(q) as f64 / TREND_SCALE;
        value.clamp(self.min, self.max)
    }

    fn summary(&self, extra: &[f64]) -> TrendSummary {
        if self.count == 0 {
            return TrendSummary::default();
        }
        TrendSummary {
            count: self.count,
            mean: self.sum / self.count as f64,
            min: self.min,
            max: self.max,
            med: self.percentile(50.0),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
            percentiles: extra
                .iter()
                .map(|&p| (percentile_label(p), self.percentile(p)))
                .collect(),
        }
    }
}

enum Metric {
    Counter(AtomicU64),
    Rate { hits: AtomicU64, total: AtomicU64 },
    Trend(Mutex<TrendState>),
}

impl Metric {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Metric::Counter(AtomicU64::new(0)),
            MetricKind::Rate => Metric::Rate {
                hits: AtomicU64::new(0),
                total: AtomicU64::new(0),
            },
            MetricKind::Trend => Metric::Trend(Mutex::new(TrendState::new())),
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            Metric::Counter(_) => MetricKind::Counter,
            Metric::Rate { .. } => MetricKind::Rate,
            Metric::Trend(_) => MetricKind::Trend,
        }
    }

    /// Counters add the value, rates count it as a hit when non-zero,
    /// trends observe it.
    fn apply(&self, value: f64) {
        match self {
            Metric::Counter(n) => {
                if value > 0.0 && value.is_finite() {
                    n.fetch_add(value.round() as u64, Ordering::Relaxed);
                }
            }
            Metric::Rate { hits, total } => {
                if value != 0.0 {
                    hits.fetch_add(1, Ordering::Relaxed);
                }
                total.fetch_add(1, Ordering::Relaxed);
            }
            Metric::Trend(state) => state.lock().observe(value),
        }
    }

    fn summary(&self, elapsed: Duration, extra: &[f64]) -> MetricSummary {
        match self {
            Metric::Counter(n) => {
                let count = n.load(Ordering::Relaxed);
                MetricSummary::Counter {
                    count,
                    rate: per_second(count, elapsed),
                }
            }
            Metric::Rate { hits, total } => {
                let hits = hits.load(Ordering::Relaxed);
                let total = total.load(Ordering::Relaxed);
                MetricSummary::Rate {
                    hits,
                    total,
                    rate: ratio(hits, total),
                }
            }
            Metric::Trend(state) => MetricSummary::Trend(state.lock().summary(extra)),
        }
    }
}

fn ratio(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

/// Label of a percentile in summaries and thresholds, e.g. `p(95)`, `p(99.9)`
pub fn percentile_label(p: f64) -> String {
    format!("p({p})")
}

/// Key of a tagged sub-series: `name{k1=v1,k2=v2}` with keys sorted
pub fn series_key(name: &str, tags: &[(&str, &str)]) -> String {
    if tags.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = tags.to_vec();
    sorted.sort_unstable();
    let inner: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{name}{{{}}}", inner.join(","))
}

/// Thread-safe aggregator of run metrics
///
/// Recording with tags updates both the plain metric and the tagged
/// sub-series, so `http_req_duration` and `http_req_duration{request=login}`
/// are both queryable afterwards.
pub struct ResultSink {
    metrics: RwLock<HashMap<String, Arc<Metric>>>,
    tracked: RwLock<HashMap<String, RequestSeries>>,
    started_at: Instant,
}

impl ResultSink {
    /// Create an empty sink; its clock starts now
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            tracked: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// Time since the sink was created
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn entry(&self, key: &str, kind: MetricKind) -> Arc<Metric> {
        if let Some(metric) = self.metrics.read().get(key) {
            return Arc::clone(metric);
        }
        let mut metrics = self.metrics.write();
        Arc::clone(
            metrics
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Metric::new(kind))),
        )
    }

    fn apply(&self, name: &str, kind: MetricKind, value: f64, tags: &[(&str, &str)]) {
        let base = self.entry(name, kind);
        let kind = base.kind();
        base.apply(value);
        if !tags.is_empty() {
            self.entry(&series_key(name, tags), kind).apply(value);
        }
    }

    /// Record `value` under `name`
    ///
    /// The value is interpreted by the metric's existing kind; a name seen for
    /// the first time becomes a trend.
    pub fn record(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        let kind = self.kind(name).unwrap_or(MetricKind::Trend);
        self.apply(name, kind, value, tags);
    }

    /// Add `n` to a counter
    pub fn add(&self, name: &str, n: u64, tags: &[(&str, &str)]) {
        self.apply(name, MetricKind::Counter, n as f64, tags);
    }

    /// Record one rate observation
    pub fn rate(&self, name: &str, hit: bool, tags: &[(&str, &str)]) {
        self.apply(name, MetricKind::Rate, if hit { 1.0 } else { 0.0 }, tags);
    }

    /// Record one trend observation
    pub fn trend(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.apply(name, MetricKind::Trend, value, tags);
    }

    /// Feed the built-in request metrics from one outcome
    pub fn record_outcome(&self, outcome: &RequestOutcome) {
        let tags = [("request", outcome.request.as_str())];
        let failed = !outcome.is_success();
        let classification = &outcome.classification;

        self.add(names::HTTP_REQS, 1, &tags);
        self.trend(names::HTTP_REQ_DURATION, outcome.latency_ms, &tags);
        self.rate(names::HTTP_REQ_FAILED, failed, &tags);
        self.rate(names::ERROR_RATE, failed, &[]);

        match classification.status {
            None => {
                if let crate::outcome::OutcomeKind::TransportFailure(kind) = classification.kind {
                    self.add(names::TRANSPORT_ERRORS, 1, &[("kind", kind.as_str())]);
                    if kind == TransportErrorKind::Timeout {
                        self.add(names::STATUS_TIMEOUT, 1, &[]);
                    }
                }
            }
            Some(code) => {
                let class = format!("status_{}", classification.status_class());
                self.add(&class, 1, &tags);
                match code {
                    502 => self.add(names::STATUS_BAD_GATEWAY, 1, &[]),
                    503 => self.add(names::STATUS_UNAVAILABLE, 1, &[]),
                    _ => {}
                }
            }
        }

        if let Some(marker) = classification.marker.as_deref() {
            self.add(names::RESOURCE_EXHAUSTED, 1, &[("marker", marker)]);
        }

        let series = self.tracked.read().get(&outcome.request).cloned();
        if let Some(series) = series {
            self.record_series(&series, outcome);
        }
    }

    /// Record `series` for every later outcome of `series.request`
    ///
    /// Its counters are created at zero so they show up even when nothing
    /// hits them.
    pub fn track(&self, series: RequestSeries) {
        for counter in series.counters() {
            self.entry(counter, MetricKind::Counter);
        }
        self.tracked.write().insert(series.request.clone(), series);
    }

    fn record_series(&self, series: &RequestSeries, outcome: &RequestOutcome) {
        let classification = &outcome.classification;
        self.trend(&series.duration, outcome.latency_ms, &[]);
        if outcome.is_success() {
            self.add(&series.success, 1, &[]);
        } else {
            self.add(&series.failure, 1, &[]);
        }
        if classification.kind
            == crate::outcome::OutcomeKind::TransportFailure(TransportErrorKind::Timeout)
        {
            self.add(&series.timeout, 1, &[]);
        }
        if classification.status.is_some_and(|code| code >= 500) {
            self.add(&series.server_error, 1, &[]);
        }
        if classification.resource_exhausted {
            self.add(&series.exhausted, 1, &[]);
        }
    }

    /// Kind of a recorded metric
    pub fn kind(&self, name: &str) -> Option<MetricKind> {
        self.metrics.read().get(name).map(|m| m.kind())
    }

    /// Counter value, rate total, or trend sample count; 0 if unknown
    pub fn count(&self, name: &str) -> u64 {
        let Some(metric) = self.metrics.read().get(name).cloned() else {
            return 0;
        };
        match &*metric {
            Metric::Counter(n) => n.load(Ordering::Relaxed),
            Metric::Rate { total, .. } => total.load(Ordering::Relaxed),
            Metric::Trend(state) => state.lock().count,
        }
    }

    /// Hit ratio of a rate metric; 0 when unknown or empty
    pub fn ratio(&self, name: &str) -> f64 {
        match self.metrics.read().get(name).map(|m| &**m) {
            Some(Metric::Rate { hits, total }) => {
                ratio(hits.load(Ordering::Relaxed), total.load(Ordering::Relaxed))
            }
            _ => 0.0,
        }
    }

    /// Percentile `p` (0-100) of a trend
    pub fn percentile(&self, name: &str, p: f64) -> Option<f64> {
        let metric = self.metrics.read().get(name).cloned()?;
        match &*metric {
            Metric::Trend(state) => {
                let state = state.lock();
                (state.count > 0).then(|| state.percentile(p))
            }
            _ => None,
        }
    }

    /// Summaries of every metric
    ///
    /// `extra_percentiles` adds `p(N)` entries to every trend beyond the
    /// always-present med/p90/p95/p99.
    pub fn snapshot(&self, elapsed: Duration, extra_percentiles: &[f64]) -> SinkSnapshot {
        let metrics: Vec<(String, Arc<Metric>)> = self
            .metrics
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        SinkSnapshot {
            elapsed_secs: elapsed.as_secs_f64(),
            metrics: metrics
                .into_iter()
                .map(|(name, m)| (name, m.summary(elapsed, extra_percentiles)))
                .collect(),
        }
    }
}

impl Default for ResultSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("metrics", &self.metrics.read().len())
            .finish()
    }
}

/// Distribution summary of a trend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    /// Number of observations
    pub count: u64,
    /// Arithmetic mean
    pub mean: f64,
    /// Minimum
    pub min: f64,
    /// Maximum
    pub max: f64,
    /// Median
    pub med: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Additional percentiles keyed by [`percentile_label`]
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub percentiles: BTreeMap<String, f64>,
}

impl TrendSummary {
    /// Percentile `p`, if it is one of the summarized values
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if let Some(v) = self.percentiles.get(&percentile_label(p)) {
            return Some(*v);
        }
        match p {
            p if p == 50.0 => Some(self.med),
            p if p == 90.0 => Some(self.p90),
            p if p == 95.0 => Some(self.p95),
            p if p == 99.0 => Some(self.p99),
            p if p == 100.0 => Some(self.max),
            p if p == 0.0 => Some(self.min),
            _ => None,
        }
    }
}

/// Final state of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricSummary {
    /// Counter total and its per-second rate over the run
    Counter {
        /// Total
        count: u64,
        /// Total divided by elapsed seconds
        rate: f64,
    },
    /// Rate metric
    Rate {
        /// Non-zero observations
        hits: u64,
        /// All observations
        total: u64,
        /// `hits / total`, 0 when empty
        rate: f64,
    },
    /// Trend metric
    Trend(TrendSummary),
}

impl MetricSummary {
    /// Kind of the summarized metric
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSummary::Counter { .. } => MetricKind::Counter,
            MetricSummary::Rate { .. } => MetricKind::Rate,
            MetricSummary::Trend(_) => MetricKind::Trend,
        }
    }
}

/// Point-in-time copy of every metric in a [`ResultSink`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkSnapshot {
    /// Elapsed run time the rates were computed against
    pub elapsed_secs: f64,
    /// Summaries keyed by metric or series name
    pub metrics: BTreeMap<String, MetricSummary>,
}

impl SinkSnapshot {
    /// Summary of one metric or tagged series
    pub fn get(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    /// Counter total (or rate/trend sample count)
    pub fn count(&self, name: &str) -> u64 {
        match self.get(name) {
            Some(MetricSummary::Counter { count, .. }) => *count,
            Some(MetricSummary::Rate { total, .. }) => *total,
            Some(MetricSummary::Trend(t)) => t.count,
            None => 0,
        }
    }

    /// Trend summary of one metric
    pub fn trend(&self, name: &str) -> Option<&TrendSummary> {
        match self.get(name) {
            Some(MetricSummary::Trend(t)) => Some(t),
            _ => None,
        }
    }
}
