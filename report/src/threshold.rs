//! Pass/fail predicates over aggregated metrics
//!
//! A threshold pairs a metric (optionally a tagged series such as
//! `http_req_duration{request=me}`) with an expression like `p(95)<500`,
//! `avg<200`, `count>10` or `rate<0.05`.

use serde::{Deserialize, Serialize};
use shop_bench_core::{MetricSummary, SinkSnapshot};
use std::fmt;
use std::str::FromStr;

/// Threshold parsing errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    /// Nothing to parse
    #[error("empty threshold expression")]
    Empty,

    /// `metric: expression` form without a metric name
    #[error("threshold {0:?} names no metric")]
    MissingMetric(String),

    /// No comparison operator was found
    #[error("threshold expression {0:?} has no comparison operator")]
    MissingOperator(String),

    /// The left-hand side is not a known aggregate
    #[error("unknown aggregate {0:?}; expected p(N), avg, min, max, med, count or rate")]
    UnknownAggregate(String),

    /// Percentile outside `[0, 100]`
    #[error("invalid percentile {0:?}")]
    InvalidPercentile(String),

    /// The right-hand side is not a number
    #[error("invalid bound {0:?}")]
    InvalidBound(String),
}

/// Value extracted from a metric summary
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    /// `p(N)` of a trend
    Percentile(f64),
    /// Mean of a trend
    Avg,
    /// Minimum of a trend
    Min,
    /// Maximum of a trend
    Max,
    /// Median of a trend
    Med,
    /// Counter total, or sample count of a rate or trend
    Count,
    /// Hit ratio of a rate, or per-second rate of a counter
    Rate,
}

impl Aggregate {
    fn parse(s: &str) -> Result<Self, ThresholdError> {
        match s {
            "avg" => Ok(Aggregate::Avg),
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            "med" => Ok(Aggregate::Med),
            "count" => Ok(Aggregate::Count),
            "rate" => Ok(Aggregate::Rate),
            _ => {
                let inner = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| ThresholdError::UnknownAggregate(s.to_string()))?;
                let p: f64 = inner
                    .trim()
                    .parse()
                    .map_err(|_| ThresholdError::InvalidPercentile(inner.to_string()))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(ThresholdError::InvalidPercentile(inner.to_string()));
                }
                Ok(Aggregate::Percentile(p))
            }
        }
    }

    /// Extract the value from a summary, if this aggregate applies to it
    pub fn extract(&self, summary: &MetricSummary) -> Option<f64> {
        match (self, summary) {
            (Aggregate::Count, MetricSummary::Counter { count, .. }) => Some(*count as f64),
            (Aggregate::Count, MetricSummary::Rate { total, .. }) => Some(*total as f64),
            (Aggregate::Count, MetricSummary::Trend(t)) => Some(t.count as f64),
            (Aggregate::Rate, MetricSummary::Counter { rate, .. }) => Some(*rate),
            (Aggregate::Rate, MetricSummary::Rate { rate, .. }) => Some(*rate),
            (_, MetricSummary::Trend(t)) if t.count == 0 => None,
            (Aggregate::Avg, MetricSummary::Trend(t)) => Some(t.mean),
            (Aggregate::Min, MetricSummary::Trend(t)) => Some(t.min),
            (Aggregate::Max, MetricSummary::Trend(t)) => Some(t.max),
            (Aggregate::Med, MetricSummary::Trend(t)) => Some(t.med),
            (Aggregate::Percentile(p), MetricSummary::Trend(t)) => t.percentile(*p),
            _ => None,
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Percentile(p) => write!(f, "p({p})"),
            Aggregate::Avg => f.write_str("avg"),
            Aggregate::Min => f.write_str("min"),
            Aggregate::Max => f.write_str("max"),
            Aggregate::Med => f.write_str("med"),
            Aggregate::Count => f.write_str("count"),
            Aggregate::Rate => f.write_str("rate"),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl Comparison {
    // Two-character operators first so `<=` is not read as `<`
    const TABLE: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    /// Apply the operator
    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparison::Lt => observed < bound,
            Comparison::Le => observed <= bound,
            Comparison::Gt => observed > bound,
            Comparison::Ge => observed >= bound,
            Comparison::Eq => observed == bound,
            Comparison::Ne => observed != bound,
        }
    }

    fn symbol(&self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(_, op)| op == self)
            .map(|(s, _)| *s)
            .unwrap_or("?")
    }
}

/// A parsed threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Threshold {
    metric: String,
    aggregate: Aggregate,
    comparison: Comparison,
    bound: f64,
}

impl Threshold {
    /// Parse `expression` as a threshold over `metric`
    pub fn parse(metric: impl Into<String>, expression: &str) -> Result<Self, ThresholdError> {
        let metric = metric.into();
        if metric.trim().is_empty() {
            return Err(ThresholdError::MissingMetric(expression.to_string()));
        }

        let expression = expression.trim();
        if expression.is_empty() {
            return Err(ThresholdError::Empty);
        }

        let op_start = expression
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| ThresholdError::MissingOperator(expression.to_string()))?;
        let (lhs, rest) = expression.split_at(op_start);
        let (symbol, comparison) = Comparison::TABLE
            .iter()
            .find(|(symbol, _)| rest.starts_with(symbol))
            .copied()
            .ok_or_else(|| ThresholdError::MissingOperator(expression.to_string()))?;

        let aggregate = Aggregate::parse(lhs.trim())?;
        let raw_bound = rest[symbol.len()..].trim();
        let bound: f64 = raw_bound
            .parse()
            .map_err(|_| ThresholdError::InvalidBound(raw_bound.to_string()))?;
        if !bound.is_finite() {
            return Err(ThresholdError::InvalidBound(raw_bound.to_string()));
        }

        Ok(Self {
            metric: metric.trim().to_string(),
            aggregate,
            comparison,
            bound,
        })
    }

    /// Metric or tagged series the threshold reads
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Aggregate being compared
    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    /// The expression part, e.g. `p(95)<500`
    pub fn expression(&self) -> String {
        format!("{}{}{}", self.aggregate, self.comparison.symbol(), self.bound)
    }

    /// Evaluate against a snapshot; a metric that was never recorded fails
    pub fn evaluate(&self, snapshot: &SinkSnapshot) -> ThresholdResult {
        let observed = snapshot
            .get(&self.metric)
            .and_then(|summary| self.aggregate.extract(summary));
        let passed = observed.is_some_and(|v| self.comparison.holds(v, self.bound));

        ThresholdResult {
            name: self.to_string(),
            metric: self.metric.clone(),
            expression: self.expression(),
            observed,
            passed,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.expression())
    }
}

impl FromStr for Threshold {
    type Err = ThresholdError;

    /// Parse the combined `metric: expression` form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (metric, expression) = s
            .rsplit_once(':')
            .ok_or_else(|| ThresholdError::MissingMetric(s.to_string()))?;
        Self::parse(metric, expression)
    }
}

impl TryFrom<String> for Threshold {
    type Error = ThresholdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Threshold> for String {
    fn from(t: Threshold) -> String {
        t.to_string()
    }
}

/// Outcome of one threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdResult {
    /// `metric: expression`
    pub name: String,
    /// Metric or tagged series
    pub metric: String,
    /// Expression part
    pub expression: String,
    /// Value the expression was evaluated against; `None` if unavailable
    pub observed: Option<f64>,
    /// Verdict
    pub passed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use shop_bench_core::ResultSink;
    use std::time::Duration;

    fn snapshot() -> SinkSnapshot {
        let sink = ResultSink::new();
        for ms in 1..=100 {
            sink.trend("http_req_duration", ms as f64, &[("request", "me")]);
        }
        for i in 0..100 {
            sink.rate("http_req_failed", i < 5, &[]);
        }
        sink.add("http_reqs", 100, &[]);
        sink.snapshot(Duration::from_secs(10), &[99.9])
    }

    #[test]
    fn test_parse_forms() {
        let t = Threshold::parse("http_req_duration", "p(95)<500").unwrap();
        assert_eq!(t.aggregate(), Aggregate::Percentile(95.0));
        assert_eq!(t.expression(), "p(95)<500");

        let t = Threshold::parse("m", " p(99.9) <= 1000 ").unwrap();
        assert_eq!(t.aggregate(), Aggregate::Percentile(99.9));
        assert_eq!(t.expression(), "p(99.9)<=1000");

        let t: Threshold = "http_req_duration{request=me}: avg>=0.5".parse().unwrap();
        assert_eq!(t.metric(), "http_req_duration{request=me}");
        assert_eq!(t.to_string(), "http_req_duration{request=me}: avg>=0.5");

        assert!(Threshold::parse("m", "count!=0").is_ok());
        assert!(Threshold::parse("m", "rate==0").is_ok());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Threshold::parse("m", "  "), Err(ThresholdError::Empty));
        assert!(matches!(
            Threshold::parse("m", "p95 500"),
            Err(ThresholdError::MissingOperator(_))
        ));
        assert!(matches!(
            Threshold::parse("m", "p95<500"),
            Err(ThresholdError::UnknownAggregate(_))
        ));
        assert!(matches!(
            Threshold::parse("m", "p(101)<500"),
            Err(ThresholdError::InvalidPercentile(_))
        ));
        assert!(matches!(
            Threshold::parse("m", "avg<fast"),
            Err(ThresholdError::InvalidBound(_))
        ));
        assert!(matches!(
            "p(95)<500".parse::<Threshold>(),
            Err(ThresholdError::MissingMetric(_))
        ));
        assert!(matches!(
            Threshold::parse(" ", "avg<1"),
            Err(ThresholdError::MissingMetric(_))
        ));
    }

    #[test]
    fn test_evaluate_trend_rate_counter() {
        let snapshot = snapshot();

        let p95 = Threshold::parse("http_req_duration", "p(95)<500").unwrap();
        let result = p95.evaluate(&snapshot);
        assert!(result.passed);
        assert!((result.observed.unwrap() - 95.0).abs() < 1.0);

        let tagged = Threshold::parse("http_req_duration{request=me}", "max<50").unwrap();
        assert!(!tagged.evaluate(&snapshot).passed);

        let extra = Threshold::parse("http_req_duration", "p(99.9)<=100").unwrap();
        assert!(extra.evaluate(&snapshot).passed);

        let rate = Threshold::parse("http_req_failed", "rate<0.05").unwrap();
        let result = rate.evaluate(&snapshot);
        assert_eq!(result.observed, Some(0.05));
        assert!(!result.passed);

        let count = Threshold::parse("http_reqs", "count>=100").unwrap();
        assert!(count.evaluate(&snapshot).passed);
        let per_sec = Threshold::parse("http_reqs", "rate==10").unwrap();
        assert!(per_sec.evaluate(&snapshot).passed);
    }

    #[test]
    fn test_missing_metric_or_mismatched_aggregate_fails() {
        let snapshot = snapshot();

        let missing = Threshold::parse("order_duration", "p(95)<500").unwrap();
        let result = missing.evaluate(&snapshot);
        assert!(!result.passed);
        assert!(result.observed.is_none());

        let mismatch = Threshold::parse("http_reqs", "avg<1").unwrap();
        assert!(!mismatch.evaluate(&snapshot).passed);

        let unsummarized = Threshold::parse("http_req_duration", "p(42)<1000").unwrap();
        assert!(!unsummarized.evaluate(&snapshot).passed);
    }

    #[test]
    fn test_serde_as_string() {
        let t = Threshold::parse("http_req_failed", "rate<0.01").unwrap();
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"http_req_failed: rate<0.01\"");

        let back: Threshold = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
        assert!(serde_json::from_str::<Threshold>("\"nonsense\"").is_err());
    }
}
