//! Outcome classification
//!
//! Status-code classification is exact. Resource-exhaustion detection is a
//! heuristic body-text search against a versioned [`MarkerSet`] and is kept
//! separate so it can be tuned and tested on its own.

use crate::response::{RawResponse, RawStatus, TransportErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inclusive range of HTTP status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRange {
    /// First code in the range
    pub start: u16,
    /// Last code in the range
    pub end: u16,
}

/// Statuses a caller counts as success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuccessSet {
    ranges: Vec<StatusRange>,
}

impl SuccessSet {
    /// All codes in `start..=end`
    pub fn range(start: u16, end: u16) -> Self {
        Self {
            ranges: vec![StatusRange { start, end }],
        }
    }

    /// Exactly the listed codes
    pub fn codes(codes: &[u16]) -> Self {
        Self {
            ranges: codes
                .iter()
                .map(|&c| StatusRange { start: c, end: c })
                .collect(),
        }
    }

    /// Add one more accepted code
    pub fn with_code(mut self, code: u16) -> Self {
        self.ranges.push(StatusRange {
            start: code,
            end: code,
        });
        self
    }

    /// Check membership
    pub fn contains(&self, code: u16) -> bool {
        self.ranges.iter().any(|r| (r.start..=r.end).contains(&code))
    }
}

impl Default for SuccessSet {
    fn default() -> Self {
        Self::range(200, 299)
    }
}

/// Substrings that flag a 4xx/5xx body as resource exhaustion
///
/// Matching is case-sensitive substring search. Bump `version` whenever the
/// list changes so reports can tell which heuristic produced a count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerSet {
    /// Revision of the marker list
    pub version: u32,
    /// Markers, checked in order
    pub markers: Vec<String>,
}

impl MarkerSet {
    /// Revision of [`MarkerSet::default`]
    pub const DEFAULT_VERSION: u32 = 1;

    /// Create a marker set
    pub fn new(version: u32, markers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            version,
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// First marker contained in `body`
    pub fn find(&self, body: &str) -> Option<&str> {
        self.markers
            .iter()
            .find(|m| !m.is_empty() && body.contains(m.as_str()))
            .map(String::as_str)
    }
}

impl Default for MarkerSet {
    /// Connection-pool exhaustion on the server plus stock depletion
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_VERSION,
            [
                "pool",
                "connection",
                "timeout",
                "QueuePool",
                "INSUFFICIENT_STOCK",
            ],
        )
    }
}

/// 5xx sub-kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerErrorKind {
    /// 502
    Gateway,
    /// 503
    Unavailable,
    /// Any other 5xx
    Generic,
}

/// Outcome taxonomy, listed in classification priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum OutcomeKind {
    /// No status was received
    TransportFailure(TransportErrorKind),
    /// Status in the success set
    Success,
    /// 4xx not in the success set
    ClientError,
    /// 5xx not in the success set
    ServerError(ServerErrorKind),
    /// 1xx/3xx (or out-of-range) status not in the success set
    Unexpected,
}

impl OutcomeKind {
    /// Short label used in logs and tags
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeKind::TransportFailure(_) => "transport_failure",
            OutcomeKind::Success => "success",
            OutcomeKind::ClientError => "client_error",
            OutcomeKind::ServerError(ServerErrorKind::Gateway) => "gateway_error",
            OutcomeKind::ServerError(ServerErrorKind::Unavailable) => "unavailable",
            OutcomeKind::ServerError(ServerErrorKind::Generic) => "server_error",
            OutcomeKind::Unexpected => "unexpected",
        }
    }
}

/// Result of classifying one raw response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    /// Primary kind
    pub kind: OutcomeKind,
    /// HTTP status, absent for transport failures
    pub status: Option<u16>,
    /// Overlay tag: a 4xx/5xx body matched a marker
    pub resource_exhausted: bool,
    /// Marker that matched, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

impl Classification {
    /// True for [`OutcomeKind::Success`]
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    /// Status class label: `"2xx"`..`"5xx"`, or `"transport"`
    pub fn status_class(&self) -> &'static str {
        match self.status {
            None => "transport",
            Some(100..=199) => "1xx",
            Some(200..=299) => "2xx",
            Some(300..=399) => "3xx",
            Some(400..=499) => "4xx",
            Some(500..=599) => "5xx",
            Some(_) => "other",
        }
    }
}

/// Pure mapping from raw responses to [`Classification`]s
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeClassifier {
    success: SuccessSet,
    markers: MarkerSet,
}

impl OutcomeClassifier {
    /// Create a classifier
    pub fn new(success: SuccessSet, markers: MarkerSet) -> Self {
        Self { success, markers }
    }

    /// Default success set
    pub fn success_set(&self) -> &SuccessSet {
        &self.success
    }

    /// Marker set in use
    pub fn markers(&self) -> &MarkerSet {
        &self.markers
    }

    /// Classify with the default success set
    pub fn classify(&self, raw: &RawResponse) -> Classification {
        self.classify_with(raw, None)
    }

    /// Classify, optionally overriding the success set for this request
    pub fn classify_with(&self, raw: &RawResponse, success: Option<&SuccessSet>) -> Classification {
        let code = match raw.status {
            RawStatus::Transport(kind) => {
                return Classification {
                    kind: OutcomeKind::TransportFailure(kind),
                    status: None,
                    resource_exhausted: false,
                    marker: None,
                };
            }
            RawStatus::Code(code) => code,
        };

        let success = success.unwrap_or(&self.success);
        let kind = if success.contains(code) {
            OutcomeKind::Success
        } else {
            match code {
                400..=499 => OutcomeKind::ClientError,
                502 => OutcomeKind::ServerError(ServerErrorKind::Gateway),
                503 => OutcomeKind::ServerError(ServerErrorKind::Unavailable),
                500..=599 => OutcomeKind::ServerError(ServerErrorKind::Generic),
                _ => OutcomeKind::Unexpected,
            }
        };

        let marker = match kind {
            OutcomeKind::ClientError | OutcomeKind::ServerError(_) => {
                self.markers.find(&raw.body).map(str::to_string)
            }
            _ => None,
        };

        Classification {
            kind,
            status: Some(code),
            resource_exhausted: marker.is_some(),
            marker,
        }
    }
}

/// Immutable record of one attempted request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// Template name
    pub request: String,
    /// Ordinal of the client that sent it
    pub ordinal: usize,
    /// Wall-clock time just before the request was handed to the transport
    pub sent_at: DateTime<Utc>,
    /// Wall-clock time the response (or failure) was observed
    pub completed_at: DateTime<Utc>,
    /// Monotonic latency in milliseconds
    pub latency_ms: f64,
    /// Classification of the response
    pub classification: Classification,
    /// Free-form tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl RequestOutcome {
    /// True if the request succeeded
    pub fn is_success(&self) -> bool {
        self.classification.is_success()
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> OutcomeClassifier {
        OutcomeClassifier::default()
    }

    #[test]
    fn test_transport_failure_has_no_status() {
        for kind in [
            TransportErrorKind::Timeout,
            TransportErrorKind::ConnectionRefused,
            TransportErrorKind::ConnectionReset,
        ] {
            let c = classifier().classify(&RawResponse::transport(kind));
            assert_eq!(c.kind, OutcomeKind::TransportFailure(kind));
            assert_eq!(c.status, None);
            assert!(!c.resource_exhausted);
            assert_eq!(c.status_class(), "transport");
        }
    }

    #[test]
    fn test_success_set_override() {
        let c = classifier();
        let created = SuccessSet::codes(&[201]);

        assert!(c.classify(&RawResponse::with_status(200, "")).is_success());
        let ok_but_not_created =
            c.classify_with(&RawResponse::with_status(200, ""), Some(&created));
        assert_eq!(ok_but_not_created.kind, OutcomeKind::Unexpected);
        assert!(c
            .classify_with(&RawResponse::with_status(201, ""), Some(&created))
            .is_success());
    }

    #[test]
    fn test_success_takes_priority_over_client_error() {
        let accepts_conflict = SuccessSet::codes(&[200, 201]).with_code(409);
        let c = classifier().classify_with(
            &RawResponse::with_status(409, "connection already exists"),
            Some(&accepts_conflict),
        );
        assert!(c.is_success());
        assert!(!c.resource_exhausted);
    }

    #[test]
    fn test_server_error_subkinds() {
        let c = classifier();
        assert_eq!(
            c.classify(&RawResponse::with_status(502, "")).kind,
            OutcomeKind::ServerError(ServerErrorKind::Gateway)
        );
        assert_eq!(
            c.classify(&RawResponse::with_status(503, "")).kind,
            OutcomeKind::ServerError(ServerErrorKind::Unavailable)
        );
        assert_eq!(
            c.classify(&RawResponse::with_status(500, "")).kind,
            OutcomeKind::ServerError(ServerErrorKind::Generic)
        );
        assert_eq!(
            c.classify(&RawResponse::with_status(404, "")).kind,
            OutcomeKind::ClientError
        );
        assert_eq!(
            c.classify(&RawResponse::with_status(302, "")).kind,
            OutcomeKind::Unexpected
        );
    }

    #[test]
    fn test_resource_exhausted_overlay() {
        let c = classifier();

        let stock = c.classify(&RawResponse::with_status(
            400,
            r#"{"detail":{"code":"INSUFFICIENT_STOCK"}}"#,
        ));
        assert_eq!(stock.kind, OutcomeKind::ClientError);
        assert!(stock.resource_exhausted);
        assert_eq!(stock.marker.as_deref(), Some("INSUFFICIENT_STOCK"));

        let pool = c.classify(&RawResponse::with_status(
            500,
            "QueuePool limit of size 5 overflow 10 reached",
        ));
        assert_eq!(pool.kind, OutcomeKind::ServerError(ServerErrorKind::Generic));
        assert!(pool.resource_exhausted);

        let plain = c.classify(&RawResponse::with_status(500, "internal error"));
        assert!(!plain.resource_exhausted);
    }

    #[test]
    fn test_markers_ignored_on_success() {
        let c = classifier().classify(&RawResponse::with_status(200, "pool of items"));
        assert!(c.is_success());
        assert!(!c.resource_exhausted);
    }

    #[test]
    fn test_marker_match_is_case_sensitive() {
        let markers = MarkerSet::new(2, ["INSUFFICIENT_STOCK"]);
        let c = OutcomeClassifier::new(SuccessSet::default(), markers);
        assert!(
            !c.classify(&RawResponse::with_status(400, "insufficient_stock"))
                .resource_exhausted
        );
        assert_eq!(c.markers().version, 2);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = classifier();
        let inputs = [
            RawResponse::with_status(503, "connection pool exhausted"),
            RawResponse::with_status(201, "{}"),
            RawResponse::with_status(422, "bad body"),
            RawResponse::transport(TransportErrorKind::Timeout),
        ];
        for raw in &inputs {
            let first = c.classify(raw);
            for _ in 0..10 {
                assert_eq!(c.classify(raw), first);
            }
        }
    }
}
