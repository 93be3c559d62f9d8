//! Raw response descriptors handed to the outcome classifier

use serde::{Deserialize, Serialize};

/// Failure that happened before any HTTP status was received
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// No response within the request timeout
    Timeout,
    /// The target refused the connection
    ConnectionRefused,
    /// The connection was reset or aborted mid-request
    ConnectionReset,
    /// Any other transport-level failure
    Other,
}

impl TransportErrorKind {
    /// Snake-case label used in tags and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ConnectionRefused => "connection_refused",
            TransportErrorKind::ConnectionReset => "connection_reset",
            TransportErrorKind::Other => "other",
        }
    }
}

/// Either an HTTP status or a transport failure, never both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawStatus {
    /// HTTP status code
    Code(u16),
    /// No status was received
    Transport(TransportErrorKind),
}

/// What the target returned for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResponse {
    /// Status or transport failure
    pub status: RawStatus,
    /// Response body text, empty for transport failures
    #[serde(default)]
    pub body: String,
}

impl RawResponse {
    /// Response with an HTTP status
    pub fn with_status(code: u16, body: impl Into<String>) -> Self {
        Self {
            status: RawStatus::Code(code),
            body: body.into(),
        }
    }

    /// Transport failure
    pub fn transport(kind: TransportErrorKind) -> Self {
        Self {
            status: RawStatus::Transport(kind),
            body: String::new(),
        }
    }

    /// HTTP status code, if one was received
    pub fn code(&self) -> Option<u16> {
        match self.status {
            RawStatus::Code(code) => Some(code),
            RawStatus::Transport(_) => None,
        }
    }
}
