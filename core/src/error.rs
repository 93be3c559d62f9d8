//! Error types for shop-bench-core
//!
//! Per-request failures are never represented here: those are
//! [`RequestOutcome`](crate::outcome::RequestOutcome)s. A `BenchError` is
//! reserved for conditions that stop a component or the whole run.

use serde::{Deserialize, Serialize};

/// Broad category of a [`BenchError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchErrorKind {
    /// Invalid or missing configuration
    Config,
    /// Shared-context provisioning failed
    Setup,
    /// A virtual client failed outside of request handling
    Client,
    /// The scheduler could not drive the run
    Orchestration,
    /// The run was shut down before the operation completed
    Shutdown,
    /// Fairness oracle used out of order
    Oracle,
}

/// Core error type
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?} error: {message}")]
pub struct BenchError {
    /// Error category
    pub kind: BenchErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl BenchError {
    /// Create an error of the given kind
    pub fn new(kind: BenchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A required builder field was never set
    pub fn missing_config(field: &str) -> Self {
        Self::new(
            BenchErrorKind::Config,
            format!("missing required configuration: {field}"),
        )
    }

    /// Configuration failed validation
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(BenchErrorKind::Config, message)
    }

    /// Shared-context provisioning failed
    pub fn setup(message: impl Into<String>) -> Self {
        Self::new(BenchErrorKind::Setup, message)
    }

    /// Client-level failure
    pub fn client(message: impl Into<String>) -> Self {
        Self::new(BenchErrorKind::Client, message)
    }

    /// Scheduler-level failure
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::new(BenchErrorKind::Orchestration, message)
    }

    /// Operation interrupted by shutdown
    pub fn shutdown() -> Self {
        Self::new(BenchErrorKind::Shutdown, "run is shutting down")
    }

    /// Fairness oracle misuse
    pub fn oracle(message: impl Into<String>) -> Self {
        Self::new(BenchErrorKind::Oracle, message)
    }

    /// True if this error should abort the whole run
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self.kind,
            BenchErrorKind::Config | BenchErrorKind::Setup | BenchErrorKind::Orchestration
        )
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;
