//! Per-client statistics

use crate::outcome::RequestOutcome;
use std::time::Instant;

/// Statistics tracked by each virtual client
#[derive(Debug, Default, Clone)]
pub struct ClientStats {
    /// Client ordinal
    pub ordinal: usize,

    /// Iterations completed
    pub iterations: usize,

    /// Requests that succeeded
    pub succeeded: usize,

    /// Requests that did not succeed
    pub failed: usize,

    /// Requests flagged as resource exhaustion
    pub resource_exhausted: usize,

    /// The client never obtained a session
    pub setup_failed: bool,

    /// The client left because the stage target dropped
    pub retired: bool,

    /// The client was stopped by shutdown
    pub interrupted: bool,

    /// Client start time
    pub started_at: Option<Instant>,

    /// Client end time
    pub ended_at: Option<Instant>,
}

impl ClientStats {
    /// Create empty stats for a client
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            ..Default::default()
        }
    }

    /// Start tracking (records start time)
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stop tracking (records end time)
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Requests attempted
    pub fn requests(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Share of requests that failed, 0 when none were sent
    pub fn error_rate(&self) -> f64 {
        if self.requests() == 0 {
            0.0
        } else {
            self.failed as f64 / self.requests() as f64
        }
    }

    /// Time between start and stop (or now, if still running)
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }

    /// Count one request outcome
    pub fn record(&mut self, outcome: &RequestOutcome) {
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        if outcome.classification.resource_exhausted {
            self.resource_exhausted += 1;
        }
    }
}
