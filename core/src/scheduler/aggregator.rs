//! Totals across every client of a run

use serde::{Deserialize, Serialize};

use crate::client::ClientStats;

/// Aggregated client statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
    /// Clients admitted by the scheduler
    pub admitted: usize,

    /// Clients that bound a session and ran to the end of their loop
    pub completed: usize,

    /// Clients that never obtained a session
    pub setup_failed: usize,

    /// Clients retired because the stage target dropped
    pub retired: usize,

    /// Clients stopped by shutdown
    pub interrupted: usize,

    /// Client tasks that returned an error or panicked
    pub failed_tasks: usize,

    /// Iterations completed
    pub iterations: usize,

    /// Requests attempted
    pub requests: usize,

    /// Requests that did not succeed
    pub failed_requests: usize,
}

impl ClientSummary {
    /// Share of requests that failed
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.requests as f64
        }
    }
}

/// Aggregate statistics from every client that returned
pub fn aggregate_client_stats(
    stats: &[ClientStats],
    admitted: usize,
    failed_tasks: usize,
) -> ClientSummary {
    let count = |pred: fn(&ClientStats) -> bool| stats.iter().filter(|s| pred(s)).count();

    ClientSummary {
        admitted,
        completed: count(|s| !s.setup_failed),
        setup_failed: count(|s| s.setup_failed),
        retired: count(|s| s.retired),
        interrupted: count(|s| s.interrupted),
        failed_tasks,
        iterations: stats.iter().map(|s| s.iterations).sum(),
        requests: stats.iter().map(|s| s.requests()).sum(),
        failed_requests: stats.iter().map(|s| s.failed).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty() {
        let summary = aggregate_client_stats(&[], 0, 0);
        assert_eq!(summary, ClientSummary::default());
        assert_eq!(summary.error_rate(), 0.0);
    }

    #[test]
    fn test_aggregate_mixed_clients() {
        let mut a = ClientStats::new(1);
        a.iterations = 4;
        a.succeeded = 3;
        a.failed = 1;
        a.retired = true;

        let mut b = ClientStats::new(2);
        b.setup_failed = true;

        let mut c = ClientStats::new(3);
        c.iterations = 2;
        c.succeeded = 2;
        c.interrupted = true;

        let summary = aggregate_client_stats(&[a, b, c], 4, 1);
        assert_eq!(summary.admitted, 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.setup_failed, 1);
        assert_eq!(summary.retired, 1);
        assert_eq!(summary.interrupted, 1);
        assert_eq!(summary.failed_tasks, 1);
        assert_eq!(summary.iterations, 6);
        assert_eq!(summary.requests, 6);
        assert!((summary.error_rate() - 1.0 / 6.0).abs() < 1e-9);
    }
}
