//! FIFO fairness oracle for a scarce, countable resource
//!
//! The oracle collects one [`FairnessRecord`] per client while the run
//! executes, seals once every expected client has reported (or a timeout
//! fires), and then checks exactly once that the clients who obtained the
//! resource are the `capacity` earliest senders.
//!
//! ```text
//! Collecting --(all reported | seal() | wait timeout)--> Sealed --verify()--> Verified
//! ```

use crate::error::{BenchError, BenchResult};
use crate::outcome::RequestOutcome;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// One client's attempt at the scarce resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairnessRecord {
    /// Client ordinal
    pub ordinal: usize,
    /// When the request was handed to the transport
    pub sent_at: DateTime<Utc>,
    /// Whether the client obtained the resource
    pub succeeded: bool,
}

/// Observable lifecycle phase of the oracle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OraclePhase {
    /// Accepting records
    Collecting,
    /// Closed to new records, not yet checked
    Sealed,
    /// Check has run; terminal
    Verified,
}

/// How a client broke the FIFO property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Obtained the resource without being among the earliest senders
    UnexpectedWinner,
    /// Among the earliest senders but did not obtain the resource
    MissedWinner,
}

/// A single fairness violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairnessViolation {
    /// Client ordinal
    pub ordinal: usize,
    /// 1-based position in send order
    pub send_rank: usize,
    /// What went wrong
    pub kind: ViolationKind,
}

/// Result of the fairness check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairnessVerdict {
    /// Initial capacity of the resource
    pub capacity: usize,
    /// Clients that reported an attempt
    pub reported: usize,
    /// Clients that never attempted (e.g. failed to obtain a session)
    pub forfeited: Vec<usize>,
    /// The `capacity` earliest senders, in send order
    pub expected_winners: Vec<usize>,
    /// Clients that obtained the resource, in send order
    pub actual_winners: Vec<usize>,
    /// Size of the intersection of expected and actual winners
    pub exact_matches: usize,
    /// Succeeded but were not expected to
    pub false_positives: Vec<usize>,
    /// Expected to succeed but did not
    pub false_negatives: Vec<usize>,
    /// The winner set (not just its size) matched
    pub order_preserved: bool,
    /// More clients succeeded than the capacity allows
    pub oversold: bool,
    /// Every mismatch, in send order
    pub violations: Vec<FairnessViolation>,
    /// Records rejected because they arrived after sealing
    pub late_records: usize,
}

impl FairnessVerdict {
    /// True when no violation was found
    pub fn is_fair(&self) -> bool {
        self.violations.is_empty() && !self.oversold
    }

    fn compute(
        capacity: usize,
        mut records: Vec<FairnessRecord>,
        forfeited: Vec<usize>,
        late_records: usize,
    ) -> Self {
        records.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.ordinal.cmp(&b.ordinal)));

        let expected_winners: Vec<usize> =
            records.iter().take(capacity).map(|r| r.ordinal).collect();
        let actual_winners: Vec<usize> = records
            .iter()
            .filter(|r| r.succeeded)
            .map(|r| r.ordinal)
            .collect();

        let expected: HashSet<usize> = expected_winners.iter().copied().collect();
        let actual: HashSet<usize> = actual_winners.iter().copied().collect();

        let mut violations = Vec::new();
        let mut false_positives = Vec::new();
        let mut false_negatives = Vec::new();
        for (idx, record) in records.iter().enumerate() {
            let kind = match (expected.contains(&record.ordinal), record.succeeded) {
                (false, true) => {
                    false_positives.push(record.ordinal);
                    ViolationKind::UnexpectedWinner
                }
                (true, false) => {
                    false_negatives.push(record.ordinal);
                    ViolationKind::MissedWinner
                }
                _ => continue,
            };
            violations.push(FairnessViolation {
                ordinal: record.ordinal,
                send_rank: idx + 1,
                kind,
            });
        }

        Self {
            capacity,
            reported: records.len(),
            forfeited,
            exact_matches: expected.intersection(&actual).count(),
            order_preserved: false_positives.is_empty() && false_negatives.is_empty(),
            oversold: actual_winners.len() > capacity,
            expected_winners,
            actual_winners,
            false_positives,
            false_negatives,
            violations,
            late_records,
        }
    }
}

enum OracleState {
    Collecting(Vec<FairnessRecord>),
    Sealed(Vec<FairnessRecord>),
    Verified(Arc<FairnessVerdict>),
}

struct OracleInner {
    state: OracleState,
    seen: HashSet<usize>,
    forfeited: BTreeSet<usize>,
    late: usize,
}

/// Verifies that a scarce resource was granted in strict send order
pub struct FairnessOracle {
    capacity: usize,
    expected_clients: usize,
    request: Option<String>,
    inner: Mutex<OracleInner>,
    sealed: Notify,
}

impl FairnessOracle {
    /// Oracle for a resource of `capacity` contended by `expected_clients`
    pub fn new(capacity: usize, expected_clients: usize) -> Self {
        Self {
            capacity,
            expected_clients,
            request: None,
            inner: Mutex::new(OracleInner {
                state: OracleState::Collecting(Vec::with_capacity(expected_clients)),
                seen: HashSet::with_capacity(expected_clients),
                forfeited: BTreeSet::new(),
                late: 0,
            }),
            sealed: Notify::new(),
        }
    }

    /// Only track outcomes of the named request
    pub fn for_request(mut self, name: impl Into<String>) -> Self {
        self.request = Some(name.into());
        self
    }

    /// Resource capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether outcomes of `request` feed the oracle
    pub fn tracks(&self, request: &str) -> bool {
        self.request.as_deref().map_or(true, |r| r == request)
    }

    /// Current phase
    pub fn phase(&self) -> OraclePhase {
        match self.inner.lock().state {
            OracleState::Collecting(_) => OraclePhase::Collecting,
            OracleState::Sealed(_) => OraclePhase::Sealed,
            OracleState::Verified(_) => OraclePhase::Verified,
        }
    }

    /// Feed a tracked outcome; returns whether it was accepted
    pub fn record_outcome(&self, outcome: &RequestOutcome) -> bool {
        if !self.tracks(&outcome.request) {
            return false;
        }
        self.record(FairnessRecord {
            ordinal: outcome.ordinal,
            sent_at: outcome.sent_at,
            succeeded: outcome.is_success(),
        })
    }

    /// Add a record; returns whether it was accepted
    ///
    /// Only a client's first record counts. Records arriving after sealing
    /// are counted as late and otherwise ignored.
    pub fn record(&self, record: FairnessRecord) -> bool {
        let mut inner = self.inner.lock();
        let OracleInner {
            state, seen, late, ..
        } = &mut *inner;

        let OracleState::Collecting(records) = state else {
            *late += 1;
            tracing::warn!(ordinal = record.ordinal, "Fairness record arrived after sealing");
            return false;
        };
        if !seen.insert(record.ordinal) {
            tracing::debug!(ordinal = record.ordinal, "Ignoring repeat fairness record");
            return false;
        }
        records.push(record);
        self.seal_if_complete(&mut inner);
        true
    }

    /// Account for a client that will never attempt the resource
    pub fn forfeit(&self, ordinal: usize) {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, OracleState::Collecting(_)) || !inner.seen.insert(ordinal) {
            return;
        }
        inner.forfeited.insert(ordinal);
        tracing::debug!(ordinal, "Client forfeited its fairness slot");
        self.seal_if_complete(&mut inner);
    }

    fn seal_if_complete(&self, inner: &mut OracleInner) {
        if inner.seen.len() >= self.expected_clients {
            Self::seal_locked(inner);
            self.sealed.notify_waiters();
        }
    }

    fn seal_locked(inner: &mut OracleInner) -> bool {
        if let OracleState::Collecting(records) = &mut inner.state {
            let records = std::mem::take(records);
            tracing::info!(
                records = records.len(),
                forfeited = inner.forfeited.len(),
                "Fairness oracle sealed"
            );
            inner.state = OracleState::Sealed(records);
            true
        } else {
            false
        }
    }

    /// Stop accepting records; returns false if already sealed
    pub fn seal(&self) -> bool {
        let sealed = Self::seal_locked(&mut self.inner.lock());
        if sealed {
            self.sealed.notify_waiters();
        }
        sealed
    }

    /// Wait until every expected client reported, sealing early on timeout
    pub async fn wait_sealed(&self, timeout: Duration) -> OraclePhase {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.sealed.notified();
            let phase = self.phase();
            if phase != OraclePhase::Collecting {
                return phase;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let reported = self.inner.lock().seen.len();
                tracing::warn!(
                    reported,
                    expected = self.expected_clients,
                    "Fairness oracle timed out waiting for clients, sealing"
                );
                self.seal();
                return self.phase();
            }
        }
    }

    /// Run the fairness check
    ///
    /// Valid once sealed. The first call computes the verdict; later calls
    /// return the same verdict.
    pub fn verify(&self) -> BenchResult<Arc<FairnessVerdict>> {
        let mut inner = self.inner.lock();
        let records = match &mut inner.state {
            OracleState::Collecting(_) => {
                return Err(BenchError::oracle(
                    "fairness oracle must be sealed before verification",
                ));
            }
            OracleState::Verified(verdict) => return Ok(Arc::clone(verdict)),
            OracleState::Sealed(records) => std::mem::take(records),
        };

        let forfeited = inner.forfeited.iter().copied().collect();
        let verdict = Arc::new(FairnessVerdict::compute(
            self.capacity,
            records,
            forfeited,
            inner.late,
        ));

        if verdict.is_fair() {
            tracing::info!(
                capacity = self.capacity,
                winners = verdict.actual_winners.len(),
                "Fairness verified: resource granted in send order"
            );
        } else {
            tracing::warn!(
                capacity = self.capacity,
                violations = verdict.violations.len(),
                false_positives = ?verdict.false_positives,
                false_negatives = ?verdict.false_negatives,
                "Fairness violated"
            );
        }

        inner.state = OracleState::Verified(Arc::clone(&verdict));
        Ok(verdict)
    }
}

impl std::fmt::Debug for FairnessOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairnessOracle")
            .field("capacity", &self.capacity)
            .field("expected_clients", &self.expected_clients)
            .field("request", &self.request)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn record(ordinal: usize, ms: i64, succeeded: bool) -> FairnessRecord {
        FairnessRecord {
            ordinal,
            sent_at: at(ms),
            succeeded,
        }
    }

    #[test]
    fn test_earliest_senders_win_is_fair() {
        let oracle = FairnessOracle::new(3, 6);
        for ordinal in 1..=6 {
            assert!(oracle.record(record(ordinal, ordinal as i64 * 10, ordinal <= 3)));
        }
        assert_eq!(oracle.phase(), OraclePhase::Sealed);

        let verdict = oracle.verify().unwrap();
        assert!(verdict.is_fair());
        assert!(verdict.order_preserved);
        assert_eq!(verdict.expected_winners, vec![1, 2, 3]);
        assert_eq!(verdict.actual_winners, vec![1, 2, 3]);
        assert_eq!(verdict.exact_matches, 3);
        assert_eq!(oracle.phase(), OraclePhase::Verified);
    }

    #[test]
    fn test_late_sender_winning_is_violation() {
        let oracle = FairnessOracle::new(2, 4);
        oracle.record(record(1, 10, true));
        oracle.record(record(2, 20, false));
        oracle.record(record(3, 30, true));
        oracle.record(record(4, 40, false));

        let verdict = oracle.verify().unwrap();
        assert!(!verdict.is_fair());
        assert!(!verdict.order_preserved);
        assert!(!verdict.oversold);
        assert_eq!(verdict.false_positives, vec![3]);
        assert_eq!(verdict.false_negatives, vec![2]);
        assert_eq!(verdict.exact_matches, 1);
        assert_eq!(
            verdict.violations,
            vec![
                FairnessViolation {
                    ordinal: 2,
                    send_rank: 2,
                    kind: ViolationKind::MissedWinner
                },
                FairnessViolation {
                    ordinal: 3,
                    send_rank: 3,
                    kind: ViolationKind::UnexpectedWinner
                },
            ]
        );
    }

    #[test]
    fn test_send_order_not_arrival_order() {
        let oracle = FairnessOracle::new(1, 3);
        oracle.record(record(3, 30, false));
        oracle.record(record(1, 10, true));
        oracle.record(record(2, 20, false));
        assert!(oracle.verify().unwrap().is_fair());
    }

    #[test]
    fn test_ties_broken_by_ordinal() {
        let oracle = FairnessOracle::new(1, 2);
        oracle.record(record(2, 10, false));
        oracle.record(record(1, 10, true));
        let verdict = oracle.verify().unwrap();
        assert_eq!(verdict.expected_winners, vec![1]);
        assert!(verdict.is_fair());
    }

    #[test]
    fn test_oversold() {
        let oracle = FairnessOracle::new(1, 2);
        oracle.record(record(1, 10, true));
        oracle.record(record(2, 20, true));
        let verdict = oracle.verify().unwrap();
        assert!(verdict.oversold);
        assert!(!verdict.is_fair());
    }

    #[test]
    fn test_verify_requires_seal_and_is_idempotent() {
        let oracle = FairnessOracle::new(1, 5);
        oracle.record(record(1, 10, true));
        assert!(oracle.verify().is_err());

        assert!(oracle.seal());
        assert!(!oracle.seal());
        let first = oracle.verify().unwrap();
        let second = oracle.verify().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.reported, 1);
    }

    #[test]
    fn test_late_and_repeat_records() {
        let oracle = FairnessOracle::new(1, 2);
        assert!(oracle.record(record(1, 10, true)));
        assert!(!oracle.record(record(1, 15, false)));
        oracle.forfeit(2);
        assert_eq!(oracle.phase(), OraclePhase::Sealed);

        assert!(!oracle.record(record(3, 5, true)));
        let verdict = oracle.verify().unwrap();
        assert_eq!(verdict.late_records, 1);
        assert_eq!(verdict.forfeited, vec![2]);
        assert_eq!(verdict.reported, 1);
        assert!(verdict.is_fair());
    }

    #[test]
    fn test_request_filter() {
        let oracle = FairnessOracle::new(1, 1).for_request("create_order");
        assert!(oracle.tracks("create_order"));
        assert!(!oracle.tracks("list_products"));
        assert!(FairnessOracle::new(1, 1).tracks("anything"));
    }

    #[tokio::test]
    async fn test_wait_sealed_times_out() {
        let oracle = FairnessOracle::new(1, 10);
        oracle.record(record(1, 10, true));
        let phase = oracle.wait_sealed(Duration::from_millis(20)).await;
        assert_eq!(phase, OraclePhase::Sealed);
        assert_eq!(oracle.verify().unwrap().reported, 1);
    }

    #[tokio::test]
    async fn test_wait_sealed_wakes_on_last_record() {
        let oracle = Arc::new(FairnessOracle::new(1, 2));
        let waiter = {
            let oracle = Arc::clone(&oracle);
            tokio::spawn(async move { oracle.wait_sealed(Duration::from_secs(5)).await })
        };
        oracle.record(record(1, 10, true));
        tokio::task::yield_now().await;
        oracle.record(record(2, 20, false));

        let phase = waiter.await.unwrap();
        assert_eq!(phase, OraclePhase::Sealed);
    }
}
