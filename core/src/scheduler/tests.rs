//! Tests for the scheduler module

use super::*;
use crate::config::{ExecutorKind, RunConfig};
use crate::context::SharedContext;
use crate::metrics::names;
use crate::outcome::{OutcomeClassifier, RequestOutcome};
use crate::response::RawResponse;
use crate::stage::{Stage, StagePlan};
use crate::traits::{ClientSession, SessionError, Workload};

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Mock Workload
// ============================================================================

struct MockWorkload {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    iterations: AtomicUsize,
    unbound: HashSet<usize>,
}

impl MockWorkload {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            iterations: AtomicUsize::new(0),
            unbound: HashSet::new(),
        }
    }

    fn without_session_for(mut self, ordinal: usize) -> Self {
        self.unbound.insert(ordinal);
        self
    }
}

#[async_trait]
impl Workload for MockWorkload {
    fn name(&self) -> &str {
        "mock-workload"
    }

    fn bind(&self, _ctx: &SharedContext, ordinal: usize) -> Result<ClientSession, SessionError> {
        if self.unbound.contains(&ordinal) {
            return Err(SessionError::MissingUser { ordinal });
        }
        Ok(ClientSession::anonymous(ordinal))
    }

    async fn iteration(
        &self,
        _ctx: &SharedContext,
        session: &mut ClientSession,
    ) -> Vec<RequestOutcome> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let sent_at = Utc::now();

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.iterations.fetch_add(1, Ordering::SeqCst);
        session.iteration += 1;

        vec![RequestOutcome {
            request: "get".into(),
            ordinal: session.ordinal,
            sent_at,
            completed_at: Utc::now(),
            latency_ms: self.delay.as_secs_f64() * 1000.0,
            classification: OutcomeClassifier::default()
                .classify(&RawResponse::with_status(200, "{}")),
            tags: Default::default(),
        }]
    }
}

fn scheduler(config: RunConfig, workload: Arc<MockWorkload>) -> ExecutionScheduler {
    SchedulerBuilder::new()
        .config(config)
        .workload(workload)
        .context(Arc::new(SharedContext::empty("test")))
        .build()
        .expect("Failed to build scheduler")
}

// ============================================================================
// Builder Tests
// ============================================================================

#[test]
fn test_builder_missing_workload() {
    let result = SchedulerBuilder::new()
        .context(Arc::new(SharedContext::empty("test")))
        .build();

    let err = result.unwrap_err();
    assert!(err.message.contains("workload"));
}

#[test]
fn test_builder_missing_context() {
    let result = SchedulerBuilder::new()
        .workload(Arc::new(MockWorkload::new(Duration::ZERO)))
        .build();

    assert!(result.is_err());
}

#[test]
fn test_builder_invalid_config() {
    let result = SchedulerBuilder::new()
        .workload(Arc::new(MockWorkload::new(Duration::ZERO)))
        .context(Arc::new(SharedContext::empty("test")))
        .max_concurrency(0)
        .build();

    assert!(result.is_err());
}

#[test]
fn test_builder_rejects_clients_above_ceiling() {
    let config = RunConfig::new(ExecutorKind::PerClientIterations {
        clients: 20,
        iterations: 1,
    })
    .with_max_concurrency(10);

    let result = SchedulerBuilder::new()
        .config(config)
        .workload(Arc::new(MockWorkload::new(Duration::ZERO)))
        .context(Arc::new(SharedContext::empty("test")))
        .build();

    assert!(result.is_err());
}

// ============================================================================
// Run Tests
// ============================================================================

#[tokio::test]
async fn test_shared_iterations_run_exactly_total() {
    let workload = Arc::new(MockWorkload::new(Duration::from_millis(1)));
    let config = RunConfig::new(ExecutorKind::SharedIterations {
        clients: 100,
        iterations: 1000,
    });
    let scheduler = scheduler(config, Arc::clone(&workload));

    let outcome = scheduler.run().await.expect("Run failed");

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert!(!outcome.partial);
    assert_eq!(outcome.clients.admitted, 100);
    assert_eq!(outcome.clients.iterations, 1000);
    assert_eq!(workload.iterations.load(Ordering::SeqCst), 1000);
    assert_eq!(scheduler.sink().count(names::HTTP_REQS), 1000);
    assert!(outcome.peak_concurrency <= 100);
}

#[tokio::test]
async fn test_per_client_iterations() {
    let workload = Arc::new(MockWorkload::new(Duration::from_millis(1)));
    let config = RunConfig::new(ExecutorKind::PerClientIterations {
        clients: 3,
        iterations: 4,
    });
    let scheduler = scheduler(config, Arc::clone(&workload));

    let outcome = scheduler.run().await.expect("Run failed");

    assert_eq!(outcome.clients.iterations, 12);
    assert_eq!(outcome.clients.completed, 3);
    assert_eq!(outcome.peak_concurrency, 3);
}

#[tokio::test]
async fn test_ramping_never_exceeds_ceiling() {
    let workload = Arc::new(MockWorkload::new(Duration::from_millis(5)));
    let plan = StagePlan::new(
        0,
        vec![
            Stage::new(Duration::from_millis(100), 20),
            Stage::new(Duration::from_millis(100), 20),
            Stage::new(Duration::from_millis(50), 0),
        ],
    );
    let config = RunConfig::new(ExecutorKind::RampingClients { plan })
        .with_max_concurrency(8)
        .with_tick(Duration::from_millis(5))
        .with_graceful_stop(Duration::from_secs(1));
    let scheduler = scheduler(config, Arc::clone(&workload));

    let outcome = scheduler.run().await.expect("Run failed");

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert!(outcome.peak_concurrency <= 8);
    assert!(workload.max_in_flight.load(Ordering::SeqCst) <= 8);
    assert!(outcome.clients.iterations > 0);
    assert_eq!(scheduler.population().active(), 0);
}

#[tokio::test]
async fn test_graceful_overrun_within_deadline_is_completed() {
    let workload = Arc::new(MockWorkload::new(Duration::from_secs(2)));
    let plan = StagePlan::new(
        0,
        vec![
            Stage::new(Duration::from_millis(50), 2),
            Stage::new(Duration::from_millis(50), 2),
        ],
    );
    let graceful = Duration::from_millis(100);
    let config = RunConfig::new(ExecutorKind::RampingClients { plan: plan.clone() })
        .with_max_concurrency(2)
        .with_tick(Duration::from_millis(5))
        .with_graceful_stop(graceful)
        .with_max_duration(plan.total_duration() + graceful);
    let scheduler = scheduler(config, workload);

    let start = Instant::now();
    let outcome = scheduler.run().await.expect("Run failed");

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert!(!outcome.partial);
    assert!(outcome.clients.interrupted >= 1);
}

#[tokio::test]
async fn test_constant_clients_hold_target() {
    let workload = Arc::new(MockWorkload::new(Duration::from_millis(5)));
    let config = RunConfig::new(ExecutorKind::ConstantClients {
        clients: 4,
        duration: Duration::from_millis(100),
    })
    .with_tick(Duration::from_millis(5));
    let scheduler = scheduler(config, Arc::clone(&workload));

    let outcome = scheduler.run().await.expect("Run failed");

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.peak_concurrency, 4);
    assert_eq!(outcome.clients.admitted, 4);
    assert_eq!(outcome.clients.retired, 4);
}

#[tokio::test]
async fn test_deadline_truncates_plan() {
    let workload = Arc::new(MockWorkload::new(Duration::from_millis(10)));
    let config = RunConfig::new(ExecutorKind::ConstantClients {
        clients: 5,
        duration: Duration::from_secs(30),
    })
    .with_tick(Duration::from_millis(5))
    .with_max_duration(Duration::from_millis(100));
    let scheduler = scheduler(config, workload);

    let start = Instant::now();
    let outcome = scheduler.run().await.expect("Run failed");

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome.stop_reason, StopReason::Deadline);
    assert!(outcome.partial);
    assert_eq!(outcome.clients.interrupted, 5);
    assert!(scheduler.sink().count(names::HTTP_REQS) > 0);
}

#[tokio::test]
async fn test_deadline_stops_iteration_executor() {
    let workload = Arc::new(MockWorkload::new(Duration::from_millis(20)));
    let config = RunConfig::new(ExecutorKind::PerClientIterations {
        clients: 2,
        iterations: 1_000,
    })
    .with_max_duration(Duration::from_millis(100));
    let scheduler = scheduler(config, workload);

    let outcome = scheduler.run().await.expect("Run failed");

    assert_eq!(outcome.stop_reason, StopReason::Deadline);
    assert!(outcome.partial);
    assert!(outcome.clients.iterations < 2_000);
}

#[tokio::test]
async fn test_interrupt_marks_run_interrupted() {
    let workload = Arc::new(MockWorkload::new(Duration::from_millis(10)));
    let config = RunConfig::new(ExecutorKind::ConstantClients {
        clients: 2,
        duration: Duration::from_secs(30),
    })
    .with_tick(Duration::from_millis(5));
    let scheduler = Arc::new(scheduler(config, workload));
    let stop = scheduler.stop_handle();

    let run = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    stop.interrupt();

    let outcome = run
        .await
        .expect("Run task panicked")
        .expect("Run failed");

    assert_eq!(outcome.stop_reason, StopReason::Interrupted);
    assert!(outcome.partial);
    assert!(outcome.clients.iterations > 0);
}

#[tokio::test]
async fn test_run_with_timeout() {
    let workload = Arc::new(MockWorkload::new(Duration::from_millis(10)));
    let config = RunConfig::new(ExecutorKind::PerClientIterations {
        clients: 2,
        iterations: 1_000,
    });
    let scheduler = scheduler(config, workload);

    let start = Instant::now();
    let outcome = scheduler
        .run_with_timeout(Duration::from_millis(100))
        .await
        .expect("Run failed");
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(1_000));
    assert_eq!(outcome.stop_reason, StopReason::Deadline);
}

#[tokio::test]
async fn test_setup_failure_does_not_abort_run() {
    let workload = Arc::new(MockWorkload::new(Duration::from_millis(1)).without_session_for(2));
    let config = RunConfig::new(ExecutorKind::PerClientIterations {
        clients: 3,
        iterations: 2,
    });
    let scheduler = scheduler(config, Arc::clone(&workload));

    let outcome = scheduler.run().await.expect("Run failed");

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.clients.setup_failed, 1);
    assert_eq!(outcome.clients.completed, 2);
    assert_eq!(outcome.clients.iterations, 4);
    assert_eq!(scheduler.sink().count(names::CLIENT_SETUP_FAILED), 1);
}

#[tokio::test]
async fn test_rate_limit_is_run_wide() {
    let workload = Arc::new(MockWorkload::new(Duration::ZERO));
    let config = RunConfig::new(ExecutorKind::SharedIterations {
        clients: 4,
        iterations: 30,
    })
    .with_rate_limit(100.0);
    let scheduler = scheduler(config, workload);

    let start = Instant::now();
    let outcome = scheduler.run().await.expect("Run failed");

    assert_eq!(outcome.clients.iterations, 30);
    // 100 burst tokens cover everything; the cap must not starve clients
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_scheduler_debug_format() {
    let scheduler = scheduler(
        RunConfig::default(),
        Arc::new(MockWorkload::new(Duration::ZERO)),
    );

    let debug = format!("{:?}", scheduler);
    assert!(debug.contains("ExecutionScheduler"));
    assert!(debug.contains("mock-workload"));
}
