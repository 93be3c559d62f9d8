//! Whole-run tests: setup, scheduler, classification, oracle and verdict
//! against in-memory targets.

use async_trait::async_trait;
use serde_json::json;
use shop_bench::{Runner, Scenario, ScenarioKind, ScenarioParams};
use shop_bench_core::{
    names, Account, ExecutorKind, LoginGrant, Method, MetricSummary, PreparedRequest, ProductSpec,
    ProvisionError, Provisioner, RawResponse, RequestTemplate, RunConfig, SessionBinding,
    SetupFailurePolicy, SetupPlan, StagePlan, StopReason, TargetClient, ThinkTime, UserSession,
};
use shop_bench_report::{render_text, Report, Threshold};
use shop_bench_samplers::Weighted;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// In-memory service
// =============================================================================

/// Accepts every account and hands out one token per email
#[derive(Default)]
struct MemoryProvisioner {
    registered: AtomicUsize,
}

#[async_trait]
impl Provisioner for MemoryProvisioner {
    async fn register(&self, _account: &Account) -> Result<(), ProvisionError> {
        self.registered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn login(&self, account: &Account) -> Result<LoginGrant, ProvisionError> {
        Ok(LoginGrant {
            access_token: format!("token:{}", account.email),
            subject: Some(account.email.clone()),
        })
    }

    async fn create_product(
        &self,
        _session: &UserSession,
        _product: &ProductSpec,
    ) -> Result<String, ProvisionError> {
        Ok("42".into())
    }

    async fn create_order(
        &self,
        _session: &UserSession,
        _product_id: &str,
        _quantity: u32,
    ) -> Result<(), ProvisionError> {
        Ok(())
    }
}

/// Order endpoint holding a finite stock, decremented in arrival order
struct StockedShop {
    stock: AtomicI64,
    orders: AtomicUsize,
}

impl StockedShop {
    fn new(stock: i64) -> Self {
        Self {
            stock: AtomicI64::new(stock),
            orders: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TargetClient for StockedShop {
    fn target_name(&self) -> &str {
        "stocked-shop"
    }

    async fn execute(&self, request: &PreparedRequest) -> RawResponse {
        if request.method != Method::Post || request.path != "/orders" {
            return RawResponse::with_status(404, "not found");
        }
        self.orders.fetch_add(1, Ordering::SeqCst);
        if self.stock.fetch_sub(1, Ordering::SeqCst) > 0 {
            RawResponse::with_status(201, json!({"id": 1}).to_string())
        } else {
            self.stock.fetch_add(1, Ordering::SeqCst);
            RawResponse::with_status(400, r#"{"detail":"INSUFFICIENT_STOCK"}"#)
        }
    }
}

/// Counts requests by path; the first `failures` calls answer 500
struct CountingTarget {
    calls: AtomicUsize,
    failures: usize,
    delay: Duration,
    by_path: parking_lot::Mutex<HashMap<String, usize>>,
}

impl CountingTarget {
    fn new(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures,
            delay: Duration::ZERO,
            by_path: Default::default(),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn hits(&self, path: &str) -> usize {
        self.by_path.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TargetClient for CountingTarget {
    fn target_name(&self) -> &str {
        "counting"
    }

    async fn execute(&self, request: &PreparedRequest) -> RawResponse {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.by_path.lock().entry(request.path.clone()).or_default() += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if n < self.failures {
            RawResponse::with_status(500, "Internal Server Error")
        } else {
            RawResponse::with_status(200, "[]")
        }
    }
}

fn scenario(name: &str, run: RunConfig, mix: Vec<Weighted<RequestTemplate>>) -> Scenario {
    Scenario {
        name: name.into(),
        run,
        setup: SetupPlan::new("e2e"),
        mix,
        binding: SessionBinding::Anonymous,
        thresholds: Vec::new(),
        fairness: None,
        series: Vec::new(),
    }
}

fn counter(report: &Report, name: &str) -> u64 {
    match report.metrics.get(name) {
        Some(MetricSummary::Counter { count, .. }) => *count,
        other => panic!("{name} is not a counter: {other:?}"),
    }
}

// =============================================================================
// FIFO order under contention
// =============================================================================

// Single-threaded runtime: clients reach the shop in admission order, so the
// first ten ordinals are the earliest senders.
#[tokio::test(flavor = "current_thread")]
async fn test_fifo_earliest_senders_get_the_stock() {
    let params = ScenarioParams {
        run_id: "fifo".into(),
        users: Some(20),
        initial_stock: Some(10),
        ..Default::default()
    };
    let scenario = Scenario::preset(ScenarioKind::FifoOrder, &params).unwrap();
    let shop = Arc::new(StockedShop::new(10));
    let provisioner = Arc::new(MemoryProvisioner::default());

    let runner =
        Runner::new(scenario, shop.clone(), provisioner.clone()).with_signal_handling(false);
    let report = runner.run().await.unwrap();

    // population plus the primary account that owns the product
    assert_eq!(provisioner.registered.load(Ordering::SeqCst), 21);
    assert_eq!(shop.orders.load(Ordering::SeqCst), 20);
    assert_eq!(shop.stock.load(Ordering::SeqCst), 0);

    let verdict = report.fairness.as_ref().unwrap();
    assert_eq!(verdict.reported, 20);
    let mut winners = verdict.actual_winners.clone();
    winners.sort_unstable();
    assert_eq!(winners, (1..=10).collect::<Vec<_>>());
    assert!(verdict.is_fair());
    assert!(verdict.violations.is_empty());
    assert!(!report.partial);
    assert!(report.passed);
    assert_eq!(report.clients.setup_failed, 0);

    assert_eq!(counter(&report, names::SUCCESS_COUNT), 10);
    assert_eq!(counter(&report, names::FAIL_COUNT), 10);
    assert_eq!(counter(&report, names::STOCK_ERROR_COUNT), 10);
    assert_eq!(counter(&report, names::TIMEOUT_COUNT), 0);
    assert_eq!(counter(&report, names::SERVER_ERROR_COUNT), 0);
    assert!(report.metrics.contains_key(names::ORDER_DURATION));
}

#[tokio::test(flavor = "current_thread")]
async fn test_oversold_stock_fails_the_verdict() {
    let params = ScenarioParams {
        run_id: "oversold".into(),
        users: Some(6),
        initial_stock: Some(3),
        ..Default::default()
    };
    let scenario = Scenario::preset(ScenarioKind::FifoOrder, &params).unwrap();
    // The shop believes it has twice the advertised stock
    let shop = Arc::new(StockedShop::new(6));

    let runner = Runner::new(scenario, shop, Arc::new(MemoryProvisioner::default()))
        .with_signal_handling(false);
    let report = runner.run().await.unwrap();

    let verdict = report.fairness.as_ref().unwrap();
    assert!(verdict.oversold);
    assert_eq!(verdict.false_positives, vec![4, 5, 6]);
    assert!(report.fairness_violated());
    assert!(!report.passed);
    assert!(render_text(&report).contains("FAILED"));
}

// =============================================================================
// Weighted traffic mix
// =============================================================================

#[tokio::test]
async fn test_weighted_mix_split() {
    let run = RunConfig::new(ExecutorKind::SharedIterations {
        clients: 100,
        iterations: 1_000,
    })
    .with_max_concurrency(100)
    .with_max_duration(Duration::from_secs(30));
    let mix = vec![
        Weighted::new(RequestTemplate::get("products", "/products"), 70.0),
        Weighted::new(RequestTemplate::get("me", "/auth/users/me"), 30.0),
    ];
    let target = Arc::new(CountingTarget::new(0));

    let runner = Runner::new(
        scenario("mix", run, mix),
        target.clone(),
        Arc::new(MemoryProvisioner::default()),
    )
    .with_signal_handling(false);
    let report = runner.run().await.unwrap();

    assert_eq!(target.calls.load(Ordering::SeqCst), 1_000);
    let products = target.hits("/products");
    let me = target.hits("/auth/users/me");
    assert_eq!(products + me, 1_000);
    assert!((650..=750).contains(&products), "products: {products}");
    assert!((250..=350).contains(&me), "me: {me}");

    assert_eq!(runner.sink().count("http_reqs{request=products}") as usize, products);
    assert!(report.passed);
}

// =============================================================================
// Error rate and thresholds
// =============================================================================

#[tokio::test]
async fn test_error_rate_is_exact() {
    let run = RunConfig::new(ExecutorKind::SharedIterations {
        clients: 10,
        iterations: 100,
    })
    .with_max_concurrency(10);
    let mut scenario = scenario(
        "errors",
        run,
        vec![Weighted::new(RequestTemplate::get("list", "/products"), 1.0)],
    );
    scenario.thresholds = vec![
        Threshold::parse(names::ERROR_RATE, "rate<0.06").unwrap(),
        Threshold::parse(names::ERROR_RATE, "rate<0.05").unwrap(),
    ];

    let runner = Runner::new(
        scenario,
        Arc::new(CountingTarget::new(5)),
        Arc::new(MemoryProvisioner::default()),
    )
    .with_signal_handling(false);
    let report = runner.run().await.unwrap();

    match report.metrics.get(names::ERROR_RATE) {
        Some(MetricSummary::Rate { hits, total, rate }) => {
            assert_eq!(*hits, 5);
            assert_eq!(*total, 100);
            assert_eq!(*rate, 0.05);
        }
        other => panic!("unexpected error_rate summary: {other:?}"),
    }
    assert!(report.thresholds[0].passed);
    assert!(!report.thresholds[1].passed);
    assert_eq!(report.thresholds[1].observed, Some(0.05));
    assert!(!report.passed);
    assert_eq!(report.clients.setup_failed, 0);
}

// =============================================================================
// Deadline truncation
// =============================================================================

#[tokio::test]
async fn test_deadline_reports_partial_run_with_verdict() {
    let plan = StagePlan::ramp_hold_down(
        0,
        5,
        Duration::from_millis(200),
        Duration::from_secs(10),
        Duration::from_millis(200),
    );
    let run = RunConfig::new(ExecutorKind::RampingClients { plan })
        .with_max_concurrency(5)
        .with_max_duration(Duration::from_millis(600))
        .with_graceful_stop(Duration::from_millis(100))
        .with_think_time(ThinkTime::Fixed {
            delay: Duration::from_millis(10),
        });
    let mut scenario = scenario(
        "deadline",
        run,
        vec![Weighted::new(RequestTemplate::get("list", "/products"), 1.0)],
    );
    scenario.thresholds = vec![Threshold::parse(names::HTTP_REQ_DURATION, "p(95)<5000").unwrap()];

    let target = Arc::new(CountingTarget::new(0).with_delay(Duration::from_millis(20)));
    let runner = Runner::new(scenario, target.clone(), Arc::new(MemoryProvisioner::default()))
        .with_signal_handling(false);

    let started = std::time::Instant::now();
    let report = runner.run().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(report.partial);
    assert_eq!(report.stop_reason, Some(StopReason::Deadline));
    assert!(target.calls.load(Ordering::SeqCst) > 0);
    assert_eq!(report.thresholds.len(), 1);
    assert!(report.thresholds[0].observed.is_some());
    assert!(report.passed);
    assert!(render_text(&report).contains("PARTIAL"));
}

// =============================================================================
// Setup failures
// =============================================================================

struct LoginDown;

#[async_trait]
impl Provisioner for LoginDown {
    async fn register(&self, _account: &Account) -> Result<(), ProvisionError> {
        Ok(())
    }

    async fn login(&self, _account: &Account) -> Result<LoginGrant, ProvisionError> {
        Err(ProvisionError::Rejected {
            step: "login",
            status: 503,
            body: "unavailable".into(),
        })
    }

    async fn create_product(
        &self,
        _session: &UserSession,
        _product: &ProductSpec,
    ) -> Result<String, ProvisionError> {
        Ok("1".into())
    }

    async fn create_order(
        &self,
        _session: &UserSession,
        _product_id: &str,
        _quantity: u32,
    ) -> Result<(), ProvisionError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_shared_session_failure_aborts_before_any_request() {
    let params = ScenarioParams {
        run_id: "abort".into(),
        ..Default::default()
    };
    let scenario = Scenario::preset(ScenarioKind::AuthStress, &params).unwrap();
    let target = Arc::new(CountingTarget::new(0));

    let runner = Runner::new(scenario, target.clone(), Arc::new(LoginDown))
        .with_signal_handling(false);
    let err = runner.run().await.unwrap_err();

    assert_eq!(err.kind, shop_bench_core::BenchErrorKind::Setup);
    assert_eq!(target.calls.load(Ordering::SeqCst), 0);

    let report = runner.generator().aborted(err.message);
    assert!(!report.passed);
    assert!(report.setup_error.is_some());
}

#[tokio::test]
async fn test_degraded_setup_reports_failure_without_partial() {
    let params = ScenarioParams {
        run_id: "degrade".into(),
        ..Default::default()
    };
    let mut scenario = Scenario::preset(ScenarioKind::AuthStress, &params).unwrap();
    scenario.setup.failure_policy = SetupFailurePolicy::DegradeToZeroClients;
    let target = Arc::new(CountingTarget::new(0));

    let runner = Runner::new(scenario, target.clone(), Arc::new(LoginDown))
        .with_signal_handling(false);
    let report = runner.run().await.expect("degraded setup still reports");

    assert!(!report.partial);
    assert!(!report.passed);
    assert!(report.setup_error.is_some());
    assert_eq!(report.stop_reason, Some(StopReason::Completed));
    assert_eq!(target.calls.load(Ordering::SeqCst), 0);
    assert!(render_text(&report).contains("DEGRADED (setup)"));
}
