//! Scheduler execution logic

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant as Deadline, MissedTickBehavior};

use crate::client::{ClientStats, IterationPacer, VirtualClient, VirtualClientBuilder};
use crate::config::{ExecutorKind, RunConfig};
use crate::context::SharedContext;
use crate::error::BenchResult;
use crate::fairness::FairnessOracle;
use crate::metrics::ResultSink;
use crate::stage::StagePlan;
use crate::traits::Workload;

use super::aggregator::{aggregate_client_stats, ClientSummary};
use super::population::{ClientSlot, Population};

type ClientHandle = JoinHandle<BenchResult<ClientStats>>;

/// Why the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The executor finished its plan or iteration budget
    Completed,
    /// `max_duration` elapsed first
    Deadline,
    /// Stopped from outside (Ctrl+C)
    Interrupted,
}

impl StopReason {
    /// Whether the run was cut short
    pub fn is_partial(&self) -> bool {
        !matches!(self, StopReason::Completed)
    }
}

/// What the scheduler reports once every client has stopped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Why the run ended
    pub stop_reason: StopReason,
    /// The run was truncated; metrics cover only what was collected
    pub partial: bool,
    /// Wall-clock run time
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Highest number of simultaneously active clients
    pub peak_concurrency: usize,
    /// Per-client totals
    pub clients: ClientSummary,
}

/// Cloneable trigger for stopping a running scheduler
#[derive(Clone)]
pub struct StopHandle {
    tx: broadcast::Sender<()>,
    reason: Arc<Mutex<Option<StopReason>>>,
}

impl StopHandle {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Stop every client; the first reason given wins
    pub fn stop(&self, reason: StopReason) {
        self.reason.lock().get_or_insert(reason);
        let _ = self.tx.send(());
    }

    /// Stop as if interrupted by the user
    pub fn interrupt(&self) {
        self.stop(StopReason::Interrupted);
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    fn reason_or(&self, fallback: StopReason) -> StopReason {
        self.reason.lock().unwrap_or(fallback)
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("reason", &*self.reason.lock())
            .finish()
    }
}

/// ExecutionScheduler admits, paces and retires virtual clients
///
/// Time-based executors follow a stage plan, re-evaluated every `tick`;
/// iteration-based executors admit a fixed population up front. The
/// concurrency ceiling holds at every instant, and `max_duration` is a hard
/// deadline for the whole run.
pub struct ExecutionScheduler {
    pub(crate) config: RunConfig,
    pub(crate) workload: Arc<dyn Workload>,
    pub(crate) context: Arc<SharedContext>,
    pub(crate) sink: Arc<ResultSink>,
    pub(crate) oracle: Option<Arc<FairnessOracle>>,
    pub(crate) pacer: Arc<IterationPacer>,
    pub(crate) population: Arc<Population>,
    pub(crate) stop: StopHandle,
}

impl ExecutionScheduler {
    /// Create a scheduler
    ///
    /// Use `SchedulerBuilder` for a more ergonomic construction.
    pub fn new(
        config: RunConfig,
        workload: Arc<dyn Workload>,
        context: Arc<SharedContext>,
        sink: Arc<ResultSink>,
        oracle: Option<Arc<FairnessOracle>>,
    ) -> Self {
        let pacer = Arc::new(IterationPacer::new(config.rate_limit));
        let population = Population::new(config.max_concurrency);

        Self {
            config,
            workload,
            context,
            sink,
            oracle,
            pacer,
            population,
            stop: StopHandle::new(),
        }
    }

    /// Handle for stopping the run from another task
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Trigger shutdown of all clients
    pub fn interrupt(&self) {
        self.stop.interrupt();
    }

    /// Run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Sink every client reports into
    pub fn sink(&self) -> &Arc<ResultSink> {
        &self.sink
    }

    /// Fairness oracle, when one is attached
    pub fn oracle(&self) -> Option<&Arc<FairnessOracle>> {
        self.oracle.as_ref()
    }

    /// Live population counters
    pub fn population(&self) -> &Arc<Population> {
        &self.population
    }

    /// Run the executor to completion, deadline or interruption
    ///
    /// Client failures are recorded and never abort the run.
    pub async fn run(&self) -> BenchResult<RunOutcome> {
        let start = Instant::now();
        let run_start = Deadline::now();
        let deadline = run_start + self.config.max_duration;
        let mut control = self.stop.subscribe();
        let mut handles = Vec::new();

        tracing::info!(
            executor = self.config.executor.name(),
            workload = self.workload.name(),
            max_concurrency = self.config.max_concurrency,
            max_duration = %humantime::format_duration(self.config.max_duration),
            rate_limit = ?self.config.rate_limit,
            "Starting run"
        );

        let (results, stop_reason) = match self.config.executor.stage_plan() {
            Some(plan) => {
                let early = self
                    .drive_stages(&plan, start, deadline, &mut control, &mut handles)
                    .await?;
                match early {
                    Some(reason) => (self.stop_and_join(handles, reason).await, reason),
                    None => {
                        self.population.set_target(0);
                        // Grace is measured from the scheduled end of the plan
                        let graceful_end =
                            run_start + plan.total_duration() + self.config.graceful_stop;
                        let (until, on_timeout) = if graceful_end <= deadline {
                            (graceful_end, StopReason::Completed)
                        } else {
                            (deadline, StopReason::Deadline)
                        };
                        self.drain(handles, until, on_timeout, &mut control).await
                    }
                }
            }
            None => {
                self.admit_fixed(&mut handles)?;
                self.drain(handles, deadline, StopReason::Deadline, &mut control)
                    .await
            }
        };

        if let Some(oracle) = &self.oracle {
            oracle.seal();
        }

        let elapsed = start.elapsed();
        let (stats, failed_tasks) = Self::collect(results);
        let clients = aggregate_client_stats(&stats, self.population.admitted(), failed_tasks);
        let outcome = RunOutcome {
            stop_reason,
            partial: stop_reason.is_partial(),
            elapsed,
            peak_concurrency: self.population.peak(),
            clients,
        };

        tracing::info!(
            stop_reason = ?outcome.stop_reason,
            partial = outcome.partial,
            elapsed_secs = elapsed.as_secs_f64(),
            peak_concurrency = outcome.peak_concurrency,
            iterations = outcome.clients.iterations,
            requests = outcome.clients.requests,
            setup_failed = outcome.clients.setup_failed,
            "Run completed"
        );

        Ok(outcome)
    }

    /// Follow the plan until it ends; `Some` if the run was cut short
    async fn drive_stages(
        &self,
        plan: &StagePlan,
        start: Instant,
        deadline: Deadline,
        control: &mut broadcast::Receiver<()>,
        handles: &mut Vec<ClientHandle>,
    ) -> BenchResult<Option<StopReason>> {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut current_stage = None;

        loop {
            tokio::select! {
                biased;

                _ = control.recv() => {
                    return Ok(Some(self.stop.reason_or(StopReason::Interrupted)));
                }

                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("Run deadline reached before the stage plan finished");
                    return Ok(Some(StopReason::Deadline));
                }

                _ = ticker.tick() => {}
            }

            let elapsed = start.elapsed();
            let Some(target) = plan.target_at(elapsed) else {
                tracing::info!("Stage plan finished, retiring clients");
                return Ok(None);
            };

            let stage = plan.stage_index(elapsed);
            if stage != current_stage {
                tracing::info!(stage = ?stage, target, "Entering stage");
                current_stage = stage;
            }

            let target = self.population.set_target(target);
            while self.population.live() < target {
                // Retiring clients may still hold the permits
                let Some(slot) = self.population.try_admit() else {
                    break;
                };
                let client = self.client_for(slot).unbounded().build()?;
                self.spawn(client, handles);
            }
        }
    }

    fn admit_fixed(&self, handles: &mut Vec<ClientHandle>) -> BenchResult<()> {
        let clients = self.config.executor.fixed_clients().unwrap_or(0);
        self.population.set_target(clients);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..clients {
            let Some(slot) = self.population.try_admit() else {
                tracing::warn!(
                    clients,
                    max_concurrency = self.config.max_concurrency,
                    "Concurrency ceiling reached while admitting clients"
                );
                break;
            };
            let builder = self.client_for(slot);
            let builder = match self.config.executor {
                ExecutorKind::SharedIterations { iterations, .. } => {
                    builder.shared_iterations(Arc::clone(&counter), iterations)
                }
                ExecutorKind::PerClientIterations { iterations, .. } => {
                    builder.iterations(iterations)
                }
                _ => builder.unbounded(),
            };
            self.spawn(builder.build()?, handles);
        }
        Ok(())
    }

    fn client_for(&self, slot: ClientSlot) -> VirtualClientBuilder {
        VirtualClientBuilder::for_slot(slot)
            .workload(Arc::clone(&self.workload))
            .context(Arc::clone(&self.context))
            .sink(Arc::clone(&self.sink))
            .oracle(self.oracle.clone())
            .pacer(Arc::clone(&self.pacer))
            .think_time(self.config.think_time)
    }

    fn spawn(&self, client: VirtualClient, handles: &mut Vec<ClientHandle>) {
        let shutdown_rx = self.stop.subscribe();
        tracing::debug!(ordinal = client.ordinal(), "Admitting client");
        handles.push(tokio::spawn(async move { client.run(shutdown_rx).await }));
    }

    /// Wait for clients to finish, stopping them at `until`
    async fn drain(
        &self,
        handles: Vec<ClientHandle>,
        until: Deadline,
        on_timeout: StopReason,
        control: &mut broadcast::Receiver<()>,
    ) -> (Vec<Result<BenchResult<ClientStats>, JoinError>>, StopReason) {
        let all = futures::future::join_all(handles);
        tokio::pin!(all);

        tokio::select! {
            results = &mut all => (results, self.stop.reason_or(StopReason::Completed)),

            _ = tokio::time::sleep_until(until) => {
                tracing::warn!(
                    active = self.population.active(),
                    reason = ?on_timeout,
                    "Stopping clients still running"
                );
                self.stop.stop(on_timeout);
                ((&mut all).await, on_timeout)
            }

            _ = control.recv() => {
                let reason = self.stop.reason_or(StopReason::Interrupted);
                ((&mut all).await, reason)
            }
        }
    }

    async fn stop_and_join(
        &self,
        handles: Vec<ClientHandle>,
        reason: StopReason,
    ) -> Vec<Result<BenchResult<ClientStats>, JoinError>> {
        self.stop.stop(reason);
        futures::future::join_all(handles).await
    }

    fn collect(
        results: Vec<Result<BenchResult<ClientStats>, JoinError>>,
    ) -> (Vec<ClientStats>, usize) {
        let mut stats = Vec::with_capacity(results.len());
        let mut failed_tasks = 0;
        for result in results {
            match result {
                Ok(Ok(client)) => stats.push(client),
                Ok(Err(e)) => {
                    failed_tasks += 1;
                    tracing::error!(error = %e, "Client returned error");
                }
                Err(e) => {
                    failed_tasks += 1;
                    tracing::error!(error = %e, "Client task panicked");
                }
            }
        }
        (stats, failed_tasks)
    }

    /// Run with Ctrl+C signal handling
    ///
    /// Ctrl+C stops every client; the outcome is marked interrupted.
    pub async fn run_with_signal_handling(&self) -> BenchResult<RunOutcome> {
        let stop = self.stop.clone();

        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                    stop.interrupt();
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.run().await;
        signal_handle.abort();
        result
    }

    /// Run with an extra timeout on top of `max_duration`
    pub async fn run_with_timeout(&self, timeout: Duration) -> BenchResult<RunOutcome> {
        let stop = self.stop.clone();

        let timeout_handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::info!("Timeout reached, initiating shutdown...");
            stop.stop(StopReason::Deadline);
        });

        let result = self.run().await;
        timeout_handle.abort();
        result
    }
}

impl std::fmt::Debug for ExecutionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionScheduler")
            .field("config", &self.config)
            .field("workload", &self.workload.name())
            .field("population", &self.population)
            .field("oracle", &self.oracle.is_some())
            .finish()
    }
}
