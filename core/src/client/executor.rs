//! Virtual client execution loop

use crate::config::ThinkTime;
use crate::context::SharedContext;
use crate::error::BenchResult;
use crate::fairness::FairnessOracle;
use crate::metrics::{names, ResultSink};
use crate::outcome::RequestOutcome;
use crate::scheduler::ClientSlot;
use crate::traits::{ClientSession, Workload};

use super::pacer::IterationPacer;
use super::stats::ClientStats;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

/// How many iterations a client may run
#[derive(Debug, Clone)]
pub enum IterationBudget {
    /// This client runs exactly `n` iterations
    Fixed(usize),
    /// Iterations are claimed from a counter shared by all clients
    Shared {
        /// Claimed so far
        counter: Arc<AtomicUsize>,
        /// Total across the run
        total: usize,
    },
    /// Run until retired or shut down
    Unbounded,
}

impl IterationBudget {
    /// Claim one iteration; `completed` is this client's count so far
    fn try_claim(&self, completed: usize) -> bool {
        match self {
            IterationBudget::Fixed(n) => completed < *n,
            IterationBudget::Shared { counter, total } => {
                let claimed = counter.fetch_add(1, Ordering::SeqCst);
                if claimed >= *total {
                    // Over-claimed near the limit; keep the counter exact
                    counter.fetch_sub(1, Ordering::SeqCst);
                    return false;
                }
                true
            }
            IterationBudget::Unbounded => true,
        }
    }
}

/// Virtual client: bind -> (iterate -> report -> think) until done
///
/// Each client owns its session; everything it shares with other clients
/// (context, sink, oracle, limiter) is read-only or internally synchronized.
pub struct VirtualClient {
    pub(crate) ordinal: usize,
    pub(crate) workload: Arc<dyn Workload>,
    pub(crate) context: Arc<SharedContext>,
    pub(crate) sink: Arc<ResultSink>,
    pub(crate) oracle: Option<Arc<FairnessOracle>>,
    pub(crate) pacer: Arc<IterationPacer>,
    pub(crate) think_time: ThinkTime,
    pub(crate) budget: IterationBudget,
    pub(crate) slot: Option<ClientSlot>,
}

impl VirtualClient {
    /// Run the client until its budget is spent, it is retired, or shutdown
    ///
    /// A client that cannot bind a session records a setup failure and
    /// returns normally.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> BenchResult<ClientStats> {
        let mut stats = ClientStats::new(self.ordinal);
        stats.start();

        let mut session = match self.workload.bind(&self.context, self.ordinal) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    ordinal = self.ordinal,
                    workload = self.workload.name(),
                    error = %e,
                    "Client could not obtain session state"
                );
                self.sink.add(names::CLIENT_SETUP_FAILED, 1, &[]);
                if let Some(oracle) = &self.oracle {
                    oracle.forfeit(self.ordinal);
                }
                if let Some(slot) = self.slot.as_mut() {
                    slot.mark_unusable();
                }
                stats.setup_failed = true;
                stats.stop();
                return Ok(stats);
            }
        };

        tracing::debug!(ordinal = self.ordinal, "Client started");

        loop {
            if let Some(slot) = self.slot.as_mut() {
                if slot.try_retire() {
                    tracing::debug!(ordinal = self.ordinal, "Client retired by stage target");
                    stats.retired = true;
                    break;
                }
            }

            if !self.budget.try_claim(stats.iterations) {
                tracing::debug!(
                    ordinal = self.ordinal,
                    iterations = stats.iterations,
                    "Iteration budget spent"
                );
                break;
            }

            let outcomes = tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::debug!(ordinal = self.ordinal, "Client received shutdown signal");
                    stats.interrupted = true;
                    break;
                }

                outcomes = self.run_iteration(&mut session) => outcomes,
            };

            stats.iterations += 1;
            for outcome in &outcomes {
                self.report(outcome, &mut stats);
            }

            let think = self.think_time.next_delay(&mut rand::thread_rng());
            if let Some(delay) = think {
                tokio::select! {
                    biased;

                    _ = shutdown.recv() => {
                        stats.interrupted = true;
                        break;
                    }

                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        // A client that never reached the tracked request gives up its slot
        if let Some(oracle) = &self.oracle {
            oracle.forfeit(self.ordinal);
        }

        stats.stop();
        tracing::debug!(
            ordinal = self.ordinal,
            iterations = stats.iterations,
            succeeded = stats.succeeded,
            failed = stats.failed,
            elapsed_ms = ?stats.elapsed().map(|d| d.as_millis()),
            "Client finished"
        );

        Ok(stats)
    }

    async fn run_iteration(&self, session: &mut ClientSession) -> Vec<RequestOutcome> {
        self.pacer.wait().await;

        let started = Instant::now();
        let outcomes = self.workload.iteration(&self.context, session).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        self.sink.add(names::ITERATIONS, 1, &[]);
        self.sink.trend(names::ITERATION_DURATION, elapsed_ms, &[]);
        outcomes
    }

    fn report(&self, outcome: &RequestOutcome, stats: &mut ClientStats) {
        self.sink.record_outcome(outcome);
        stats.record(outcome);
        if let Some(oracle) = &self.oracle {
            oracle.record_outcome(outcome);
        }
    }

    /// Client ordinal
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }
}

impl std::fmt::Debug for VirtualClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualClient")
            .field("ordinal", &self.ordinal)
            .field("workload", &self.workload.name())
            .field("think_time", &self.think_time)
            .field("budget", &self.budget)
            .field("pacer", &self.pacer)
            .finish()
    }
}
