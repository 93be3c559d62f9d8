//! Builder pattern for VirtualClient construction

use crate::config::ThinkTime;
use crate::context::SharedContext;
use crate::error::{BenchError, BenchResult};
use crate::fairness::FairnessOracle;
use crate::metrics::ResultSink;
use crate::scheduler::ClientSlot;
use crate::traits::Workload;

use super::executor::{IterationBudget, VirtualClient};
use super::pacer::IterationPacer;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// Builder for creating VirtualClient instances
///
/// # Example
/// ```ignore
/// let client = VirtualClientBuilder::new(1)
///     .workload(workload)
///     .context(context)
///     .sink(sink)
///     .iterations(10)
///     .build()?;
/// ```
pub struct VirtualClientBuilder {
    ordinal: usize,
    workload: Option<Arc<dyn Workload>>,
    context: Option<Arc<SharedContext>>,
    sink: Option<Arc<ResultSink>>,
    oracle: Option<Arc<FairnessOracle>>,
    pacer: Option<Arc<IterationPacer>>,
    think_time: ThinkTime,
    budget: Option<IterationBudget>,
    slot: Option<ClientSlot>,
}

impl VirtualClientBuilder {
    /// Create a new builder for the given ordinal
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            workload: None,
            context: None,
            sink: None,
            oracle: None,
            pacer: None,
            think_time: ThinkTime::None,
            budget: None,
            slot: None,
        }
    }

    /// Builder for an admitted slot, taking its ordinal
    pub fn for_slot(slot: ClientSlot) -> Self {
        let mut builder = Self::new(slot.ordinal());
        builder.slot = Some(slot);
        builder
    }

    /// Set the workload
    pub fn workload(mut self, workload: Arc<dyn Workload>) -> Self {
        self.workload = Some(workload);
        self
    }

    /// Set the shared context
    pub fn context(mut self, context: Arc<SharedContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Set the result sink
    pub fn sink(mut self, sink: Arc<ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Report tracked outcomes to a fairness oracle
    pub fn oracle(mut self, oracle: Option<Arc<FairnessOracle>>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Share the run-wide iteration pacer
    pub fn pacer(mut self, pacer: Arc<IterationPacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    /// Set the think time between iterations
    pub fn think_time(mut self, think_time: ThinkTime) -> Self {
        self.think_time = think_time;
        self
    }

    /// Run exactly `n` iterations
    pub fn iterations(mut self, n: usize) -> Self {
        self.budget = Some(IterationBudget::Fixed(n));
        self
    }

    /// Claim iterations from a shared counter
    pub fn shared_iterations(mut self, counter: Arc<AtomicUsize>, total: usize) -> Self {
        self.budget = Some(IterationBudget::Shared { counter, total });
        self
    }

    /// Run until retired or shut down
    pub fn unbounded(mut self) -> Self {
        self.budget = Some(IterationBudget::Unbounded);
        self
    }

    /// Build the VirtualClient
    ///
    /// # Errors
    /// Returns an error if any required field is missing.
    pub fn build(self) -> BenchResult<VirtualClient> {
        let workload = self.workload.ok_or(BenchError::missing_config("workload"))?;
        let context = self.context.ok_or(BenchError::missing_config("context"))?;
        let sink = self.sink.ok_or(BenchError::missing_config("sink"))?;
        let budget = self.budget.ok_or(BenchError::missing_config("budget"))?;
        let pacer = self.pacer.unwrap_or_default();

        Ok(VirtualClient {
            ordinal: self.ordinal,
            workload,
            context,
            sink,
            oracle: self.oracle,
            pacer,
            think_time: self.think_time,
            budget,
            slot: self.slot,
        })
    }
}
