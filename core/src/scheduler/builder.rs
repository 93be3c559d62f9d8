//! Builder pattern for ExecutionScheduler construction

use std::sync::Arc;

use crate::config::RunConfig;
use crate::context::SharedContext;
use crate::error::{BenchError, BenchResult};
use crate::fairness::FairnessOracle;
use crate::metrics::ResultSink;
use crate::traits::Workload;

use super::executor::ExecutionScheduler;

/// Builder for creating an ExecutionScheduler with validated configuration
///
/// # Example
///
/// ```ignore
/// let scheduler = SchedulerBuilder::new()
///     .config(RunConfig::new(ExecutorKind::SharedIterations { clients: 100, iterations: 1000 }))
///     .workload(workload)
///     .context(context)
///     .build()?;
///
/// let outcome = scheduler.run_with_signal_handling().await?;
/// ```
pub struct SchedulerBuilder {
    config: RunConfig,
    workload: Option<Arc<dyn Workload>>,
    context: Option<Arc<SharedContext>>,
    sink: Option<Arc<ResultSink>>,
    oracle: Option<Arc<FairnessOracle>>,
}

impl SchedulerBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
            workload: None,
            context: None,
            sink: None,
            oracle: None,
        }
    }

    /// Set the full run configuration
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the concurrency ceiling
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max;
        self
    }

    /// Set the rate limit (iterations per second)
    pub fn rate_limit(mut self, rps: Option<f64>) -> Self {
        self.config.rate_limit = rps;
        self
    }

    /// Set the workload
    pub fn workload(mut self, workload: Arc<dyn Workload>) -> Self {
        self.workload = Some(workload);
        self
    }

    /// Set the shared context produced by setup
    pub fn context(mut self, context: Arc<SharedContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Report into an existing sink instead of a fresh one
    pub fn sink(mut self, sink: Arc<ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attach a fairness oracle
    pub fn oracle(mut self, oracle: Arc<FairnessOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Build the scheduler
    ///
    /// # Errors
    ///
    /// Returns an error if workload or context are not set, or if
    /// configuration validation fails.
    pub fn build(self) -> BenchResult<ExecutionScheduler> {
        let workload = self
            .workload
            .ok_or_else(|| BenchError::missing_config("workload"))?;

        let context = self
            .context
            .ok_or_else(|| BenchError::missing_config("context"))?;

        self.config
            .validate()
            .map_err(|e| BenchError::config(e.to_string()))?;

        let sink = self.sink.unwrap_or_else(|| Arc::new(ResultSink::new()));

        Ok(ExecutionScheduler::new(
            self.config,
            workload,
            context,
            sink,
            self.oracle,
        ))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
