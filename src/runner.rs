//! One complete run: setup, execution and verdict

use crate::scenarios::Scenario;

use shop_bench_core::{
    BenchResult, ClientSummary, FairnessOracle, FairnessVerdict, ResultSink, RunOutcome,
    SchedulerBuilder, SetupOrchestrator, SetupOutcome, SharedContext, SinkSnapshot, StopReason,
    Provisioner, TargetClient, TemplateWorkload,
};
use shop_bench_report::{Report, ReportGenerator};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Drives a [`Scenario`] against a target and produces its [`Report`]
pub struct Runner {
    scenario: Scenario,
    target: Arc<dyn TargetClient>,
    provisioner: Arc<dyn Provisioner>,
    generator: ReportGenerator,
    sink: Arc<ResultSink>,
    handle_signals: bool,
}

impl Runner {
    /// Create a runner; Ctrl+C handling is on by default
    pub fn new(
        scenario: Scenario,
        target: Arc<dyn TargetClient>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let generator =
            ReportGenerator::new(scenario.name.clone()).with_thresholds(scenario.thresholds.clone());
        Self {
            scenario,
            target,
            provisioner,
            generator,
            sink: Arc::new(ResultSink::new()),
            handle_signals: true,
        }
    }

    /// Turn Ctrl+C handling on or off
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Record into an existing sink
    pub fn with_sink(mut self, sink: Arc<ResultSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Generator holding the scenario's thresholds
    pub fn generator(&self) -> &ReportGenerator {
        &self.generator
    }

    /// Sink the run records into
    pub fn sink(&self) -> &Arc<ResultSink> {
        &self.sink
    }

    /// Scenario being run
    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    /// Run setup and the scheduler, then judge the result
    ///
    /// # Errors
    /// Returns an error when the scenario is invalid or setup aborts the run.
    /// Request failures, threshold misses and fairness violations are part of
    /// the report instead.
    pub async fn run(&self) -> BenchResult<Report> {
        self.scenario.validate()?;
        info!(
            scenario = %self.scenario.name,
            executor = self.scenario.run.executor.name(),
            population = self.scenario.setup.population,
            "Preparing run"
        );

        let setup = SetupOrchestrator::new(self.scenario.setup.clone(), Arc::clone(&self.provisioner))
            .run()
            .await?;

        let context = match setup {
            SetupOutcome::Ready(context) => context,
            SetupOutcome::Degraded { reason, .. } => return Ok(self.degraded(reason)),
        };

        let (outcome, verdict) = self.execute(context).await?;
        let snapshot = self.generator.snapshot(&self.sink, &outcome);
        Ok(self
            .generator
            .generate(&snapshot, &outcome, verdict.as_deref()))
    }

    async fn execute(
        &self,
        context: Arc<SharedContext>,
    ) -> BenchResult<(RunOutcome, Option<Arc<FairnessVerdict>>)> {
        let workload = TemplateWorkload::new(
            self.scenario.name.clone(),
            Arc::new(self.scenario.mixer()?),
            Arc::clone(&self.target),
        )
        .with_binding(self.scenario.binding);

        for series in &self.scenario.series {
            self.sink.track(series.clone());
        }

        let oracle = self.scenario.fairness.as_ref().map(|check| {
            Arc::new(FairnessOracle::new(check.capacity, check.clients).for_request(&check.request))
        });

        let mut builder = SchedulerBuilder::new()
            .config(self.scenario.run.clone())
            .workload(Arc::new(workload))
            .context(context)
            .sink(Arc::clone(&self.sink));
        if let Some(oracle) = &oracle {
            builder = builder.oracle(Arc::clone(oracle));
        }
        let scheduler = builder.build()?;

        let outcome = if self.handle_signals {
            scheduler.run_with_signal_handling().await?
        } else {
            scheduler.run().await?
        };

        let verdict = match &oracle {
            Some(oracle) => Some(oracle.verify()?),
            None => None,
        };
        Ok((outcome, verdict))
    }

    /// Report for a run that setup reduced to zero clients
    ///
    /// Nothing was cut short, so the run is not partial; `setup_error` and
    /// the failed verdict carry the degradation.
    fn degraded(&self, reason: String) -> Report {
        let outcome = RunOutcome {
            stop_reason: StopReason::Completed,
            partial: false,
            elapsed: Duration::ZERO,
            peak_concurrency: 0,
            clients: ClientSummary::default(),
        };
        let mut report = self
            .generator
            .generate(&SinkSnapshot::default(), &outcome, None);
        report.setup_error = Some(reason);
        report.passed = false;
        report
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("scenario", &self.scenario.name)
            .field("target", &self.target.target_name())
            .field("handle_signals", &self.handle_signals)
            .finish()
    }
}
