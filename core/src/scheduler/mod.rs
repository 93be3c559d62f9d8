//! Scheduler for run lifecycle management
//!
//! The ExecutionScheduler coordinates a complete run:
//! - Admitting and retiring virtual clients against the stage target
//! - Enforcing the concurrency ceiling via a semaphore
//! - Stopping clients via a broadcast channel on deadline or Ctrl+C
//! - Collecting per-client statistics
//!
//! # Example
//!
//! ```ignore
//! use shop_bench_core::{ExecutorKind, RunConfig, SchedulerBuilder, StagePlan};
//!
//! let plan = StagePlan::ramp_hold_down(0, 50, ramp, hold, down);
//! let scheduler = SchedulerBuilder::new()
//!     .config(RunConfig::new(ExecutorKind::RampingClients { plan }).with_max_concurrency(50))
//!     .workload(workload)
//!     .context(context)
//!     .build()?;
//!
//! let outcome = scheduler.run_with_signal_handling().await?;
//! ```

mod aggregator;
mod builder;
mod executor;
mod population;

pub use aggregator::{aggregate_client_stats, ClientSummary};
pub use builder::SchedulerBuilder;
pub use executor::{ExecutionScheduler, RunOutcome, StopHandle, StopReason};
pub use population::{ClientSlot, Population};

#[cfg(test)]
mod tests;
