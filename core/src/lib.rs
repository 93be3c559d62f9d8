//! shop-bench-core: execution engine for load-testing a shop backend
//!
//! This crate provides everything between configuration and report:
//!
//! - Typed run configuration and stage plans
//! - Request templates and the outcome classifier
//! - The ResultSink (counters, rates, trends with percentiles)
//! - Virtual clients and the ExecutionScheduler that drives them
//! - The SetupOrchestrator that provisions the shared context
//! - The FairnessOracle for first-come-first-served verification
//! - Core traits (TargetClient, Sampler, Provisioner, Workload)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod fairness;
pub mod metrics;
pub mod outcome;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod setup;
pub mod stage;
pub mod traits;
pub mod workload;

pub use client::{ClientStats, IterationPacer, VirtualClient, VirtualClientBuilder};
pub use config::*;
pub use context::*;
pub use error::*;
pub use fairness::*;
pub use metrics::{
    names, MetricKind, MetricSummary, RequestSeries, ResultSink, SinkSnapshot, TrendSummary,
};
pub use outcome::*;
pub use request::*;
pub use response::*;
pub use scheduler::{
    ClientSummary, ExecutionScheduler, RunOutcome, SchedulerBuilder, StopHandle, StopReason,
};
pub use setup::*;
pub use stage::*;
pub use traits::*;
pub use workload::*;
