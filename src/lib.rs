//! shop-bench: load generation and outcome verification for commerce backends
//!
//! The library half of the binary: scenario presets and the runner that
//! takes a scenario through setup, execution and verdict.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod runner;
pub mod scenarios;

pub use runner::Runner;
pub use scenarios::{FairnessCheck, Scenario, ScenarioKind, ScenarioParams};
