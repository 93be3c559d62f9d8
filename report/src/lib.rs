//! Threshold evaluation and run verdicts for shop-bench
//!
//! - [`Threshold`]: k6-style predicates such as `p(95)<500` or `rate<0.05`
//! - [`ReportGenerator`]: final metrics + thresholds + fairness verdict
//!   into a [`Report`]
//! - [`render_text`] / [`write_json`]: console summary and JSON output

#![warn(missing_docs)]
#![warn(clippy::all)]

mod generator;
mod render;
mod threshold;

pub use generator::{Report, ReportGenerator};
pub use render::{render_text, to_json, write_json, ReportError};
pub use threshold::{Aggregate, Comparison, Threshold, ThresholdError, ThresholdResult};
