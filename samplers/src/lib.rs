//! Request samplers for shop-bench workloads
//!
//! This crate provides implementations of the `Sampler` trait:
//!
//! - [`TrafficMixer`]: weighted selection between request templates
//!
//! # Example
//!
//! ```ignore
//! use shop_bench_samplers::{TrafficMixer, Weighted};
//!
//! let mixer = TrafficMixer::new("deal-spike", vec![
//!     Weighted::new(RequestTemplate::get("list_products", "/products"), 70.0),
//!     Weighted::new(RequestTemplate::get("me", "/users/me").bearer(), 30.0),
//! ])?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod mixer;

pub use mixer::{MixError, TrafficMixer, Weighted};
