//! HTTP client for the commerce service exercised by shop-bench
//!
//! [`CommerceClient`] implements both core seams that touch the network:
//!
//! - `TargetClient`: executes rendered requests during the run and reports
//!   statuses or transport failures, never errors
//! - `Provisioner`: register, login, product creation and seed orders during
//!   setup

#![warn(missing_docs)]
#![warn(clippy::all)]

mod api;
mod client;
mod config;
mod error;
pub mod jwt;

pub use api::ShippingAddress;
pub use client::CommerceClient;
pub use config::TargetConfig;
pub use error::{classify_transport, ClientError};
