//! Virtual clients that drive a workload against the target
//!
//! A VirtualClient is the unit of load: one tokio task with a stable
//! ordinal and its own session. Its loop is
//! **bind -> iterate -> report -> think -> repeat**:
//!
//! 1. Binds a session from the read-only SharedContext (once)
//! 2. Claims an iteration from its budget
//! 3. Runs one workload iteration, paced by the shared rate limiter
//! 4. Reports every outcome to the ResultSink and the FairnessOracle
//! 5. Sleeps its think time, waking early on shutdown
//!
//! A client that cannot bind (for example, its account failed to log in
//! during setup) records `client_setup_failed` and exits cleanly; the
//! scheduler keeps running.
//!
//! # Example
//!
//! ```ignore
//! use shop_bench_core::client::VirtualClientBuilder;
//!
//! let client = VirtualClientBuilder::new(1)
//!     .workload(workload)
//!     .context(context)
//!     .sink(sink)
//!     .iterations(10)
//!     .build()?;
//!
//! let stats = client.run(shutdown_rx).await?;
//! println!("Iterations: {}", stats.iterations);
//! ```

mod builder;
mod executor;
mod pacer;
mod stats;

pub use builder::VirtualClientBuilder;
pub use executor::{IterationBudget, VirtualClient};
pub use pacer::IterationPacer;
pub use stats::ClientStats;
