//! Run configuration types

use crate::stage::StagePlan;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound accepted for think time between iterations
pub const MAX_THINK_TIME: Duration = Duration::from_secs(60);

/// How the scheduler populates the run with virtual clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorKind {
    /// Follow a stage plan, admitting and retiring clients as the target moves
    RampingClients {
        /// Target curve
        plan: StagePlan,
    },

    /// Hold a fixed number of clients for a duration
    ConstantClients {
        /// Number of clients
        clients: usize,
        /// How long to hold them
        #[serde(with = "humantime_serde")]
        duration: Duration,
    },

    /// Each client runs exactly `iterations` iterations
    PerClientIterations {
        /// Number of clients
        clients: usize,
        /// Iterations per client
        iterations: usize,
    },

    /// `iterations` in total, claimed by whichever client is free
    SharedIterations {
        /// Number of clients
        clients: usize,
        /// Total iterations across all clients
        iterations: usize,
    },
}

impl ExecutorKind {
    /// Stage plan driving a time-based executor, `None` for iteration-based ones
    pub fn stage_plan(&self) -> Option<StagePlan> {
        match self {
            ExecutorKind::RampingClients { plan } => Some(plan.clone()),
            ExecutorKind::ConstantClients { clients, duration } => {
                Some(StagePlan::constant(*clients, *duration))
            }
            ExecutorKind::PerClientIterations { .. } | ExecutorKind::SharedIterations { .. } => {
                None
            }
        }
    }

    /// Number of clients admitted up front by iteration-based executors
    pub fn fixed_clients(&self) -> Option<usize> {
        match self {
            ExecutorKind::PerClientIterations { clients, .. }
            | ExecutorKind::SharedIterations { clients, .. } => Some(*clients),
            _ => None,
        }
    }

    /// Short executor name for logs and reports
    pub fn name(&self) -> &'static str {
        match self {
            ExecutorKind::RampingClients { .. } => "ramping-clients",
            ExecutorKind::ConstantClients { .. } => "constant-clients",
            ExecutorKind::PerClientIterations { .. } => "per-client-iterations",
            ExecutorKind::SharedIterations { .. } => "shared-iterations",
        }
    }
}

impl Default for ExecutorKind {
    fn default() -> Self {
        ExecutorKind::PerClientIterations {
            clients: 1,
            iterations: 1,
        }
    }
}

/// Delay applied by a client between two of its iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThinkTime {
    /// Start the next iteration immediately
    #[default]
    None,
    /// Always wait the same amount
    Fixed {
        /// Delay
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Wait a uniformly random amount in `[min, max]`
    Uniform {
        /// Lower bound
        #[serde(with = "humantime_serde")]
        min: Duration,
        /// Upper bound
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

impl ThinkTime {
    /// Draw the next delay
    pub fn next_delay<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Option<Duration> {
        match *self {
            ThinkTime::None => None,
            ThinkTime::Fixed { delay } if delay.is_zero() => None,
            ThinkTime::Fixed { delay } => Some(delay),
            ThinkTime::Uniform { min, max } => {
                let (lo, hi) = (min.as_secs_f64(), max.as_secs_f64());
                if hi <= lo {
                    return Some(min);
                }
                Some(Duration::from_secs_f64(rng.gen_range(lo..=hi)))
            }
        }
    }

    fn upper_bound(&self) -> Duration {
        match *self {
            ThinkTime::None => Duration::ZERO,
            ThinkTime::Fixed { delay } => delay,
            ThinkTime::Uniform { max, .. } => max,
        }
    }
}

/// Run configuration
///
/// Defines how the scheduler drives virtual clients: which executor, the
/// concurrency ceiling, deadlines and per-client pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Executor and its parameters
    pub executor: ExecutorKind,

    /// Hard ceiling on simultaneously running clients
    pub max_concurrency: usize,

    /// Overall deadline; hitting it truncates the run
    #[serde(with = "humantime_serde")]
    pub max_duration: Duration,

    /// Time granted to in-flight iterations after a stage plan ends
    #[serde(with = "humantime_serde")]
    pub graceful_stop: Duration,

    /// How often the scheduler re-evaluates the stage target
    #[serde(with = "humantime_serde")]
    pub tick: Duration,

    /// Delay between iterations of one client
    #[serde(default)]
    pub think_time: ThinkTime,

    /// Optional run-wide cap on iterations started per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<f64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::default(),
            max_concurrency: 100,
            max_duration: Duration::from_secs(600),
            graceful_stop: Duration::from_secs(30),
            tick: Duration::from_millis(50),
            think_time: ThinkTime::None,
            rate_limit: None,
        }
    }
}

impl RunConfig {
    /// Create a config for the given executor with default limits
    pub fn new(executor: ExecutorKind) -> Self {
        Self {
            executor,
            ..Default::default()
        }
    }

    /// Set the concurrency ceiling
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set the overall deadline
    pub fn with_max_duration(mut self, max: Duration) -> Self {
        self.max_duration = max;
        self
    }

    /// Set the graceful stop window
    pub fn with_graceful_stop(mut self, window: Duration) -> Self {
        self.graceful_stop = window;
        self
    }

    /// Set the scheduler tick
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Set think time
    pub fn with_think_time(mut self, think: ThinkTime) -> Self {
        self.think_time = think;
        self
    }

    /// Set the rate limit
    pub fn with_rate_limit(mut self, rps: f64) -> Self {
        self.rate_limit = Some(rps);
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(
                "max_concurrency must be at least 1".into(),
            ));
        }

        match &self.executor {
            ExecutorKind::RampingClients { plan } => {
                plan.validate().map_err(ConfigError::InvalidStagePlan)?;
            }
            ExecutorKind::ConstantClients { clients, duration } => {
                if *clients == 0 || duration.is_zero() {
                    return Err(ConfigError::InvalidExecutor(
                        "constant clients needs at least 1 client and a non-zero duration".into(),
                    ));
                }
            }
            ExecutorKind::PerClientIterations {
                clients,
                iterations,
            }
            | ExecutorKind::SharedIterations {
                clients,
                iterations,
            } => {
                if *clients == 0 || *iterations == 0 {
                    return Err(ConfigError::InvalidExecutor(
                        "clients and iterations must be at least 1".into(),
                    ));
                }
            }
        }

        if let Some(clients) = self.executor.fixed_clients() {
            if clients > self.max_concurrency {
                return Err(ConfigError::InvalidConcurrency(format!(
                    "{clients} clients exceed max_concurrency {}",
                    self.max_concurrency
                )));
            }
        }

        if self.max_duration.is_zero() {
            return Err(ConfigError::InvalidDuration(
                "max_duration must be positive".into(),
            ));
        }

        if self.tick.is_zero() {
            return Err(ConfigError::InvalidDuration("tick must be positive".into()));
        }

        if self.think_time.upper_bound() > MAX_THINK_TIME {
            return Err(ConfigError::InvalidThinkTime(format!(
                "think time may not exceed {MAX_THINK_TIME:?}"
            )));
        }
        if let ThinkTime::Uniform { min, max } = self.think_time {
            if min > max {
                return Err(ConfigError::InvalidThinkTime(
                    "uniform think time has min > max".into(),
                ));
            }
        }

        if let Some(rps) = self.rate_limit {
            if !rps.is_finite() || rps <= 0.0 {
                return Err(ConfigError::InvalidRateLimit(
                    "rate limit must be positive".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid concurrency value
    #[error("Invalid concurrency: {0}")]
    InvalidConcurrency(String),

    /// Invalid executor parameters
    #[error("Invalid executor: {0}")]
    InvalidExecutor(String),

    /// Invalid stage plan
    #[error("Invalid stage plan: {0}")]
    InvalidStagePlan(String),

    /// Invalid duration
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Invalid think time
    #[error("Invalid think time: {0}")]
    InvalidThinkTime(String),

    /// Invalid rate limit
    #[error("Invalid rate limit: {0}")]
    InvalidRateLimit(String),
}
