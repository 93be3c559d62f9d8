//! Run-wide pacing of iteration starts

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Token-bucket cap on iterations started per second, via the governor crate
///
/// One instance is shared (behind `Arc`) by every client of a run, so the cap
/// applies to the run as a whole rather than per client. Fractional rates
/// are honoured: `0.5` allows one iteration every two seconds.
pub struct IterationPacer {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    rate_limit: Option<f64>,
}

impl IterationPacer {
    /// Create a limiter; `None` or a non-positive rate disables limiting
    pub fn new(rate_limit: Option<f64>) -> Self {
        let limiter = rate_limit.and_then(|rps| {
            if !rps.is_finite() || rps <= 0.0 {
                return None;
            }
            let period = Duration::from_secs_f64(1.0 / rps);
            let burst = NonZeroU32::new((rps.ceil() as u32).max(1))?;
            let quota = Quota::with_period(period)?.allow_burst(burst);
            Some(RateLimiter::direct(quota))
        });

        let rate_limit = rate_limit.filter(|_| limiter.is_some());
        Self {
            limiter,
            rate_limit,
        }
    }

    /// Limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Wait until the next iteration may start
    pub async fn wait(&self) {
        if let Some(ref limiter) = self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Take a permit if one is available right now
    pub fn try_acquire(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Whether a cap is in force
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Configured cap in iterations per second
    pub fn rate_limit(&self) -> Option<f64> {
        self.rate_limit
    }
}

impl Default for IterationPacer {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl std::fmt::Debug for IterationPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationPacer")
            .field("rate_limit", &self.rate_limit)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
