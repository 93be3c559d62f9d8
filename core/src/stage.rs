//! Stage plans: piecewise-linear concurrency targets over wall-clock time

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One segment of a stage plan: move linearly to `target` over `duration`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// How long the segment lasts. Zero jumps straight to `target`.
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Concurrency reached at the end of the segment
    pub target: usize,
}

impl Stage {
    /// Create a stage
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// Ordered sequence of stages starting from an initial concurrency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlan {
    /// Concurrency at t = 0
    #[serde(default)]
    pub start: usize,
    /// Stages, executed in order
    pub stages: Vec<Stage>,
}

impl StagePlan {
    /// Create a plan
    pub fn new(start: usize, stages: Vec<Stage>) -> Self {
        Self { start, stages }
    }

    /// Hold `clients` for `duration`
    pub fn constant(clients: usize, duration: Duration) -> Self {
        Self::new(clients, vec![Stage::new(duration, clients)])
    }

    /// Ramp from `start` to `peak`, hold, then ramp down to zero over `down`
    pub fn ramp_hold_down(
        start: usize,
        peak: usize,
        ramp: Duration,
        hold: Duration,
        down: Duration,
    ) -> Self {
        Self::new(
            start,
            vec![
                Stage::new(ramp, peak),
                Stage::new(hold, peak),
                Stage::new(down, 0),
            ],
        )
    }

    /// Sum of all stage durations
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Largest target the plan ever asks for
    pub fn max_target(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start, usize::max)
    }

    /// Index of the stage active at `elapsed`, `None` once the plan is over
    pub fn stage_index(&self, elapsed: Duration) -> Option<usize> {
        let mut offset = Duration::ZERO;
        for (idx, stage) in self.stages.iter().enumerate() {
            offset += stage.duration;
            if elapsed < offset {
                return Some(idx);
            }
        }
        None
    }

    /// Target concurrency at `elapsed`, `None` once the plan is over
    ///
    /// Rising segments floor the interpolated value so a client is admitted
    /// only once the line crosses the next integer; falling segments take the
    /// ceiling so a client is retired only once the line drops below it.
    pub fn target_at(&self, elapsed: Duration) -> Option<usize> {
        let mut from = self.start;
        let mut offset = Duration::ZERO;

        for stage in &self.stages {
            let end = offset + stage.duration;
            if elapsed < end {
                let t = (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
                let (a, b) = (from as f64, stage.target as f64);
                let value = a + (b - a) * t;
                let target = if b >= a { value.floor() } else { value.ceil() };
                return Some(target.max(0.0) as usize);
            }
            from = stage.target;
            offset = end;
        }

        None
    }

    /// Check the plan describes a non-empty run
    pub fn validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err("stage plan has no stages".into());
        }
        if self.total_duration().is_zero() {
            return Err("stage plan has zero total duration".into());
        }
        Ok(())
    }
}
