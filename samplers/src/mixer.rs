//! Weighted selection between request templates

use rand::Rng;
use serde::{Deserialize, Serialize};
use shop_bench_core::{RequestTemplate, Sampler, SamplerError};

/// One entry of a traffic mix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weighted<T> {
    /// The item to select
    pub item: T,
    /// Relative weight; need not sum to anything in particular
    pub weight: f64,
}

impl<T> Weighted<T> {
    /// Pair an item with a weight
    pub fn new(item: T, weight: f64) -> Self {
        Self { item, weight }
    }
}

/// Mix construction errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MixError {
    /// No entries were given
    #[error("traffic mix has no entries")]
    Empty,

    /// A weight was negative, NaN or infinite
    #[error("entry {index} has invalid weight {weight}")]
    InvalidWeight {
        /// Position of the entry
        index: usize,
        /// Offending weight
        weight: f64,
    },

    /// Every weight was zero
    #[error("traffic mix weights sum to zero")]
    ZeroTotal,
}

/// Picks one item per call by a cumulative-weight draw
///
/// Cumulative weights are computed once at construction; a call draws a
/// uniform value in `[0, total)` and returns the first item whose cumulative
/// weight exceeds it. There is no draw state shared between calls.
#[derive(Debug, Clone)]
pub struct TrafficMixer<T> {
    name: String,
    entries: Vec<Weighted<T>>,
    cumulative: Vec<f64>,
    total: f64,
}

impl<T> TrafficMixer<T> {
    /// Build a mixer, validating the weights
    pub fn new(name: impl Into<String>, entries: Vec<Weighted<T>>) -> Result<Self, MixError> {
        if entries.is_empty() {
            return Err(MixError::Empty);
        }

        let mut cumulative = Vec::with_capacity(entries.len());
        let mut total = 0.0;
        for (index, entry) in entries.iter().enumerate() {
            if !entry.weight.is_finite() || entry.weight < 0.0 {
                return Err(MixError::InvalidWeight {
                    index,
                    weight: entry.weight,
                });
            }
            total += entry.weight;
            cumulative.push(total);
        }
        if total <= 0.0 {
            return Err(MixError::ZeroTotal);
        }

        let name = name.into();
        tracing::debug!(mixer = %name, entries = entries.len(), total, "Traffic mix ready");
        Ok(Self {
            name,
            entries,
            cumulative,
            total,
        })
    }

    /// Sum of all weights
    pub fn total_weight(&self) -> f64 {
        self.total
    }

    /// Entries in declaration order
    pub fn entries(&self) -> &[Weighted<T>] {
        &self.entries
    }

    /// Item selected by `draw`, a value in `[0, total)`
    ///
    /// Draws at or beyond the total (floating-point edge) select the last
    /// entry with a non-zero weight.
    pub fn select(&self, draw: f64) -> &T {
        let idx = self.cumulative.partition_point(|c| *c <= draw);
        let idx = if idx < self.entries.len() {
            idx
        } else {
            self.entries
                .iter()
                .rposition(|e| e.weight > 0.0)
                .unwrap_or(self.entries.len() - 1)
        };
        &self.entries[idx].item
    }

    /// Draw one item with `rng`
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &T {
        self.select(rng.gen_range(0.0..self.total))
    }
}

impl Sampler for TrafficMixer<RequestTemplate> {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample(&self) -> Result<RequestTemplate, SamplerError> {
        Ok(self.pick(&mut rand::thread_rng()).clone())
    }
}
