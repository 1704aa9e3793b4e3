//! Independent per-key rate computation fanned out over a rayon pool.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use oee_core::{ChannelKey, Sample};

use crate::rate::RateCalculator;

/// Rates in units per second. A key maps to `None` when its data was
/// insufficient or unusable; keys never reached before cancellation are absent.
#[derive(Debug, Clone, Default)]
pub struct RateBatch {
    pub rates: BTreeMap<ChannelKey, Option<f64>>,
    pub cancelled: bool,
}

impl RateBatch {
    pub fn resolved(&self) -> usize {
        self.rates.values().filter(|r| r.is_some()).count()
    }

    pub fn unresolved(&self) -> usize {
        self.rates.values().filter(|r| r.is_none()).count()
    }
}

/// Compute each key's rate independently. Cancellation is checked before
/// each key starts; a key already in progress always finishes.
pub fn calculate_batch(
    calculator: &RateCalculator,
    inputs: &HashMap<ChannelKey, Vec<Sample>>,
    cancel: &CancellationToken,
) -> RateBatch {
    let rates: BTreeMap<ChannelKey, Option<f64>> = inputs
        .par_iter()
        .filter_map(|(key, samples)| {
            if cancel.is_cancelled() {
                return None;
            }
            let rate = calculator.calculate(samples).map(|estimate| estimate.per_second);
            Some((key.clone(), rate))
        })
        .collect();

    let cancelled = rates.len() < inputs.len();
    RateBatch { rates, cancelled }
}
