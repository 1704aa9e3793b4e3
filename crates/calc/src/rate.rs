//! Production rate from raw, wrapping hardware counters.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use oee_core::{seconds_between, OeeConfig, Sample};

/// Shortest averaging window the selector will return.
pub const MIN_WINDOW_SECONDS: f64 = 10.0;
/// Longest averaging window the selector will return.
pub const MAX_WINDOW_SECONDS: f64 = 1_800.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateConfig {
    /// A decrease is only treated as a wrap when the previous value is at or above this.
    pub overflow_threshold: u64,
    pub counter_modulus: u64,
    pub minimum_data_points: usize,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            overflow_threshold: 4_294_967_000,
            counter_modulus: 1 << 32,
            minimum_data_points: 2,
        }
    }
}

impl From<&OeeConfig> for RateConfig {
    fn from(cfg: &OeeConfig) -> Self {
        Self {
            overflow_threshold: cfg.overflow_threshold,
            counter_modulus: cfg.counter_modulus,
            minimum_data_points: cfg.rate_minimum_data_points.max(2),
        }
    }
}

/// How one consecutive pair of raw values contributes to a count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairDelta {
    Counted(u64),
    Wrapped(u64),
    /// The value went down without the previous one being near the counter maximum.
    InvalidDecrease,
}

impl PairDelta {
    pub fn units(self) -> Option<u64> {
        match self {
            PairDelta::Counted(units) | PairDelta::Wrapped(units) => Some(units),
            PairDelta::InvalidDecrease => None,
        }
    }
}

pub fn counter_delta(previous: u64, current: u64, cfg: &RateConfig) -> PairDelta {
    if current >= previous {
        return PairDelta::Counted(current - previous);
    }
    if previous >= cfg.overflow_threshold && previous < cfg.counter_modulus {
        return PairDelta::Wrapped((cfg.counter_modulus - previous) + current);
    }
    PairDelta::InvalidDecrease
}

/// A smoothed rate plus how it was obtained.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct RateEstimate {
    pub per_second: f64,
    pub total_units: u64,
    pub span_seconds: f64,
    pub valid_pairs: usize,
    pub invalid_pairs: usize,
    /// Pairs dropped because time did not advance between them.
    pub stalled_pairs: usize,
}

impl RateEstimate {
    pub fn per_minute(&self) -> f64 {
        self.per_second * 60.0
    }
}

/// Rate over the interval ending at `timestamp`; `None` when the pair was unusable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalRate {
    pub timestamp: DateTime<Utc>,
    pub per_second: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct RateCalculator {
    cfg: RateConfig,
}

impl RateCalculator {
    pub fn new(cfg: RateConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RateConfig {
        &self.cfg
    }

    /// Time-weighted rate over every usable pair, in units per second.
    ///
    /// Returns `None` below `minimum_data_points` or when no pair survives
    /// filtering. Never returns NaN or infinity.
    pub fn calculate(&self, samples: &[Sample]) -> Option<RateEstimate> {
        if samples.len() < self.cfg.minimum_data_points {
            return None;
        }

        let mut estimate = RateEstimate {
            per_second: 0.0,
            total_units: 0,
            span_seconds: 0.0,
            valid_pairs: 0,
            invalid_pairs: 0,
            stalled_pairs: 0,
        };

        for pair in samples.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            let dt = seconds_between(prev.timestamp, cur.timestamp);
            if !(dt > 0.0) {
                estimate.stalled_pairs += 1;
                continue;
            }
            match counter_delta(prev.raw_value, cur.raw_value, &self.cfg).units() {
                Some(units) => {
                    estimate.total_units = estimate.total_units.saturating_add(units);
                    estimate.span_seconds += dt;
                    estimate.valid_pairs += 1;
                }
                None => {
                    debug!(
                        previous = prev.raw_value,
                        current = cur.raw_value,
                        "discarding decreasing counter pair"
                    );
                    estimate.invalid_pairs += 1;
                }
            }
        }

        if estimate.valid_pairs == 0 || estimate.span_seconds <= 0.0 {
            return None;
        }
        let per_second = estimate.total_units as f64 / estimate.span_seconds;
        if !per_second.is_finite() {
            return None;
        }
        estimate.per_second = per_second;
        Some(estimate)
    }

    /// Same as [`calculate`](Self::calculate) restricted to samples within
    /// `window` of the newest one.
    pub fn calculate_windowed(&self, samples: &[Sample], window: Duration) -> Option<RateEstimate> {
        let newest = samples.last()?.timestamp;
        let cutoff = newest - window;
        let from = samples.partition_point(|s| s.timestamp < cutoff);
        self.calculate(&samples[from..])
    }

    /// One rate per consecutive pair, keyed by the later sample's timestamp.
    pub fn interval_rates(&self, samples: &[Sample]) -> Vec<IntervalRate> {
        samples
            .windows(2)
            .map(|pair| {
                let (prev, cur) = (pair[0], pair[1]);
                let dt = seconds_between(prev.timestamp, cur.timestamp);
                let per_second = if dt > 0.0 {
                    counter_delta(prev.raw_value, cur.raw_value, &self.cfg)
                        .units()
                        .map(|units| units as f64 / dt)
                        .filter(|rate| rate.is_finite())
                } else {
                    None
                };
                IntervalRate { timestamp: cur.timestamp, per_second }
            })
            .collect()
    }

    /// Units counted across the series, honouring wraps and skipping invalid decreases.
    pub fn total_units(&self, samples: &[Sample]) -> u64 {
        samples
            .windows(2)
            .filter_map(|pair| counter_delta(pair[0].raw_value, pair[1].raw_value, &self.cfg).units())
            .fold(0u64, u64::saturating_add)
    }
}

/// Pick an averaging window for a sampling frequency and accuracy target.
///
/// One count of quantisation error per window must stay under the allowed
/// relative error, so the window holds `100 / (100 - accuracy)` samples.
/// Faster sampling shortens the window, stricter accuracy lengthens it, and
/// the result is clamped to `[10 s, 30 min]`.
pub fn select_window(sampling_frequency_hz: f64, required_accuracy_percent: f64) -> Duration {
    let seconds = if !(sampling_frequency_hz > 0.0) || !(required_accuracy_percent < 100.0) {
        MAX_WINDOW_SECONDS
    } else if required_accuracy_percent <= 0.0 {
        MIN_WINDOW_SECONDS
    } else {
        let tolerance = (100.0 - required_accuracy_percent) / 100.0;
        let samples_needed = 1.0 / tolerance;
        (samples_needed / sampling_frequency_hz).clamp(MIN_WINDOW_SECONDS, MAX_WINDOW_SECONDS)
    };
    Duration::milliseconds((seconds * 1_000.0).round() as i64)
}
