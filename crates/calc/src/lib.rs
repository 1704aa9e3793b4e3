//! Counter data to OEE: rate calculation, stoppage detection and OEE aggregation.
//!
//! Everything here is pure computation over already-fetched data. There is no
//! I/O and no process-wide state, so one calculator can serve many lines
//! concurrently.

use oee_core::CounterReading;

pub mod batch;
pub mod oee;
pub mod rate;
pub mod stoppage;

pub use batch::{calculate_batch, RateBatch};
pub use oee::{CalculationPeriod, OeeCalculator, OeeInputs};
pub use rate::{counter_delta, select_window, PairDelta, RateCalculator, RateConfig, RateEstimate};
pub use stoppage::{LineState, RatePoint, StoppageAction, StoppageConfig, StoppageDetector};

/// Per-reading rates for detection and run-time counting.
///
/// A stored rate wins; otherwise the rate of the interval ending at the
/// reading is derived from the raw counter. Readings with neither are left out.
///
/// Stored rates are the ingestor's rolling average over `rate_window_seconds`,
/// so a stop or a resume shows up in them up to one window late, and run time
/// may be overcounted by up to one window per stop.
pub fn rate_points(rates: &RateCalculator, readings: &[CounterReading]) -> Vec<RatePoint> {
    let samples: Vec<_> = readings.iter().map(CounterReading::sample).collect();
    let derived = rates.interval_rates(&samples);
    readings
        .iter()
        .enumerate()
        .filter_map(|(i, reading)| {
            let per_second = reading
                .rate
                .filter(|rate| rate.is_finite())
                .or_else(|| i.checked_sub(1).and_then(|j| derived[j].per_second))?;
            Some(RatePoint { timestamp: reading.timestamp, per_second })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use oee_core::ReadingQuality;

    #[test]
    fn stored_rates_win_over_derived_ones() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        let reading = |secs: i64, raw: u64, rate: Option<f64>| CounterReading {
            device_id: "adam-01".into(),
            channel: 0,
            timestamp: start + Duration::seconds(secs),
            raw_value: raw,
            rate,
            quality: ReadingQuality::Good,
        };
        let points = rate_points(
            &RateCalculator::default(),
            &[reading(0, 0, None), reading(5, 10, None), reading(10, 20, Some(7.0)), reading(15, 3, None)],
        );
        let rates: Vec<f64> = points.iter().map(|p| p.per_second).collect();
        assert_eq!(rates, vec![2.0, 7.0]);
    }
}
