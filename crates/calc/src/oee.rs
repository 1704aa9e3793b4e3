//! Availability x Performance x Quality over a calculation period.
//!
//! Run time is discretised: each production reading whose rate is above the
//! epsilon contributes one fixed sampling interval, capped at the planned time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use oee_core::{
    minutes_between, Availability, CounterReading, OeeCalculation, OeeConfig, Performance, Quality,
    Sample, WorkOrder,
};

use crate::rate::{RateCalculator, RateConfig};
use crate::rate_points;

/// The window an OEE figure covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CalculationPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CalculationPeriod {
    pub fn explicit(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end: end.max(start) }
    }

    /// Live period ending at `now`.
    ///
    /// Starts at the active job's start, or `fallback_lookback_minutes` ago
    /// without one, and never reaches further back than one shift.
    pub fn resolve(job: Option<&WorkOrder>, now: DateTime<Utc>, cfg: &OeeConfig) -> Self {
        let start = match job {
            Some(job) => job.start_time(),
            None => now - Duration::minutes(cfg.fallback_lookback_minutes),
        };
        let earliest = now - Duration::minutes(cfg.shift_duration_minutes);
        Self::explicit(start.max(earliest).min(now), now)
    }

    pub fn minutes(&self) -> f64 {
        minutes_between(self.start, self.end)
    }

    /// Units a line running at `target_rate_per_hour` would make in this period.
    pub fn target_output(&self, target_rate_per_hour: f64) -> f64 {
        (target_rate_per_hour * self.minutes() / 60.0).max(0.0)
    }
}

/// Already-fetched data for one calculation.
#[derive(Debug, Clone, Copy)]
pub struct OeeInputs<'a> {
    pub resource_reference: &'a str,
    pub period: CalculationPeriod,
    pub production: &'a [CounterReading],
    pub rejects: &'a [CounterReading],
    pub target_rate_per_hour: f64,
}

#[derive(Debug, Clone)]
pub struct OeeCalculator {
    cfg: OeeConfig,
    rates: RateCalculator,
}

impl Default for OeeCalculator {
    fn default() -> Self {
        Self::new(OeeConfig::default())
    }
}

impl OeeCalculator {
    pub fn new(cfg: OeeConfig) -> Self {
        let rates = RateCalculator::new(RateConfig::from(&cfg));
        Self { cfg, rates }
    }

    pub fn config(&self) -> &OeeConfig {
        &self.cfg
    }

    pub fn target_rate_for(&self, job: Option<&WorkOrder>) -> f64 {
        job.map(|j| j.target_rate)
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .unwrap_or(self.cfg.default_target_rate_per_hour)
    }

    /// Always returns a well-formed calculation; sparse data yields the neutral one.
    pub fn calculate(&self, inputs: OeeInputs<'_>) -> OeeCalculation {
        let OeeInputs { resource_reference, period, production, rejects, target_rate_per_hour } = inputs;

        if production.len() < self.cfg.minimum_data_points {
            debug!(
                resource = resource_reference,
                readings = production.len(),
                minimum = self.cfg.minimum_data_points,
                "insufficient data for OEE, returning neutral calculation"
            );
            return OeeCalculation::neutral(resource_reference, period.start, period.end);
        }

        let planned_minutes = period.minutes();
        let running_readings = rate_points(&self.rates, production)
            .iter()
            .filter(|p| p.per_second > self.cfg.rate_epsilon)
            .count();
        let actual_minutes = (running_readings as f64 * self.cfg.sampling_interval_seconds / 60.0)
            .min(planned_minutes);

        let produced = self.rates.total_units(&samples(production));
        let rejected = self.rates.total_units(&samples(rejects));
        let good = produced.saturating_sub(rejected);
        let defective = produced.min(rejected);

        debug!(
            resource = resource_reference,
            planned_minutes,
            actual_minutes,
            produced,
            rejected,
            target_output = period.target_output(target_rate_per_hour),
            "oee inputs resolved"
        );

        OeeCalculation {
            resource_reference: resource_reference.to_string(),
            period_start: period.start,
            period_end: period.end,
            availability: Availability::new(planned_minutes, actual_minutes),
            performance: Performance::new(produced, actual_minutes, target_rate_per_hour / 60.0),
            quality: Quality::new(good, defective),
        }
    }
}

fn samples(readings: &[CounterReading]) -> Vec<Sample> {
    readings.iter().map(CounterReading::sample).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use oee_core::{JobStatus, ReadingQuality};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn job(start: DateTime<Utc>) -> WorkOrder {
        WorkOrder {
            id: "wo-1".into(),
            target_rate: 3_600.0,
            planned_quantity: 1_800,
            scheduled_start: start,
            scheduled_end: start + Duration::hours(1),
            actual_start: None,
            resource_reference: "line-1".into(),
            status: JobStatus::Active,
        }
    }

    fn reading(channel: u32, secs: i64, raw: u64) -> CounterReading {
        CounterReading {
            device_id: "line-1".into(),
            channel,
            timestamp: t(secs),
            raw_value: raw,
            rate: None,
            quality: ReadingQuality::Good,
        }
    }

    #[test]
    fn period_follows_active_job_start() {
        let cfg = OeeConfig::default();
        let period = CalculationPeriod::resolve(Some(&job(t(0))), t(1_800), &cfg);
        assert_eq!(period.start, t(0));
        assert_eq!(period.minutes(), 30.0);
        assert_eq!(period.target_output(3_600.0), 1_800.0);
    }

    #[test]
    fn period_falls_back_and_is_capped() {
        let cfg = OeeConfig::default();
        let now = t(86_400);
        let fallback = CalculationPeriod::resolve(None, now, &cfg);
        assert_eq!(fallback.minutes(), 60.0);

        let long_job = CalculationPeriod::resolve(Some(&job(t(0))), now, &cfg);
        assert_eq!(long_job.minutes(), 480.0);
    }

    #[test]
    fn target_rate_falls_back_to_default() {
        let calc = OeeCalculator::default();
        assert_eq!(calc.target_rate_for(None), 60.0);
        let mut zero = job(t(0));
        zero.target_rate = 0.0;
        assert_eq!(calc.target_rate_for(Some(&zero)), 60.0);
        assert_eq!(calc.target_rate_for(Some(&job(t(0)))), 3_600.0);
    }

    #[test]
    fn half_the_period_stopped_halves_availability() {
        let calc = OeeCalculator::default();
        // 1 unit/s for the first 15 minutes, then flat for 15 minutes.
        let production: Vec<CounterReading> = (0..=360)
            .map(|i| {
                let secs = i * 5;
                reading(0, secs, secs.min(900) as u64)
            })
            .collect();
        let result = calc.calculate(OeeInputs {
            resource_reference: "line-1",
            period: CalculationPeriod::explicit(t(0), t(1_800)),
            production: &production,
            rejects: &[],
            target_rate_per_hour: 3_600.0,
        });
        assert_eq!(result.availability.percentage(), 50.0);
        assert_eq!(result.performance.percentage(), 100.0);
        assert_eq!(result.quality.percentage(), 100.0);
        assert_eq!(result.oee_percentage(), 50.0);
    }

    #[test]
    fn rejects_reduce_quality_and_wrapped_counts_are_kept() {
        let calc = OeeCalculator::default();
        let base = 4_294_967_196u64;
        let production: Vec<CounterReading> = (0..=12)
            .map(|i| reading(0, i * 5, (base + i as u64 * 20) % (1 << 32)))
            .collect();
        let rejects: Vec<CounterReading> = (0..=12).map(|i| reading(1, i * 5, (i as u64) / 2)).collect();
        let result = calc.calculate(OeeInputs {
            resource_reference: "line-1",
            period: CalculationPeriod::explicit(t(0), t(60)),
            production: &production,
            rejects: &rejects,
            target_rate_per_hour: 14_400.0,
        });
        assert_eq!(result.performance.total_pieces_produced, 240);
        assert_eq!(result.quality, Quality::new(234, 6));
        assert_eq!(result.quality.percentage(), 97.5);
        assert_eq!(result.availability.percentage(), 100.0);
        assert_eq!(result.performance.percentage(), 100.0);
    }

    #[test]
    fn sparse_data_is_neutral() {
        let calc = OeeCalculator::default();
        let production = vec![reading(0, 0, 0), reading(0, 5, 5)];
        let result = calc.calculate(OeeInputs {
            resource_reference: "line-1",
            period: CalculationPeriod::explicit(t(0), t(60)),
            production: &production,
            rejects: &[],
            target_rate_per_hour: 60.0,
        });
        assert_eq!(result, OeeCalculation::neutral("line-1", t(0), t(60)));
    }
}
