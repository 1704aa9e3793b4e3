//! Availability, Performance, Quality and the composite OEE result.
//!
//! Every percentage is finite and within `[0, 100]`; divide-by-zero cases are
//! mapped to defined values at construction so NaN never reaches a dashboard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AttentionThresholds;
use crate::ResourceId;

fn bounded_percentage(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Availability {
    pub planned_run_time_minutes: f64,
    pub actual_run_time_minutes: f64,
}

impl Availability {
    pub fn new(planned_run_time_minutes: f64, actual_run_time_minutes: f64) -> Self {
        Self { planned_run_time_minutes, actual_run_time_minutes }
    }

    /// Zero when nothing was planned.
    pub fn percentage(&self) -> f64 {
        if self.planned_run_time_minutes <= 0.0 {
            return 0.0;
        }
        bounded_percentage(self.actual_run_time_minutes * 100.0 / self.planned_run_time_minutes)
    }

    pub fn decimal(&self) -> f64 {
        self.percentage() / 100.0
    }

    pub fn downtime_minutes(&self) -> f64 {
        (self.planned_run_time_minutes - self.actual_run_time_minutes).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Performance {
    pub total_pieces_produced: u64,
    pub run_time_minutes: f64,
    pub target_rate_per_minute: f64,
}

impl Performance {
    pub fn new(total_pieces_produced: u64, run_time_minutes: f64, target_rate_per_minute: f64) -> Self {
        Self { total_pieces_produced, run_time_minutes, target_rate_per_minute }
    }

    /// Zero without run time or without a positive target.
    pub fn percentage(&self) -> f64 {
        if self.run_time_minutes <= 0.0 || self.target_rate_per_minute <= 0.0 {
            return 0.0;
        }
        let actual_rate = self.total_pieces_produced as f64 / self.run_time_minutes;
        bounded_percentage(actual_rate / self.target_rate_per_minute * 100.0)
    }

    pub fn decimal(&self) -> f64 {
        self.percentage() / 100.0
    }

    pub fn actual_rate_per_minute(&self) -> f64 {
        if self.run_time_minutes <= 0.0 {
            0.0
        } else {
            self.total_pieces_produced as f64 / self.run_time_minutes
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quality {
    pub good_pieces: u64,
    pub defective_pieces: u64,
}

impl Quality {
    pub fn new(good_pieces: u64, defective_pieces: u64) -> Self {
        Self { good_pieces, defective_pieces }
    }

    pub fn total_pieces(&self) -> u64 {
        self.good_pieces.saturating_add(self.defective_pieces)
    }

    /// With no pieces at all quality is reported as 100: nothing bad was made.
    pub fn percentage(&self) -> f64 {
        let total = self.total_pieces();
        if total == 0 {
            return 100.0;
        }
        bounded_percentage(self.good_pieces as f64 * 100.0 / total as f64)
    }

    pub fn decimal(&self) -> f64 {
        self.percentage() / 100.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OeeFactor {
    Availability,
    Performance,
    Quality,
}

/// OEE for one resource over one period. Recomputed on demand, never the system of record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OeeCalculation {
    pub resource_reference: ResourceId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub availability: Availability,
    pub performance: Performance,
    pub quality: Quality,
}

impl OeeCalculation {
    /// The well-formed result returned when there is nothing to compute from.
    pub fn neutral(
        resource_reference: impl Into<ResourceId>,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_reference: resource_reference.into(),
            period_start,
            period_end,
            availability: Availability::new(0.0, 0.0),
            performance: Performance::new(0, 0.0, 0.0),
            quality: Quality::new(0, 0),
        }
    }

    pub fn oee_decimal(&self) -> f64 {
        self.availability.decimal() * self.performance.decimal() * self.quality.decimal()
    }

    pub fn oee_percentage(&self) -> f64 {
        self.oee_decimal() * 100.0
    }

    /// The lowest of the three factors. Ties resolve in A, P, Q order.
    pub fn worst_factor(&self) -> OeeFactor {
        let mut worst = (OeeFactor::Availability, self.availability.percentage());
        for candidate in [
            (OeeFactor::Performance, self.performance.percentage()),
            (OeeFactor::Quality, self.quality.percentage()),
        ] {
            if candidate.1 < worst.1 {
                worst = candidate;
            }
        }
        worst.0
    }

    pub fn requires_attention(&self, thresholds: &AttentionThresholds) -> bool {
        self.availability.percentage() < thresholds.availability
            || self.performance.percentage() < thresholds.performance
            || self.quality.percentage() < thresholds.quality
            || self.oee_percentage() < thresholds.oee
    }
}
