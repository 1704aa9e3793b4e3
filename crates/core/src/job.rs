use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceId;

pub type WorkOrderId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Scheduled,
    Active,
    Paused,
    Completed,
    Cancelled,
}

/// A scheduled production run. Read-only to the calculators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkOrder {
    pub id: WorkOrderId,
    /// Target output in units per hour.
    pub target_rate: f64,
    pub planned_quantity: u64,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    /// Set when the job actually started; falls back to `scheduled_start`.
    pub actual_start: Option<DateTime<Utc>>,
    pub resource_reference: ResourceId,
    pub status: JobStatus,
}

impl WorkOrder {
    pub fn is_active(&self) -> bool {
        self.status == JobStatus::Active
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.actual_start.unwrap_or(self.scheduled_start)
    }

    pub fn scheduled_minutes(&self) -> f64 {
        crate::minutes_between(self.scheduled_start, self.scheduled_end)
    }

    pub fn target_rate_per_minute(&self) -> f64 {
        self.target_rate / 60.0
    }
}
