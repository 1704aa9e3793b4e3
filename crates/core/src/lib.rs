//! Core types and value objects for the OEE monitor.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

pub type DeviceId = String;
pub type ChannelId = u32;
pub type ResourceId = String;
pub type StoppageId = u64;

pub mod config;
pub mod job;
pub mod metrics;
pub mod reading;
pub mod stoppage;

pub use config::{AttentionThresholds, OeeConfig};
pub use job::{JobStatus, WorkOrder};
pub use metrics::{Availability, OeeCalculation, OeeFactor, Performance, Quality};
pub use reading::{counter_from_registers, ChannelKey, CounterReading, RateWindow, ReadingQuality, Sample};
pub use stoppage::StoppageInfo;

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Source of "now" for detection and scheduling.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Minutes between two instants as a float. Negative spans clamp to zero.
pub fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let ms = (end - start).num_milliseconds();
    if ms <= 0 {
        0.0
    } else {
        ms as f64 / 60_000.0
    }
}

/// Seconds between two instants as a float, signed.
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }

    #[test]
    fn minutes_between_clamps_negative_spans() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        assert_eq!(minutes_between(start, start - Duration::minutes(5)), 0.0);
        assert_eq!(minutes_between(start, start + Duration::minutes(30)), 30.0);
    }
}
