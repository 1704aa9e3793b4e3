use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChannelId, DeviceId};

/// Identifies one counter channel on one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub device_id: DeviceId,
    pub channel: ChannelId,
}

impl ChannelKey {
    pub fn new(device_id: impl Into<DeviceId>, channel: ChannelId) -> Self {
        Self { device_id: device_id.into(), channel }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_id, self.channel)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReadingQuality {
    Good,
    Uncertain,
    Bad,
}

/// One poll of one counter channel. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CounterReading {
    pub device_id: DeviceId,
    pub channel: ChannelId,
    pub timestamp: DateTime<Utc>,
    pub raw_value: u64,
    /// Units per second, when the ingestor could derive one.
    pub rate: Option<f64>,
    pub quality: ReadingQuality,
}

impl CounterReading {
    pub fn key(&self) -> ChannelKey {
        ChannelKey::new(self.device_id.clone(), self.channel)
    }

    pub fn sample(&self) -> Sample {
        Sample { timestamp: self.timestamp, raw_value: self.raw_value }
    }
}

/// A `(timestamp, raw value)` pair, the input unit of rate computation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub raw_value: u64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, raw_value: u64) -> Self {
        Self { timestamp, raw_value }
    }
}

/// Combine the low and high 16-bit registers of an ADAM counter into its 32-bit value.
pub fn counter_from_registers(low: u16, high: u16) -> u64 {
    u64::from(high) * 65_536 + u64::from(low)
}

/// Bounded, strictly time-ordered samples for one channel.
///
/// Samples older than `max_age` relative to the newest one are evicted, as is
/// the oldest sample once `capacity` is reached. Raw values are kept as
/// reported; deciding whether a decrease is a wrap is the rate calculator's job.
#[derive(Debug, Clone)]
pub struct RateWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
    max_age: Duration,
}

impl RateWindow {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1_024)),
            capacity: capacity.max(2),
            max_age,
        }
    }

    /// Append a sample. Returns `false` (and stores nothing) when the
    /// timestamp does not advance past the newest stored sample.
    pub fn push(&mut self, sample: Sample) -> bool {
        if let Some(last) = self.samples.back() {
            if sample.timestamp <= last.timestamp {
                return false;
            }
        }
        self.samples.push_back(sample);
        let cutoff = sample.timestamp - self.max_age;
        while self.samples.len() > 2 {
            match self.samples.front() {
                Some(front) if front.timestamp < cutoff => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}
