use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{ChannelId, CoreError};

/// Percentages below which a calculation is flagged for attention.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AttentionThresholds {
    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,
}

impl Default for AttentionThresholds {
    fn default() -> Self {
        Self {
            availability: 85.0,
            performance: 85.0,
            quality: 95.0,
            oee: 65.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OeeConfig {
    pub minimum_data_points: usize,
    pub rate_minimum_data_points: usize,
    pub stoppage_threshold_minutes: f64,
    pub stoppage_lookback_minutes: i64,
    pub rate_epsilon: f64,
    pub default_target_rate_per_hour: f64,
    pub shift_duration_minutes: i64,
    pub fallback_lookback_minutes: i64,
    pub overflow_threshold: u64,
    pub counter_modulus: u64,
    pub sampling_interval_seconds: f64,
    pub production_channel: ChannelId,
    pub reject_channel: ChannelId,
    pub rate_window_seconds: i64,
    pub fetch_timeout_ms: u64,
    pub monitor_interval_seconds: u64,
    pub attention: AttentionThresholds,
}

impl Default for OeeConfig {
    fn default() -> Self {
        Self {
            minimum_data_points: 5,
            rate_minimum_data_points: 2,
            stoppage_threshold_minutes: 1.0,
            stoppage_lookback_minutes: 120,
            rate_epsilon: 0.0,
            default_target_rate_per_hour: 60.0,
            shift_duration_minutes: 480,
            fallback_lookback_minutes: 60,
            overflow_threshold: 4_294_967_000,
            counter_modulus: 1 << 32,
            sampling_interval_seconds: 5.0,
            production_channel: 0,
            reject_channel: 1,
            rate_window_seconds: 60,
            fetch_timeout_ms: 5_000,
            monitor_interval_seconds: 30,
            attention: AttentionThresholds::default(),
        }
    }
}

impl OeeConfig {
    /// Load a JSON config. Keys absent from the file keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let cfg: Self = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.counter_modulus == 0 {
            return Err(CoreError::InvalidConfig("counter_modulus must be positive".into()));
        }
        if self.overflow_threshold >= self.counter_modulus {
            return Err(CoreError::InvalidConfig(format!(
                "overflow_threshold {} must be below counter_modulus {}",
                self.overflow_threshold, self.counter_modulus
            )));
        }
        if !(self.sampling_interval_seconds > 0.0) {
            return Err(CoreError::InvalidConfig("sampling_interval_seconds must be positive".into()));
        }
        if !(self.stoppage_threshold_minutes >= 0.0) {
            return Err(CoreError::InvalidConfig("stoppage_threshold_minutes must not be negative".into()));
        }
        if self.stoppage_lookback_minutes <= 0
            || self.fallback_lookback_minutes <= 0
            || self.shift_duration_minutes <= 0
        {
            return Err(CoreError::InvalidConfig("lookback and shift windows must be positive".into()));
        }
        if self.rate_minimum_data_points < 2 {
            return Err(CoreError::InvalidConfig("rate_minimum_data_points must be at least 2".into()));
        }
        if self.monitor_interval_seconds == 0 {
            return Err(CoreError::InvalidConfig("monitor_interval_seconds must be positive".into()));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn monitor_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.monitor_interval_seconds)
    }
}
