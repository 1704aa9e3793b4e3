//! Stoppage detection over recent rate data.
//!
//! Detection is a pure function of the rate points, the currently open record
//! (if any) and `now`. Running it twice over unchanged data yields the same
//! action, so it can be driven from a fixed-interval scheduler.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use oee_core::{minutes_between, OeeConfig, StoppageId, StoppageInfo};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StoppageConfig {
    pub threshold_minutes: f64,
    pub lookback_minutes: i64,
    /// Rates at or below this count as "not producing".
    pub rate_epsilon: f64,
}

impl Default for StoppageConfig {
    fn default() -> Self {
        Self {
            threshold_minutes: 1.0,
            lookback_minutes: 120,
            rate_epsilon: 0.0,
        }
    }
}

impl From<&OeeConfig> for StoppageConfig {
    fn from(cfg: &OeeConfig) -> Self {
        Self {
            threshold_minutes: cfg.stoppage_threshold_minutes,
            lookback_minutes: cfg.stoppage_lookback_minutes,
            rate_epsilon: cfg.rate_epsilon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePoint {
    pub timestamp: DateTime<Utc>,
    pub per_second: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineState {
    Running,
    Stopped { start_time: DateTime<Utc> },
}

/// What the caller should do with its stoppage records.
#[derive(Debug, Clone, PartialEq)]
pub enum StoppageAction {
    /// Running with nothing open.
    Nothing,
    /// Stopped with nothing open yet: create this record.
    Open(StoppageInfo),
    /// Still stopped: the open record with its duration refreshed.
    Continue(StoppageInfo),
    /// Production resumed: close the open record.
    Close {
        stoppage_id: Option<StoppageId>,
        end_time: DateTime<Utc>,
        duration_minutes: f64,
    },
}

#[derive(Debug, Clone, Default)]
pub struct StoppageDetector {
    cfg: StoppageConfig,
}

impl StoppageDetector {
    pub fn new(cfg: StoppageConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &StoppageConfig {
        &self.cfg
    }

    pub fn horizon(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(self.cfg.lookback_minutes)
    }

    /// Classify the line from points ordered by timestamp.
    ///
    /// Only points inside the lookback horizon are considered. A zero-rate run
    /// with no producing point before it inside the horizon starts at the
    /// horizon. With no points at all the line is reported as running: absent
    /// data says nothing about production. A zero-rate run shorter than the
    /// threshold is noise.
    pub fn detect(&self, points: &[RatePoint], now: DateTime<Utc>) -> LineState {
        let horizon = self.horizon(now);
        let recent = self.recent(points, now);

        let Some(latest) = recent.last() else {
            return LineState::Running;
        };
        if latest.per_second > self.cfg.rate_epsilon {
            return LineState::Running;
        }

        let start_time = match recent.iter().rposition(|p| p.per_second > self.cfg.rate_epsilon) {
            Some(last_producing) => recent[last_producing + 1].timestamp,
            None => horizon,
        };

        if minutes_between(start_time, now) >= self.cfg.threshold_minutes {
            LineState::Stopped { start_time }
        } else {
            LineState::Running
        }
    }

    /// The current stoppage, or `None` while running.
    pub fn current(&self, points: &[RatePoint], now: DateTime<Utc>) -> Option<StoppageInfo> {
        match self.detect(points, now) {
            LineState::Running => None,
            LineState::Stopped { start_time } => Some(StoppageInfo::open(start_time, now)),
        }
    }

    /// Decide the transition given the currently open record, if any.
    ///
    /// An open record is only closed once a producing point after its start is
    /// seen; a line that simply stops reporting stays stopped. If production
    /// resumed and the line stopped again since the record opened, the record
    /// is closed at the resume so the next evaluation opens a fresh one.
    pub fn evaluate(
        &self,
        points: &[RatePoint],
        open: Option<&StoppageInfo>,
        now: DateTime<Utc>,
    ) -> StoppageAction {
        let state = self.detect(points, now);
        let Some(record) = open else {
            return match state {
                LineState::Running => StoppageAction::Nothing,
                LineState::Stopped { start_time } => StoppageAction::Open(StoppageInfo::open(start_time, now)),
            };
        };

        let resumed_at = self.resumed_after(points, record.start_time, now);
        match (state, resumed_at) {
            (LineState::Running, Some(_)) => StoppageAction::Close {
                stoppage_id: record.id,
                end_time: now,
                duration_minutes: minutes_between(record.start_time, now),
            },
            (LineState::Stopped { start_time }, Some(resumed)) if start_time > record.start_time => {
                StoppageAction::Close {
                    stoppage_id: record.id,
                    end_time: resumed,
                    duration_minutes: minutes_between(record.start_time, resumed),
                }
            }
            _ => {
                let mut record = record.clone();
                record.touch(now);
                StoppageAction::Continue(record)
            }
        }
    }

    /// Points inside `[horizon, now]`.
    fn recent<'a>(&self, points: &'a [RatePoint], now: DateTime<Utc>) -> &'a [RatePoint] {
        let from = points.partition_point(|p| p.timestamp < self.horizon(now));
        let to = points.partition_point(|p| p.timestamp <= now);
        &points[from..to.max(from)]
    }

    /// First producing point strictly after `since`.
    fn resumed_after(&self, points: &[RatePoint], since: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.recent(points, now)
            .iter()
            .find(|p| p.timestamp > since && p.per_second > self.cfg.rate_epsilon)
            .map(|p| p.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap() + Duration::seconds(secs)
    }

    /// One point every 5 s; `zero_from` onwards the rate is zero.
    fn points(until: i64, zero_from: i64) -> Vec<RatePoint> {
        (1..=until / 5)
            .map(|i| {
                let secs = i * 5;
                RatePoint { timestamp: t(secs), per_second: if secs >= zero_from { 0.0 } else { 1.0 } }
            })
            .collect()
    }

    #[test]
    fn running_line_has_no_stoppage() {
        let detector = StoppageDetector::default();
        assert_eq!(detector.detect(&points(600, 10_000), t(600)), LineState::Running);
    }

    #[test]
    fn short_zero_run_is_noise() {
        let detector = StoppageDetector::default();
        assert_eq!(detector.detect(&points(600, 570), t(600)), LineState::Running);
    }

    #[test]
    fn sustained_zero_run_starts_at_first_zero_reading() {
        let detector = StoppageDetector::default();
        assert_eq!(
            detector.detect(&points(600, 480), t(600)),
            LineState::Stopped { start_time: t(480) }
        );
    }

    #[test]
    fn zero_run_without_producing_reading_starts_at_horizon() {
        let detector = StoppageDetector::new(StoppageConfig { lookback_minutes: 5, ..StoppageConfig::default() });
        let now = t(900);
        assert_eq!(
            detector.detect(&points(900, 0), now),
            LineState::Stopped { start_time: now - Duration::minutes(5) }
        );
    }

    #[test]
    fn no_points_means_running() {
        let detector = StoppageDetector::default();
        assert_eq!(detector.detect(&[], t(0)), LineState::Running);
        assert!(detector.current(&[], t(0)).is_none());
    }

    #[test]
    fn evaluation_is_idempotent() {
        let detector = StoppageDetector::default();
        let data = points(600, 480);
        let first = detector.evaluate(&data, None, t(600));
        let second = detector.evaluate(&data, None, t(600));
        assert_eq!(first, second);
        assert!(matches!(first, StoppageAction::Open(ref info) if info.start_time == t(480) && info.is_active));

        let open = StoppageInfo::open(t(480), t(600)).with_id(7);
        let again = detector.evaluate(&data, Some(&open), t(600));
        assert_eq!(again, StoppageAction::Continue(open.clone()));
    }

    #[test]
    fn resumed_production_closes_open_record() {
        let detector = StoppageDetector::default();
        let mut data = points(600, 480);
        data.push(RatePoint { timestamp: t(605), per_second: 2.0 });
        let open = StoppageInfo::open(t(480), t(600)).with_id(3);
        assert_eq!(
            detector.evaluate(&data, Some(&open), t(605)),
            StoppageAction::Close { stoppage_id: Some(3), end_time: t(605), duration_minutes: 125_000.0 / 60_000.0 }
        );
    }

    #[test]
    fn open_record_survives_missing_data() {
        let detector = StoppageDetector::default();
        let open = StoppageInfo::open(t(480), t(600)).with_id(4);
        let later = t(600) + Duration::hours(3);
        let record = match detector.evaluate(&points(600, 480), Some(&open), later) {
            StoppageAction::Continue(record) => record,
            other => panic!("expected the stoppage to stay open, got {other:?}"),
        };
        assert!(record.is_active);
        assert_eq!(record.start_time, t(480));
        let mut touched = open.clone();
        touched.touch(later);
        assert_eq!(detector.evaluate(&[], Some(&open), later), StoppageAction::Continue(touched));
    }

    #[test]
    fn second_outage_after_unseen_resume_closes_the_first() {
        let detector = StoppageDetector::default();
        let mut data = points(600, 480);
        data.push(RatePoint { timestamp: t(605), per_second: 1.0 });
        data.push(RatePoint { timestamp: t(610), per_second: 1.0 });
        data.extend((1..=30).map(|i| RatePoint { timestamp: t(610 + i * 5), per_second: 0.0 }));
        let open = StoppageInfo::open(t(480), t(600)).with_id(5);

        assert_eq!(
            detector.evaluate(&data, Some(&open), t(760)),
            StoppageAction::Close { stoppage_id: Some(5), end_time: t(605), duration_minutes: 125_000.0 / 60_000.0 }
        );
        assert_eq!(
            detector.evaluate(&data, None, t(760)),
            StoppageAction::Open(StoppageInfo::open(t(615), t(760)))
        );
    }

    #[test]
    fn epsilon_treats_trickle_as_stopped() {
        let detector = StoppageDetector::new(StoppageConfig { rate_epsilon: 0.05, ..StoppageConfig::default() });
        let data: Vec<RatePoint> = (1..=24)
            .map(|i| RatePoint { timestamp: t(i * 5), per_second: if i > 6 { 0.01 } else { 1.0 } })
            .collect();
        assert_eq!(detector.detect(&data, t(120)), LineState::Stopped { start_time: t(35) });
    }
}
