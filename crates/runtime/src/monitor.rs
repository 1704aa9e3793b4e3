//! Periodic monitoring: stoppage bookkeeping and OEE per line, one cycle at a time per line.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use oee_calc::{rate_points, RateCalculator, RateConfig, StoppageAction, StoppageConfig, StoppageDetector};
use oee_core::{OeeCalculation, OeeFactor, StoppageInfo};
use oee_sources::{SourceError, StoppageStore};

use crate::metrics::EpochTimer;
use crate::service::{LineSpec, OeeService};

/// Non-blocking per-line exclusion. A cycle that cannot take its line's lock is skipped.
#[derive(Default)]
pub struct LineGuard {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LineGuard {
    pub fn try_acquire(&self, line_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = self
            .locks
            .lock()
            .entry(line_id.to_string())
            .or_default()
            .clone();
        lock.try_lock_owned().ok()
    }
}

/// What a cycle did to the line's stoppage records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "stoppage", rename_all = "snake_case")]
pub enum StoppageTransition {
    None,
    Opened(StoppageInfo),
    Continued(StoppageInfo),
    Closed(StoppageInfo),
    /// Production resumed and stopped again between cycles: the old record
    /// was closed at the resume and a new one opened.
    Restarted { closed: StoppageInfo, opened: StoppageInfo },
}

impl StoppageTransition {
    /// The stoppage in effect after the cycle, if the line is stopped.
    pub fn active(&self) -> Option<&StoppageInfo> {
        match self {
            StoppageTransition::Opened(info)
            | StoppageTransition::Continued(info)
            | StoppageTransition::Restarted { opened: info, .. } => Some(info),
            StoppageTransition::None | StoppageTransition::Closed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub line_id: String,
    /// `None` when the stoppage check could not reach its collaborators.
    pub transition: Option<StoppageTransition>,
    pub oee: OeeCalculation,
    pub requires_attention: bool,
    pub worst_factor: OeeFactor,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// The previous cycle for the line was still running.
    Skipped,
}

pub struct LineMonitor {
    service: OeeService,
    stoppages: Arc<dyn StoppageStore>,
    detector: StoppageDetector,
    rates: RateCalculator,
    guard: LineGuard,
}

impl LineMonitor {
    pub fn new(service: OeeService, stoppages: Arc<dyn StoppageStore>) -> Self {
        let cfg = service.config();
        let detector = StoppageDetector::new(StoppageConfig::from(cfg));
        let rates = RateCalculator::new(RateConfig::from(cfg));
        Self {
            service,
            stoppages,
            detector,
            rates,
            guard: LineGuard::default(),
        }
    }

    pub fn service(&self) -> &OeeService {
        &self.service
    }

    pub fn guard(&self) -> &LineGuard {
        &self.guard
    }

    pub async fn run_cycle(&self, line: &LineSpec) -> CycleOutcome {
        let metrics = self.service.metrics();
        let Some(_held) = self.guard.try_acquire(&line.resource_id) else {
            info!(line = %line.resource_id, "previous cycle still running, skipping");
            metrics.inc_cycles_skipped(1);
            return CycleOutcome::Skipped;
        };

        let timer = EpochTimer::start();
        let transition = self.check_stoppage(line).await;
        let oee = self.service.calculate_current(line).await;
        let requires_attention = oee.requires_attention(&self.service.config().attention);
        let worst_factor = oee.worst_factor();
        let elapsed = timer.elapsed();

        metrics.inc_cycles_run(1);
        info!(
            line = %line.resource_id,
            oee = oee.oee_percentage(),
            worst = ?worst_factor,
            requires_attention,
            stopped = transition.as_ref().and_then(StoppageTransition::active).is_some(),
            duration_ms = elapsed.as_millis() as u64,
            "monitoring cycle complete"
        );

        CycleOutcome::Completed(CycleReport {
            line_id: line.resource_id.clone(),
            transition,
            oee,
            requires_attention,
            worst_factor,
            elapsed_ms: elapsed.as_millis(),
        })
    }

    /// Detect the line's state and bring its stoppage records in line with it.
    ///
    /// Re-running with unchanged data never creates a second record. Collaborator
    /// failures are logged and yield `None`; nothing is half-applied.
    pub async fn check_stoppage(&self, line: &LineSpec) -> Option<StoppageTransition> {
        let now = self.service.clock().now();
        let cfg = self.service.config();
        let readings = self
            .service
            .with_deadline(
                "fetch_stoppage_window",
                self.service.readings().fetch_readings(
                    &line.device_id,
                    cfg.production_channel,
                    self.detector.horizon(now),
                    Some(now),
                ),
            )
            .await;
        let readings = self.tolerate(line, readings)?;
        let open = self
            .service
            .with_deadline("open_stoppage", self.stoppages.open_stoppage(&line.resource_id))
            .await;
        let open = self.tolerate(line, open)?;

        let points = rate_points(&self.rates, &readings);
        match self.detector.evaluate(&points, open.as_ref(), now) {
            StoppageAction::Nothing => Some(StoppageTransition::None),
            StoppageAction::Continue(info) => Some(StoppageTransition::Continued(info)),
            StoppageAction::Open(info) => self.open_record(line, info, now).await,
            StoppageAction::Close { stoppage_id: Some(id), end_time, .. } => {
                let closed = self
                    .service
                    .with_deadline("end_stoppage", self.stoppages.end(id, end_time))
                    .await;
                let info = self.tolerate(line, closed)?;
                self.service.metrics().inc_stoppages_closed(1);
                info!(
                    line = %line.resource_id,
                    stoppage_id = id,
                    duration_minutes = info.duration_minutes,
                    "production resumed"
                );
                // The line may already be down again since the resume.
                match self.detector.evaluate(&points, None, now) {
                    StoppageAction::Open(next) => match self.open_record(line, next, now).await {
                        Some(StoppageTransition::Opened(opened)) => {
                            Some(StoppageTransition::Restarted { closed: info, opened })
                        }
                        _ => Some(StoppageTransition::Closed(info)),
                    },
                    _ => Some(StoppageTransition::Closed(info)),
                }
            }
            StoppageAction::Close { stoppage_id: None, .. } => {
                warn!(line = %line.resource_id, "open stoppage has no id, cannot close it");
                None
            }
        }
    }

    async fn open_record(&self, line: &LineSpec, info: StoppageInfo, now: DateTime<Utc>) -> Option<StoppageTransition> {
        let created = self
            .service
            .with_deadline("create_stoppage", self.stoppages.create(&line.resource_id, info.start_time))
            .await;
        match created {
            Ok(id) => {
                self.service.metrics().inc_stoppages_opened(1);
                warn!(
                    line = %line.resource_id,
                    stoppage_id = id,
                    start = %info.start_time,
                    duration_minutes = info.duration_minutes,
                    "stoppage detected"
                );
                Some(StoppageTransition::Opened(info.with_id(id)))
            }
            // Another writer opened it first; adopt that record.
            Err(SourceError::Conflict { .. }) => {
                let existing = self
                    .service
                    .with_deadline("open_stoppage", self.stoppages.open_stoppage(&line.resource_id))
                    .await;
                let mut record = self.tolerate(line, existing)??;
                record.touch(now);
                Some(StoppageTransition::Continued(record))
            }
            Err(err) => self.tolerate(line, Err(err)),
        }
    }

    fn tolerate<T>(&self, line: &LineSpec, result: Result<T, SourceError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(line = %line.resource_id, error = %err, transient = err.is_transient(), "stoppage check failed");
                self.service.metrics().inc_collaborator_failures(1);
                None
            }
        }
    }
}

/// Runs a cycle for every line on a fixed interval until cancelled.
pub struct Scheduler {
    monitor: Arc<LineMonitor>,
    lines: Vec<LineSpec>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(monitor: Arc<LineMonitor>, lines: Vec<LineSpec>, interval: Duration) -> Self {
        Self { monitor, lines, interval }
    }

    /// One cycle for every line, concurrently.
    pub async fn run_once(&self) -> Vec<CycleOutcome> {
        join_all(self.lines.iter().map(|line| self.monitor.run_cycle(line))).await
    }

    /// Tick until `cancel` fires. Each tick spawns one cycle per line; a line
    /// whose previous cycle is still running skips the tick. In-flight cycles
    /// are awaited before returning.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        if self.lines.is_empty() {
            anyhow::bail!("scheduler started with no lines to monitor");
        }
        if self.interval.is_zero() {
            anyhow::bail!("scheduler interval must be positive");
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();
        info!(lines = self.lines.len(), interval_ms = self.interval.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for line in &self.lines {
                        let monitor = Arc::clone(&self.monitor);
                        let line = line.clone();
                        in_flight.spawn(async move { monitor.run_cycle(&line).await });
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "monitoring cycle task failed");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "monitoring cycle task failed");
            }
        }
        info!("scheduler stopped");
        Ok(())
    }
}
