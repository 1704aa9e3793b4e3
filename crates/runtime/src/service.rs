//! OEE service: fetches from collaborators under a deadline and never fails its caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use oee_calc::{calculate_batch, CalculationPeriod, OeeCalculator, OeeInputs, RateBatch, RateCalculator, RateConfig};
use oee_core::{ChannelId, ChannelKey, Clock, OeeCalculation, OeeConfig, Sample, WorkOrder};
use oee_sources::{ErrorContext, JobSource, ReadingSource, SourceError, SourceResult};

use crate::metrics::MetricsRegistry;

/// A monitored line: the resource jobs are scheduled on and the counter device feeding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpec {
    pub resource_id: String,
    pub device_id: String,
}

impl LineSpec {
    pub fn new(resource_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self { resource_id: resource_id.into(), device_id: device_id.into() }
    }
}

#[derive(Clone)]
pub struct OeeService {
    readings: Arc<dyn ReadingSource>,
    jobs: Arc<dyn JobSource>,
    calculator: Arc<OeeCalculator>,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
}

impl OeeService {
    pub fn new(
        readings: Arc<dyn ReadingSource>,
        jobs: Arc<dyn JobSource>,
        cfg: OeeConfig,
        clock: Arc<dyn Clock>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            readings,
            jobs,
            calculator: Arc::new(OeeCalculator::new(cfg)),
            clock,
            metrics,
        }
    }

    pub fn config(&self) -> &OeeConfig {
        self.calculator.config()
    }

    pub fn readings(&self) -> &Arc<dyn ReadingSource> {
        &self.readings
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Run a collaborator call under the configured fetch deadline.
    pub async fn with_deadline<T, F>(&self, operation: &'static str, fut: F) -> SourceResult<T>
    where
        F: Future<Output = SourceResult<T>>,
    {
        let deadline = self.config().fetch_timeout();
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::timeout(deadline.as_millis() as u64, ErrorContext::new(operation))),
        }
    }

    /// OEE from the active job's start (or the fallback window) up to now.
    pub async fn calculate_current(&self, line: &LineSpec) -> OeeCalculation {
        let now = self.clock.now();
        let job = match self.with_deadline("active_job", self.jobs.active_job(&line.resource_id)).await {
            Ok(job) => job,
            Err(err) => {
                let period = CalculationPeriod::resolve(None, now, self.config());
                return self.degrade(line, period, err);
            }
        };
        let period = CalculationPeriod::resolve(job.as_ref(), now, self.config());
        self.calculate_period(line, period, job.as_ref()).await
    }

    /// OEE over an explicit historical range.
    pub async fn calculate_for_range(
        &self,
        line: &LineSpec,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> OeeCalculation {
        let period = CalculationPeriod::explicit(start, end);
        let job = match self.with_deadline("active_job", self.jobs.active_job(&line.resource_id)).await {
            Ok(job) => job,
            Err(err) => return self.degrade(line, period, err),
        };
        self.calculate_period(line, period, job.as_ref()).await
    }

    async fn calculate_period(
        &self,
        line: &LineSpec,
        period: CalculationPeriod,
        job: Option<&WorkOrder>,
    ) -> OeeCalculation {
        let cfg = self.config();
        let (production, rejects) = tokio::join!(
            self.with_deadline(
                "fetch_production",
                self.readings.fetch_readings(&line.device_id, cfg.production_channel, period.start, Some(period.end)),
            ),
            self.with_deadline(
                "fetch_rejects",
                self.readings.fetch_readings(&line.device_id, cfg.reject_channel, period.start, Some(period.end)),
            ),
        );
        let (production, rejects) = match (production, rejects) {
            (Ok(production), Ok(rejects)) => (production, rejects),
            (Err(err), _) | (_, Err(err)) => return self.degrade(line, period, err),
        };

        let target_rate_per_hour = self.calculator.target_rate_for(job);
        let result = self.calculator.calculate(OeeInputs {
            resource_reference: &line.resource_id,
            period,
            production: &production,
            rejects: &rejects,
            target_rate_per_hour,
        });
        debug!(
            resource = %line.resource_id,
            oee = result.oee_percentage(),
            availability = result.availability.percentage(),
            performance = result.performance.percentage(),
            quality = result.quality.percentage(),
            "oee calculated"
        );
        result
    }

    fn degrade(&self, line: &LineSpec, period: CalculationPeriod, err: SourceError) -> OeeCalculation {
        warn!(resource = %line.resource_id, error = %err, "collaborator failure, returning neutral OEE");
        self.metrics.inc_collaborator_failures(1);
        self.metrics.inc_oee_degraded(1);
        OeeCalculation::neutral(line.resource_id.clone(), period.start, period.end)
    }

    /// Mean recent rate in units/second; `None` on missing data or failure.
    pub async fn current_rate(&self, device_id: &str, channel: ChannelId, recent_n: usize) -> Option<f64> {
        match self
            .with_deadline("current_rate", self.readings.current_rate(device_id, channel, recent_n))
            .await
        {
            Ok(rate) => rate.filter(|r| r.is_finite()),
            Err(err) => {
                warn!(device = device_id, channel, error = %err, "current rate unavailable");
                self.metrics.inc_collaborator_failures(1);
                None
            }
        }
    }

    /// Rates for many channels over the trailing `window`.
    ///
    /// Fetches run concurrently, each under the deadline; a failed fetch
    /// resolves its key to `None`. Computation then fans out on the rayon pool.
    pub async fn batch_rates(&self, keys: &[ChannelKey], window: Duration, cancel: &CancellationToken) -> RateBatch {
        let now = self.clock.now();
        let start = now - window;
        let fetches = keys.iter().map(|key| async move {
            let fetched = self
                .with_deadline(
                    "fetch_batch",
                    self.readings.fetch_readings(&key.device_id, key.channel, start, Some(now)),
                )
                .await;
            let samples: Vec<Sample> = match fetched {
                Ok(readings) => readings.iter().map(|r| r.sample()).collect(),
                Err(err) => {
                    warn!(key = %key, error = %err, "batch fetch failed");
                    self.metrics.inc_collaborator_failures(1);
                    Vec::new()
                }
            };
            (key.clone(), samples)
        });
        let inputs: HashMap<ChannelKey, Vec<Sample>> = join_all(fetches).await.into_iter().collect();

        let calculator = RateCalculator::new(RateConfig::from(self.config()));
        let token = cancel.clone();
        let fallback: RateBatch = RateBatch {
            rates: keys.iter().map(|k| (k.clone(), None)).collect(),
            cancelled: false,
        };
        match tokio::task::spawn_blocking(move || calculate_batch(&calculator, &inputs, &token)).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "batch rate computation did not complete");
                fallback
            }
        }
    }
}
