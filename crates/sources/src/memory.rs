//! In-memory backend for development, demos and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use oee_core::{ChannelId, ChannelKey, CounterReading, StoppageId, StoppageInfo, WorkOrder};

use crate::{
    ErrorContext, JobSource, ReadingSink, ReadingSource, SourceError, SourceResult, StoppageStore,
};

#[derive(Debug, Clone)]
struct StoredStoppage {
    line_id: String,
    info: StoppageInfo,
}

#[derive(Default)]
struct Inner {
    readings: RwLock<HashMap<ChannelKey, Vec<CounterReading>>>,
    jobs: RwLock<HashMap<String, WorkOrder>>,
    stoppages: Mutex<BTreeMap<StoppageId, StoredStoppage>>,
    next_stoppage_id: AtomicU64,
    failing: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
}

/// Cloneable handle over shared in-memory tables.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay reading fetches, to exercise caller deadlines.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *self.inner.fetch_delay.lock() = delay;
    }

    pub fn upsert_job(&self, job: WorkOrder) {
        self.inner
            .jobs
            .write()
            .insert(job.resource_reference.clone(), job);
    }

    pub fn clear_job(&self, resource_id: &str) {
        self.inner.jobs.write().remove(resource_id);
    }

    pub fn insert_readings(&self, readings: impl IntoIterator<Item = CounterReading>) {
        let mut table = self.inner.readings.write();
        for reading in readings {
            let series = table.entry(reading.key()).or_default();
            let at = series.partition_point(|r| r.timestamp <= reading.timestamp);
            series.insert(at, reading);
        }
    }

    pub fn reading_count(&self, key: &ChannelKey) -> usize {
        self.inner
            .readings
            .read()
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Every stoppage recorded for a line, oldest first.
    pub fn stoppages(&self, line_id: &str) -> Vec<StoppageInfo> {
        self.inner
            .stoppages
            .lock()
            .values()
            .filter(|s| s.line_id == line_id)
            .map(|s| s.info.clone())
            .collect()
    }

    fn check(&self, operation: &str) -> SourceResult<()> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(SourceError::connection(
                "in-memory store marked unavailable",
                ErrorContext::new(operation),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadingSource for InMemoryStore {
    async fn fetch_readings(
        &self,
        device_id: &str,
        channel: ChannelId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> SourceResult<Vec<CounterReading>> {
        self.check("fetch_readings")?;
        let delay = *self.inner.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let key = ChannelKey::new(device_id, channel);
        let table = self.inner.readings.read();
        let Some(series) = table.get(&key) else {
            return Ok(Vec::new());
        };
        Ok(series
            .iter()
            .filter(|r| r.timestamp >= start && end.map_or(true, |end| r.timestamp <= end))
            .cloned()
            .collect())
    }

    async fn current_rate(
        &self,
        device_id: &str,
        channel: ChannelId,
        recent_n: usize,
    ) -> SourceResult<Option<f64>> {
        self.check("current_rate")?;
        let key = ChannelKey::new(device_id, channel);
        let table = self.inner.readings.read();
        let rates: Vec<f64> = table
            .get(&key)
            .map(|series| {
                series
                    .iter()
                    .rev()
                    .filter_map(|r| r.rate)
                    .take(recent_n)
                    .collect()
            })
            .unwrap_or_default();
        if rates.is_empty() {
            return Ok(None);
        }
        Ok(Some(rates.iter().sum::<f64>() / rates.len() as f64))
    }
}

#[async_trait]
impl ReadingSink for InMemoryStore {
    async fn append(&self, reading: CounterReading) -> SourceResult<()> {
        self.check("append_reading")?;
        self.insert_readings([reading]);
        Ok(())
    }
}

#[async_trait]
impl JobSource for InMemoryStore {
    async fn active_job(&self, resource_id: &str) -> SourceResult<Option<WorkOrder>> {
        self.check("active_job")?;
        Ok(self
            .inner
            .jobs
            .read()
            .get(resource_id)
            .filter(|job| job.is_active())
            .cloned())
    }
}

#[async_trait]
impl StoppageStore for InMemoryStore {
    async fn open_stoppage(&self, line_id: &str) -> SourceResult<Option<StoppageInfo>> {
        self.check("open_stoppage")?;
        Ok(self
            .inner
            .stoppages
            .lock()
            .values()
            .find(|s| s.line_id == line_id && s.info.is_active)
            .map(|s| s.info.clone()))
    }

    async fn create(&self, line_id: &str, start_time: DateTime<Utc>) -> SourceResult<StoppageId> {
        self.check("create_stoppage")?;
        let mut stoppages = self.inner.stoppages.lock();
        if stoppages.values().any(|s| s.line_id == line_id && s.info.is_active) {
            return Err(SourceError::conflict(
                "line already has an open stoppage",
                ErrorContext::new("create_stoppage")
                    .with_entity("stoppage")
                    .with_entity_id(line_id),
            ));
        }
        let id = self.inner.next_stoppage_id.fetch_add(1, Ordering::SeqCst) + 1;
        let info = StoppageInfo::open(start_time, start_time).with_id(id);
        stoppages.insert(id, StoredStoppage { line_id: line_id.to_string(), info });
        Ok(id)
    }

    async fn end(&self, stoppage_id: StoppageId, end_time: DateTime<Utc>) -> SourceResult<StoppageInfo> {
        self.check("end_stoppage")?;
        let mut stoppages = self.inner.stoppages.lock();
        let stored = stoppages.get_mut(&stoppage_id).ok_or_else(|| {
            SourceError::not_found(
                "no such stoppage",
                ErrorContext::new("end_stoppage")
                    .with_entity("stoppage")
                    .with_entity_id(stoppage_id),
            )
        })?;
        stored.info.close(end_time);
        Ok(stored.info.clone())
    }
}
