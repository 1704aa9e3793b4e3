//! Counter Reading Ingestor: turns raw polls into stored readings with a rolling rate.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use oee_calc::{counter_delta, PairDelta, RateCalculator, RateConfig};
use oee_core::{
    counter_from_registers, ChannelId, ChannelKey, CounterReading, OeeConfig, RateWindow, ReadingQuality, Sample,
};
use oee_sources::{ReadingSink, SourceError};

use crate::metrics::MetricsRegistry;

/// Upper bound on samples kept per channel, whatever the rate window.
const WINDOW_CAPACITY: usize = 720;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("out-of-order reading for {key}: {timestamp} is not after the newest stored sample")]
    OutOfOrder { key: ChannelKey, timestamp: DateTime<Utc> },

    #[error("failed to store reading: {0}")]
    Sink(#[from] SourceError),
}

pub struct CounterIngestor {
    sink: Arc<dyn ReadingSink>,
    rates: RateCalculator,
    windows: Mutex<HashMap<ChannelKey, RateWindow>>,
    cfg: OeeConfig,
    metrics: MetricsRegistry,
}

impl CounterIngestor {
    pub fn new(sink: Arc<dyn ReadingSink>, cfg: OeeConfig, metrics: MetricsRegistry) -> Self {
        Self {
            sink,
            rates: RateCalculator::new(RateConfig::from(&cfg)),
            windows: Mutex::new(HashMap::new()),
            cfg,
            metrics,
        }
    }

    /// Decode an ADAM register pair and ingest it.
    pub async fn ingest_registers(
        &self,
        device_id: &str,
        channel: ChannelId,
        timestamp: DateTime<Utc>,
        low: u16,
        high: u16,
    ) -> Result<CounterReading, IngestError> {
        self.ingest(device_id, channel, timestamp, counter_from_registers(low, high))
            .await
    }

    /// Validate one poll, derive its rate and append it to the sink.
    ///
    /// A value that does not fit the counter is still stored, with quality
    /// `Bad` and no rate, and never enters the rate window. The window only
    /// takes the sample once the sink has accepted it, so a failed append can
    /// be retried with the same poll.
    pub async fn ingest(
        &self,
        device_id: &str,
        channel: ChannelId,
        timestamp: DateTime<Utc>,
        raw_value: u64,
    ) -> Result<CounterReading, IngestError> {
        let key = ChannelKey::new(device_id, channel);
        let sample = Sample::new(timestamp, raw_value);
        let fits = raw_value < self.cfg.counter_modulus;
        let (rate, quality) = if fits {
            if raw_value >= self.cfg.overflow_threshold {
                warn!(key = %key, raw_value, "counter approaching overflow");
            }
            self.stage(&key, sample)?
        } else {
            warn!(key = %key, raw_value, "counter value exceeds hardware width");
            (None, ReadingQuality::Bad)
        };

        let reading = CounterReading {
            device_id: device_id.to_string(),
            channel,
            timestamp,
            raw_value,
            rate,
            quality,
        };
        self.sink.append(reading.clone()).await?;
        if fits {
            self.commit(&key, sample);
        }
        if quality == ReadingQuality::Uncertain {
            self.metrics.inc_invalid_pairs(1);
        }
        self.metrics.inc_readings_ingested(1);
        debug!(key = %key, raw_value, rate = ?rate, quality = ?quality, "reading ingested");
        Ok(reading)
    }

    /// Samples currently held for `key`, oldest first.
    pub fn window(&self, key: &ChannelKey) -> Vec<Sample> {
        self.windows
            .lock()
            .get(key)
            .map(RateWindow::samples)
            .unwrap_or_default()
    }

    fn new_window(&self) -> RateWindow {
        RateWindow::new(WINDOW_CAPACITY, Duration::seconds(self.cfg.rate_window_seconds))
    }

    /// Rate and quality the sample would have, without touching the stored window.
    fn stage(&self, key: &ChannelKey, sample: Sample) -> Result<(Option<f64>, ReadingQuality), IngestError> {
        let mut staged = self
            .windows
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.new_window());
        let previous = staged.latest().copied();
        if !staged.push(sample) {
            self.metrics.inc_readings_rejected(1);
            return Err(IngestError::OutOfOrder { key: key.clone(), timestamp: sample.timestamp });
        }

        let quality = match previous.map(|p| counter_delta(p.raw_value, sample.raw_value, self.rates.config())) {
            Some(PairDelta::InvalidDecrease) => ReadingQuality::Uncertain,
            _ => ReadingQuality::Good,
        };
        let rate = self
            .rates
            .calculate(&staged.samples())
            .map(|estimate| estimate.per_second);
        Ok((rate, quality))
    }

    fn commit(&self, key: &ChannelKey, sample: Sample) {
        let mut windows = self.windows.lock();
        let window = windows.entry(key.clone()).or_insert_with(|| self.new_window());
        if !window.push(sample) {
            debug!(key = %key, timestamp = %sample.timestamp, "newer sample committed concurrently, window unchanged");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use oee_sources::InMemoryStore;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn ingestor(store: &InMemoryStore) -> (CounterIngestor, MetricsRegistry) {
        let metrics = MetricsRegistry::default();
        let ingestor = CounterIngestor::new(Arc::new(store.clone()), OeeConfig::default(), metrics.clone());
        (ingestor, metrics)
    }

    #[tokio::test]
    async fn first_reading_has_no_rate_then_rate_appears() {
        let store = InMemoryStore::new();
        let (ingestor, metrics) = ingestor(&store);
        let first = ingestor.ingest("adam-01", 0, t(0), 1_000).await.unwrap();
        assert_eq!(first.rate, None);
        assert_eq!(first.quality, ReadingQuality::Good);

        let second = ingestor.ingest("adam-01", 0, t(5), 1_010).await.unwrap();
        assert_eq!(second.rate, Some(2.0));
        assert_eq!(store.reading_count(&ChannelKey::new("adam-01", 0)), 2);
        assert_eq!(metrics.snapshot().readings_ingested, 2);
    }

    #[tokio::test]
    async fn wrap_keeps_rate_continuous() {
        let store = InMemoryStore::new();
        let (ingestor, _) = ingestor(&store);
        ingestor.ingest("adam-01", 0, t(0), 4_294_967_000).await.unwrap();
        let wrapped = ingestor.ingest("adam-01", 0, t(5), 300).await.unwrap();
        assert_eq!(wrapped.quality, ReadingQuality::Good);
        // 296 to the modulus plus 300 after it.
        assert_eq!(wrapped.rate, Some(596.0 / 5.0));
    }

    #[tokio::test]
    async fn out_of_order_reading_is_rejected() {
        let store = InMemoryStore::new();
        let (ingestor, metrics) = ingestor(&store);
        ingestor.ingest("adam-01", 0, t(10), 100).await.unwrap();
        let err = ingestor.ingest("adam-01", 0, t(5), 110).await.unwrap_err();
        assert!(matches!(err, IngestError::OutOfOrder { .. }));
        assert_eq!(metrics.snapshot().readings_rejected, 1);
        assert_eq!(store.reading_count(&ChannelKey::new("adam-01", 0)), 1);
    }

    #[tokio::test]
    async fn unexplained_decrease_is_uncertain() {
        let store = InMemoryStore::new();
        let (ingestor, metrics) = ingestor(&store);
        ingestor.ingest("adam-01", 0, t(0), 5_000).await.unwrap();
        let reading = ingestor.ingest("adam-01", 0, t(5), 3_000).await.unwrap();
        assert_eq!(reading.quality, ReadingQuality::Uncertain);
        assert_eq!(reading.rate, None);
        assert_eq!(metrics.snapshot().invalid_pairs, 1);
    }

    #[tokio::test]
    async fn oversized_value_is_stored_as_bad() {
        let store = InMemoryStore::new();
        let (ingestor, _) = ingestor(&store);
        let reading = ingestor.ingest("adam-01", 0, t(0), 1 << 33).await.unwrap();
        assert_eq!(reading.quality, ReadingQuality::Bad);
        assert_eq!(reading.rate, None);
        assert!(ingestor.window(&ChannelKey::new("adam-01", 0)).is_empty());
    }

    #[tokio::test]
    async fn registers_are_combined_high_word_first() {
        let store = InMemoryStore::new();
        let (ingestor, _) = ingestor(&store);
        let reading = ingestor.ingest_registers("adam-01", 0, t(0), 5, 2).await.unwrap();
        assert_eq!(reading.raw_value, 2 * 65_536 + 5);
    }

    #[tokio::test]
    async fn failed_append_can_be_retried() {
        let store = InMemoryStore::new();
        let (ingestor, metrics) = ingestor(&store);
        ingestor.ingest("adam-01", 0, t(0), 1_000).await.unwrap();

        store.set_failing(true);
        let err = ingestor.ingest("adam-01", 0, t(5), 1_010).await.unwrap_err();
        assert!(matches!(err, IngestError::Sink(_)));
        assert_eq!(ingestor.window(&ChannelKey::new("adam-01", 0)).len(), 1);

        store.set_failing(false);
        let retried = ingestor.ingest("adam-01", 0, t(5), 1_010).await.unwrap();
        assert_eq!(retried.rate, Some(2.0));
        assert_eq!(store.reading_count(&ChannelKey::new("adam-01", 0)), 2);
        assert_eq!(metrics.snapshot().readings_rejected, 0);
    }

    #[tokio::test]
    async fn sink_failure_surfaces_as_error() {
        let store = InMemoryStore::new();
        store.set_failing(true);
        let (ingestor, metrics) = ingestor(&store);
        let err = ingestor.ingest("adam-01", 0, t(0), 1).await.unwrap_err();
        assert!(matches!(err, IngestError::Sink(_)));
        assert_eq!(metrics.snapshot().readings_ingested, 0);
    }
}
