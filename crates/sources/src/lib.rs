//! Collaborator contracts consumed and fed by the calculators, plus an in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use oee_core::{ChannelId, CounterReading, StoppageId, StoppageInfo, WorkOrder};

pub mod error;
pub mod memory;

pub use error::{ErrorContext, SourceError, SourceResult};
pub use memory::InMemoryStore;

/// Read access to stored counter readings.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Readings for one channel, ordered by timestamp, in `[start, end]`.
    /// An open `end` means "up to the newest reading".
    async fn fetch_readings(
        &self,
        device_id: &str,
        channel: ChannelId,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> SourceResult<Vec<CounterReading>>;

    /// Mean rate (units/second) over the newest `recent_n` readings that carry one.
    async fn current_rate(
        &self,
        device_id: &str,
        channel: ChannelId,
        recent_n: usize,
    ) -> SourceResult<Option<f64>>;
}

/// Write access used by the ingestor.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn append(&self, reading: CounterReading) -> SourceResult<()>;
}

#[async_trait]
pub trait JobSource: Send + Sync {
    async fn active_job(&self, resource_id: &str) -> SourceResult<Option<WorkOrder>>;
}

/// Persistence of stoppage records. At most one open record per line.
#[async_trait]
pub trait StoppageStore: Send + Sync {
    async fn open_stoppage(&self, line_id: &str) -> SourceResult<Option<StoppageInfo>>;

    async fn create(&self, line_id: &str, start_time: DateTime<Utc>) -> SourceResult<StoppageId>;

    async fn end(&self, stoppage_id: StoppageId, end_time: DateTime<Utc>) -> SourceResult<StoppageInfo>;
}
