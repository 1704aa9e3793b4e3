//! Runtime wiring: tracing bootstrap, ingestion, OEE service and the monitoring loop.

use tracing::Level;

pub mod ingest;
pub mod metrics;
pub mod monitor;
pub mod service;

pub use ingest::{CounterIngestor, IngestError};
pub use monitor::{CycleOutcome, CycleReport, LineGuard, LineMonitor, Scheduler, StoppageTransition};
pub use service::{LineSpec, OeeService};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .try_init();
}
