use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    readings_ingested: AtomicU64,
    readings_rejected: AtomicU64,
    invalid_pairs: AtomicU64,
    cycles_run: AtomicU64,
    cycles_skipped: AtomicU64,
    stoppages_opened: AtomicU64,
    stoppages_closed: AtomicU64,
    collaborator_failures: AtomicU64,
    oee_degraded: AtomicU64,
}

impl MetricsRegistry {
    pub fn inc_readings_ingested(&self, delta: u64) {
        self.inner.readings_ingested.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_readings_rejected(&self, delta: u64) {
        self.inner.readings_rejected.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_invalid_pairs(&self, delta: u64) {
        self.inner.invalid_pairs.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_cycles_run(&self, delta: u64) {
        self.inner.cycles_run.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_cycles_skipped(&self, delta: u64) {
        self.inner.cycles_skipped.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_stoppages_opened(&self, delta: u64) {
        self.inner.stoppages_opened.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_stoppages_closed(&self, delta: u64) {
        self.inner.stoppages_closed.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_collaborator_failures(&self, delta: u64) {
        self.inner
            .collaborator_failures
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn inc_oee_degraded(&self, delta: u64) {
        self.inner.oee_degraded.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            readings_ingested: self.inner.readings_ingested.load(Ordering::Relaxed),
            readings_rejected: self.inner.readings_rejected.load(Ordering::Relaxed),
            invalid_pairs: self.inner.invalid_pairs.load(Ordering::Relaxed),
            cycles_run: self.inner.cycles_run.load(Ordering::Relaxed),
            cycles_skipped: self.inner.cycles_skipped.load(Ordering::Relaxed),
            stoppages_opened: self.inner.stoppages_opened.load(Ordering::Relaxed),
            stoppages_closed: self.inner.stoppages_closed.load(Ordering::Relaxed),
            collaborator_failures: self.inner.collaborator_failures.load(Ordering::Relaxed),
            oee_degraded: self.inner.oee_degraded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub readings_ingested: u64,
    pub readings_rejected: u64,
    pub invalid_pairs: u64,
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub stoppages_opened: u64,
    pub stoppages_closed: u64,
    pub collaborator_failures: u64,
    pub oee_degraded: u64,
}

impl MetricsSnapshot {
    pub fn to_json_line(&self, label: &str, elapsed: Option<Duration>) -> String {
        #[derive(Serialize)]
        struct Snapshot<'a> {
            label: &'a str,
            #[serde(flatten)]
            counters: &'a MetricsSnapshot,
            elapsed_ms: Option<u128>,
        }

        let payload = Snapshot {
            label,
            counters: self,
            elapsed_ms: elapsed.map(|d| d.as_millis()),
        };
        serde_json::to_string(&payload).unwrap_or_else(|_| String::from("{}"))
    }
}

pub struct EpochTimer {
    start: Instant,
}

impl EpochTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
