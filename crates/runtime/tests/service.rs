use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use oee_core::{ChannelKey, CounterReading, JobStatus, ManualClock, OeeConfig, ReadingQuality, WorkOrder};
use oee_runtime::metrics::MetricsRegistry;
use oee_runtime::{LineSpec, OeeService};
use oee_sources::InMemoryStore;
use tokio_util::sync::CancellationToken;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap() + Duration::seconds(secs)
}

fn reading(channel: u32, secs: i64, raw: u64) -> CounterReading {
    CounterReading {
        device_id: "adam-01".into(),
        channel,
        timestamp: t(secs),
        raw_value: raw,
        rate: None,
        quality: ReadingQuality::Good,
    }
}

fn job() -> WorkOrder {
    WorkOrder {
        id: "wo-1".into(),
        target_rate: 3_600.0,
        planned_quantity: 1_800,
        scheduled_start: t(0),
        scheduled_end: t(1_800),
        actual_start: None,
        resource_reference: "line-1".into(),
        status: JobStatus::Active,
    }
}

fn service(store: &InMemoryStore, cfg: OeeConfig, now: DateTime<Utc>) -> (OeeService, MetricsRegistry) {
    let metrics = MetricsRegistry::default();
    let service = OeeService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        cfg,
        Arc::new(ManualClock::new(now)),
        metrics.clone(),
    );
    (service, metrics)
}

fn line() -> LineSpec {
    LineSpec::new("line-1", "adam-01")
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[tokio::test]
async fn steady_line_at_target_scores_full_oee() {
    let store = InMemoryStore::new();
    store.upsert_job(job());
    store.insert_readings((0..=360).map(|i| reading(0, i * 5, (i * 5) as u64)));
    let (service, metrics) = service(&store, OeeConfig::default(), t(1_800));

    let result = service.calculate_current(&line()).await;
    assert_eq!(result.period_start, t(0));
    assert!(close(result.availability.percentage(), 100.0));
    assert!(close(result.performance.percentage(), 100.0));
    assert!(close(result.quality.percentage(), 100.0));
    assert!(close(result.oee_percentage(), 100.0));
    assert_eq!(metrics.snapshot().oee_degraded, 0);
}

#[tokio::test]
async fn no_readings_give_the_neutral_result() {
    let store = InMemoryStore::new();
    let (service, _) = service(&store, OeeConfig::default(), t(3_600));

    let result = service.calculate_current(&line()).await;
    assert_eq!(result.availability.percentage(), 0.0);
    assert_eq!(result.performance.percentage(), 0.0);
    assert_eq!(result.quality.percentage(), 100.0);
    assert_eq!(result.oee_percentage(), 0.0);
    assert_eq!(result.period_start, t(0));
}

#[tokio::test]
async fn failing_store_degrades_to_neutral() {
    let store = InMemoryStore::new();
    store.insert_readings((0..=20).map(|i| reading(0, i * 5, (i * 5) as u64)));
    store.set_failing(true);
    let (service, metrics) = service(&store, OeeConfig::default(), t(100));

    let result = service.calculate_current(&line()).await;
    assert_eq!(result.oee_percentage(), 0.0);
    assert_eq!(result.quality.percentage(), 100.0);
    let snap = metrics.snapshot();
    assert_eq!(snap.oee_degraded, 1);
    assert_eq!(snap.collaborator_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_hits_the_deadline() {
    let store = InMemoryStore::new();
    store.insert_readings((0..=20).map(|i| reading(0, i * 5, (i * 5) as u64)));
    store.set_fetch_delay(Some(StdDuration::from_millis(500)));
    let cfg = OeeConfig { fetch_timeout_ms: 50, ..OeeConfig::default() };
    let (service, metrics) = service(&store, cfg, t(100));

    let result = service.calculate_current(&line()).await;
    assert_eq!(result.oee_percentage(), 0.0);
    assert_eq!(metrics.snapshot().oee_degraded, 1);
}

#[tokio::test]
async fn historical_range_ignores_the_live_period() {
    let store = InMemoryStore::new();
    store.insert_readings((0..=120).map(|i| reading(0, i * 5, (i * 5) as u64)));
    let (service, _) = service(&store, OeeConfig::default(), t(86_400));

    let result = service.calculate_for_range(&line(), t(0), t(600)).await;
    assert_eq!(result.period_start, t(0));
    assert_eq!(result.period_end, t(600));
    assert!(close(result.availability.percentage(), 100.0));
    assert_eq!(result.performance.total_pieces_produced, 600);
}

#[tokio::test]
async fn current_rate_reads_stored_rates() {
    let store = InMemoryStore::new();
    store.insert_readings((0..4).map(|i| CounterReading { rate: Some(2.0 + i as f64), ..reading(0, i * 5, 0) }));
    let (service, _) = service(&store, OeeConfig::default(), t(20));

    assert_eq!(service.current_rate("adam-01", 0, 2).await, Some(4.5));
    assert_eq!(service.current_rate("adam-02", 0, 2).await, None);
}

#[tokio::test]
async fn batch_rates_resolve_each_key_independently() {
    let store = InMemoryStore::new();
    for device in ["adam-01", "adam-02"] {
        store.insert_readings((0..=12).map(|i| CounterReading {
            device_id: device.into(),
            ..reading(0, i * 5, (i * 10) as u64)
        }));
    }
    store.insert_readings([
        CounterReading { device_id: "adam-03".into(), ..reading(0, 0, 9_000) },
        CounterReading { device_id: "adam-03".into(), ..reading(0, 5, 100) },
    ]);
    let (service, _) = service(&store, OeeConfig::default(), t(60));

    let keys: Vec<ChannelKey> = ["adam-01", "adam-02", "adam-03", "adam-04"]
        .iter()
        .map(|d| ChannelKey::new(*d, 0))
        .collect();
    let batch = service
        .batch_rates(&keys, Duration::minutes(5), &CancellationToken::new())
        .await;
    assert!(!batch.cancelled);
    assert_eq!(batch.rates.len(), 4);
    assert_eq!(batch.rates[&ChannelKey::new("adam-01", 0)], Some(2.0));
    assert_eq!(batch.rates[&ChannelKey::new("adam-03", 0)], None);
    assert_eq!(batch.rates[&ChannelKey::new("adam-04", 0)], None);
}
