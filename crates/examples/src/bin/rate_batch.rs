use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use oee_calc::select_window;
use oee_core::{ChannelKey, CounterReading, ManualClock, OeeConfig, ReadingQuality};
use oee_runtime::metrics::{EpochTimer, MetricsRegistry};
use oee_runtime::{init_tracing, OeeService};
use oee_sources::InMemoryStore;

/// Rates for many counter channels at once; some channels carry corrupt data.
#[derive(Debug, Parser)]
struct Args {
    #[arg(long, default_value_t = 20)]
    devices: usize,
    /// How many of the devices report a counter that only ever drops.
    #[arg(long, default_value_t = 1)]
    corrupt: usize,
    /// Poll frequency the averaging window is sized for.
    #[arg(long, default_value_t = 0.2)]
    frequency_hz: f64,
    /// Required rate accuracy in percent.
    #[arg(long, default_value_t = 98.0)]
    accuracy: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = OeeConfig::default();
    let now = Utc::now();
    let window = select_window(args.frequency_hz, args.accuracy);
    info!(devices = args.devices, window_ms = window.num_milliseconds(), "rate_batch starting");

    let store = InMemoryStore::new();
    let poll_ms = (1_000.0 / args.frequency_hz.max(0.001)) as i64;
    let polls = (window.num_milliseconds() / poll_ms.max(1)).max(2);
    let mut keys = Vec::with_capacity(args.devices);
    for device in 0..args.devices {
        let key = ChannelKey::new(format!("adam-{device:02}"), cfg.production_channel);
        let corrupt = device < args.corrupt;
        let per_poll = 5 + device as u64;
        store.insert_readings((0..=polls).map(|i| {
            let raw = if corrupt {
                1_000_000u64.saturating_sub(i as u64 * per_poll)
            } else {
                10_000 + i as u64 * per_poll
            };
            CounterReading {
                device_id: key.device_id.clone(),
                channel: key.channel,
                timestamp: now - Duration::milliseconds((polls - i) * poll_ms),
                raw_value: raw,
                rate: None,
                quality: ReadingQuality::Good,
            }
        }));
        keys.push(key);
    }

    let metrics = MetricsRegistry::default();
    let service = OeeService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        cfg,
        Arc::new(ManualClock::new(now)),
        metrics.clone(),
    );

    let timer = EpochTimer::start();
    let batch = service.batch_rates(&keys, window, &CancellationToken::new()).await;
    let rates: Map<String, Value> = batch
        .rates
        .iter()
        .map(|(key, rate)| (key.to_string(), rate.map_or(Value::Null, Value::from)))
        .collect();
    println!("{}", serde_json::to_string_pretty(&rates)?);
    info!(resolved = batch.resolved(), unresolved = batch.unresolved(), "rate_batch finished");
    println!("{}", metrics.snapshot().to_json_line("rate_batch", Some(timer.elapsed())));
    Ok(())
}
