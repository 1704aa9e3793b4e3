use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use oee_core::{Clock, JobStatus, ManualClock, OeeConfig, WorkOrder};
use oee_runtime::metrics::{EpochTimer, MetricsRegistry};
use oee_runtime::{init_tracing, CounterIngestor, CycleOutcome, LineMonitor, LineSpec, OeeService, Scheduler};
use oee_sources::InMemoryStore;

/// Simulate one ADAM-fed line: a wrapping counter, a timed stoppage and a trickle of rejects.
#[derive(Debug, Parser)]
struct Args {
    /// Optional JSON config; missing keys keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Simulated minutes of production.
    #[arg(long, default_value_t = 30)]
    minutes: i64,
    /// Units counted per poll while running.
    #[arg(long, default_value_t = 10)]
    units_per_poll: u64,
    /// Minute at which the line stops.
    #[arg(long, default_value_t = 12)]
    stop_at: i64,
    /// Length of the stoppage in minutes.
    #[arg(long, default_value_t = 5)]
    stop_for: i64,
    /// One reject per this many good units.
    #[arg(long, default_value_t = 50)]
    reject_every: u64,
    /// Initial counter value; close to 2^32 to exercise the wrap.
    #[arg(long, default_value_t = 4_294_966_000)]
    start_value: u64,
    /// After the simulation, keep the scheduler running for this many seconds.
    #[arg(long)]
    serve_seconds: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => OeeConfig::from_json_file(path)?,
        None => OeeConfig::default(),
    };
    info!(?args, "line_demo starting");

    let start = Utc::now() - Duration::minutes(args.minutes);
    let clock = Arc::new(ManualClock::new(start));
    let store = InMemoryStore::new();
    let metrics = MetricsRegistry::default();
    let line = LineSpec::new("line-1", "adam-6051-01");

    let polls_per_hour = 3_600.0 / cfg.sampling_interval_seconds;
    store.upsert_job(WorkOrder {
        id: "wo-demo".into(),
        target_rate: args.units_per_poll as f64 * polls_per_hour,
        planned_quantity: args.units_per_poll * (args.minutes as u64) * 12,
        scheduled_start: start,
        scheduled_end: start + Duration::minutes(args.minutes),
        actual_start: Some(start),
        resource_reference: line.resource_id.clone(),
        status: JobStatus::Active,
    });

    let ingestor = CounterIngestor::new(Arc::new(store.clone()), cfg.clone(), metrics.clone());
    let service = OeeService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        cfg.clone(),
        clock.clone(),
        metrics.clone(),
    );
    let monitor = Arc::new(LineMonitor::new(service, Arc::new(store.clone())));

    let poll = Duration::milliseconds((cfg.sampling_interval_seconds * 1_000.0) as i64);
    let polls_per_cycle = (cfg.monitor_interval_seconds as f64 / cfg.sampling_interval_seconds).max(1.0) as u64;
    let stop_from = start + Duration::minutes(args.stop_at);
    let stop_until = stop_from + Duration::minutes(args.stop_for);

    let timer = EpochTimer::start();
    let mut produced: u64 = 0;
    let mut rejected: u64 = 0;
    let mut last_report = None;
    let mut poll_index: u64 = 0;
    while clock.now() < start + Duration::minutes(args.minutes) {
        clock.advance(poll);
        poll_index += 1;
        let now = clock.now();
        if now < stop_from || now >= stop_until {
            produced += args.units_per_poll;
            rejected = produced / args.reject_every.max(1);
        }
        let production_raw = (args.start_value + produced) % cfg.counter_modulus;
        ingestor
            .ingest(&line.device_id, cfg.production_channel, now, production_raw)
            .await?;
        ingestor
            .ingest(&line.device_id, cfg.reject_channel, now, rejected)
            .await?;

        if poll_index % polls_per_cycle == 0 {
            if let CycleOutcome::Completed(report) = monitor.run_cycle(&line).await {
                last_report = Some(report);
            }
        }
    }

    if let Some(report) = &last_report {
        println!("{}", serde_json::to_string_pretty(report)?);
    }
    println!("{}", metrics.snapshot().to_json_line("line_demo", Some(timer.elapsed())));

    if let Some(seconds) = args.serve_seconds {
        let scheduler = Scheduler::new(monitor.clone(), vec![line.clone()], cfg.monitor_interval());
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_secs(seconds)).await;
            stopper.cancel();
        });
        scheduler.run(cancel).await?;
        println!("{}", metrics.snapshot().to_json_line("line_demo_serve", Some(timer.elapsed())));
    }

    info!(produced, rejected, "line_demo finished");
    Ok(())
}
