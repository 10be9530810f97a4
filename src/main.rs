//! Seismo Station - networked digital seismograph
//!
//! Samples a tri-axial accelerometer at the configured rate, detects and
//! classifies seismic events with an STA/LTA trigger, persists annotated
//! event records, and pushes live data to connected dashboards.
//!
//! # Usage
//!
//! ```bash
//! # Run with the synthetic sensor and defaults
//! cargo run --release
//!
//! # Custom config and bind address
//! cargo run --release -- --config station_config.toml --addr 0.0.0.0:9090
//! ```
//!
//! # Environment Variables
//!
//! - `SEISMO_CONFIG`: path to the station TOML config
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use seismo_station::acquisition::{SensorDriver, SyntheticSensor};
use seismo_station::api::{create_app, AppState};
use seismo_station::broadcast::BroadcastHub;
use seismo_station::broker::{reconnect_supervisor, BrokerClient, LogBroker};
use seismo_station::calibration::CalibrationEngine;
use seismo_station::clock::Clock;
use seismo_station::config::{self, StationConfig};
use seismo_station::pipeline::{self, EventSink, Sampler, SamplerShared};
use seismo_station::storage::{ProcessLock, RecordStore};
use seismo_station::telemetry::{StationCounters, StatusProbe, TelemetryTask};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "seismo-station")]
#[command(about = "Networked digital seismograph station")]
#[command(version)]
struct CliArgs {
    /// Path to the station TOML configuration
    #[arg(short, long)]
    config: Option<String>,

    /// Override the server bind address (default from config)
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the data directory (default from config)
    #[arg(long)]
    data_dir: Option<String>,

    /// Random seed for the synthetic sensor
    #[arg(long, default_value = "0")]
    seed: u64,
}

// ============================================================================
// Task identification for supervisor logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    EventSink,
    Telemetry,
    Watchdog,
    TimeSync,
    BrokerReconnect,
    CommandRouter,
    HubRecovery,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::EventSink => write!(f, "EventSink"),
            TaskName::Telemetry => write!(f, "Telemetry"),
            TaskName::Watchdog => write!(f, "Watchdog"),
            TaskName::TimeSync => write!(f, "TimeSync"),
            TaskName::BrokerReconnect => write!(f, "BrokerReconnect"),
            TaskName::CommandRouter => write!(f, "CommandRouter"),
            TaskName::HubRecovery => write!(f, "HubRecovery"),
        }
    }
}

// ============================================================================
// Entry point
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();

    let mut station_config = StationConfig::load(args.config.as_deref());
    if let Some(addr) = args.addr {
        station_config.server.addr = addr;
    }
    if let Some(data_dir) = args.data_dir {
        station_config.station.data_dir = data_dir;
    }
    config::init(station_config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_station(args.seed))
}

/// Explicit bring-up: construct every component, inject references, then
/// spawn the two domains and the supporting tasks under one supervisor.
async fn run_station(seed: u64) -> Result<()> {
    let cfg = config::get();
    info!("Starting seismo-station {}", env!("CARGO_PKG_VERSION"));
    info!("   Station:  {}", cfg.station.id);
    info!("   Sampling: {} Hz", cfg.sampling.rate_hz);
    info!(
        "   Detector: STA {} / LTA {} samples, ratio {}",
        cfg.detector.sta_window, cfg.detector.lta_window, cfg.detector.trigger_ratio
    );

    // Process lock and storage bring-up
    let _process_lock = ProcessLock::acquire(&cfg.station.data_dir)
        .context("Failed to acquire process lock")?;
    info!("Process lock acquired");

    let store = Arc::new(
        RecordStore::open(&cfg.station.data_dir).context("Failed to open record store")?,
    );

    // Clock: first sync from the host clock (NTP-disciplined), refreshed
    // periodically by the TimeSync task
    let clock = Clock::new(cfg.clock.sync_interval_secs);
    sync_from_host(&clock);

    // Retention sweep once at startup
    if let Some(now_wall) = clock.now_wall() {
        match store.prune_older_than(cfg.storage.retention_days, now_wall) {
            Ok(removed) if removed > 0 => info!(removed, "Retention sweep complete"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Retention sweep failed"),
        }
    }

    // Shared state
    let counters = StationCounters::new();
    let channels = pipeline::channels();
    let shared = SamplerShared::new();
    let low_resources = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let cancel = CancellationToken::new();

    // Components
    let calibration_engine = CalibrationEngine::new(cfg.calibration.clone());
    let calibration_handle = calibration_engine.handle();
    let broker: Arc<dyn BrokerClient> = LogBroker::new();
    let hub = BroadcastHub::new(Arc::clone(&low_resources), shared.back_pressure.clone());

    let probe = Arc::new(StatusProbe {
        counters: Arc::clone(&counters),
        clock: Arc::clone(&clock),
        calibration: calibration_handle.clone(),
        sample_tx: channels.sample_tx.clone(),
        event_tx: channels.event_tx.clone(),
        data_dir: cfg.station.data_dir.clone(),
        low_resources: Arc::clone(&low_resources),
    });

    // Sampler domain: sensor bring-up (fatal on failure) + boot calibration
    let sensor: Box<dyn SensorDriver> = Box::new(SyntheticSensor::quiet(1e-4, seed));
    let mut sampler = Sampler::new(
        cfg,
        sensor,
        calibration_engine,
        Arc::clone(&clock),
        Arc::clone(&counters),
        channels.sample_tx.clone(),
        channels.event_tx.clone(),
        channels.system_tx.clone(),
        shared.clone(),
        cancel.clone(),
    );
    sampler
        .begin()
        .context("Sensor failed to start - refusing to run detection")?;
    let sampler_thread = sampler.spawn();
    info!("Sampler domain running");

    // Sink domain
    let sink = EventSink {
        sample_rx: channels.sample_rx,
        event_rx: channels.event_rx,
        system_rx: channels.system_rx,
        store: Arc::clone(&store),
        broker: Arc::clone(&broker),
        hub: Arc::clone(&hub),
        clock: Arc::clone(&clock),
        counters: Arc::clone(&counters),
        calibration: calibration_handle,
        station_id: cfg.station.id.clone(),
    };

    // HTTP server
    let app = create_app(AppState {
        hub: Arc::clone(&hub),
        probe: Arc::clone(&probe),
    });
    let listener = tokio::net::TcpListener::bind(&cfg.server.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", cfg.server.addr))?;
    info!("HTTP server listening on {}", cfg.server.addr);

    // Supervisor
    info!("Supervisor: spawning tasks");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    {
        let http_cancel = cancel.clone();
        task_set.spawn(async move {
            info!("[HttpServer] Task starting");
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    http_cancel.cancelled().await;
                    info!("[HttpServer] Received shutdown signal");
                })
                .await;
            match result {
                Ok(()) => Ok(TaskName::HttpServer),
                Err(e) => Err(anyhow::anyhow!("HTTP server error: {e}")),
            }
        });
    }

    {
        let sink_cancel = cancel.clone();
        task_set.spawn(async move {
            info!("[EventSink] Task starting");
            let stats = sink.run(sink_cancel).await;
            info!("[EventSink] {stats}");
            Ok(TaskName::EventSink)
        });
    }

    {
        let telemetry = TelemetryTask {
            probe: Arc::clone(&probe),
            hub: Arc::clone(&hub),
            broker: Arc::clone(&broker),
            station_id: cfg.station.id.clone(),
            intervals: cfg.broker.clone(),
        };
        let telemetry_cancel = cancel.clone();
        task_set.spawn(async move {
            telemetry.run(telemetry_cancel).await;
            Ok(TaskName::Telemetry)
        });
    }

    {
        let watchdog_shared = shared.clone();
        let watchdog_clock = Arc::clone(&clock);
        let watchdog_cancel = cancel.clone();
        task_set.spawn(async move {
            if pipeline::watchdog(watchdog_shared, watchdog_clock, watchdog_cancel).await {
                return Err(anyhow::anyhow!("sampler watchdog tripped"));
            }
            Ok(TaskName::Watchdog)
        });
    }

    {
        let sync_clock = Arc::clone(&clock);
        let sync_cancel = cancel.clone();
        let sync_interval = cfg.clock.sync_interval_secs;
        task_set.spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(sync_interval.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick already synced at boot
            loop {
                tokio::select! {
                    _ = sync_cancel.cancelled() => return Ok(TaskName::TimeSync),
                    _ = ticker.tick() => sync_from_host(&sync_clock),
                }
            }
        });
    }

    {
        let reconnect_broker = Arc::clone(&broker);
        let reconnect_cancel = cancel.clone();
        let reconnect_min = cfg.broker.reconnect_min_secs;
        task_set.spawn(async move {
            reconnect_supervisor(reconnect_broker, reconnect_min, reconnect_cancel).await;
            Ok(TaskName::BrokerReconnect)
        });
    }

    {
        let router_broker = Arc::clone(&broker);
        let router_probe = Arc::clone(&probe);
        let router_shared = shared.clone();
        let router_cancel = cancel.clone();
        let router_station = cfg.station.id.clone();
        task_set.spawn(async move {
            loop {
                tokio::select! {
                    _ = router_cancel.cancelled() => return Ok(TaskName::CommandRouter),
                    verb = router_broker.next_command() => {
                        route_command(
                            verb,
                            &router_shared,
                            &router_probe,
                            router_broker.as_ref(),
                            &router_station,
                            &router_cancel,
                        )
                        .await;
                    }
                }
            }
        });
    }

    {
        let recovery_hub = Arc::clone(&hub);
        let recovery_cancel = cancel.clone();
        task_set.spawn(async move {
            recovery_hub.run_recovery(recovery_cancel).await;
            Ok(TaskName::HubRecovery)
        });
    }

    // Supervisor loop: first failure or ctrl-c cancels everything
    let exit_result = supervise(&mut task_set, &cancel).await;

    // Cooperative shutdown: sampler exits after its current period
    cancel.cancel();
    if let Err(e) = tokio::task::spawn_blocking(move || sampler_thread.join()).await {
        warn!(error = %e, "Sampler thread join failed");
    }
    while task_set.join_next().await.is_some() {}

    let snapshot = counters.snapshot();
    info!("Final counters:");
    info!("   Samples:            {}", snapshot.total_samples);
    info!("   Events detected:    {}", snapshot.events_detected);
    info!("   Spikes filtered:    {}", snapshot.spikes_filtered);
    info!("   No-time rejections: {}", snapshot.events_rejected_no_time);
    info!("   Samples dropped:    {}", snapshot.samples_dropped);

    exit_result
}

async fn supervise(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "ctrl-c handler failed");
                }
                info!("Supervisor: shutdown signal received");
                cancel.cancel();
                return Ok(());
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {task_name} completed");
                        if cancel.is_cancelled() {
                            return Ok(());
                        }
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed: {e}");
                        cancel.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {e}");
                        cancel.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {e}"));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Apply one inbound broker command.
async fn route_command(
    verb: seismo_station::broker::CommandVerb,
    shared: &SamplerShared,
    probe: &StatusProbe,
    broker: &dyn BrokerClient,
    station_id: &str,
    cancel: &CancellationToken,
) {
    use seismo_station::broker::{topics, CommandVerb};

    info!(?verb, "Broker command received");
    match verb {
        CommandVerb::Restart => {
            warn!("Restart requested over broker - shutting down for supervisor restart");
            cancel.cancel();
        }
        CommandVerb::Calibrate => {
            shared
                .calibrate_request
                .store(true, std::sync::atomic::Ordering::Relaxed);
        }
        CommandVerb::Debug => {
            let sample = probe.health_sample();
            info!(?sample, "Debug dump requested");
        }
        CommandVerb::Status => {
            let sample = probe.health_sample();
            if let Ok(payload) = serde_json::to_string(&sample) {
                if let Err(e) = broker
                    .publish(&topics::status(station_id), &payload, true)
                    .await
                {
                    warn!(error = %e, "On-demand status publish failed");
                }
            }
        }
    }
}

/// Record a wall-clock sync from the host clock. The host is the thin NTP
/// collaborator: its clock is already externally disciplined.
fn sync_from_host(clock: &Clock) {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(epoch) => {
            if clock.record_sync(epoch.as_secs()) {
                info!(epoch_secs = epoch.as_secs(), "Wall clock synchronized");
            }
        }
        Err(e) => warn!(error = %e, "Host clock before epoch - sync skipped"),
    }
}
