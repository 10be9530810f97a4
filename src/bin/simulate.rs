//! Seismic event simulation
//!
//! Generates synthetic seismic records through the inverse magnitude model,
//! for dashboard demos and pipeline testing without waiting for the ground
//! to move.
//!
//! # Usage
//! ```bash
//! # One Light event (Richter 4.0) as JSON on stdout
//! ./simulate --richter 4.0
//!
//! # Ten events with magnitude jitter, appended to a station data dir
//! ./simulate --richter 3.5 --count 10 --jitter 0.3 --data-dir ./data
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use seismo_station::calibration::Calibration;
use seismo_station::clock::Clock;
use seismo_station::detector::RecordBuilder;
use seismo_station::storage::RecordStore;

#[derive(Parser, Debug)]
#[command(name = "simulate")]
#[command(about = "Synthetic seismic event generator")]
#[command(version)]
struct Args {
    /// Target Richter magnitude
    #[arg(short, long, default_value = "4.0")]
    richter: f64,

    /// Number of events to generate
    #[arg(short, long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..=10_000))]
    count: u32,

    /// Uniform magnitude jitter applied per event (± value)
    #[arg(short, long, default_value = "0.0")]
    jitter: f64,

    /// Append records to this station data directory instead of stdout only
    #[arg(long)]
    data_dir: Option<String>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed.unwrap_or(0));

    // The simulator trusts the host clock; records need valid wall time
    let clock = Clock::new(3_600);
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .context("host clock before epoch")?
        .as_secs();
    anyhow::ensure!(
        clock.record_sync(epoch),
        "host clock predates 2020 - cannot stamp simulated events"
    );

    // A clean reference calibration so simulated records read as pristine
    let calibration = Calibration {
        off_x: 0.0,
        off_y: 0.0,
        off_z: 1.0,
        baseline_lta: 1e-4,
        created_at_mono_ms: 0,
        valid: true,
    };

    let store = match &args.data_dir {
        Some(dir) => Some(RecordStore::open(dir).context("opening record store")?),
        None => None,
    };

    let mut builder = RecordBuilder::new("simulate".to_string(), 500, 0.0);

    for i in 0..args.count {
        let jitter = if args.jitter > 0.0 {
            rng.gen_range(-args.jitter..=args.jitter)
        } else {
            0.0
        };
        let richter = (args.richter + jitter).clamp(-2.0, 10.0);

        let record = builder
            .simulate(richter, &calibration, &clock)
            .context("clock lost trust mid-run")?;

        println!("{}", serde_json::to_string(&record)?);

        if let Some(store) = &store {
            store.append_seismic(&record)?;
            store.append_flat_event(&record.flat_event())?;
        }

        info!(
            event = i + 1,
            richter,
            class = %record.classification.event_type,
            duration_ms = record.measurements.duration_ms,
            "Simulated event"
        );
    }

    Ok(())
}
