//! Telemetry: station counters, status probing, and the periodic health loop.
//!
//! Counters are single-writer relaxed atomics; readers take snapshots with
//! no tearing requirement beyond per-field consistency. The health loop
//! emits a status sample every 5 seconds over the push channel and feeds the
//! broker at its coarser cadences (data 5 min, status 10 min, heartbeat
//! 30 min).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastHub;
use crate::broker::{topics, BrokerClient};
use crate::calibration::CalibrationHandle;
use crate::clock::Clock;
use crate::config::defaults::{MIN_FREE_DISK_BYTES, TELEMETRY_INTERVAL_SECS};
use crate::config::BrokerSection;
use crate::types::{CountersSnapshot, HealthSample, Sample, SeismicRecord};

/// Station-wide counters. Each field has a single writer.
#[derive(Debug, Default)]
pub struct StationCounters {
    pub total_samples: AtomicU64,
    pub events_detected: AtomicU64,
    pub spikes_filtered: AtomicU64,
    pub events_rejected_no_time: AtomicU64,
    pub sensor_read_errors: AtomicU64,
    pub samples_dropped: AtomicU64,
    pub events_dropped: AtomicU64,
    /// Bit pattern of the most recent magnitude (f64), written by the sampler.
    last_magnitude_bits: AtomicU64,
}

impl StationCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr(field: &AtomicU64) {
        field.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_last_magnitude(&self, magnitude: f64) {
        self.last_magnitude_bits
            .store(magnitude.to_bits(), Ordering::Relaxed);
    }

    pub fn last_magnitude(&self) -> f64 {
        f64::from_bits(self.last_magnitude_bits.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            total_samples: self.total_samples.load(Ordering::Relaxed),
            events_detected: self.events_detected.load(Ordering::Relaxed),
            spikes_filtered: self.spikes_filtered.load(Ordering::Relaxed),
            events_rejected_no_time: self.events_rejected_no_time.load(Ordering::Relaxed),
            sensor_read_errors: self.sensor_read_errors.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Check free disk space for a given path (returns bytes).
fn check_disk_free(path: &str) -> Result<u64, String> {
    use std::mem::MaybeUninit;

    let c_path = std::ffi::CString::new(path).map_err(|e| e.to_string())?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // SAFETY: statvfs fills the struct on success; we only read it then.
    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };

    if result == 0 {
        let stat = unsafe { stat.assume_init() };
        Ok(stat.f_bfree * stat.f_bsize)
    } else {
        Err(format!("statvfs failed for {path}"))
    }
}

/// Read-only view over shared state that can produce a status snapshot on
/// demand. Shared by the telemetry loop, the status endpoint, and the
/// `get_status` push command.
pub struct StatusProbe {
    pub counters: Arc<StationCounters>,
    pub clock: Arc<Clock>,
    pub calibration: CalibrationHandle,
    pub sample_tx: mpsc::Sender<Sample>,
    pub event_tx: mpsc::Sender<Box<SeismicRecord>>,
    pub data_dir: String,
    /// Shared resource-pressure flag consumed by broadcast rate control.
    pub low_resources: Arc<AtomicBool>,
}

impl StatusProbe {
    /// Build one status snapshot from shared state.
    pub fn health_sample(&self) -> HealthSample {
        let calibration = self.calibration.snapshot();
        let now_mono = self.clock.now_mono();

        let low_resources = match check_disk_free(&self.data_dir) {
            Ok(free) => free < MIN_FREE_DISK_BYTES,
            Err(e) => {
                debug!(error = %e, "Disk check unavailable");
                false
            }
        };
        self.low_resources.store(low_resources, Ordering::Relaxed);

        HealthSample {
            ts_mono_ms: now_mono,
            ts_wall: self.clock.now_wall().unwrap_or(0),
            counters: self.counters.snapshot(),
            sample_queue_depth: self.sample_tx.max_capacity() - self.sample_tx.capacity(),
            event_queue_depth: self.event_tx.max_capacity() - self.event_tx.capacity(),
            calibration_valid: calibration.valid,
            calibration_age_hours: calibration.age_hours(now_mono),
            last_magnitude: self.counters.last_magnitude(),
            clock_trusted: self.clock.trusted(),
            low_resources,
        }
    }
}

/// The periodic health loop.
pub struct TelemetryTask {
    pub probe: Arc<StatusProbe>,
    pub hub: Arc<BroadcastHub>,
    pub broker: Arc<dyn BrokerClient>,
    pub station_id: String,
    /// Broker publish cadences from the station config.
    pub intervals: BrokerSection,
}

impl TelemetryTask {
    /// Run the health loop until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = TELEMETRY_INTERVAL_SECS,
            "Telemetry loop started"
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(TELEMETRY_INTERVAL_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut last_data_pub = 0u64;
        let mut last_status_pub = 0u64;
        let mut last_heartbeat_pub = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Telemetry loop stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let sample = self.probe.health_sample();
            debug!(
                total_samples = sample.counters.total_samples,
                events = sample.counters.events_detected,
                trusted = sample.clock_trusted,
                "Health sample"
            );

            self.hub.broadcast_status(&sample).await;

            let now = sample.ts_mono_ms / 1_000;
            if now.saturating_sub(last_data_pub) >= self.intervals.data_interval_secs {
                last_data_pub = now;
                self.publish(&topics::data(&self.station_id), &sample, false)
                    .await;
            }
            if now.saturating_sub(last_status_pub) >= self.intervals.status_interval_secs {
                last_status_pub = now;
                self.publish(&topics::status(&self.station_id), &sample, true)
                    .await;
            }
            if now.saturating_sub(last_heartbeat_pub) >= self.intervals.heartbeat_interval_secs {
                last_heartbeat_pub = now;
                let heartbeat = serde_json::json!({
                    "station": self.station_id,
                    "uptime_ms": sample.ts_mono_ms,
                    "clock_trusted": sample.clock_trusted,
                });
                if let Err(e) = self
                    .broker
                    .publish(
                        &topics::heartbeat(&self.station_id),
                        &heartbeat.to_string(),
                        false,
                    )
                    .await
                {
                    warn!(error = %e, "Heartbeat publish failed");
                }
            }
        }
    }

    async fn publish(&self, topic: &str, sample: &HealthSample, retained: bool) {
        match serde_json::to_string(sample) {
            Ok(payload) => {
                if let Err(e) = self.broker.publish(topic, &payload, retained).await {
                    warn!(topic, error = %e, "Broker publish failed");
                }
            }
            Err(e) => warn!(error = %e, "Health sample serialization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_snapshot_round_trip() {
        let counters = StationCounters::new();
        StationCounters::incr(&counters.total_samples);
        StationCounters::incr(&counters.total_samples);
        StationCounters::incr(&counters.spikes_filtered);
        counters.set_last_magnitude(0.042);

        let snap = counters.snapshot();
        assert_eq!(snap.total_samples, 2);
        assert_eq!(snap.spikes_filtered, 1);
        assert_eq!(snap.events_detected, 0);
        assert!((counters.last_magnitude() - 0.042).abs() < 1e-12);
    }

    #[test]
    fn disk_check_reports_something_for_cwd() {
        // statvfs on the working directory should succeed on any host
        let free = check_disk_free(".");
        assert!(free.is_ok());
    }
}
