//! Health and status snapshot types.

use serde::{Deserialize, Serialize};

/// Snapshot of the station counters. Produced from relaxed atomics; each
/// field is individually consistent but the set is not a transaction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CountersSnapshot {
    pub total_samples: u64,
    pub events_detected: u64,
    pub spikes_filtered: u64,
    pub events_rejected_no_time: u64,
    pub sensor_read_errors: u64,
    pub samples_dropped: u64,
    pub events_dropped: u64,
}

/// Periodic status sample emitted by the telemetry task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub ts_mono_ms: u64,
    pub ts_wall: u64,
    pub counters: CountersSnapshot,
    pub sample_queue_depth: usize,
    pub event_queue_depth: usize,
    pub calibration_valid: bool,
    pub calibration_age_hours: f64,
    pub last_magnitude: f64,
    pub clock_trusted: bool,
    pub low_resources: bool,
}
