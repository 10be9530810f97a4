//! System-wide default constants.
//!
//! Centralises magic numbers that would otherwise be scattered across the
//! codebase. Grouped by subsystem for easy discovery.

// ============================================================================
// Sampling
// ============================================================================

/// Default accelerometer sampling rate (Hz).
pub const SAMPLING_RATE_HZ: u32 = 500;

/// MPU6050 accelerometer scale at ±2 g full range (LSB per g).
pub const MPU6050_ACCEL_SCALE: f64 = 16_384.0;

// ============================================================================
// STA/LTA Detector
// ============================================================================

/// Short-term average window (samples). 25 at 500 Hz = 50 ms.
pub const STA_WINDOW: usize = 25;

/// Long-term average window (samples). 2 500 at 500 Hz = 5 s.
pub const LTA_WINDOW: usize = 2_500;

/// Trigger ratio: STA/LTA above this raises a trigger.
pub const STA_LTA_RATIO: f64 = 2.5;

/// Base micro-event threshold (g). Also the noise floor for adaptive scaling.
pub const THRESHOLD_MICRO_G: f64 = 0.001;

/// Base light-event threshold (g).
pub const THRESHOLD_LIGHT_G: f64 = 0.010;

/// Base strong-event threshold (g).
pub const THRESHOLD_STRONG_G: f64 = 0.100;

/// Interval between adaptive threshold recomputations (seconds).
pub const ADAPTIVE_INTERVAL_SECS: u64 = 30;

/// Adaptive factor bounds: thresholds never move past [0.5×, 3×] of base.
pub const ADAPTIVE_FACTOR_MIN: f64 = 0.5;
pub const ADAPTIVE_FACTOR_MAX: f64 = 3.0;

// ============================================================================
// Event Assembly
// ============================================================================

/// Minimum trigger duration before an event is emitted (ms).
pub const MIN_EVENT_DURATION_MS: u64 = 100;

/// Confidence attached to detector-produced events.
pub const DETECTOR_CONFIDENCE: f64 = 0.95;

/// Confidence attached to simulator-produced events.
pub const SIMULATION_CONFIDENCE: f64 = 0.80;

/// Record schema version stamped into every SeismicRecord.
pub const PROCESSING_VERSION: &str = "1.0.0";

// ============================================================================
// Spike Filter
// ============================================================================

/// Magnitude window used for the rolling median (samples).
pub const SPIKE_WINDOW: usize = 5;

/// A sample is a spike when it exceeds this multiple of the window median...
pub const SPIKE_MEDIAN_FACTOR: f64 = 5.0;

/// ...and this multiple of the active micro threshold.
pub const SPIKE_THRESHOLD_FACTOR: f64 = 2.0;

// ============================================================================
// Calibration
// ============================================================================

/// Stability phase: sample count and rate.
pub const CAL_STABILITY_SAMPLES: usize = 50;
pub const CAL_STABILITY_RATE_HZ: u32 = 50;

/// Maximum per-axis standard deviation during the stability phase (g).
pub const CAL_STABILITY_MAX_SIGMA_G: f64 = 0.01;

/// Acquisition phase: sample count and rate.
pub const CAL_ACQUISITION_SAMPLES: usize = 200;
pub const CAL_ACQUISITION_RATE_HZ: u32 = 100;

/// Horizontal offset bound: |off_x|, |off_y| must stay within this (g).
pub const CAL_MAX_HORIZONTAL_OFFSET_G: f64 = 0.5;

/// Raw Z mean must land inside [min, max] while resting (g).
pub const CAL_Z_MIN_G: f64 = 0.8;
pub const CAL_Z_MAX_G: f64 = 1.5;

/// Per-axis drift between consecutive calibrations that raises a warning (g).
pub const CAL_DRIFT_WARN_G: f64 = 0.1;

/// Post-test: calibrated sample count and maximum mean magnitude (g).
pub const CAL_POST_TEST_SAMPLES: usize = 10;
pub const CAL_POST_TEST_MAX_MAGNITUDE_G: f64 = 0.1;

/// Drift monitor cadence and thresholds.
pub const DRIFT_CHECK_INTERVAL_SECS: u64 = 300;
pub const DRIFT_WARN_PERCENT: f64 = 20.0;
pub const DRIFT_CRITICAL_PERCENT: f64 = 50.0;

/// Calibration age after which an informational notice is logged (hours).
pub const CAL_AGE_NOTICE_HOURS: f64 = 24.0;

// ============================================================================
// Pipeline Queues
// ============================================================================

/// Bounded sample queue capacity (sampler → sink).
pub const SAMPLE_QUEUE_CAPACITY: usize = 50;

/// Bounded event queue capacity (sampler → sink).
pub const EVENT_QUEUE_CAPACITY: usize = 20;

/// System-event queue capacity (sampler → sink, best-effort).
pub const SYSTEM_QUEUE_CAPACITY: usize = 16;

/// Sink drain deadline on shutdown (ms).
pub const SINK_DRAIN_DEADLINE_MS: u64 = 1_000;

/// Sample-drop rate window and threshold for back-pressure warnings.
pub const DROP_RATE_WINDOW_SECS: u64 = 10;
pub const DROP_RATE_WARN_PERCENT: f64 = 1.0;

// ============================================================================
// Broadcast Rate Control
// ============================================================================

/// Rolling sample buffer averaged into each broadcast frame.
pub const BROADCAST_AVERAGE_WINDOW: usize = 10;

/// Base broadcast interval (ms). 100 ms = 10 Hz.
pub const BROADCAST_BASE_INTERVAL_MS: u64 = 100;

/// Broadcast interval when more than this many clients are connected (ms).
pub const BROADCAST_BUSY_CLIENTS: usize = 3;
pub const BROADCAST_BUSY_INTERVAL_MS: u64 = 150;

/// Broadcast interval under resource pressure (ms).
pub const BROADCAST_LOW_RESOURCE_INTERVAL_MS: u64 = 200;

/// Per-client rate bounds (Hz).
pub const CLIENT_RATE_DEFAULT_HZ: u32 = 10;
pub const CLIENT_RATE_FLOOR_HZ: u32 = 2;
pub const CLIENT_RATE_CEILING_HZ: u32 = 15;

/// Failed sends before a client is pinned to the rate floor.
pub const CLIENT_FAILURES_TO_FLOOR: u32 = 3;

/// Cadence of the global "good performance" rate-recovery tick (seconds).
pub const CLIENT_RECOVERY_TICK_SECS: u64 = 30;

// ============================================================================
// Persistence
// ============================================================================

/// Maximum rate at which rolling sample summaries are persisted (Hz).
pub const SUMMARY_PERSIST_MAX_HZ: u32 = 1;

/// Days of per-day record files kept on disk.
pub const DATA_RETENTION_DAYS: u64 = 90;

/// Free disk space below which the station reports resource pressure (bytes).
pub const MIN_FREE_DISK_BYTES: u64 = 500 * 1024 * 1024;

// ============================================================================
// Telemetry
// ============================================================================

/// Status snapshot cadence (seconds).
pub const TELEMETRY_INTERVAL_SECS: u64 = 5;

/// Broker publish cadences (seconds): data 5 min, status 10 min, heartbeat 30 min.
pub const BROKER_DATA_INTERVAL_SECS: u64 = 300;
pub const BROKER_STATUS_INTERVAL_SECS: u64 = 600;
pub const BROKER_HEARTBEAT_INTERVAL_SECS: u64 = 1_800;

/// Minimum delay between broker reconnect attempts (seconds).
pub const BROKER_RECONNECT_MIN_SECS: u64 = 5;

// ============================================================================
// Clock
// ============================================================================

/// Wall-clock sync cadence (seconds). Trust expires at 2× this interval.
pub const CLOCK_SYNC_INTERVAL_SECS: u64 = 3_600;

/// Wall-clock values before 2020-01-01T00:00:00Z are never trusted (epoch s).
pub const MIN_VALID_EPOCH_SECS: u64 = 1_577_836_800;

// ============================================================================
// Watchdog
// ============================================================================

/// Sampler stall time that trips the watchdog (seconds). Fatal.
pub const WATCHDOG_TRIP_SECS: u64 = 30;

/// Watchdog poll cadence (seconds).
pub const WATCHDOG_POLL_SECS: u64 = 5;
