//! Seismic event record schema.
//!
//! `SeismicRecord` is the durable output of the detection pipeline: one
//! typed structure with a single serde boundary, persisted as one JSON
//! object per line and published to the broker per event. It is never
//! mutated after construction; the event sink owns it once enqueued.

use serde::{Deserialize, Serialize};

/// Event classification derived from the Richter proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventClass {
    Micro,
    Minor,
    Light,
    Moderate,
    Strong,
    Major,
}

impl EventClass {
    /// Classify by Richter magnitude with the matching intensity level.
    pub fn from_richter(richter: f64) -> Self {
        match richter {
            r if r >= 7.0 => Self::Major,
            r if r >= 6.0 => Self::Strong,
            r if r >= 5.0 => Self::Moderate,
            r if r >= 4.0 => Self::Light,
            r if r >= 2.0 => Self::Minor,
            _ => Self::Micro,
        }
    }

    /// Intensity level 1 (Micro) through 6 (Major).
    pub fn intensity_level(&self) -> u8 {
        match self {
            Self::Micro => 1,
            Self::Minor => 2,
            Self::Light => 3,
            Self::Moderate => 4,
            Self::Strong => 5,
            Self::Major => 6,
        }
    }

    /// Human-readable Richter band for the class.
    pub fn richter_range(&self) -> &'static str {
        match self {
            Self::Micro => "<2.0",
            Self::Minor => "2.0-4.0",
            Self::Light => "4.0-5.0",
            Self::Moderate => "5.0-6.0",
            Self::Strong => "6.0-7.0",
            Self::Major => "≥7.0",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Micro => "Micro",
            Self::Minor => "Minor",
            Self::Light => "Light",
            Self::Moderate => "Moderate",
            Self::Strong => "Strong",
            Self::Major => "Major",
        }
    }
}

impl std::fmt::Display for EventClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detection timing block. `ntp_validated` is true by construction: a record
/// is only built while the wall clock is trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Wall-clock seconds since epoch at emit time.
    pub ts_wall: u64,
    /// ISO-8601 rendering of `ts_wall`.
    pub iso_wall: String,
    pub ntp_validated: bool,
    /// Monotonic milliseconds since boot at emit time.
    pub boot_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub event_type: EventClass,
    pub intensity_level: u8,
    pub richter_range: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurements {
    pub pga_g: f64,
    pub richter: f64,
    pub local_magnitude: f64,
    pub duration_ms: u64,
    pub peak_frequency_hz: f64,
    pub energy_joules: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorData {
    pub max_ax: f64,
    pub max_ay: f64,
    pub max_az: f64,
    pub vector_magnitude: f64,
    pub calibration_valid: bool,
    pub calibration_age_hours: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Algorithm {
    pub method: String,
    pub trigger_ratio: f64,
    pub sta_window: usize,
    pub lta_window: usize,
    pub background_noise: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source: String,
    pub processing_version: String,
    pub sample_rate_hz: u32,
    pub filter_applied: bool,
    /// "excellent" with a valid calibration, "good" otherwise.
    pub data_quality: String,
}

/// The durable, scientifically-annotated event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeismicRecord {
    pub event_id: String,
    pub detection: Detection,
    pub classification: Classification,
    pub measurements: Measurements,
    pub sensor_data: SensorData,
    pub algorithm: Algorithm,
    pub metadata: RecordMetadata,
}

impl SeismicRecord {
    /// The flat legacy projection written to `events/<day>.json` and pushed
    /// as the `seismic_event` broadcast payload.
    pub fn flat_event(&self) -> FlatEvent {
        FlatEvent {
            event_type: self.classification.event_type,
            magnitude: self.measurements.pga_g,
            level: self.classification.intensity_level,
            ts_wall_ms: self.detection.ts_wall * 1_000,
        }
    }
}

/// Legacy flat event: (type, magnitude, level, wall timestamp).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlatEvent {
    #[serde(rename = "type")]
    pub event_type: EventClass,
    pub magnitude: f64,
    pub level: u8,
    pub ts_wall_ms: u64,
}

/// System event written to `system/<day>.json`. Wall time may be zero when
/// the clock was untrusted at the time of the event; `ts_mono_ms` is always
/// populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub ts_wall: u64,
    pub ts_mono_ms: u64,
    pub kind: SystemEventKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemEventKind {
    Startup,
    Shutdown,
    CalibrationOk,
    CalibrationFailed,
    CalibrationDrift,
    EventRejectedNoTime,
    QueueBackPressure,
    SensorFault,
}
