//! Seismo Station: networked digital seismograph
//!
//! Real-time STA/LTA event detection over a tri-axial accelerometer, with a
//! dual-stage pipeline decoupling the fixed-rate sampler from the I/O
//! consumers.
//!
//! ## Architecture
//!
//! - **Sampler domain**: dedicated thread at the configured rate running
//!   acquisition → calibration offsets → spike filter → STA/LTA → event
//!   assembly. Non-blocking enqueues are its only out-edges.
//! - **Sink domain**: async consumer handling persistence, broker
//!   publishes, and the adaptive broadcast channel.
//! - **Telemetry**: periodic health snapshots and broker cadences.

pub mod acquisition;
pub mod api;
pub mod broadcast;
pub mod broker;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod detector;
pub mod pipeline;
pub mod storage;
pub mod telemetry;
pub mod types;

// Re-export station configuration
pub use config::StationConfig;

// Re-export commonly used types
pub use types::{
    CountersSnapshot, EventClass, FlatEvent, HealthSample, RawFrame, Sample, SampleSummary,
    SeismicRecord, SystemEvent, SystemEventKind,
};

// Re-export the clock and calibration snapshot types
pub use calibration::{Calibration, CalibrationEngine, CalibrationHandle};
pub use clock::Clock;

// Re-export detection components
pub use detector::{EventAssembler, RecordBuilder, SpikeFilter, StaLtaDetector};

// Re-export pipeline pieces
pub use pipeline::{EventSink, Sampler, SamplerShared};

// Re-export telemetry counters
pub use telemetry::{StationCounters, StatusProbe, TelemetryTask};
