//! Seismic event detection: spike rejection, STA/LTA trigger, event
//! assembly, and the magnitude model.

pub mod event;
pub mod magnitude;
pub mod spike;
pub mod sta_lta;

pub use event::{AlgorithmSnapshot, EventAssembler, EventSummary, RecordBuilder};
pub use spike::SpikeFilter;
pub use sta_lta::{StaLtaDetector, Thresholds};
