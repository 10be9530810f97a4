//! Shared data structures for the seismograph detection pipeline
//!
//! This module defines the core types flowing through the station:
//! - `RawFrame` / `Sample`: per-period accelerometer readings
//! - `SampleSummary`: rolling averaged sensor summary
//! - `SeismicRecord`: the durable annotated event record
//! - `FlatEvent` / `SystemEvent`: legacy and operational projections
//! - `HealthSample` / `CountersSnapshot`: telemetry snapshots

mod health;
mod record;
mod sample;

pub use health::*;
pub use record::*;
pub use sample::*;
