//! Acceleration acquisition: the sensor driver seam and the synthetic
//! source used for tests, replays, and hardware-free operation.

pub mod driver;
pub mod simulator;

pub use driver::{FixedPointFrame, SensorDriver, SensorError};
pub use simulator::{Segment, SyntheticSensor};
