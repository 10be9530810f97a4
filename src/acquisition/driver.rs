//! Sensor driver seam.
//!
//! The station reads tri-axial acceleration through the [`SensorDriver`]
//! trait so the hardware (an MPU6050 behind I²C) and the synthetic source
//! used for tests and simulation are interchangeable at wiring time.

use thiserror::Error;

use crate::config::defaults::MPU6050_ACCEL_SCALE;
use crate::types::RawFrame;

#[derive(Debug, Error)]
pub enum SensorError {
    /// Device did not respond during bring-up. Fatal: the station refuses
    /// to start detection.
    #[error("sensor not responding during startup")]
    NotResponding,
    /// A single read failed at steady state. Transient: the sampler reuses
    /// the previous components with magnitude 0 and keeps its cadence.
    #[error("sensor read failed: {0}")]
    ReadFailed(String),
}

/// Blocking tri-axial acceleration source.
///
/// Implementations must be `Send`: the driver is owned by the dedicated
/// sampler thread after wiring.
pub trait SensorDriver: Send {
    /// Bring up the device. Returning an error at startup is fatal.
    fn begin(&mut self) -> Result<(), SensorError>;

    /// Read one raw frame in g. Blocking, but bounded well below the
    /// sampling period.
    fn read_frame(&mut self) -> Result<RawFrame, SensorError>;

    fn name(&self) -> &'static str;
}

/// Fixed-point register frame as produced by the MPU6050 (±2 g range).
#[derive(Debug, Clone, Copy)]
pub struct FixedPointFrame {
    pub ax: i16,
    pub ay: i16,
    pub az: i16,
}

impl FixedPointFrame {
    /// Scale register counts to g.
    pub fn to_g(self) -> RawFrame {
        RawFrame {
            ax: f64::from(self.ax) / MPU6050_ACCEL_SCALE,
            ay: f64::from(self.ay) / MPU6050_ACCEL_SCALE,
            az: f64::from(self.az) / MPU6050_ACCEL_SCALE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_scaling() {
        // 16384 counts = 1 g at ±2 g full scale
        let frame = FixedPointFrame {
            ax: 0,
            ay: -8_192,
            az: 16_384,
        };
        let g = frame.to_g();
        assert!((g.ax - 0.0).abs() < 1e-12);
        assert!((g.ay + 0.5).abs() < 1e-12);
        assert!((g.az - 1.0).abs() < 1e-12);
    }
}
