//! Synthetic accelerometer.
//!
//! Generates resting-sensor noise with optional scripted disturbances so the
//! full pipeline can run without hardware. Scenarios are segment lists in
//! sample counts, mirroring the phase-scripted simulation used for
//! regression runs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::types::RawFrame;

use super::driver::{SensorDriver, SensorError};

/// One scripted stretch of sensor behaviour.
#[derive(Debug, Clone, Copy)]
pub enum Segment {
    /// Gaussian noise around rest (σ in g) for N samples.
    Quiet { sigma_g: f64, samples: u64 },
    /// A single isolated impulse of the given magnitude (g).
    Impulse { magnitude_g: f64 },
    /// Sustained shaking uniform in [min, max] g for N samples.
    Shake {
        min_g: f64,
        max_g: f64,
        samples: u64,
    },
}

pub struct SyntheticSensor {
    rng: StdRng,
    /// Noise level once the script is exhausted (g).
    default_sigma_g: f64,
    /// Raw Z rest level (gravity), so calibration sees a realistic sensor.
    rest_z_g: f64,
    script: Vec<Segment>,
    segment_idx: usize,
    segment_pos: u64,
    started: bool,
}

impl SyntheticSensor {
    /// Endless quiet sensor with the given noise level.
    pub fn quiet(sigma_g: f64, seed: u64) -> Self {
        Self::scripted(
            vec![Segment::Quiet {
                sigma_g,
                samples: u64::MAX,
            }],
            seed,
        )
    }

    /// Sensor following a scripted segment list; quiet after the script ends.
    pub fn scripted(script: Vec<Segment>, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            default_sigma_g: 1e-4,
            rest_z_g: 1.0,
            script,
            segment_idx: 0,
            segment_pos: 0,
            started: false,
        }
    }

    fn current_segment(&mut self) -> Option<Segment> {
        while let Some(segment) = self.script.get(self.segment_idx).copied() {
            let len = match segment {
                Segment::Quiet { samples, .. } | Segment::Shake { samples, .. } => samples,
                Segment::Impulse { .. } => 1,
            };
            if self.segment_pos < len {
                return Some(segment);
            }
            self.segment_idx += 1;
            self.segment_pos = 0;
        }
        None
    }
}

impl SensorDriver for SyntheticSensor {
    fn begin(&mut self) -> Result<(), SensorError> {
        self.started = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame, SensorError> {
        if !self.started {
            return Err(SensorError::NotResponding);
        }
        let segment = self.current_segment();
        self.segment_pos += 1;

        // Past the end of the script the sensor rests at the default noise
        let segment = segment.unwrap_or(Segment::Quiet {
            sigma_g: self.default_sigma_g,
            samples: u64::MAX,
        });

        let frame = match segment {
            Segment::Quiet { sigma_g, .. } => {
                let dist = Normal::new(0.0, sigma_g.max(1e-12))
                    .map_err(|e| SensorError::ReadFailed(e.to_string()))?;
                RawFrame {
                    ax: dist.sample(&mut self.rng),
                    ay: dist.sample(&mut self.rng),
                    az: self.rest_z_g + dist.sample(&mut self.rng),
                }
            }
            Segment::Impulse { magnitude_g } => RawFrame {
                ax: magnitude_g,
                ay: 0.0,
                az: self.rest_z_g,
            },
            Segment::Shake { min_g, max_g, .. } => {
                let m = self.rng.gen_range(min_g..=max_g);
                // Distribute the target magnitude across the horizontal axes
                let split: f64 = self.rng.gen_range(0.0..=1.0);
                let ax = m * split.sqrt();
                let ay = m * (1.0 - split).sqrt();
                RawFrame {
                    ax,
                    ay,
                    az: self.rest_z_g,
                }
            }
        };
        Ok(frame)
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}
