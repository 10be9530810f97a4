//! Calibration engine: per-axis offsets, validation, and drift monitoring.
//!
//! Calibration runs synchronously in the sampler's scheduling domain; it is
//! a distinct mode of the sampler, never a concurrent operation. The active
//! [`Calibration`] is replaced atomically (arc-swap) so every reader always
//! sees a consistent snapshot.
//!
//! ## Procedure
//!
//! 1. Stability: 50 samples at ~50 Hz; reject if any axis σ > 0.01 g.
//! 2. Acquisition: 200 samples at ~100 Hz; per-axis means become offsets.
//!    The Z offset is the raw mean: a calibrated Z reads 0 g at rest, not a
//!    gravity-compensated value.
//! 3. Validation: |off_x|, |off_y| ≤ 0.5 g; raw Z mean ∈ [0.8, 1.5] g.
//! 4. Drift advisory: Δ > 0.1 g vs the previous calibration warns only.
//! 5. Post-test: mean magnitude of 10 calibrated samples ≤ 0.1 g becomes
//!    `baseline_lta`.
//!
//! A rejection in steps 1–3 keeps the previous offsets in force with
//! `valid = false`.

use arc_swap::ArcSwap;
use statrs::statistics::Statistics;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::acquisition::{SensorDriver, SensorError};
use crate::clock::Clock;
use crate::config::defaults::{
    CAL_ACQUISITION_RATE_HZ, CAL_ACQUISITION_SAMPLES, CAL_AGE_NOTICE_HOURS, CAL_DRIFT_WARN_G,
    CAL_MAX_HORIZONTAL_OFFSET_G, CAL_POST_TEST_MAX_MAGNITUDE_G, CAL_POST_TEST_SAMPLES,
    CAL_STABILITY_MAX_SIGMA_G, CAL_STABILITY_RATE_HZ, CAL_STABILITY_SAMPLES, CAL_Z_MAX_G,
    CAL_Z_MIN_G,
};
use crate::config::CalibrationSection;
use crate::types::RawFrame;

/// Immutable per-axis offset snapshot. Replaced atomically, never mutated.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub off_x: f64,
    pub off_y: f64,
    pub off_z: f64,
    /// Mean calibrated magnitude right after calibration; the drift monitor
    /// compares the live LTA against this.
    pub baseline_lta: f64,
    pub created_at_mono_ms: u64,
    pub valid: bool,
}

impl Calibration {
    /// Zero-offset placeholder used before the first successful calibration.
    pub fn invalid_default() -> Self {
        Self {
            off_x: 0.0,
            off_y: 0.0,
            off_z: 0.0,
            baseline_lta: 0.0,
            created_at_mono_ms: 0,
            valid: false,
        }
    }

    /// Remove the axis offsets from a raw frame.
    pub fn apply(&self, raw: &RawFrame) -> (f64, f64, f64) {
        (
            raw.ax - self.off_x,
            raw.ay - self.off_y,
            raw.az - self.off_z,
        )
    }

    pub fn age_hours(&self, now_mono_ms: u64) -> f64 {
        now_mono_ms.saturating_sub(self.created_at_mono_ms) as f64 / 3_600_000.0
    }
}

/// Read-only handle to the active calibration. Cheap to clone; `snapshot()`
/// is lock-free.
#[derive(Clone)]
pub struct CalibrationHandle {
    inner: Arc<ArcSwap<Calibration>>,
}

impl CalibrationHandle {
    pub fn snapshot(&self) -> Arc<Calibration> {
        self.inner.load_full()
    }
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("sensor unstable during calibration: axis {axis} sigma {sigma:.4} g")]
    Unstable { axis: char, sigma: f64 },
    #[error("offset out of range: axis {axis} = {value:.3} g")]
    OffsetOutOfRange { axis: char, value: f64 },
    #[error("raw Z mean {mean:.3} g outside resting bounds [0.8, 1.5]")]
    ZOutOfRange { mean: f64 },
    #[error("post-calibration magnitude {magnitude:.3} g exceeds 0.1 g")]
    PostTestFailed { magnitude: f64 },
    #[error(transparent)]
    Sensor(#[from] SensorError),
}

/// Outcome of a successful calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub off_x: f64,
    pub off_y: f64,
    pub off_z: f64,
    pub baseline_lta: f64,
    /// Per-axis drift vs the previous calibration, when one existed.
    pub drift_g: Option<(f64, f64, f64)>,
    pub drift_warning: bool,
}

/// Verdict of a periodic drift check against the live LTA.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftVerdict {
    Ok,
    Warning { percent: f64 },
    Invalidated { percent: f64 },
}

pub struct CalibrationEngine {
    active: Arc<ArcSwap<Calibration>>,
    settings: CalibrationSection,
    last_drift_check_ms: u64,
    /// Pace sample collection at the procedure rates. Disabled for replay
    /// and test runs where the sensor source has no real-time behaviour.
    paced: bool,
    age_notice_logged: bool,
}

impl CalibrationEngine {
    pub fn new(settings: CalibrationSection) -> Self {
        Self {
            active: Arc::new(ArcSwap::from_pointee(Calibration::invalid_default())),
            settings,
            last_drift_check_ms: 0,
            paced: true,
            age_notice_logged: false,
        }
    }

    /// Engine that collects calibration samples without inter-sample pacing.
    pub fn unpaced(settings: CalibrationSection) -> Self {
        Self {
            paced: false,
            ..Self::new(settings)
        }
    }

    /// Read-only handle for other components.
    pub fn handle(&self) -> CalibrationHandle {
        CalibrationHandle {
            inner: Arc::clone(&self.active),
        }
    }

    pub fn snapshot(&self) -> Arc<Calibration> {
        self.active.load_full()
    }

    /// Run the full calibration procedure.
    ///
    /// On rejection the previous offsets stay in force but the stored
    /// calibration is marked invalid; detection continues either way.
    pub fn calibrate(
        &mut self,
        sensor: &mut dyn SensorDriver,
        clock: &Clock,
    ) -> Result<CalibrationReport, CalibrationError> {
        info!(sensor = sensor.name(), "Starting calibration");

        let result = self.run_procedure(sensor, clock);
        match &result {
            Ok(report) => {
                info!(
                    off_x = report.off_x,
                    off_y = report.off_y,
                    off_z = report.off_z,
                    baseline_lta = report.baseline_lta,
                    drift_warning = report.drift_warning,
                    "Calibration complete"
                );
            }
            Err(e) => {
                warn!(error = %e, "Calibration rejected - previous offsets remain in force");
                let previous = self.active.load_full();
                self.active.store(Arc::new(Calibration {
                    valid: false,
                    ..(*previous).clone()
                }));
            }
        }
        result
    }

    fn run_procedure(
        &mut self,
        sensor: &mut dyn SensorDriver,
        clock: &Clock,
    ) -> Result<CalibrationReport, CalibrationError> {
        // Phase 1: stability
        let stability = self.collect(sensor, CAL_STABILITY_SAMPLES, CAL_STABILITY_RATE_HZ)?;
        for (axis, values) in [
            ('x', &stability.0),
            ('y', &stability.1),
            ('z', &stability.2),
        ] {
            let sigma = values.std_dev();
            if sigma > CAL_STABILITY_MAX_SIGMA_G {
                return Err(CalibrationError::Unstable { axis, sigma });
            }
        }

        // Phase 2: acquisition
        let acquisition = self.collect(sensor, CAL_ACQUISITION_SAMPLES, CAL_ACQUISITION_RATE_HZ)?;
        let off_x = acquisition.0.mean();
        let off_y = acquisition.1.mean();
        // Raw Z mean becomes the Z offset: calibrated Z is 0 g at rest
        let off_z = acquisition.2.mean();

        // Phase 3: validation
        for (axis, value) in [('x', off_x), ('y', off_y)] {
            if value.abs() > CAL_MAX_HORIZONTAL_OFFSET_G {
                return Err(CalibrationError::OffsetOutOfRange { axis, value });
            }
        }
        if !(CAL_Z_MIN_G..=CAL_Z_MAX_G).contains(&off_z.abs()) {
            return Err(CalibrationError::ZOutOfRange { mean: off_z });
        }

        // Phase 4: drift advisory vs previous calibration
        let previous = self.active.load_full();
        let (drift_g, drift_warning) = if previous.valid {
            let d = (
                (off_x - previous.off_x).abs(),
                (off_y - previous.off_y).abs(),
                (off_z - previous.off_z).abs(),
            );
            let warning = d.0 > CAL_DRIFT_WARN_G || d.1 > CAL_DRIFT_WARN_G || d.2 > CAL_DRIFT_WARN_G;
            if warning {
                warn!(
                    dx = d.0,
                    dy = d.1,
                    dz = d.2,
                    "Calibration drift above 0.1 g on at least one axis"
                );
            }
            (Some(d), warning)
        } else {
            (None, false)
        };

        // Phase 5: post-test with the proposed offsets
        let candidate = Calibration {
            off_x,
            off_y,
            off_z,
            baseline_lta: 0.0,
            created_at_mono_ms: clock.now_mono(),
            valid: true,
        };
        let mut magnitude_sum = 0.0;
        let period = self.period(CAL_ACQUISITION_RATE_HZ);
        for _ in 0..CAL_POST_TEST_SAMPLES {
            let raw = sensor.read_frame()?;
            let (cx, cy, cz) = candidate.apply(&raw);
            magnitude_sum += (cx * cx + cy * cy + cz * cz).sqrt();
            if let Some(p) = period {
                std::thread::sleep(p);
            }
        }
        let baseline_lta = magnitude_sum / CAL_POST_TEST_SAMPLES as f64;

        if baseline_lta > CAL_POST_TEST_MAX_MAGNITUDE_G {
            // Offsets passed their bounds; install them but flag the
            // calibration invalid since the rest magnitude check failed.
            self.active.store(Arc::new(Calibration {
                baseline_lta,
                valid: false,
                ..candidate
            }));
            return Err(CalibrationError::PostTestFailed {
                magnitude: baseline_lta,
            });
        }

        self.age_notice_logged = false;
        self.active.store(Arc::new(Calibration {
            baseline_lta,
            ..candidate
        }));

        Ok(CalibrationReport {
            off_x,
            off_y,
            off_z,
            baseline_lta,
            drift_g,
            drift_warning,
        })
    }

    /// Periodic drift check: compares the live LTA from the detector with
    /// the post-calibration baseline. Invalidation does not stop detection;
    /// it degrades record quality until the next successful calibration.
    pub fn drift_check(&mut self, current_lta: f64, now_mono_ms: u64) -> Option<DriftVerdict> {
        if now_mono_ms.saturating_sub(self.last_drift_check_ms)
            < self.settings.drift_check_interval_secs * 1_000
        {
            return None;
        }
        self.last_drift_check_ms = now_mono_ms;

        let current = self.active.load_full();
        if !current.valid || current.baseline_lta <= 0.0 {
            return Some(DriftVerdict::Ok);
        }

        if current.age_hours(now_mono_ms) > CAL_AGE_NOTICE_HOURS && !self.age_notice_logged {
            self.age_notice_logged = true;
            info!(
                age_hours = current.age_hours(now_mono_ms),
                "Calibration older than 24 h"
            );
        }

        let percent = ((current_lta - current.baseline_lta) / current.baseline_lta).abs() * 100.0;

        if percent > self.settings.drift_critical_percent {
            warn!(
                percent,
                baseline = current.baseline_lta,
                current = current_lta,
                "Baseline drift critical - invalidating calibration"
            );
            self.active.store(Arc::new(Calibration {
                valid: false,
                ..(*current).clone()
            }));
            Some(DriftVerdict::Invalidated { percent })
        } else if percent > self.settings.drift_warn_percent {
            warn!(percent, "Baseline drift warning");
            Some(DriftVerdict::Warning { percent })
        } else {
            Some(DriftVerdict::Ok)
        }
    }

    fn collect(
        &self,
        sensor: &mut dyn SensorDriver,
        count: usize,
        rate_hz: u32,
    ) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>), CalibrationError> {
        let mut xs = Vec::with_capacity(count);
        let mut ys = Vec::with_capacity(count);
        let mut zs = Vec::with_capacity(count);
        let period = self.period(rate_hz);
        for _ in 0..count {
            let frame = sensor.read_frame()?;
            xs.push(frame.ax);
            ys.push(frame.ay);
            zs.push(frame.az);
            if let Some(p) = period {
                std::thread::sleep(p);
            }
        }
        Ok((xs, ys, zs))
    }

    fn period(&self, rate_hz: u32) -> Option<Duration> {
        self.paced
            .then(|| Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1))))
    }
}
