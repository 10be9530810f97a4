//! STA/LTA trigger with adaptive thresholds.
//!
//! Two fixed-capacity ring buffers hold the short- and long-term magnitude
//! windows. Sums are maintained by sliding-window update on every admitted
//! sample; they are never recomputed from scratch on the hot path. Fullness
//! latches the first time each index wraps.

use tracing::{debug, warn};

use crate::config::defaults::{
    ADAPTIVE_FACTOR_MAX, ADAPTIVE_FACTOR_MIN, ADAPTIVE_INTERVAL_SECS, THRESHOLD_MICRO_G,
};
use crate::config::DetectorSection;

/// Event threshold triple (g). Bases scale together under adaptation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub micro: f64,
    pub light: f64,
    pub strong: f64,
}

pub struct StaLtaDetector {
    sta_buf: Vec<f64>,
    sta_idx: usize,
    sta_sum: f64,
    sta_full: bool,

    lta_buf: Vec<f64>,
    lta_idx: usize,
    lta_sum: f64,
    lta_full: bool,

    ratio_threshold: f64,
    adaptive_enabled: bool,
    bases: Thresholds,
    active: Thresholds,
    background_noise: f64,
    last_adaptive_ms: Option<u64>,
}

impl StaLtaDetector {
    pub fn new(detector: &DetectorSection) -> Self {
        let bases = Thresholds {
            micro: detector.threshold_micro_g,
            light: detector.threshold_light_g,
            strong: detector.threshold_strong_g,
        };
        Self {
            sta_buf: vec![0.0; detector.sta_window.max(1)],
            sta_idx: 0,
            sta_sum: 0.0,
            sta_full: false,
            lta_buf: vec![0.0; detector.lta_window.max(1)],
            lta_idx: 0,
            lta_sum: 0.0,
            lta_full: false,
            ratio_threshold: detector.trigger_ratio,
            adaptive_enabled: detector.adaptive_thresholds,
            bases,
            active: bases,
            background_noise: 0.0,
            last_adaptive_ms: None,
        }
    }

    /// Feed one admitted magnitude. Returns whether the trigger condition
    /// holds after the update.
    pub fn update(&mut self, magnitude: f64, ts_mono_ms: u64) -> bool {
        self.sta_sum += magnitude - self.sta_buf[self.sta_idx];
        self.sta_buf[self.sta_idx] = magnitude;
        self.sta_idx += 1;
        if self.sta_idx == self.sta_buf.len() {
            self.sta_idx = 0;
            self.sta_full = true;
        }

        self.lta_sum += magnitude - self.lta_buf[self.lta_idx];
        self.lta_buf[self.lta_idx] = magnitude;
        self.lta_idx += 1;
        if self.lta_idx == self.lta_buf.len() {
            self.lta_idx = 0;
            self.lta_full = true;
        }

        self.adaptive_tick(ts_mono_ms);
        self.triggered()
    }

    /// Current trigger condition: both windows full and the STA/LTA ratio
    /// above the configured threshold. A zero LTA never triggers.
    pub fn triggered(&self) -> bool {
        if !(self.sta_full && self.lta_full) || self.lta_sum <= 0.0 {
            return false;
        }
        self.trigger_ratio() > self.ratio_threshold
    }

    /// Instantaneous STA/LTA ratio (0 when the LTA sum is zero).
    pub fn trigger_ratio(&self) -> f64 {
        if self.lta_sum <= 0.0 {
            return 0.0;
        }
        let sta_avg = self.sta_sum / self.sta_buf.len() as f64;
        let lta_avg = self.lta_sum / self.lta_buf.len() as f64;
        sta_avg / lta_avg
    }

    /// Long-term average magnitude (the running noise estimate).
    pub fn lta_average(&self) -> f64 {
        self.lta_sum / self.lta_buf.len() as f64
    }

    pub fn windows_full(&self) -> bool {
        self.sta_full && self.lta_full
    }

    /// Micro threshold in force: adaptive when enabled, base otherwise.
    pub fn active_micro_threshold(&self) -> f64 {
        if self.adaptive_enabled {
            self.active.micro
        } else {
            self.bases.micro
        }
    }

    pub fn active_thresholds(&self) -> Thresholds {
        self.active
    }

    pub fn background_noise(&self) -> f64 {
        self.background_noise
    }

    pub fn sta_window(&self) -> usize {
        self.sta_buf.len()
    }

    pub fn lta_window(&self) -> usize {
        self.lta_buf.len()
    }

    /// Recompute adaptive thresholds every 30 s of sample time.
    fn adaptive_tick(&mut self, ts_mono_ms: u64) {
        let due = match self.last_adaptive_ms {
            None => true,
            Some(last) => ts_mono_ms.saturating_sub(last) >= ADAPTIVE_INTERVAL_SECS * 1_000,
        };
        if !due {
            return;
        }
        self.last_adaptive_ms = Some(ts_mono_ms);

        // The stored noise estimate is the raw LTA average; the 0.001 floor
        // applies only to the adaptive factor below
        self.background_noise = self.lta_average();
        let noise = self.background_noise.max(0.001);

        if !self.adaptive_enabled {
            return;
        }

        let factor =
            (1.0 + noise / THRESHOLD_MICRO_G).clamp(ADAPTIVE_FACTOR_MIN, ADAPTIVE_FACTOR_MAX);

        self.active = Thresholds {
            micro: Self::scaled(self.bases.micro, factor),
            light: Self::scaled(self.bases.light, factor),
            strong: Self::scaled(self.bases.strong, factor),
        };

        debug!(
            noise,
            factor,
            micro = self.active.micro,
            light = self.active.light,
            strong = self.active.strong,
            "Adaptive thresholds updated"
        );
    }

    /// Apply the adaptive factor with the per-threshold [0.5×, 3×] clamp.
    /// A NaN or non-positive result substitutes the base value.
    fn scaled(base: f64, factor: f64) -> f64 {
        let value = (base * factor).clamp(ADAPTIVE_FACTOR_MIN * base, ADAPTIVE_FACTOR_MAX * base);
        if value.is_nan() || value <= 0.0 {
            warn!(base, factor, "Adaptive threshold degenerate - using base");
            base
        } else {
            value
        }
    }

    /// Window-sum fidelity check used by tests and the drift monitor: the
    /// running sums must equal the sums of their buffers.
    #[cfg(test)]
    fn sums_consistent(&self) -> bool {
        let sta: f64 = self.sta_buf.iter().sum();
        let lta: f64 = self.lta_buf.iter().sum();
        (sta - self.sta_sum).abs() < 1e-9 && (lta - self.lta_sum).abs() < 1e-6
    }
}
