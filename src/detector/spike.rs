//! Spike filter: rejects isolated impulse samples.
//!
//! A sample is a spike only when it exceeds BOTH 5× the median of the last
//! five magnitudes AND 2× the active micro threshold. Rejected samples still
//! enter the median window (so a sustained shake raises the median and passes
//! after a few samples) but are withheld from the trigger state.

use std::collections::VecDeque;

use crate::config::defaults::{SPIKE_MEDIAN_FACTOR, SPIKE_THRESHOLD_FACTOR, SPIKE_WINDOW};

pub struct SpikeFilter {
    window: VecDeque<f64>,
}

impl SpikeFilter {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(SPIKE_WINDOW),
        }
    }

    /// Evaluate one magnitude against the rolling median.
    ///
    /// Returns `true` when the sample is admitted to downstream processing.
    /// During warm-up (fewer than five magnitudes seen) nothing is filtered.
    pub fn admit(&mut self, magnitude: f64, active_micro_threshold: f64) -> bool {
        let admitted = if self.window.len() < SPIKE_WINDOW {
            true
        } else {
            let median = self.median();
            !(magnitude > SPIKE_MEDIAN_FACTOR * median
                && magnitude > SPIKE_THRESHOLD_FACTOR * active_micro_threshold)
        };

        if self.window.len() == SPIKE_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(magnitude);

        admitted
    }

    /// Median of the full window. Stack-only: the hot path never allocates.
    fn median(&self) -> f64 {
        let mut sorted = [0.0f64; SPIKE_WINDOW];
        for (slot, m) in sorted.iter_mut().zip(self.window.iter()) {
            *slot = *m;
        }
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted[SPIKE_WINDOW / 2]
    }
}

impl Default for SpikeFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MICRO: f64 = 0.001;

    fn warmed_filter(level: f64) -> SpikeFilter {
        let mut filter = SpikeFilter::new();
        for _ in 0..SPIKE_WINDOW {
            assert!(filter.admit(level, MICRO));
        }
        filter
    }

    #[test]
    fn warm_up_admits_everything() {
        let mut filter = SpikeFilter::new();
        for _ in 0..SPIKE_WINDOW {
            assert!(filter.admit(10.0, MICRO));
        }
    }

    #[test]
    fn isolated_impulse_rejected() {
        let mut filter = warmed_filter(1e-4);
        // 0.5 g against a 1e-4 g median: > 5× median and > 2× micro
        assert!(!filter.admit(0.5, MICRO));
        // Quiet samples keep flowing afterwards
        assert!(filter.admit(1e-4, MICRO));
        assert!(filter.admit(1e-4, MICRO));
    }

    #[test]
    fn small_bump_below_threshold_gate_passes() {
        let mut filter = warmed_filter(1e-4);
        // 10× the median but below 2× micro threshold: not a spike
        assert!(filter.admit(0.0015, MICRO));
    }

    #[test]
    fn sustained_shake_passes_after_median_rises() {
        let mut filter = warmed_filter(1e-4);
        let mut rejected = 0;
        let mut first_admitted = None;
        for i in 0..10 {
            if filter.admit(0.03, MICRO) {
                if first_admitted.is_none() {
                    first_admitted = Some(i);
                }
            } else {
                rejected += 1;
            }
        }
        // The first few shake samples look like impulses; once the median
        // window contains three of them the rest are admitted.
        assert!(rejected <= 3, "rejected {rejected}");
        assert!(first_admitted.unwrap() <= 3);
        assert!(filter.admit(0.03, MICRO));
    }

    #[test]
    fn noise_never_filtered() {
        let mut filter = warmed_filter(1e-4);
        for i in 0..1_000 {
            let m = 1e-4 * (1.0 + 0.5 * f64::from(i % 7) / 7.0);
            assert!(filter.admit(m, MICRO), "sample {i} filtered");
        }
    }
}
