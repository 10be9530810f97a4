//! Detection-chain scenario tests.
//!
//! Wires the spike filter, STA/LTA detector, event assembler, and record
//! builder exactly as the sampler does, then drives the chain with scripted
//! magnitude streams: quiet noise, isolated impulses, sustained shaking,
//! and unsynchronized-clock operation.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::sync::Arc;

use seismo_station::calibration::{CalibrationEngine, DriftVerdict};
use seismo_station::clock::Clock;
use seismo_station::config::{CalibrationSection, DetectorSection};
use seismo_station::detector::{
    AlgorithmSnapshot, EventAssembler, RecordBuilder, SpikeFilter, StaLtaDetector,
};
use seismo_station::types::{Sample, SeismicRecord};
use seismo_station::Calibration;

/// The sampler's detection chain, minus the I/O.
struct DetectionHarness {
    spike: SpikeFilter,
    detector: StaLtaDetector,
    assembler: EventAssembler,
    builder: RecordBuilder,
    clock: Arc<Clock>,
    calibration: Calibration,
    ts_step_ms: u64,
    ts_ms: u64,
    triggers: u64,
    was_triggered: bool,
    spikes_filtered: u64,
    events_rejected_no_time: u64,
    records: Vec<SeismicRecord>,
}

impl DetectionHarness {
    fn new(detector_cfg: &DetectorSection, clock: Arc<Clock>, ts_step_ms: u64) -> Self {
        Self {
            spike: SpikeFilter::new(),
            detector: StaLtaDetector::new(detector_cfg),
            assembler: EventAssembler::new(detector_cfg.min_event_duration_ms),
            builder: RecordBuilder::new("TEST".to_string(), 500, 0.0),
            clock,
            calibration: Calibration {
                off_x: 0.0,
                off_y: 0.0,
                off_z: 1.0,
                baseline_lta: 1e-4,
                created_at_mono_ms: 0,
                valid: true,
            },
            ts_step_ms,
            ts_ms: 0,
            triggers: 0,
            was_triggered: false,
            spikes_filtered: 0,
            events_rejected_no_time: 0,
            records: Vec::new(),
        }
    }

    /// Feed one magnitude through the chain, as the sampler tick does.
    fn feed(&mut self, magnitude: f64) {
        self.ts_ms += self.ts_step_ms;
        let sample = Sample::new(self.ts_ms, magnitude, 0.0, 0.0);

        if !self
            .spike
            .admit(sample.magnitude, self.detector.active_micro_threshold())
        {
            self.spikes_filtered += 1;
            return;
        }

        let triggered = self.detector.update(sample.magnitude, self.ts_ms);
        if triggered && !self.was_triggered {
            self.triggers += 1;
        }
        self.was_triggered = triggered;

        if let Some(summary) = self.assembler.on_sample(&sample, triggered) {
            let algorithm = AlgorithmSnapshot {
                trigger_ratio: self.detector.trigger_ratio(),
                sta_window: self.detector.sta_window(),
                lta_window: self.detector.lta_window(),
                background_noise: self.detector.background_noise(),
            };
            match self
                .builder
                .build(&summary, algorithm, &self.calibration, &self.clock)
            {
                Some(record) => self.records.push(record),
                None => self.events_rejected_no_time += 1,
            }
        }
    }

    fn feed_many(&mut self, magnitudes: impl IntoIterator<Item = f64>) {
        for m in magnitudes {
            self.feed(m);
        }
    }
}

fn trusted_clock() -> Arc<Clock> {
    let clock = Clock::new(3_600);
    assert!(clock.record_sync(1_700_000_000));
    clock
}

fn gaussian_magnitudes(sigma: f64, count: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Normal::new(0.0, sigma).unwrap();
    (0..count).map(|_| dist.sample(&mut rng).abs()).collect()
}

#[test]
fn s1_quiet_noise_never_triggers() {
    // Wide timestamp steps so several adaptive ticks land inside the run
    let mut harness =
        DetectionHarness::new(&DetectorSection::default(), trusted_clock(), 10);

    harness.feed_many(gaussian_magnitudes(1e-4, 10_000, 101));

    assert_eq!(harness.triggers, 0, "quiet noise must not trigger");
    assert!(harness.records.is_empty());
    assert!(
        harness.spikes_filtered <= 5,
        "spikes_filtered = {}",
        harness.spikes_filtered
    );
    // The background noise estimate settles near the folded-normal mean
    let noise = harness.detector.background_noise();
    assert!(
        noise > 0.0 && noise <= 3.0 * 1e-4,
        "background noise {noise} outside 3 sigma"
    );
}

#[test]
fn s2_isolated_impulse_filtered_not_triggered() {
    let mut harness =
        DetectionHarness::new(&DetectorSection::default(), trusted_clock(), 2);

    harness.feed_many(std::iter::repeat(1e-4).take(3_000));
    harness.feed(0.5); // the impulse
    harness.feed_many(std::iter::repeat(1e-4).take(3_000));

    assert_eq!(harness.spikes_filtered, 1);
    assert_eq!(harness.triggers, 0);
    assert!(harness.records.is_empty());
}

#[test]
fn s3_sustained_shake_emits_one_event() {
    let mut harness =
        DetectionHarness::new(&DetectorSection::default(), trusted_clock(), 2);

    // Warm both windows at the quiet level
    harness.feed_many(std::iter::repeat(1e-4).take(3_000));

    // 500 samples of sustained shaking in [0.02, 0.04] g
    let mut rng = StdRng::seed_from_u64(33);
    let shake: Vec<f64> = (0..500)
        .map(|_| rand::Rng::gen_range(&mut rng, 0.02..=0.04))
        .collect();
    harness.feed_many(shake);

    // Quiet tail lets the STA decay and the event close
    harness.feed_many(std::iter::repeat(1e-4).take(1_000));

    assert_eq!(harness.triggers, 1, "expected exactly one trigger");
    assert_eq!(harness.records.len(), 1, "expected exactly one record");

    let record = &harness.records[0];
    assert!(
        record.measurements.duration_ms >= 1_000,
        "duration {} ms",
        record.measurements.duration_ms
    );
    assert!(record.sensor_data.max_ax <= 0.04 + 1e-9);
    assert!(record.measurements.pga_g <= 0.04 + 1e-9);
    // 0.02-0.04 g maps to Richter ~2.3-2.6 on the PGA model
    assert!(record.measurements.richter > 2.0 && record.measurements.richter < 3.0);
    assert!(record.detection.ntp_validated);
    assert!(record.detection.ts_wall >= 1_577_836_800);
}

#[test]
fn s4_no_trusted_time_drops_records() {
    let untrusted = Clock::new(3_600); // never synced
    let mut harness = DetectionHarness::new(&DetectorSection::default(), untrusted, 2);

    harness.feed_many(std::iter::repeat(1e-4).take(3_000));
    let mut rng = StdRng::seed_from_u64(44);
    let shake: Vec<f64> = (0..500)
        .map(|_| rand::Rng::gen_range(&mut rng, 0.02..=0.04))
        .collect();
    harness.feed_many(shake);
    harness.feed_many(std::iter::repeat(1e-4).take(1_000));

    assert_eq!(harness.triggers, 1, "detector still runs without time");
    assert!(harness.records.is_empty(), "no record may be persisted");
    assert_eq!(harness.events_rejected_no_time, 1);
}

#[test]
fn steady_then_doubled_magnitude_triggers_exactly_once() {
    // Hold a magnitude at the micro threshold for the full LTA window, then
    // double it for well past the STA window
    let cfg = DetectorSection::default();
    let mut harness = DetectionHarness::new(&cfg, trusted_clock(), 2);

    harness.feed_many(std::iter::repeat(0.001).take(cfg.lta_window + 100));
    harness.feed_many(std::iter::repeat(0.004).take(cfg.sta_window * 8));
    harness.feed_many(std::iter::repeat(0.001).take(cfg.lta_window / 2));

    assert_eq!(harness.triggers, 1);
    assert_eq!(harness.records.len(), 1);
}

#[test]
fn s6_baseline_drift_invalidates_calibration_and_degrades_records() {
    use seismo_station::acquisition::{SensorDriver, SyntheticSensor};

    let clock = trusted_clock();
    let mut engine = CalibrationEngine::unpaced(CalibrationSection::default());
    let mut sensor = SyntheticSensor::quiet(1e-4, 55);
    sensor.begin().unwrap();

    let report = engine.calibrate(&mut sensor, &clock).unwrap();
    let baseline = report.baseline_lta;
    assert!(engine.snapshot().valid);

    // +30% drift after the first interval: warning only
    let verdict = engine.drift_check(baseline * 1.3, 301_000).unwrap();
    assert!(matches!(verdict, DriftVerdict::Warning { .. }));
    assert!(engine.snapshot().valid);

    // +60% drift later: invalidation
    let verdict = engine.drift_check(baseline * 1.6, 602_000).unwrap();
    assert!(matches!(verdict, DriftVerdict::Invalidated { .. }));
    let snapshot = engine.snapshot();
    assert!(!snapshot.valid);

    // Subsequent records carry the degraded calibration state
    let mut builder = RecordBuilder::new("TEST".to_string(), 500, 0.0);
    let summary = seismo_station::detector::EventSummary {
        start_ts_mono: 700_000,
        end_ts_mono: 702_000,
        duration_ms: 2_000,
        max_mag: 0.03,
        avg_mag: 0.025,
        sample_count: 1_000,
        max_ax: 0.03,
        max_ay: 0.0,
        max_az: 0.0,
    };
    let algorithm = AlgorithmSnapshot {
        trigger_ratio: 4.0,
        sta_window: 25,
        lta_window: 2_500,
        background_noise: baseline,
    };
    let record = builder
        .build(&summary, algorithm, &snapshot, &clock)
        .unwrap();
    assert!(!record.sensor_data.calibration_valid);
    assert_eq!(record.metadata.data_quality, "good");
}
