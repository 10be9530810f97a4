//! Event assembler: turns sustained trigger intervals into seismic records.
//!
//! State machine:
//!
//! ```text
//!   IDLE ── trigger=true ──► ACTIVE
//!   ACTIVE ── admitted, trigger=true ──► ACTIVE (accumulate)
//!   ACTIVE ── admitted, trigger=false ─► if (now − start ≥ MIN_EVENT_DURATION)
//!                                           emit → IDLE
//!                                        else → ACTIVE (wait)
//! ```
//!
//! At most one active event exists at any moment. Wall-clock stamping happens
//! at emit time through the station clock; when the clock is untrusted the
//! record is dropped and counted, never persisted or broadcast.

use tracing::{debug, info};

use crate::calibration::Calibration;
use crate::clock::Clock;
use crate::config::defaults::{
    DETECTOR_CONFIDENCE, PROCESSING_VERSION, SIMULATION_CONFIDENCE,
};
use crate::detector::magnitude;
use crate::types::{
    Algorithm, Classification, Detection, EventClass, Measurements, RecordMetadata, Sample,
    SeismicRecord, SensorData,
};

/// Accumulated statistics for the event currently in progress.
#[derive(Debug, Clone, Copy)]
struct ActiveEvent {
    start_ts_mono: u64,
    last_ts_mono: u64,
    max_mag: f64,
    sum_mag: f64,
    sample_count: u64,
    max_ax: f64,
    max_ay: f64,
    max_az: f64,
}

/// Aggregate handed to the record builder when an event ends.
#[derive(Debug, Clone, Copy)]
pub struct EventSummary {
    pub start_ts_mono: u64,
    pub end_ts_mono: u64,
    pub duration_ms: u64,
    pub max_mag: f64,
    pub avg_mag: f64,
    pub sample_count: u64,
    pub max_ax: f64,
    pub max_ay: f64,
    pub max_az: f64,
}

pub struct EventAssembler {
    active: Option<ActiveEvent>,
    min_duration_ms: u64,
}

impl EventAssembler {
    pub fn new(min_duration_ms: u64) -> Self {
        Self {
            active: None,
            min_duration_ms,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Feed one admitted sample together with the current trigger state.
    /// Returns an [`EventSummary`] when an event just ended.
    pub fn on_sample(&mut self, sample: &Sample, triggered: bool) -> Option<EventSummary> {
        match (&mut self.active, triggered) {
            (None, false) => None,
            (None, true) => {
                debug!(
                    ts_mono_ms = sample.ts_mono_ms,
                    magnitude = sample.magnitude,
                    "Event started"
                );
                self.active = Some(ActiveEvent {
                    start_ts_mono: sample.ts_mono_ms,
                    last_ts_mono: sample.ts_mono_ms,
                    max_mag: sample.magnitude,
                    sum_mag: sample.magnitude,
                    sample_count: 1,
                    max_ax: sample.ax.abs(),
                    max_ay: sample.ay.abs(),
                    max_az: sample.az.abs(),
                });
                None
            }
            (Some(event), true) => {
                event.last_ts_mono = sample.ts_mono_ms;
                event.max_mag = event.max_mag.max(sample.magnitude);
                event.sum_mag += sample.magnitude;
                event.sample_count += 1;
                event.max_ax = event.max_ax.max(sample.ax.abs());
                event.max_ay = event.max_ay.max(sample.ay.abs());
                event.max_az = event.max_az.max(sample.az.abs());
                None
            }
            (Some(event), false) => {
                let duration = sample.ts_mono_ms.saturating_sub(event.start_ts_mono);
                if duration < self.min_duration_ms {
                    // Too short to emit yet; stay active and wait
                    return None;
                }
                let summary = EventSummary {
                    start_ts_mono: event.start_ts_mono,
                    end_ts_mono: sample.ts_mono_ms,
                    duration_ms: duration,
                    max_mag: event.max_mag,
                    avg_mag: event.sum_mag / event.sample_count as f64,
                    sample_count: event.sample_count,
                    max_ax: event.max_ax,
                    max_ay: event.max_ay,
                    max_az: event.max_az,
                };
                self.active = None;
                debug!(
                    duration_ms = summary.duration_ms,
                    max_mag = summary.max_mag,
                    samples = summary.sample_count,
                    "Event ended"
                );
                Some(summary)
            }
        }
    }
}

/// Detector state snapshot captured into the record's algorithm block.
#[derive(Debug, Clone, Copy)]
pub struct AlgorithmSnapshot {
    pub trigger_ratio: f64,
    pub sta_window: usize,
    pub lta_window: usize,
    pub background_noise: f64,
}

/// Builds enriched [`SeismicRecord`]s from event summaries.
pub struct RecordBuilder {
    station_id: String,
    sample_rate_hz: u32,
    local_magnitude_offset: f64,
    event_seq: u64,
}

impl RecordBuilder {
    pub fn new(station_id: String, sample_rate_hz: u32, local_magnitude_offset: f64) -> Self {
        Self {
            station_id,
            sample_rate_hz,
            local_magnitude_offset,
            event_seq: 0,
        }
    }

    /// Build the durable record for a detector-produced event.
    ///
    /// Returns `None` when the wall clock is not trusted; the caller counts
    /// and logs the rejection. The wall timestamp is taken at emit time, not
    /// event start.
    pub fn build(
        &mut self,
        summary: &EventSummary,
        algorithm: AlgorithmSnapshot,
        calibration: &Calibration,
        clock: &Clock,
    ) -> Option<SeismicRecord> {
        if !clock.trusted() {
            return None;
        }
        let ts_wall = clock.now_wall()?;
        let source = self.station_id.clone();

        let record = self.assemble(
            ts_wall,
            clock.now_mono(),
            summary.max_mag,
            summary.duration_ms,
            DETECTOR_CONFIDENCE,
            summary.max_ax,
            summary.max_ay,
            summary.max_az,
            algorithm,
            calibration,
            &source,
        );

        info!(
            event_id = %record.event_id,
            class = %record.classification.event_type,
            richter = record.measurements.richter,
            duration_ms = record.measurements.duration_ms,
            "Seismic record built"
        );
        Some(record)
    }

    /// Build a record for the simulator path: magnitude and duration come
    /// from the inverse model instead of the live detector.
    pub fn simulate(
        &mut self,
        richter: f64,
        calibration: &Calibration,
        clock: &Clock,
    ) -> Option<SeismicRecord> {
        if !clock.trusted() {
            return None;
        }
        let ts_wall = clock.now_wall()?;
        let pga = magnitude::pga_from_richter(richter, self.local_magnitude_offset);
        let duration_ms = magnitude::synthetic_duration_ms(richter);
        let axis = pga / 3f64.sqrt();

        let algorithm = AlgorithmSnapshot {
            trigger_ratio: 0.0,
            sta_window: 0,
            lta_window: 0,
            background_noise: 0.0,
        };

        let mut record = self.assemble(
            ts_wall,
            clock.now_mono(),
            pga,
            duration_ms,
            SIMULATION_CONFIDENCE,
            axis,
            axis,
            axis,
            algorithm,
            calibration,
            "simulation",
        );
        record.metadata.filter_applied = false;
        Some(record)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &mut self,
        ts_wall: u64,
        boot_time_ms: u64,
        pga_g: f64,
        duration_ms: u64,
        confidence: f64,
        max_ax: f64,
        max_ay: f64,
        max_az: f64,
        algorithm: AlgorithmSnapshot,
        calibration: &Calibration,
        source: &str,
    ) -> SeismicRecord {
        self.event_seq += 1;

        let richter = magnitude::richter(pga_g, self.local_magnitude_offset);
        let class = EventClass::from_richter(richter);
        let calibration_valid = calibration.valid;

        SeismicRecord {
            event_id: format!("evt_{ts_wall}_{:04}", self.event_seq),
            detection: Detection {
                ts_wall,
                iso_wall: Clock::format_iso(ts_wall),
                ntp_validated: true,
                boot_time_ms,
            },
            classification: Classification {
                event_type: class,
                intensity_level: class.intensity_level(),
                richter_range: class.richter_range().to_string(),
                confidence,
            },
            measurements: Measurements {
                pga_g,
                richter,
                local_magnitude: magnitude::local_magnitude(pga_g, self.local_magnitude_offset),
                duration_ms,
                peak_frequency_hz: magnitude::peak_frequency_hz(pga_g),
                energy_joules: magnitude::energy_joules(richter),
            },
            sensor_data: SensorData {
                max_ax,
                max_ay,
                max_az,
                vector_magnitude: pga_g,
                calibration_valid,
                calibration_age_hours: calibration.age_hours(boot_time_ms),
            },
            algorithm: Algorithm {
                method: "STA_LTA".to_string(),
                trigger_ratio: algorithm.trigger_ratio,
                sta_window: algorithm.sta_window,
                lta_window: algorithm.lta_window,
                background_noise: algorithm.background_noise,
            },
            metadata: RecordMetadata {
                source: source.to_string(),
                processing_version: PROCESSING_VERSION.to_string(),
                sample_rate_hz: self.sample_rate_hz,
                filter_applied: true,
                data_quality: if calibration_valid {
                    "excellent".to_string()
                } else {
                    "good".to_string()
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Calibration;

    fn sample(ts: u64, mag: f64) -> Sample {
        Sample {
            ts_mono_ms: ts,
            ax: mag,
            ay: 0.0,
            az: 0.0,
            magnitude: mag,
        }
    }

    fn trusted_clock() -> std::sync::Arc<Clock> {
        let clock = Clock::new(3_600);
        clock.record_sync(1_700_000_000);
        clock
    }

    #[test]
    fn idle_stays_idle_without_trigger() {
        let mut asm = EventAssembler::new(100);
        assert!(asm.on_sample(&sample(0, 0.001), false).is_none());
        assert!(!asm.is_active());
    }

    #[test]
    fn event_accumulates_and_emits() {
        let mut asm = EventAssembler::new(100);
        assert!(asm.on_sample(&sample(1_000, 0.02), true).is_none());
        assert!(asm.is_active());
        for i in 1..100u64 {
            assert!(asm.on_sample(&sample(1_000 + i * 2, 0.03), true).is_none());
        }
        let summary = asm
            .on_sample(&sample(1_250, 0.001), false)
            .expect("event should emit");
        assert_eq!(summary.start_ts_mono, 1_000);
        assert_eq!(summary.duration_ms, 250);
        assert!((summary.max_mag - 0.03).abs() < 1e-12);
        assert_eq!(summary.sample_count, 100);
        assert!(!asm.is_active());
    }

    #[test]
    fn short_burst_waits_for_min_duration() {
        let mut asm = EventAssembler::new(100);
        asm.on_sample(&sample(0, 0.05), true);
        asm.on_sample(&sample(20, 0.05), true);
        // Trigger drops before 100 ms: no emit, event stays active
        assert!(asm.on_sample(&sample(40, 0.001), false).is_none());
        assert!(asm.is_active());
        // Once 100 ms elapse since start the pending event flushes
        let summary = asm.on_sample(&sample(120, 0.001), false).unwrap();
        assert!(summary.duration_ms >= 100);
    }

    #[test]
    fn only_one_active_event() {
        let mut asm = EventAssembler::new(100);
        asm.on_sample(&sample(0, 0.05), true);
        asm.on_sample(&sample(2, 0.08), true);
        assert!(asm.is_active());
        // A second trigger start while active only accumulates
        asm.on_sample(&sample(4, 0.09), true);
        let summary = asm.on_sample(&sample(200, 0.001), false).unwrap();
        assert_eq!(summary.sample_count, 3);
    }

    #[test]
    fn record_rejected_without_trusted_clock() {
        let clock = Clock::new(3_600); // never synced
        let calibration = Calibration::invalid_default();
        let mut builder = RecordBuilder::new("TEST".to_string(), 500, 0.0);
        let summary = EventSummary {
            start_ts_mono: 0,
            end_ts_mono: 500,
            duration_ms: 500,
            max_mag: 0.03,
            avg_mag: 0.02,
            sample_count: 250,
            max_ax: 0.03,
            max_ay: 0.0,
            max_az: 0.0,
        };
        let algorithm = AlgorithmSnapshot {
            trigger_ratio: 2.5,
            sta_window: 25,
            lta_window: 2_500,
            background_noise: 1e-4,
        };
        assert!(builder
            .build(&summary, algorithm, &calibration, &clock)
            .is_none());
    }

    #[test]
    fn record_fields_populated_when_trusted() {
        let clock = trusted_clock();
        let calibration = Calibration::invalid_default();
        let mut builder = RecordBuilder::new("TEST".to_string(), 500, 0.0);
        let summary = EventSummary {
            start_ts_mono: 0,
            end_ts_mono: 1_200,
            duration_ms: 1_200,
            max_mag: 0.03,
            avg_mag: 0.025,
            sample_count: 600,
            max_ax: 0.02,
            max_ay: 0.02,
            max_az: 0.01,
        };
        let algorithm = AlgorithmSnapshot {
            trigger_ratio: 5.1,
            sta_window: 25,
            lta_window: 2_500,
            background_noise: 1e-4,
        };
        let record = builder
            .build(&summary, algorithm, &calibration, &clock)
            .unwrap();

        assert!(record.detection.ntp_validated);
        assert!(record.detection.ts_wall >= 1_700_000_000);
        assert_eq!(record.measurements.duration_ms, 1_200);
        assert!((record.measurements.pga_g - 0.03).abs() < 1e-12);
        // 0.03 g -> richter ≈ log10(294.2) ≈ 2.47 -> Minor
        assert_eq!(record.classification.event_type, EventClass::Minor);
        assert_eq!(record.classification.intensity_level, 2);
        assert!((record.classification.confidence - 0.95).abs() < 1e-12);
        // Invalid calibration degrades quality
        assert_eq!(record.metadata.data_quality, "good");
        assert_eq!(record.algorithm.method, "STA_LTA");
    }

    #[test]
    fn simulated_light_event() {
        let clock = trusted_clock();
        let calibration = Calibration::invalid_default();
        let mut builder = RecordBuilder::new("TEST".to_string(), 500, 0.0);

        let record = builder.simulate(4.0, &calibration, &clock).unwrap();
        assert_eq!(record.classification.event_type, EventClass::Light);
        assert!((record.measurements.richter - 4.0).abs() < 0.05);
        assert!(record.measurements.duration_ms.abs_diff(5_000) < 500);
        assert!((record.classification.confidence - 0.80).abs() < 1e-12);
        assert_eq!(record.metadata.source, "simulation");
    }

    #[test]
    fn event_ids_are_unique_per_builder() {
        let clock = trusted_clock();
        let calibration = Calibration::invalid_default();
        let mut builder = RecordBuilder::new("TEST".to_string(), 500, 0.0);
        let a = builder.simulate(3.0, &calibration, &clock).unwrap();
        let b = builder.simulate(3.0, &calibration, &clock).unwrap();
        assert_ne!(a.event_id, b.event_id);
    }
}
