//! The sampler domain: fixed-rate acquisition and detection loop.
//!
//! Runs on a dedicated thread so the hot path never touches the async
//! runtime. Each period: read frame → apply calibration offsets → spike
//! filter → STA/LTA update → event assembly. The only out-edges are
//! non-blocking enqueues to the bounded sample/event/system queues.
//!
//! Calibration is a distinct mode of this loop: while `calibrate()` runs,
//! normal sampling is suspended by construction, never raced.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::acquisition::SensorDriver;
use crate::calibration::{CalibrationEngine, DriftVerdict};
use crate::clock::Clock;
use crate::config::defaults::{WATCHDOG_POLL_SECS, WATCHDOG_TRIP_SECS};
use crate::config::StationConfig;
use crate::detector::{
    AlgorithmSnapshot, EventAssembler, RecordBuilder, SpikeFilter, StaLtaDetector,
};
use crate::telemetry::StationCounters;
use crate::types::{Sample, SeismicRecord, SystemEvent, SystemEventKind};

use super::queues::DropRateMonitor;

/// Flags shared between the sampler thread and the async domain.
#[derive(Clone)]
pub struct SamplerShared {
    /// Monotonic ms of the last completed loop iteration (watchdog food).
    pub progress_ms: Arc<AtomicU64>,
    /// Set to request an on-demand calibration run.
    pub calibrate_request: Arc<AtomicBool>,
    /// Raised when the sample queue drop rate crosses the threshold.
    pub back_pressure: Arc<AtomicBool>,
}

impl SamplerShared {
    pub fn new() -> Self {
        Self {
            progress_ms: Arc::new(AtomicU64::new(0)),
            calibrate_request: Arc::new(AtomicBool::new(false)),
            back_pressure: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for SamplerShared {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Sampler {
    sensor: Box<dyn SensorDriver>,
    calibration: CalibrationEngine,
    spike: SpikeFilter,
    detector: StaLtaDetector,
    assembler: EventAssembler,
    builder: RecordBuilder,
    clock: Arc<Clock>,
    counters: Arc<StationCounters>,
    sample_tx: mpsc::Sender<Sample>,
    event_tx: mpsc::Sender<Box<SeismicRecord>>,
    system_tx: mpsc::Sender<SystemEvent>,
    drop_monitor: DropRateMonitor,
    shared: SamplerShared,
    cancel: CancellationToken,
    period: Duration,
    /// Components of the last good sample, reused on transient read errors.
    last_components: (f64, f64, f64),
}

impl Sampler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &StationConfig,
        sensor: Box<dyn SensorDriver>,
        calibration: CalibrationEngine,
        clock: Arc<Clock>,
        counters: Arc<StationCounters>,
        sample_tx: mpsc::Sender<Sample>,
        event_tx: mpsc::Sender<Box<SeismicRecord>>,
        system_tx: mpsc::Sender<SystemEvent>,
        shared: SamplerShared,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sensor,
            calibration,
            spike: SpikeFilter::new(),
            detector: StaLtaDetector::new(&config.detector),
            assembler: EventAssembler::new(config.detector.min_event_duration_ms),
            builder: RecordBuilder::new(
                config.station.id.clone(),
                config.sampling.rate_hz,
                config.detector.local_magnitude_offset,
            ),
            clock,
            counters,
            sample_tx,
            event_tx,
            system_tx,
            drop_monitor: DropRateMonitor::new(),
            shared,
            cancel,
            period: config.sample_period(),
            last_components: (0.0, 0.0, 0.0),
        }
    }

    /// Bring up the sensor and run the boot calibration.
    ///
    /// A non-responding sensor is fatal; a rejected calibration is not -
    /// detection proceeds with zero offsets and degraded record quality.
    pub fn begin(&mut self) -> Result<(), crate::acquisition::SensorError> {
        self.sensor.begin()?;
        info!(sensor = self.sensor.name(), "Sensor online");
        self.run_calibration();
        Ok(())
    }

    /// Spawn the loop on its dedicated thread.
    pub fn spawn(self) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("sampler".to_string())
            .spawn(move || self.run())
            .unwrap_or_else(|e| {
                // Thread spawn failure is unrecoverable at startup
                error!(error = %e, "Could not spawn sampler thread");
                std::process::abort();
            })
    }

    /// The fixed-rate loop. Exits cooperatively after the current period
    /// once the cancellation token is set.
    pub fn run(mut self) {
        info!(
            period_us = self.period.as_micros(),
            "Sampler loop started"
        );

        let mut next_deadline = Instant::now() + self.period;

        loop {
            if self.cancel.is_cancelled() {
                info!("Sampler loop stopping");
                break;
            }

            if self.shared.calibrate_request.swap(false, Ordering::Relaxed) {
                // Calibration replaces sampling for its duration
                self.run_calibration();
                next_deadline = Instant::now() + self.period;
                continue;
            }

            self.tick();

            let now = Instant::now();
            if next_deadline > now {
                std::thread::sleep(next_deadline - now);
            } else if now.duration_since(next_deadline) > Duration::from_secs(1) {
                // Fell far behind (debugger pause, clock jump): realign
                // instead of sprinting to catch up
                warn!("Sampler fell behind schedule - realigning");
                next_deadline = now;
            }
            next_deadline += self.period;
        }
    }

    /// One sampling period: acquire, calibrate, filter, detect, assemble.
    fn tick(&mut self) {
        let ts_mono_ms = self.clock.now_mono();
        self.shared.progress_ms.store(ts_mono_ms, Ordering::Relaxed);

        let sample = match self.sensor.read_frame() {
            Ok(raw) => {
                let calibration = self.calibration.snapshot();
                let (ax, ay, az) = calibration.apply(&raw);
                self.last_components = (ax, ay, az);
                Sample::new(ts_mono_ms, ax, ay, az)
            }
            Err(e) => {
                // Transient: keep cadence with the previous components and
                // a zero magnitude so the trigger state is not excited
                StationCounters::incr(&self.counters.sensor_read_errors);
                debug!(error = %e, "Sensor read failed - substituting last components");
                let (ax, ay, az) = self.last_components;
                Sample {
                    ts_mono_ms,
                    ax,
                    ay,
                    az,
                    magnitude: 0.0,
                }
            }
        };

        StationCounters::incr(&self.counters.total_samples);
        self.counters.set_last_magnitude(sample.magnitude);

        // Feed the sink; a full queue drops the new sample
        let dropped = match self.sample_tx.try_send(sample) {
            Ok(()) => false,
            Err(_) => {
                StationCounters::incr(&self.counters.samples_dropped);
                true
            }
        };
        if let Some(rate) = self.drop_monitor.record(ts_mono_ms, dropped) {
            self.push_system_event(
                SystemEventKind::QueueBackPressure,
                format!("sample drop rate {rate:.2}% over 10 s"),
            );
        }
        self.shared
            .back_pressure
            .store(self.drop_monitor.back_pressure(), Ordering::Relaxed);

        // Spike rejection shields the trigger state, not the median window
        if !self
            .spike
            .admit(sample.magnitude, self.detector.active_micro_threshold())
        {
            StationCounters::incr(&self.counters.spikes_filtered);
            return;
        }

        let triggered = self.detector.update(sample.magnitude, ts_mono_ms);

        if let Some(summary) = self.assembler.on_sample(&sample, triggered) {
            self.emit_event(&summary);
        }

        // Periodic drift check against the calibration baseline
        if self.detector.windows_full() {
            let verdict = self
                .calibration
                .drift_check(self.detector.lta_average(), ts_mono_ms);
            match verdict {
                Some(DriftVerdict::Warning { percent }) => self.push_system_event(
                    SystemEventKind::CalibrationDrift,
                    format!("baseline drift {percent:.1}%"),
                ),
                Some(DriftVerdict::Invalidated { percent }) => self.push_system_event(
                    SystemEventKind::CalibrationDrift,
                    format!("baseline drift {percent:.1}% - calibration invalidated"),
                ),
                _ => {}
            }
        }
    }

    fn emit_event(&mut self, summary: &crate::detector::EventSummary) {
        let algorithm = AlgorithmSnapshot {
            trigger_ratio: self.detector.trigger_ratio(),
            sta_window: self.detector.sta_window(),
            lta_window: self.detector.lta_window(),
            background_noise: self.detector.background_noise(),
        };
        let calibration = self.calibration.snapshot();

        match self
            .builder
            .build(summary, algorithm, &calibration, &self.clock)
        {
            Some(record) => {
                StationCounters::incr(&self.counters.events_detected);
                if self.event_tx.try_send(Box::new(record)).is_err() {
                    // Event queue full: the sink cannot keep up with a very
                    // active period; always worth a warning
                    StationCounters::incr(&self.counters.events_dropped);
                    warn!("Event queue full - record dropped");
                }
            }
            None => {
                StationCounters::incr(&self.counters.events_rejected_no_time);
                warn!(
                    duration_ms = summary.duration_ms,
                    max_mag = summary.max_mag,
                    "Event dropped: wall clock not synchronized"
                );
                self.push_system_event(
                    SystemEventKind::EventRejectedNoTime,
                    format!(
                        "event of {:.4} g over {} ms dropped without trusted time",
                        summary.max_mag, summary.duration_ms
                    ),
                );
            }
        }
    }

    /// Run the calibration procedure in place of sampling.
    fn run_calibration(&mut self) {
        match self.calibration.calibrate(self.sensor.as_mut(), &self.clock) {
            Ok(report) => {
                self.push_system_event(
                    SystemEventKind::CalibrationOk,
                    format!(
                        "offsets x={:.4} y={:.4} z={:.4}, baseline {:.4} g",
                        report.off_x, report.off_y, report.off_z, report.baseline_lta
                    ),
                );
            }
            Err(e) => {
                self.push_system_event(SystemEventKind::CalibrationFailed, e.to_string());
            }
        }
    }

    /// Best-effort system event; never blocks, dropped on a full queue.
    fn push_system_event(&self, kind: SystemEventKind, message: String) {
        let event = SystemEvent {
            ts_wall: self.clock.now_wall().unwrap_or(0),
            ts_mono_ms: self.clock.now_mono(),
            kind,
            message,
        };
        let _ = self.system_tx.try_send(event);
    }
}

/// Watchdog: trips fatally when the sampler makes no progress for 30 s.
/// Returns `true` when it tripped (the station must exit with an error so
/// the process supervisor resets it).
pub async fn watchdog(
    shared: SamplerShared,
    clock: Arc<Clock>,
    cancel: CancellationToken,
) -> bool {
    let mut ticker = tokio::time::interval(Duration::from_secs(WATCHDOG_POLL_SECS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            _ = ticker.tick() => {}
        }

        let last = shared.progress_ms.load(Ordering::Relaxed);
        if last == 0 {
            continue; // sampler not started yet
        }
        let now = clock.now_mono();
        if now.saturating_sub(last) > WATCHDOG_TRIP_SECS * 1_000 {
            error!(
                stalled_ms = now.saturating_sub(last),
                "Sampler watchdog tripped - requesting shutdown"
            );
            cancel.cancel();
            return true;
        }
    }
}
