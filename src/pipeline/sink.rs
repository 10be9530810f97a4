//! The sink domain: single consumer for samples, events, and system events.
//!
//! Drains the bounded queues (cancellation-aware, so shutdown is never
//! blocked on an empty queue), maintains the rolling sensor summary, and
//! forwards to the three I/O surfaces: persistence (rate-limited), broker
//! (per event, retained), and the broadcast hub (adaptive rate). Never
//! feeds anything back to the sampler; the queues are the only
//! cross-domain channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::BroadcastHub;
use crate::broker::{topics, BrokerClient};
use crate::calibration::CalibrationHandle;
use crate::clock::Clock;
use crate::config::defaults::{
    BROADCAST_AVERAGE_WINDOW, SINK_DRAIN_DEADLINE_MS, SUMMARY_PERSIST_MAX_HZ,
};
use crate::storage::RecordStore;
use crate::telemetry::StationCounters;
use crate::types::{Sample, SampleSummary, SeismicRecord, SystemEvent};

pub struct EventSink {
    pub sample_rx: mpsc::Receiver<Sample>,
    pub event_rx: mpsc::Receiver<Box<SeismicRecord>>,
    pub system_rx: mpsc::Receiver<SystemEvent>,
    pub store: Arc<RecordStore>,
    pub broker: Arc<dyn BrokerClient>,
    pub hub: Arc<BroadcastHub>,
    pub clock: Arc<Clock>,
    pub counters: Arc<StationCounters>,
    pub calibration: CalibrationHandle,
    pub station_id: String,
}

/// Consumer-side statistics reported at shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct SinkStats {
    pub samples_consumed: u64,
    pub events_consumed: u64,
    pub system_events_consumed: u64,
    pub summaries_persisted: u64,
    pub broadcasts_sent: u64,
}

impl std::fmt::Display for SinkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sink: {} samples, {} events, {} system events, {} summaries persisted, {} broadcasts",
            self.samples_consumed,
            self.events_consumed,
            self.system_events_consumed,
            self.summaries_persisted,
            self.broadcasts_sent
        )
    }
}

impl EventSink {
    /// Run until cancelled, then drain both queues within the 1 s deadline.
    pub async fn run(mut self, cancel: CancellationToken) -> SinkStats {
        info!("Event sink started");

        let mut stats = SinkStats::default();
        let mut window: VecDeque<Sample> = VecDeque::with_capacity(BROADCAST_AVERAGE_WINDOW);
        let mut last_broadcast_ms = 0u64;
        let mut last_summary_ms = 0u64;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.drain(&mut stats, &mut window).await;
                    info!(%stats, "Event sink stopped");
                    return stats;
                }

                maybe_event = self.event_rx.recv() => {
                    match maybe_event {
                        Some(record) => {
                            self.handle_event(&record, &mut stats).await;
                        }
                        None => {
                            // Producer gone; drain samples then leave
                            self.drain(&mut stats, &mut window).await;
                            info!(%stats, "Event sink stopped (producer closed)");
                            return stats;
                        }
                    }
                }

                maybe_system = self.system_rx.recv() => {
                    if let Some(event) = maybe_system {
                        self.handle_system(&event, &mut stats);
                    }
                }

                maybe_sample = self.sample_rx.recv() => {
                    if let Some(sample) = maybe_sample {
                        self.handle_sample(
                            sample,
                            &mut window,
                            &mut last_broadcast_ms,
                            &mut last_summary_ms,
                            &mut stats,
                        )
                        .await;
                    }
                }
            }
        }
    }

    async fn handle_sample(
        &mut self,
        sample: Sample,
        window: &mut VecDeque<Sample>,
        last_broadcast_ms: &mut u64,
        last_summary_ms: &mut u64,
        stats: &mut SinkStats,
    ) {
        stats.samples_consumed += 1;

        if window.len() == BROADCAST_AVERAGE_WINDOW {
            window.pop_front();
        }
        window.push_back(sample);

        let now_ms = self.clock.now_mono();

        // Adaptive broadcast of the averaged window
        let interval = self.hub.adaptive_interval().await;
        if *last_broadcast_ms == 0
            || now_ms.saturating_sub(*last_broadcast_ms) >= interval.as_millis() as u64
        {
            *last_broadcast_ms = now_ms;
            let summary = summarize(window);
            let payload = self.sensor_payload(&summary, sample.ts_mono_ms);
            self.hub.broadcast_sample(&payload, now_ms).await;
            stats.broadcasts_sent += 1;
        }

        // Persist the rolling summary at no more than 1 Hz
        let min_persist_gap_ms = 1_000 / u64::from(SUMMARY_PERSIST_MAX_HZ.max(1));
        if *last_summary_ms == 0 || now_ms.saturating_sub(*last_summary_ms) >= min_persist_gap_ms {
            if let Some(ts_wall) = self.clock.now_wall() {
                *last_summary_ms = now_ms;
                let summary = summarize(window);
                if let Err(e) = self.store.append_summary(&summary, ts_wall) {
                    warn!(error = %e, "Summary persistence failed");
                } else {
                    stats.summaries_persisted += 1;
                }
            }
        }
    }

    async fn handle_event(&self, record: &SeismicRecord, stats: &mut SinkStats) {
        stats.events_consumed += 1;
        debug!(event_id = %record.event_id, "Sink consuming event record");

        // Persistence: full record plus the legacy flat projection
        if let Err(e) = self.store.append_seismic(record) {
            warn!(error = %e, "Seismic record persistence failed");
        }
        if let Err(e) = self.store.append_flat_event(&record.flat_event()) {
            warn!(error = %e, "Flat event persistence failed");
        }

        // Broker: retained so late subscribers see the latest event
        match serde_json::to_string(record) {
            Ok(payload) => {
                if let Err(e) = self
                    .broker
                    .publish(&topics::event(&self.station_id), &payload, true)
                    .await
                {
                    warn!(error = %e, "Event publish dropped");
                }
            }
            Err(e) => warn!(error = %e, "Record serialization failed"),
        }

        // Push channel
        let flat = record.flat_event();
        let payload = serde_json::json!({
            "type": "seismic_event",
            "event_type": record.classification.event_type,
            "magnitude": flat.magnitude,
            "level": flat.level,
            "timestamp": record.detection.boot_time_ms,
            "ntp_timestamp": record.detection.ts_wall,
        });
        self.hub.broadcast_event(&payload.to_string()).await;
    }

    fn handle_system(&self, event: &SystemEvent, stats: &mut SinkStats) {
        stats.system_events_consumed += 1;
        if let Err(e) = self.store.append_system(event) {
            warn!(error = %e, "System event persistence failed");
        }
    }

    /// Drain both queues with a deadline, then return.
    async fn drain(&mut self, stats: &mut SinkStats, window: &mut VecDeque<Sample>) {
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(SINK_DRAIN_DEADLINE_MS);

        loop {
            if tokio::time::Instant::now() >= deadline {
                warn!("Sink drain deadline reached with messages pending");
                return;
            }

            let mut drained_any = false;
            while let Ok(record) = self.event_rx.try_recv() {
                self.handle_event(&record, stats).await;
                drained_any = true;
            }
            while let Ok(event) = self.system_rx.try_recv() {
                self.handle_system(&event, stats);
                drained_any = true;
            }
            while let Ok(sample) = self.sample_rx.try_recv() {
                stats.samples_consumed += 1;
                if window.len() == BROADCAST_AVERAGE_WINDOW {
                    window.pop_front();
                }
                window.push_back(sample);
                drained_any = true;
            }

            if !drained_any {
                return;
            }
        }
    }

    fn sensor_payload(&self, summary: &SampleSummary, sensor_ts_ms: u64) -> String {
        let calibration = self.calibration.snapshot();
        serde_json::json!({
            "type": "sensor_data",
            "timestamp": self.clock.now_mono(),
            "accel_x": summary.mean_ax,
            "accel_y": summary.mean_ay,
            "accel_z": summary.mean_az,
            "magnitude": summary.mean_magnitude,
            "max_magnitude": summary.max_magnitude,
            "sensor_timestamp": sensor_ts_ms,
            "samples_averaged": summary.samples_averaged,
            "calibrated": calibration.valid,
            "events_detected": self.counters.snapshot().events_detected,
        })
        .to_string()
    }
}

/// Mean per axis plus mean and max magnitude over the rolling window.
fn summarize(window: &VecDeque<Sample>) -> SampleSummary {
    let n = window.len().max(1) as f64;
    let mut sum = (0.0, 0.0, 0.0, 0.0);
    let mut max_magnitude: f64 = 0.0;
    let mut last_ts = 0;
    for s in window {
        sum.0 += s.ax;
        sum.1 += s.ay;
        sum.2 += s.az;
        sum.3 += s.magnitude;
        max_magnitude = max_magnitude.max(s.magnitude);
        last_ts = s.ts_mono_ms;
    }
    SampleSummary {
        ts_mono_ms: last_ts,
        mean_ax: sum.0 / n,
        mean_ay: sum.1 / n,
        mean_az: sum.2 / n,
        mean_magnitude: sum.3 / n,
        max_magnitude,
        samples_averaged: window.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LogBroker;
    use crate::calibration::CalibrationEngine;
    use crate::config::CalibrationSection;
    use crate::pipeline::queues::channels;
    use crate::types::SystemEventKind;
    use std::sync::atomic::AtomicBool;

    fn test_record(ts_wall: u64) -> SeismicRecord {
        let clock = Clock::new(3_600);
        clock.record_sync(ts_wall);
        let calibration = crate::calibration::Calibration::invalid_default();
        let mut builder = crate::detector::RecordBuilder::new("TEST".to_string(), 500, 0.0);
        builder.simulate(3.0, &calibration, &clock).unwrap()
    }

    fn make_sink(
        ch: crate::pipeline::queues::PipelineChannels,
        store: Arc<RecordStore>,
        broker: Arc<LogBroker>,
        hub: Arc<BroadcastHub>,
        clock: Arc<Clock>,
    ) -> EventSink {
        let engine = CalibrationEngine::new(CalibrationSection::default());
        EventSink {
            sample_rx: ch.sample_rx,
            event_rx: ch.event_rx,
            system_rx: ch.system_rx,
            store,
            broker,
            hub,
            clock,
            counters: StationCounters::new(),
            calibration: engine.handle(),
            station_id: "TEST".to_string(),
        }
    }

    #[tokio::test]
    async fn events_are_persisted_published_and_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        let broker = LogBroker::new();
        broker.connect().await.unwrap();
        let hub = BroadcastHub::new(
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        );
        let (_client, mut client_rx) = hub.register().await;
        let clock = Clock::new(3_600);
        clock.record_sync(1_700_000_000);

        let ch = channels();
        let event_tx = ch.event_tx.clone();
        let sink = make_sink(ch, store.clone(), broker.clone(), hub, clock);

        let cancel = CancellationToken::new();
        let record = test_record(1_700_000_000);
        let day = crate::storage::day_index(record.detection.ts_wall);
        event_tx.send(Box::new(record)).await.unwrap();

        let sink_task = tokio::spawn(sink.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let stats = sink_task.await.unwrap();

        assert_eq!(stats.events_consumed, 1);
        assert_eq!(store.read_seismic_day(day).unwrap().len(), 1);
        assert_eq!(broker.published_count(), 1);

        let pushed = client_rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&pushed).unwrap();
        assert_eq!(v["type"], "seismic_event");
        assert!(v["ntp_timestamp"].as_u64().unwrap() >= 1_700_000_000);
    }

    #[tokio::test]
    async fn samples_produce_broadcast_frames_and_summaries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        let broker = LogBroker::new();
        let hub = BroadcastHub::new(
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        );
        let (_client, mut client_rx) = hub.register().await;
        let clock = Clock::new(3_600);
        clock.record_sync(1_700_000_000);

        let ch = channels();
        let sample_tx = ch.sample_tx.clone();
        let sink = make_sink(ch, store.clone(), broker, hub, clock);

        let cancel = CancellationToken::new();
        for i in 0..10u64 {
            sample_tx
                .send(Sample::new(i * 2, 0.001, 0.002, 0.003))
                .await
                .unwrap();
        }

        let sink_task = tokio::spawn(sink.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
        let stats = sink_task.await.unwrap();

        assert_eq!(stats.samples_consumed, 10);
        assert!(stats.broadcasts_sent >= 1);
        assert!(stats.summaries_persisted >= 1);

        let pushed = client_rx.recv().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&pushed).unwrap();
        assert_eq!(v["type"], "sensor_data");
        assert!(v["samples_averaged"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn system_events_reach_the_system_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path()).unwrap());
        let broker = LogBroker::new();
        let hub = BroadcastHub::new(
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        );
        let clock = Clock::new(3_600);

        let ch = channels();
        let system_tx = ch.system_tx.clone();
        let sink = make_sink(ch, store.clone(), broker, hub, clock);

        let cancel = CancellationToken::new();
        system_tx
            .send(SystemEvent {
                ts_wall: 0,
                ts_mono_ms: 42,
                kind: SystemEventKind::EventRejectedNoTime,
                message: "no trusted time".to_string(),
            })
            .await
            .unwrap();

        let sink_task = tokio::spawn(sink.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let stats = sink_task.await.unwrap();

        assert_eq!(stats.system_events_consumed, 1);
        assert!(store.root().join("system").join("0.json").exists());
    }

    #[test]
    fn summarize_window_means_and_max() {
        let mut window = VecDeque::new();
        window.push_back(Sample::new(1, 0.0, 0.0, 0.01));
        window.push_back(Sample::new(2, 0.0, 0.0, 0.03));
        let summary = summarize(&window);
        assert_eq!(summary.samples_averaged, 2);
        assert!((summary.mean_magnitude - 0.02).abs() < 1e-12);
        assert!((summary.max_magnitude - 0.03).abs() < 1e-12);
        assert_eq!(summary.ts_mono_ms, 2);
    }
}
