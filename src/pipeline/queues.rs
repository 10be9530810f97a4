//! Bounded queues between the sampler and the sink.
//!
//! The sampler enqueues with a non-blocking `try_send`; a full queue drops
//! the NEW message so the real-time loop never stalls. The sink dequeues
//! with a short timeout. This asymmetry gives the sampler strict priority
//! over the I/O consumers.

use tokio::sync::mpsc;
use tracing::warn;

use crate::config::defaults::{
    DROP_RATE_WARN_PERCENT, DROP_RATE_WINDOW_SECS, EVENT_QUEUE_CAPACITY, SAMPLE_QUEUE_CAPACITY,
    SYSTEM_QUEUE_CAPACITY,
};
use crate::types::{Sample, SeismicRecord, SystemEvent};

/// All channel endpoints created in one place at wiring time.
pub struct PipelineChannels {
    pub sample_tx: mpsc::Sender<Sample>,
    pub sample_rx: mpsc::Receiver<Sample>,
    pub event_tx: mpsc::Sender<Box<SeismicRecord>>,
    pub event_rx: mpsc::Receiver<Box<SeismicRecord>>,
    pub system_tx: mpsc::Sender<SystemEvent>,
    pub system_rx: mpsc::Receiver<SystemEvent>,
}

pub fn channels() -> PipelineChannels {
    let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_QUEUE_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let (system_tx, system_rx) = mpsc::channel(SYSTEM_QUEUE_CAPACITY);
    PipelineChannels {
        sample_tx,
        sample_rx,
        event_tx,
        event_rx,
        system_tx,
        system_rx,
    }
}

/// Tracks the sample drop rate over a rolling window and raises the
/// back-pressure signal when more than 1% of samples are dropped in 10 s.
pub struct DropRateMonitor {
    window_start_ms: u64,
    attempted: u64,
    dropped: u64,
    back_pressure: bool,
}

impl DropRateMonitor {
    pub fn new() -> Self {
        Self {
            window_start_ms: 0,
            attempted: 0,
            dropped: 0,
            back_pressure: false,
        }
    }

    /// Record one enqueue attempt. Returns `Some(rate_percent)` when a
    /// window just closed with the drop rate above the threshold.
    pub fn record(&mut self, now_mono_ms: u64, dropped: bool) -> Option<f64> {
        if self.attempted == 0 {
            self.window_start_ms = now_mono_ms;
        }
        self.attempted += 1;
        if dropped {
            self.dropped += 1;
        }

        if now_mono_ms.saturating_sub(self.window_start_ms) < DROP_RATE_WINDOW_SECS * 1_000 {
            return None;
        }

        let rate = self.dropped as f64 / self.attempted as f64 * 100.0;
        let over = rate > DROP_RATE_WARN_PERCENT;
        if over {
            warn!(
                rate_percent = rate,
                dropped = self.dropped,
                attempted = self.attempted,
                "Sample queue back-pressure - reducing broadcast frequency"
            );
        }
        self.back_pressure = over;
        self.attempted = 0;
        self.dropped = 0;
        over.then_some(rate)
    }

    /// Whether the last closed window exceeded the drop threshold.
    pub fn back_pressure(&self) -> bool {
        self.back_pressure
    }
}

impl Default for DropRateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sample_queue_drops_new_when_full() {
        let ch = channels();
        let sample = Sample::new(0, 0.0, 0.0, 0.0);
        for _ in 0..SAMPLE_QUEUE_CAPACITY {
            assert!(ch.sample_tx.try_send(sample).is_ok());
        }
        // Queue full: the new sample is rejected, nothing blocks
        assert!(ch.sample_tx.try_send(sample).is_err());
    }

    #[tokio::test]
    async fn consumer_sees_fifo_order() {
        let mut ch = channels();
        for i in 0..5u64 {
            ch.sample_tx
                .try_send(Sample::new(i, 0.0, 0.0, 0.0))
                .unwrap();
        }
        for i in 0..5u64 {
            let s = ch.sample_rx.recv().await.unwrap();
            assert_eq!(s.ts_mono_ms, i);
        }
    }

    #[test]
    fn drop_rate_window_triggers_above_one_percent() {
        let mut monitor = DropRateMonitor::new();
        // 10 s window: 500 attempts with 2% dropped
        let mut fired = None;
        for i in 0..6_000u64 {
            let dropped = i % 50 == 0;
            if let Some(rate) = monitor.record(i * 2, dropped) {
                fired = Some(rate);
            }
        }
        let rate = fired.expect("window should close and fire");
        assert!(rate > 1.0);
        assert!(monitor.back_pressure());
    }

    #[test]
    fn drop_rate_quiet_window_clears_signal() {
        let mut monitor = DropRateMonitor::new();
        for i in 0..6_000u64 {
            monitor.record(i * 2, false);
        }
        assert!(!monitor.back_pressure());
    }
}
