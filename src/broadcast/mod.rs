//! Push-protocol broadcast hub.
//!
//! Tracks connected dashboard clients and applies adaptive rate control:
//! the global interval stretches with client count and resource pressure,
//! and each client additionally has its own minimum interval derived from
//! its preferred rate. A client that fails sends is slowed down one Hz at a
//! time and recovers only on the global good-performance tick. Entries are
//! pruned when the underlying channel closes.
//!
//! The websocket server itself is a thin collaborator; this module only
//! hands JSON strings to per-client channels.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::defaults::{
    BROADCAST_BASE_INTERVAL_MS, BROADCAST_BUSY_CLIENTS, BROADCAST_BUSY_INTERVAL_MS,
    BROADCAST_LOW_RESOURCE_INTERVAL_MS, CLIENT_FAILURES_TO_FLOOR, CLIENT_RATE_CEILING_HZ,
    CLIENT_RATE_DEFAULT_HZ, CLIENT_RATE_FLOOR_HZ, CLIENT_RECOVERY_TICK_SECS,
};
use crate::types::HealthSample;

/// Commands accepted over the push channel.
#[derive(Debug, Deserialize)]
pub struct PushCommand {
    pub command: String,
}

struct ClientState {
    tx: mpsc::Sender<String>,
    rate_hz: u32,
    failures: u32,
    last_sent_ms: u64,
    streaming: bool,
}

impl ClientState {
    fn min_interval_ms(&self) -> u64 {
        1_000 / u64::from(self.rate_hz.clamp(CLIENT_RATE_FLOOR_HZ, CLIENT_RATE_CEILING_HZ))
    }
}

#[derive(Default)]
struct HubInner {
    clients: HashMap<u64, ClientState>,
    next_id: u64,
}

/// Shared broadcast hub.
pub struct BroadcastHub {
    inner: RwLock<HubInner>,
    /// Set by the telemetry disk gauge.
    low_resources: Arc<AtomicBool>,
    /// Set by the sample-queue drop-rate monitor.
    back_pressure: Arc<AtomicBool>,
}

impl BroadcastHub {
    pub fn new(low_resources: Arc<AtomicBool>, back_pressure: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(HubInner::default()),
            low_resources,
            back_pressure,
        })
    }

    /// Register a new client; returns its id and the receiving half the
    /// websocket task forwards to the socket.
    pub async fn register(&self) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.clients.insert(
            id,
            ClientState {
                tx,
                rate_hz: CLIENT_RATE_DEFAULT_HZ,
                failures: 0,
                last_sent_ms: 0,
                streaming: true,
            },
        );
        info!(client_id = id, clients = inner.clients.len(), "Client connected");
        (id, rx)
    }

    pub async fn unregister(&self, id: u64) {
        let mut inner = self.inner.write().await;
        if inner.clients.remove(&id).is_some() {
            info!(client_id = id, clients = inner.clients.len(), "Client disconnected");
        }
    }

    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    /// Global adaptive interval: 100 ms base, 150 ms beyond 3 clients,
    /// 200 ms under resource pressure or queue back-pressure.
    pub async fn adaptive_interval(&self) -> Duration {
        let clients = self.client_count().await;
        let ms = if self.low_resources.load(Ordering::Relaxed)
            || self.back_pressure.load(Ordering::Relaxed)
        {
            BROADCAST_LOW_RESOURCE_INTERVAL_MS
        } else if clients > BROADCAST_BUSY_CLIENTS {
            BROADCAST_BUSY_INTERVAL_MS
        } else {
            BROADCAST_BASE_INTERVAL_MS
        };
        Duration::from_millis(ms)
    }

    /// Send an averaged sensor frame to every streaming client whose rate
    /// allows it. `now_mono_ms` gates per-client minimum intervals.
    pub async fn broadcast_sample(&self, payload: &str, now_mono_ms: u64) {
        let mut inner = self.inner.write().await;
        let mut closed = Vec::new();

        for (id, client) in &mut inner.clients {
            if !client.streaming {
                continue;
            }
            if now_mono_ms.saturating_sub(client.last_sent_ms) < client.min_interval_ms() {
                continue;
            }
            match client.tx.try_send(payload.to_string()) {
                Ok(()) => {
                    client.last_sent_ms = now_mono_ms;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    client.failures += 1;
                    if client.rate_hz > CLIENT_RATE_FLOOR_HZ {
                        client.rate_hz -= 1;
                    }
                    if client.failures == CLIENT_FAILURES_TO_FLOOR {
                        client.rate_hz = CLIENT_RATE_FLOOR_HZ;
                        warn!(client_id = id, "Slow client pinned to rate floor");
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(*id);
                }
            }
        }

        for id in closed {
            inner.clients.remove(&id);
            debug!(client_id = id, "Pruned closed client");
        }
    }

    /// Seismic events bypass rate control: every client gets every event.
    pub async fn broadcast_event(&self, payload: &str) {
        self.broadcast_all(payload).await;
    }

    /// Status snapshots ride the same path as events (telemetry already
    /// limits them to well under 1 Hz).
    pub async fn broadcast_status(&self, sample: &HealthSample) {
        let payload = serde_json::json!({
            "type": "status",
            "timestamp": sample.ts_mono_ms,
            "counters": sample.counters,
            "calibration_valid": sample.calibration_valid,
            "clock_trusted": sample.clock_trusted,
            "last_magnitude": sample.last_magnitude,
        });
        self.broadcast_all(&payload.to_string()).await;
    }

    async fn broadcast_all(&self, payload: &str) {
        let mut inner = self.inner.write().await;
        let mut closed = Vec::new();
        for (id, client) in &mut inner.clients {
            match client.tx.try_send(payload.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    client.failures += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            inner.clients.remove(&id);
        }
    }

    /// Handle a push-channel command from a client. Returns the JSON reply.
    pub async fn handle_command(
        &self,
        client_id: u64,
        text: &str,
        status: Option<&HealthSample>,
    ) -> String {
        let parsed: Result<PushCommand, _> = serde_json::from_str(text);
        let Ok(cmd) = parsed else {
            return serde_json::json!({
                "type": "error",
                "message": "malformed command"
            })
            .to_string();
        };

        match cmd.command.as_str() {
            "start_streaming" | "stop_streaming" => {
                let streaming = cmd.command == "start_streaming";
                let mut inner = self.inner.write().await;
                if let Some(client) = inner.clients.get_mut(&client_id) {
                    client.streaming = streaming;
                }
                serde_json::json!({
                    "type": "response",
                    "command": cmd.command,
                    "streaming": streaming,
                })
                .to_string()
            }
            "get_status" => match status {
                Some(sample) => serde_json::json!({
                    "type": "response",
                    "command": "get_status",
                    "status": sample,
                })
                .to_string(),
                None => serde_json::json!({
                    "type": "error",
                    "message": "status unavailable"
                })
                .to_string(),
            },
            other => serde_json::json!({
                "type": "error",
                "message": format!("unknown command: {other}"),
            })
            .to_string(),
        }
    }

    /// Global good-performance tick: clients recover one Hz per tick up to
    /// the ceiling, and failure counts decay.
    pub async fn recovery_tick(&self) {
        let mut inner = self.inner.write().await;
        for client in inner.clients.values_mut() {
            if client.rate_hz < CLIENT_RATE_CEILING_HZ {
                client.rate_hz += 1;
            }
            client.failures = client.failures.saturating_sub(1);
        }
    }

    /// Periodic recovery loop; spawn alongside the sink.
    pub async fn run_recovery(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(CLIENT_RECOVERY_TICK_SECS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.recovery_tick().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> Arc<BroadcastHub> {
        BroadcastHub::new(
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn register_and_receive() {
        let hub = hub();
        let (_id, mut rx) = hub.register().await;
        assert_eq!(hub.client_count().await, 1);

        hub.broadcast_sample("{\"type\":\"sensor_data\"}", 1_000).await;
        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("sensor_data"));
    }

    #[tokio::test]
    async fn per_client_rate_limits_sends() {
        let hub = hub();
        let (_id, mut rx) = hub.register().await;

        // Two broadcasts 10 ms apart: default 10 Hz allows only the first
        hub.broadcast_sample("a", 1_000).await;
        hub.broadcast_sample("b", 1_010).await;
        hub.broadcast_sample("c", 1_110).await;

        assert_eq!(rx.recv().await.unwrap(), "a");
        assert_eq!(rx.recv().await.unwrap(), "c");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_streaming_command_mutes_samples_not_events() {
        let hub = hub();
        let (id, mut rx) = hub.register().await;

        let reply = hub
            .handle_command(id, r#"{"command":"stop_streaming"}"#, None)
            .await;
        assert!(reply.contains("\"type\":\"response\""));

        hub.broadcast_sample("sample", 5_000).await;
        hub.broadcast_event("event").await;
        assert_eq!(rx.recv().await.unwrap(), "event");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_command_yields_error() {
        let hub = hub();
        let (id, _rx) = hub.register().await;
        let reply = hub.handle_command(id, "not json", None).await;
        assert!(reply.contains("\"type\":\"error\""));
    }

    #[tokio::test]
    async fn adaptive_interval_reacts_to_load() {
        let low = Arc::new(AtomicBool::new(false));
        let bp = Arc::new(AtomicBool::new(false));
        let hub = BroadcastHub::new(low.clone(), bp.clone());

        assert_eq!(hub.adaptive_interval().await, Duration::from_millis(100));

        let mut receivers = Vec::new();
        for _ in 0..4 {
            receivers.push(hub.register().await);
        }
        assert_eq!(hub.adaptive_interval().await, Duration::from_millis(150));

        low.store(true, Ordering::Relaxed);
        assert_eq!(hub.adaptive_interval().await, Duration::from_millis(200));

        low.store(false, Ordering::Relaxed);
        bp.store(true, Ordering::Relaxed);
        assert_eq!(hub.adaptive_interval().await, Duration::from_millis(200));
    }

    #[tokio::test]
    async fn slow_client_rate_decays_and_recovers() {
        let hub = hub();
        let (_id, rx) = hub.register().await;
        // Fill the 16-slot client channel without draining it
        for i in 0..40u64 {
            hub.broadcast_sample("x", 1_000 + i * 200).await;
        }
        // Channel filled after 16 sends; further sends failed and decayed
        // the rate to the floor
        {
            let inner = hub.inner.read().await;
            let client = inner.clients.values().next().unwrap();
            assert_eq!(client.rate_hz, CLIENT_RATE_FLOOR_HZ);
            assert!(client.failures >= CLIENT_FAILURES_TO_FLOOR);
        }

        for _ in 0..20 {
            hub.recovery_tick().await;
        }
        {
            let inner = hub.inner.read().await;
            let client = inner.clients.values().next().unwrap();
            assert_eq!(client.rate_hz, CLIENT_RATE_CEILING_HZ);
        }
        drop(rx);
    }

    #[tokio::test]
    async fn closed_clients_are_pruned() {
        let hub = hub();
        let (_id, rx) = hub.register().await;
        drop(rx);
        hub.broadcast_event("gone").await;
        assert_eq!(hub.client_count().await, 0);
    }
}
