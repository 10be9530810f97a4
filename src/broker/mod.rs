//! Message broker seam.
//!
//! The transport library is an external collaborator; the station talks to
//! it through the [`BrokerClient`] trait so the production MQTT client and
//! the in-repo logging implementation can be swapped without touching
//! pipeline code. Publishes while disconnected are dropped - retained event
//! topics recover on the next publish after reconnect.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::defaults::BROKER_RECONNECT_MIN_SECS;

/// Topic builders for the station's broker namespace.
pub mod topics {
    /// Periodic data summary: `tele/<client>/data`
    pub fn data(client: &str) -> String {
        format!("tele/{client}/data")
    }

    /// Per-event record, retained: `tele/<client>/event`
    pub fn event(client: &str) -> String {
        format!("tele/{client}/event")
    }

    /// Periodic status, retained: `tele/<client>/status`
    pub fn status(client: &str) -> String {
        format!("tele/{client}/status")
    }

    /// Heartbeat rides the status namespace with its own suffix.
    pub fn heartbeat(client: &str) -> String {
        format!("tele/{client}/heartbeat")
    }

    /// Inbound command topic filter: `cmnd/<client>/<verb>`
    pub fn command_filter(client: &str) -> String {
        format!("cmnd/{client}/+")
    }
}

/// Command verbs accepted over `cmnd/<client>/<verb>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandVerb {
    Restart,
    Calibrate,
    Debug,
    Status,
}

impl CommandVerb {
    /// Parse the verb segment of a command topic.
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic.rsplit('/').next()? {
            "restart" => Some(Self::Restart),
            "calibrate" => Some(Self::Calibrate),
            "debug" => Some(Self::Debug),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker disconnected")]
    Disconnected,
    #[error("broker transport error: {0}")]
    Transport(String),
}

/// Thin boundary to the message broker transport.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Publish a payload. Implementations must fail fast while disconnected;
    /// callers drop the payload and move on.
    async fn publish(&self, topic: &str, payload: &str, retained: bool) -> Result<(), BrokerError>;

    fn is_connected(&self) -> bool;

    /// Attempt to (re)establish the connection.
    async fn connect(&self) -> Result<(), BrokerError>;

    /// Wait for the next inbound command from `cmnd/<client>/<verb>`.
    /// Publish-only transports never resolve.
    async fn next_command(&self) -> CommandVerb {
        futures::future::pending().await
    }

    fn name(&self) -> &'static str;
}

/// Default in-repo implementation: logs publishes through tracing. Useful
/// for bench stations and every test; the real MQTT client lives behind the
/// same trait in deployment builds.
#[derive(Debug, Default)]
pub struct LogBroker {
    connected: AtomicBool,
    published: AtomicU64,
}

impl LogBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(false),
            published: AtomicU64::new(0),
        })
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrokerClient for LogBroker {
    async fn publish(&self, topic: &str, payload: &str, retained: bool) -> Result<(), BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Disconnected);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(topic, retained, bytes = payload.len(), "Broker publish");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Keeps the broker connected: reconnects with at least `min_delay_secs`
/// between attempts (5 s default), doubling the delay on repeated failure.
pub async fn reconnect_supervisor(
    broker: Arc<dyn BrokerClient>,
    min_delay_secs: u64,
    cancel: CancellationToken,
) {
    let min_delay = Duration::from_secs(min_delay_secs.max(BROKER_RECONNECT_MIN_SECS));
    let max_delay = min_delay * 16;
    let mut delay = min_delay;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        if broker.is_connected() {
            delay = min_delay;
            tokio::select! {
                _ = cancel.cancelled() => return,
                () = tokio::time::sleep(min_delay) => {}
            }
            continue;
        }

        match broker.connect().await {
            Ok(()) => {
                info!(broker = broker.name(), "Broker connected");
                delay = min_delay;
            }
            Err(e) => {
                warn!(broker = broker.name(), error = %e, delay_secs = delay.as_secs(), "Broker reconnect failed");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                delay = (delay * 2).min(max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_layout() {
        assert_eq!(topics::data("SEISMO-01"), "tele/SEISMO-01/data");
        assert_eq!(topics::event("SEISMO-01"), "tele/SEISMO-01/event");
        assert_eq!(topics::status("SEISMO-01"), "tele/SEISMO-01/status");
        assert_eq!(topics::command_filter("SEISMO-01"), "cmnd/SEISMO-01/+");
    }

    #[test]
    fn command_verbs_parse_from_topics() {
        assert_eq!(
            CommandVerb::from_topic("cmnd/SEISMO-01/restart"),
            Some(CommandVerb::Restart)
        );
        assert_eq!(
            CommandVerb::from_topic("cmnd/SEISMO-01/calibrate"),
            Some(CommandVerb::Calibrate)
        );
        assert_eq!(CommandVerb::from_topic("cmnd/SEISMO-01/unknown"), None);
    }

    #[tokio::test]
    async fn publishes_dropped_while_disconnected() {
        let broker = LogBroker::new();
        let err = broker.publish("tele/x/data", "{}", false).await;
        assert!(matches!(err, Err(BrokerError::Disconnected)));
        assert_eq!(broker.published_count(), 0);

        broker.connect().await.unwrap();
        broker.publish("tele/x/data", "{}", false).await.unwrap();
        assert_eq!(broker.published_count(), 1);
    }

    #[tokio::test]
    async fn supervisor_connects_then_idles() {
        let broker = LogBroker::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reconnect_supervisor(
            broker.clone() as Arc<dyn BrokerClient>,
            5,
            cancel.clone(),
        ));

        // Give the supervisor a moment to run the first connect
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(broker.is_connected());

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(6), task).await;
    }
}
