//! Exchange transport: owns every connection slot of one exchange.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::{ClientConfig, ExchangeClient, TransportError};
use super::heartbeat::HeartbeatConfig;
use super::reconnect::ReconnectConfig;
use super::state::{ConnectionEvent, ConnectionRegistry, ConnectionState, ConnectionStatus};
use crate::application::ports::{ExchangeCodec, TransportProtocol};
use crate::application::services::BoundedQueue;
use crate::domain::market::Quote;

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// `(protocol, count)` pairs; one connection slot per unit of count.
    pub connections: Vec<(TransportProtocol, usize)>,
    /// Stream URL override for every slot.
    pub url_override: Option<String>,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connections: vec![(TransportProtocol::Wss, 1)],
            url_override: None,
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Maintains persistent streaming connections to an exchange and feeds the
/// transport queue.
pub struct ExchangeTransport {
    codec: Arc<dyn ExchangeCodec>,
    queue: Arc<BoundedQueue<Quote>>,
    slots: Vec<ClientConfig>,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ExchangeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeTransport")
            .field("exchange", &self.codec.name())
            .field("slots", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl ExchangeTransport {
    /// Create a transport. Connections are not opened until `start`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedProtocol` if the codec has no endpoint for a
    /// configured protocol and no URL override is set.
    pub fn new(
        codec: Arc<dyn ExchangeCodec>,
        queue: Arc<BoundedQueue<Quote>>,
        config: &TransportConfig,
        parent_cancel: &CancellationToken,
    ) -> Result<Self, TransportError> {
        let mut slots = Vec::new();
        let mut protocols = Vec::new();

        for &(protocol, count) in &config.connections {
            let url = match &config.url_override {
                Some(url) => url.clone(),
                None => codec.endpoint(protocol).ok_or(TransportError::UnsupportedProtocol {
                    exchange: codec.name(),
                    protocol: protocol.as_str(),
                })?,
            };
            for _ in 0..count {
                slots.push(ClientConfig {
                    slot: slots.len(),
                    url: url.clone(),
                    reconnect: config.reconnect.clone(),
                    heartbeat: config.heartbeat.clone(),
                });
                protocols.push(protocol);
            }
        }

        let registry = Arc::new(ConnectionRegistry::new(codec.name(), &protocols));
        Ok(Self {
            codec,
            queue,
            slots,
            registry,
            cancel: parent_cancel.child_token(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn one client task per slot. Calling it again is a no-op.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            tracing::warn!("Exchange transport already started");
            return;
        }

        tracing::info!(
            exchange = self.codec.name(),
            slots = self.slots.len(),
            "Starting exchange transport"
        );
        for slot in &self.slots {
            let client = ExchangeClient::new(
                slot.clone(),
                Arc::clone(&self.codec),
                Arc::clone(&self.queue),
                Arc::clone(&self.registry),
            );
            tasks.push(tokio::spawn(client.run(self.cancel.clone())));
        }
    }

    /// Close every connection and wait for client tasks, up to `grace`.
    ///
    /// Quotes already queued but not yet flushed are not touched.
    pub async fn stop(&self, grace: Duration) {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let deadline = tokio::time::Instant::now() + grace;

        // Tasks are spawned in slot order.
        for (slot, mut task) in tasks.into_iter().enumerate() {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::warn!(slot, "Exchange client did not stop within grace period");
                task.abort();
                self.registry.transition(slot, ConnectionStatus::Closed);
            }
        }
        tracing::info!(exchange = self.codec.name(), "Exchange transport stopped");
    }

    /// Connection states of all slots.
    #[must_use]
    pub fn states(&self) -> Vec<ConnectionState> {
        self.registry.snapshot()
    }

    /// Shared connection registry.
    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Subscribe to connection state transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.registry.subscribe()
    }

    /// Number of connection slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::MIN_QUEUE_CAPACITY;
    use crate::infrastructure::exchange::{BybitCodec, MarketMap};

    fn transport(config: &TransportConfig) -> ExchangeTransport {
        let codec = Arc::new(BybitCodec::new(MarketMap::new()));
        let queue = Arc::new(BoundedQueue::new(MIN_QUEUE_CAPACITY));
        ExchangeTransport::new(codec, queue, config, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn one_slot_per_connection_count() {
        let transport = transport(&TransportConfig {
            connections: vec![(TransportProtocol::Wss, 3)],
            ..TransportConfig::default()
        });
        assert_eq!(transport.slot_count(), 3);
        let states = transport.states();
        assert_eq!(
            states.iter().map(|s| s.slot).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(states.iter().all(|s| s.status == ConnectionStatus::Closed));
    }

    #[test]
    fn uses_codec_endpoint_without_override() {
        let transport = transport(&TransportConfig::default());
        assert_eq!(transport.slots[0].url, crate::infrastructure::exchange::BYBIT_SPOT_WS_URL);

        let transport = transport_with_override();
        assert_eq!(transport.slots[0].url, "ws://127.0.0.1:1/");
    }

    fn transport_with_override() -> ExchangeTransport {
        transport(&TransportConfig {
            url_override: Some("ws://127.0.0.1:1/".to_string()),
            ..TransportConfig::default()
        })
    }

    #[tokio::test]
    async fn stop_closes_all_slots() {
        let transport = transport(&TransportConfig {
            url_override: Some("ws://127.0.0.1:1/".to_string()),
            connections: vec![(TransportProtocol::Wss, 2)],
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                ..ReconnectConfig::default()
            },
            ..TransportConfig::default()
        });

        transport.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.stop(Duration::from_secs(2)).await;

        assert!(transport
            .states()
            .iter()
            .all(|s| s.status == ConnectionStatus::Closed));
    }

    #[tokio::test]
    async fn aborted_clients_are_marked_closed() {
        let transport = transport(&TransportConfig {
            url_override: Some("ws://127.0.0.1:1/".to_string()),
            connections: vec![(TransportProtocol::Wss, 2)],
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                ..ReconnectConfig::default()
            },
            ..TransportConfig::default()
        });

        transport.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport
            .states()
            .iter()
            .all(|s| s.status != ConnectionStatus::Closed));

        // No grace: clients get no chance to observe cancellation.
        transport.stop(Duration::ZERO).await;

        assert!(transport
            .states()
            .iter()
            .all(|s| s.status == ConnectionStatus::Closed));
    }
}
