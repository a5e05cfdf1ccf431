//! Connection state tracking.
//!
//! Each connection slot moves through
//! `Connecting → Connected → Degraded → Connecting → ...` and finally
//! `Closed` on shutdown. Transitions are published on a broadcast channel
//! so observers (health endpoint, tests) never touch client internals.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::application::ports::TransportProtocol;
use crate::infrastructure::metrics;

/// Status of one connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Dialing or subscribing.
    Connecting,
    /// Subscribed and receiving.
    Connected,
    /// Lost; waiting to reconnect.
    Degraded,
    /// Stopped.
    Closed,
}

/// Snapshot of one connection slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    /// Slot index.
    pub slot: usize,
    /// Streaming protocol.
    #[serde(serialize_with = "serialize_protocol")]
    pub protocol: TransportProtocol,
    /// Current status.
    pub status: ConnectionStatus,
    /// Reconnect attempts since the last successful connect.
    pub reconnect_attempts: u32,
    /// Quotes decoded on this slot since start.
    pub quotes_received: u64,
}

fn serialize_protocol<S: serde::Serializer>(
    protocol: &TransportProtocol,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(protocol.as_str())
}

/// A status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Slot index.
    pub slot: usize,
    /// New status.
    pub status: ConnectionStatus,
    /// Reconnect attempts at the time of the transition.
    pub reconnect_attempts: u32,
}

const EVENT_CAPACITY: usize = 64;

/// Shared connection states for all slots of a transport.
#[derive(Debug)]
pub struct ConnectionRegistry {
    exchange: &'static str,
    states: RwLock<Vec<ConnectionState>>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionRegistry {
    /// Create a registry with every slot `Closed`.
    #[must_use]
    pub fn new(exchange: &'static str, protocols: &[TransportProtocol]) -> Self {
        let states = protocols
            .iter()
            .enumerate()
            .map(|(slot, &protocol)| ConnectionState {
                slot,
                protocol,
                status: ConnectionStatus::Closed,
                reconnect_attempts: 0,
                quotes_received: 0,
            })
            .collect();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            exchange,
            states: RwLock::new(states),
            events,
        }
    }

    /// Move a slot to a new status and publish the transition.
    pub fn transition(&self, slot: usize, status: ConnectionStatus) {
        let mut states = self.states.write();
        let Some(state) = states.get_mut(slot) else {
            return;
        };
        let previous = state.status;
        if previous == status {
            return;
        }
        state.status = status;
        let event = ConnectionEvent {
            slot,
            status,
            reconnect_attempts: state.reconnect_attempts,
        };
        drop(states);

        if status == ConnectionStatus::Connected {
            metrics::adjust_websocket_connections(self.exchange, 1.0);
        } else if previous == ConnectionStatus::Connected {
            metrics::adjust_websocket_connections(self.exchange, -1.0);
        }

        tracing::debug!(slot, from = ?previous, to = ?status, "Connection state changed");
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Record the current reconnect attempt count for a slot.
    pub fn set_reconnect_attempts(&self, slot: usize, attempts: u32) {
        if let Some(state) = self.states.write().get_mut(slot) {
            state.reconnect_attempts = attempts;
        }
    }

    /// Count a decoded quote on a slot.
    pub fn record_quote(&self, slot: usize) {
        if let Some(state) = self.states.write().get_mut(slot) {
            state.quotes_received += 1;
        }
    }

    /// Snapshot of all slots.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ConnectionState> {
        self.states.read().clone()
    }

    /// Status of one slot.
    #[must_use]
    pub fn status(&self, slot: usize) -> Option<ConnectionStatus> {
        self.states.read().get(slot).map(|s| s.status)
    }

    /// Number of slots currently connected.
    #[must_use]
    pub fn connected(&self) -> usize {
        self.states
            .read()
            .iter()
            .filter(|s| s.status == ConnectionStatus::Connected)
            .count()
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    /// Whether there are no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    /// Subscribe to status transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}
