//! Heartbeat Manager
//!
//! Keeps an exchange stream alive with periodic pings and declares it dead
//! after `max_missed_pongs` intervals without any inbound traffic. Quotes
//! count as traffic, so a busy stream never times out between pongs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// Silent intervals tolerated before the connection is considered dead.
    pub max_missed_pongs: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            max_missed_pongs: 2,
        }
    }
}

impl HeartbeatConfig {
    /// Silence after which the connection is declared dead.
    #[must_use]
    pub fn dead_after(&self) -> Duration {
        self.ping_interval.saturating_mul(self.max_missed_pongs.max(1))
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping frame.
    SendPing,
    /// No inbound traffic for too long; reconnect.
    Timeout(Duration),
}

/// Last inbound activity, shared between the read loop and the manager.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create state with activity recorded now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
        }
    }

    /// Record inbound traffic (data frame or pong).
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_activity.read().elapsed()
    }
}

/// Emits ping requests and timeout notifications for one connection.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled, the event channel closes, or a timeout fires.
    pub async fn run(self) {
        let start = Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let dead_after = self.config.dead_after();

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    let silence = self.state.silence();
                    if silence >= dead_after {
                        tracing::warn!(
                            silence_ms = silence.as_millis(),
                            dead_after_ms = dead_after.as_millis(),
                            "Heartbeat timeout detected"
                        );
                        let _ = self.event_tx.send(HeartbeatEvent::Timeout(silence)).await;
                        break;
                    }
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::trace!("Heartbeat manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_manager(
        ping_ms: u64,
        missed: u32,
    ) -> (
        Arc<HeartbeatState>,
        mpsc::Receiver<HeartbeatEvent>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let config = HeartbeatConfig {
            ping_interval: Duration::from_millis(ping_ms),
            max_missed_pongs: missed,
        };
        let state = Arc::new(HeartbeatState::new());
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            HeartbeatManager::new(config, Arc::clone(&state), tx, cancel.clone()).run(),
        );
        (state, rx, cancel, handle)
    }

    #[test]
    fn dead_after_is_interval_times_missed() {
        assert_eq!(HeartbeatConfig::default().dead_after(), Duration::from_secs(40));
        let zero = HeartbeatConfig {
            ping_interval: Duration::from_secs(5),
            max_missed_pongs: 0,
        };
        assert_eq!(zero.dead_after(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn pings_while_traffic_flows() {
        let (state, mut rx, cancel, handle) = spawn_manager(100, 2);

        for _ in 0..5 {
            assert_eq!(rx.recv().await, Some(HeartbeatEvent::SendPing));
            state.record_activity();
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_missed_pongs() {
        let (_state, mut rx, _cancel, handle) = spawn_manager(100, 2);

        assert_eq!(rx.recv().await, Some(HeartbeatEvent::SendPing));
        assert!(matches!(rx.recv().await, Some(HeartbeatEvent::Timeout(_))));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_cancel() {
        let (_state, _rx, cancel, handle) = spawn_manager(10_000, 2);
        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
