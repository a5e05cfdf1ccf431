//! Exchange stream client.
//!
//! One client drives one connection slot: connect, subscribe, read frames,
//! decode them with the exchange codec and push quotes into the transport
//! queue. Any failure degrades the slot and reconnects with backoff until
//! cancelled.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::state::{ConnectionRegistry, ConnectionStatus};
use crate::application::ports::{CodecError, ExchangeCodec, InboundFrame};
use crate::application::services::BoundedQueue;
use crate::domain::market::{Quote, Timestamp};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Connection-level failures. Always recovered by reconnecting.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Outbound frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// No inbound traffic within the heartbeat window.
    #[error("heartbeat timeout after {0:?} of silence")]
    HeartbeatTimeout(Duration),

    /// Peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The exchange has no endpoint for a configured protocol.
    #[error("exchange {exchange} has no endpoint for protocol {protocol}")]
    UnsupportedProtocol {
        /// Exchange name.
        exchange: &'static str,
        /// Protocol name.
        protocol: &'static str,
    },
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for one exchange client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Slot index in the connection registry.
    pub slot: usize,
    /// Stream URL.
    pub url: String,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

// =============================================================================
// Exchange Client
// =============================================================================

/// Streaming client for one connection slot.
pub struct ExchangeClient {
    config: ClientConfig,
    codec: Arc<dyn ExchangeCodec>,
    queue: Arc<BoundedQueue<Quote>>,
    registry: Arc<ConnectionRegistry>,
}

impl ExchangeClient {
    /// Create a client.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        codec: Arc<dyn ExchangeCodec>,
        queue: Arc<BoundedQueue<Quote>>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            config,
            codec,
            queue,
            registry,
        }
    }

    /// Run the connection loop until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let slot = self.config.slot;
        let exchange = self.codec.name();
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        while !cancel.is_cancelled() {
            self.registry.transition(slot, ConnectionStatus::Connecting);

            match self.connect_and_run(&cancel, &mut policy).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(exchange, slot, error = %e, "Exchange connection lost");
                    let delay = policy.next_delay();
                    let attempt = policy.attempt_count();
                    self.registry.set_reconnect_attempts(slot, attempt);
                    self.registry.transition(slot, ConnectionStatus::Degraded);
                    metrics::record_reconnect(exchange);
                    tracing::info!(
                        exchange,
                        slot,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to exchange stream"
                    );

                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.registry.transition(slot, ConnectionStatus::Closed);
        tracing::info!(exchange, slot, "Exchange client stopped");
    }

    /// Connect, subscribe and read until error or cancellation.
    ///
    /// Returns `Ok(())` only when cancelled.
    async fn connect_and_run(
        &self,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), TransportError> {
        let slot = self.config.slot;
        tracing::info!(url = %self.config.url, slot, "Connecting to exchange stream");

        let connect = tokio_tungstenite::connect_async(self.config.url.as_str());
        let (ws_stream, _response) = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = connect => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        for frame in self.codec.subscribe_frames()? {
            write.send(Message::Text(frame.into())).await?;
        }
        policy.reset();
        self.registry.set_reconnect_attempts(slot, 0);
        self.registry.transition(slot, ConnectionStatus::Connected);
        tracing::info!(slot, exchange = self.codec.name(), "Exchange stream subscribed");

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = cancel.child_token();
        tokio::spawn(
            HeartbeatManager::new(
                self.config.heartbeat.clone(),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel.clone(),
            )
            .run(),
        );
        let _heartbeat_guard = heartbeat_cancel.drop_guard();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                event = heartbeat_rx.recv() => match event {
                    Some(HeartbeatEvent::SendPing) => {
                        let ping = match self.codec.ping_frame() {
                            Some(frame) => Message::Text(frame.into()),
                            None => Message::Ping(Vec::<u8>::new().into()),
                        };
                        write.send(ping).await?;
                    }
                    Some(HeartbeatEvent::Timeout(silence)) => {
                        return Err(TransportError::HeartbeatTimeout(silence));
                    }
                    None => {}
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat_state.record_activity();
                        self.handle_text(&text);
                    }
                    Some(Ok(Message::Pong(_))) => heartbeat_state.record_activity(),
                    Some(Ok(Message::Ping(data))) => {
                        heartbeat_state.record_activity();
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(slot, frame = ?frame, "Exchange sent close frame");
                        return Err(TransportError::ConnectionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(TransportError::ConnectionClosed),
                },
            }
        }
    }

    /// Decode a text frame and enqueue its quotes. Never fails.
    fn handle_text(&self, text: &str) {
        let exchange = self.codec.name();
        let frames = match self.codec.decode(text, Timestamp::now()) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(exchange, error = %e, "Dropping malformed frame");
                metrics::record_decode_error(exchange);
                return;
            }
        };

        for frame in frames {
            match frame {
                InboundFrame::Quote(quote) => {
                    self.registry.record_quote(self.config.slot);
                    metrics::record_quote_received(exchange);
                    self.queue.push(quote);
                }
                InboundFrame::Ack {
                    op,
                    success: false,
                    message,
                } => {
                    tracing::warn!(exchange, op = %op, message = %message, "Exchange rejected request");
                }
                InboundFrame::Ack { op, .. } => {
                    tracing::debug!(exchange, op = %op, "Exchange acknowledged request");
                }
                InboundFrame::Pong | InboundFrame::Ignored => {}
            }
        }
    }
}
