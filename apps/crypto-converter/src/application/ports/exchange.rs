//! Exchange Codec Port (Driven Port)
//!
//! Vendor-specific framing of an exchange's public streaming API. The
//! transport, queue, buffer and scheduler only see normalized quotes, so
//! adding an exchange means implementing this trait and nothing else.

use crate::domain::market::{Quote, Timestamp};

/// Streaming protocol of a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    /// WebSocket over TLS.
    Wss,
}

impl TransportProtocol {
    /// Parse a protocol name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "wss" => Some(Self::Wss),
            _ => None,
        }
    }

    /// Protocol name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Wss => "wss",
        }
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A normalized quote.
    Quote(Quote),
    /// Reply to an application-level ping.
    Pong,
    /// Acknowledgement of a control request (e.g. subscribe).
    Ack {
        /// Operation being acknowledged.
        op: String,
        /// Whether the exchange accepted it.
        success: bool,
        /// Exchange-provided message.
        message: String,
    },
    /// A well-formed frame with nothing to act on.
    Ignored,
}

/// Codec errors. Never fatal: the frame is dropped and counted.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// Price field could not be parsed or was non-positive.
    #[error("invalid price {value:?}: {reason}")]
    InvalidPrice {
        /// Raw value.
        value: String,
        /// Parse or validation failure.
        reason: String,
    },
}

/// Exchange-specific framing.
pub trait ExchangeCodec: Send + Sync {
    /// Exchange identifier for logs and metrics.
    fn name(&self) -> &'static str;

    /// Public streaming endpoint for a protocol, if supported.
    fn endpoint(&self, protocol: TransportProtocol) -> Option<String>;

    /// Frames to send right after connecting.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame cannot be encoded.
    fn subscribe_frames(&self) -> Result<Vec<String>, CodecError>;

    /// Application-level keepalive frame. `None` means protocol-level
    /// WebSocket pings are used instead.
    fn ping_frame(&self) -> Option<String>;

    /// Decode one text frame into zero or more inbound frames.
    ///
    /// `received_at` is used as the observation time when the exchange
    /// does not report one.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed frames.
    fn decode(&self, frame: &str, received_at: Timestamp) -> Result<Vec<InboundFrame>, CodecError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_parsing() {
        assert_eq!(TransportProtocol::parse("wss"), Some(TransportProtocol::Wss));
        assert_eq!(TransportProtocol::parse(" WSS "), Some(TransportProtocol::Wss));
        assert_eq!(TransportProtocol::parse("tcp"), None);
        assert_eq!(TransportProtocol::Wss.as_str(), "wss");
    }
}
