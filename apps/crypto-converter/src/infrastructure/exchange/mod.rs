//! Exchange Integration
//!
//! Streaming connections to a crypto exchange's public ticker feed.
//!
//! # Components
//!
//! - `ExchangeTransport`: one `ExchangeClient` per configured connection slot
//! - `ExchangeClient`: connect, subscribe, decode, enqueue, reconnect
//! - `BybitCodec`: Bybit v5 spot framing behind the `ExchangeCodec` port
//! - `ReconnectPolicy` / `HeartbeatManager`: connection liveness
//! - `ConnectionRegistry`: per-slot state and transition events

mod bybit;
mod client;
mod heartbeat;
mod markets;
mod reconnect;
mod state;
mod transport;

use std::str::FromStr;
use std::sync::Arc;

pub use bybit::{BYBIT_REST_URL, BYBIT_SPOT_WS_URL, BybitCodec, SUBSCRIBE_BATCH_SIZE};
pub use client::{ClientConfig, ExchangeClient, TransportError};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use markets::{MarketLoadError, MarketMap, load_bybit_markets};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use state::{ConnectionEvent, ConnectionRegistry, ConnectionState, ConnectionStatus};
pub use transport::{ExchangeTransport, TransportConfig};

use crate::application::ports::ExchangeCodec;

/// Supported exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Bybit spot.
    Bybit,
}

impl ExchangeKind {
    /// Exchange name as configured.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bybit => "bybit",
        }
    }

    /// Default REST base URL.
    #[must_use]
    pub const fn default_rest_url(&self) -> &'static str {
        match self {
            Self::Bybit => BYBIT_REST_URL,
        }
    }

    /// Load the tradable instruments over REST.
    ///
    /// # Errors
    ///
    /// Returns an error if the markets cannot be fetched.
    pub async fn load_markets(
        &self,
        client: &reqwest::Client,
        rest_url: &str,
    ) -> Result<MarketMap, MarketLoadError> {
        match self {
            Self::Bybit => load_bybit_markets(client, rest_url).await,
        }
    }

    /// Build the codec for this exchange.
    #[must_use]
    pub fn codec(&self, markets: MarketMap) -> Arc<dyn ExchangeCodec> {
        match self {
            Self::Bybit => Arc::new(BybitCodec::new(markets)),
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bybit" => Ok(Self::Bybit),
            other => Err(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exchange_kind() {
        assert_eq!("bybit".parse::<ExchangeKind>(), Ok(ExchangeKind::Bybit));
        assert_eq!(" Bybit ".parse::<ExchangeKind>(), Ok(ExchangeKind::Bybit));
        assert_eq!("binance".parse::<ExchangeKind>(), Err("binance".to_string()));
        assert_eq!(ExchangeKind::Bybit.as_str(), "bybit");
    }

    #[test]
    fn builds_codec() {
        let codec = ExchangeKind::Bybit.codec(MarketMap::new());
        assert_eq!(codec.name(), "bybit");
    }
}
