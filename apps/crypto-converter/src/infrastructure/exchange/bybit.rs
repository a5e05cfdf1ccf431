//! Bybit v5 public spot stream codec.
//!
//! # Stream URL
//!
//! `wss://stream.bybit.com/v5/public/spot`
//!
//! # Protocol
//!
//! - Subscribe: `{"op":"subscribe","args":["tickers.BTCUSDT", ...]}`, at most
//!   10 topics per request
//! - Ping: `{"op":"ping"}`, answered with `{"ret_msg":"pong", ...}`
//! - Ticker: `{"topic":"tickers.BTCUSDT","ts":1700000000000,"data":{"symbol":"BTCUSDT","lastPrice":"37000.5"}}`

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::markets::MarketMap;
use crate::application::ports::{CodecError, ExchangeCodec, InboundFrame, TransportProtocol};
use crate::domain::market::{Quote, Timestamp};

/// Public spot stream endpoint.
pub const BYBIT_SPOT_WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";

/// Default REST API base URL.
pub const BYBIT_REST_URL: &str = "https://api.bybit.com";

/// Maximum topics per subscribe request.
pub const SUBSCRIBE_BATCH_SIZE: usize = 10;

const TICKER_TOPIC_PREFIX: &str = "tickers.";

#[derive(Debug, Serialize)]
struct OpRequest<'a> {
    op: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
}

/// Any inbound frame. Control replies and data pushes share one envelope.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    ts: Option<i64>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    ret_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerData {
    symbol: String,
    #[serde(default)]
    last_price: Option<String>,
}

/// Codec for the Bybit v5 spot ticker stream.
#[derive(Debug, Clone)]
pub struct BybitCodec {
    markets: MarketMap,
}

impl BybitCodec {
    /// Create a codec subscribing to every instrument in `markets`.
    #[must_use]
    pub const fn new(markets: MarketMap) -> Self {
        Self { markets }
    }

    /// Instruments this codec subscribes to.
    #[must_use]
    pub const fn markets(&self) -> &MarketMap {
        &self.markets
    }

    fn decode_ticker(
        &self,
        envelope: Envelope,
        received_at: Timestamp,
    ) -> Result<InboundFrame, CodecError> {
        let data: TickerData =
            serde_json::from_value(envelope.data.ok_or(CodecError::MissingField("data"))?)?;
        let Some(symbol) = self.markets.get(&data.symbol) else {
            return Ok(InboundFrame::Ignored);
        };
        let raw = data.last_price.ok_or(CodecError::MissingField("lastPrice"))?;
        let price = Decimal::from_str(&raw).map_err(|e| CodecError::InvalidPrice {
            value: raw.clone(),
            reason: e.to_string(),
        })?;
        let observed_at = envelope.ts.map_or(received_at, Timestamp::from_millis);

        let quote = Quote::new(symbol.clone(), price, observed_at).map_err(|e| {
            CodecError::InvalidPrice {
                value: raw,
                reason: e.to_string(),
            }
        })?;
        Ok(InboundFrame::Quote(quote))
    }
}

impl ExchangeCodec for BybitCodec {
    fn name(&self) -> &'static str {
        "bybit"
    }

    fn endpoint(&self, protocol: TransportProtocol) -> Option<String> {
        match protocol {
            TransportProtocol::Wss => Some(BYBIT_SPOT_WS_URL.to_string()),
        }
    }

    fn subscribe_frames(&self) -> Result<Vec<String>, CodecError> {
        let topics: Vec<String> = self
            .markets
            .instruments()
            .into_iter()
            .map(|name| format!("{TICKER_TOPIC_PREFIX}{name}"))
            .collect();

        topics
            .chunks(SUBSCRIBE_BATCH_SIZE)
            .map(|chunk| {
                serde_json::to_string(&OpRequest {
                    op: "subscribe",
                    args: chunk.to_vec(),
                })
                .map_err(CodecError::from)
            })
            .collect()
    }

    fn ping_frame(&self) -> Option<String> {
        Some(r#"{"op":"ping"}"#.to_string())
    }

    fn decode(&self, frame: &str, received_at: Timestamp) -> Result<Vec<InboundFrame>, CodecError> {
        let envelope: Envelope = serde_json::from_str(frame)?;

        if envelope.ret_msg.as_deref() == Some("pong") || envelope.op.as_deref() == Some("pong") {
            return Ok(vec![InboundFrame::Pong]);
        }

        if let (Some(op), Some(success)) = (envelope.op.as_ref(), envelope.success) {
            return Ok(vec![InboundFrame::Ack {
                op: op.clone(),
                success,
                message: envelope.ret_msg.clone().unwrap_or_default(),
            }]);
        }

        match envelope.topic.as_deref() {
            Some(topic) if topic.starts_with(TICKER_TOPIC_PREFIX) => {
                Ok(vec![self.decode_ticker(envelope, received_at)?])
            }
            _ => Ok(vec![InboundFrame::Ignored]),
        }
    }
}
