//! Exchange Transport Integration Tests
//!
//! Runs the transport against a local WebSocket server speaking the Bybit
//! ticker protocol and checks reconnection and quote delivery.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crypto_converter::application::ports::TransportProtocol;
use crypto_converter::infrastructure::exchange::{
    ConnectionStatus, ExchangeKind, ExchangeTransport, MarketMap, ReconnectConfig,
    TransportConfig,
};
use crypto_converter::{BoundedQueue, Quote, Symbol};

fn ticker_frame(price: &str, ts: i64) -> String {
    serde_json::json!({
        "topic": "tickers.BTCUSDT",
        "ts": ts,
        "type": "snapshot",
        "data": { "symbol": "BTCUSDT", "lastPrice": price }
    })
    .to_string()
}

/// Serves two sessions: the first sends one ticker and closes, the second
/// sends one ticker and stays open.
async fn spawn_flaky_exchange() -> (String, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let mut subscriptions = Vec::new();

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            subscriptions.push(text.to_string());
        }
        ws.send(Message::Text(ticker_frame("50000", 100).into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            subscriptions.push(text.to_string());
        }
        ws.send(Message::Text(ticker_frame("50500", 130).into()))
            .await
            .unwrap();
        while let Some(Ok(_)) = ws.next().await {}

        subscriptions
    });

    (url, server)
}

fn transport_config(url: String) -> TransportConfig {
    TransportConfig {
        url_override: Some(url),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            jitter_factor: 0.0,
            ..ReconnectConfig::default()
        },
        ..TransportConfig::default()
    }
}

async fn wait_for_len(queue: &BoundedQueue<Quote>, len: usize) {
    timeout(Duration::from_secs(5), async {
        while queue.len() < len {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("quotes did not arrive in time");
}

#[tokio::test]
async fn reconnects_after_peer_close_and_keeps_streaming() {
    let (url, server) = spawn_flaky_exchange().await;

    let queue = Arc::new(BoundedQueue::new(100));
    let markets = MarketMap::from_symbols([Symbol::new("BTC", "USDT").unwrap()]);
    let codec = ExchangeKind::Bybit.codec(markets);
    let cancel = CancellationToken::new();
    let transport =
        ExchangeTransport::new(codec, Arc::clone(&queue), &transport_config(url), &cancel)
            .unwrap();

    let mut events = transport.subscribe();
    transport.start();

    let mut seen = Vec::new();
    timeout(Duration::from_secs(5), async {
        while seen.len() < 3 {
            let event = events.recv().await.unwrap();
            if event.status != ConnectionStatus::Connecting {
                seen.push(event.status);
            }
        }
    })
    .await
    .expect("connection did not cycle in time");
    assert_eq!(
        seen,
        vec![
            ConnectionStatus::Connected,
            ConnectionStatus::Degraded,
            ConnectionStatus::Connected,
        ]
    );

    wait_for_len(&queue, 2).await;
    let prices: Vec<Decimal> = queue.drain().iter().map(Quote::price).collect();
    assert_eq!(prices, vec![Decimal::from(50_000), Decimal::from(50_500)]);

    transport.stop(Duration::from_secs(2)).await;
    assert!(
        transport
            .states()
            .iter()
            .all(|s| s.status == ConnectionStatus::Closed)
    );

    let subscriptions = timeout(Duration::from_secs(2), server)
        .await
        .expect("server did not finish")
        .unwrap();
    assert_eq!(subscriptions.len(), 2);
    for frame in subscriptions {
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["op"], "subscribe");
        assert_eq!(value["args"][0], "tickers.BTCUSDT");
    }
}

#[tokio::test]
async fn stop_before_connect_closes_slots() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let queue = Arc::new(BoundedQueue::new(100));
    let codec = ExchangeKind::Bybit.codec(MarketMap::new());
    let cancel = CancellationToken::new();
    let config = TransportConfig {
        connections: vec![(TransportProtocol::Wss, 2)],
        ..transport_config(url)
    };
    let transport = ExchangeTransport::new(codec, queue, &config, &cancel).unwrap();
    assert_eq!(transport.slot_count(), 2);

    transport.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    transport.stop(Duration::from_secs(2)).await;

    assert!(
        transport
            .states()
            .iter()
            .all(|s| s.status == ConnectionStatus::Closed)
    );
}

#[tokio::test]
async fn degraded_events_carry_the_upcoming_attempt() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let queue = Arc::new(BoundedQueue::new(100));
    let codec = ExchangeKind::Bybit.codec(MarketMap::new());
    let cancel = CancellationToken::new();
    let transport =
        ExchangeTransport::new(codec, queue, &transport_config(url), &cancel).unwrap();

    let mut events = transport.subscribe();
    transport.start();

    let mut attempts = Vec::new();
    timeout(Duration::from_secs(5), async {
        while attempts.len() < 3 {
            let event = events.recv().await.unwrap();
            if event.status == ConnectionStatus::Degraded {
                attempts.push(event.reconnect_attempts);
            }
        }
    })
    .await
    .expect("no reconnect cycles observed");
    assert_eq!(attempts, vec![1, 2, 3]);

    transport.stop(Duration::from_secs(2)).await;
    let slot = &transport.states()[0];
    assert_eq!(slot.status, ConnectionStatus::Closed);
}
