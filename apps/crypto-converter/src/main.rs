//! Crypto Converter Binary
//!
//! Starts the quote ingestion pipeline and the conversion endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin crypto-converter
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_TYPE`: clickhouse | memory
//! - `CLICKHOUSE_DSN`: when `DATABASE_TYPE=clickhouse`
//!
//! ## Optional
//! - `EXCHANGE_NAME`: Exchange to stream from (default: bybit)
//! - `EXCHANGE_SYMBOLS`: Comma-separated pairs, e.g. `BTC/USDT,ETH/USDT`
//!   (default: every listed spot market)
//! - `TRANSPORT_CONNECTIONS`: Connection slots, e.g. `wss:2` (default: wss:1)
//! - `QUOTE_CONSUMER_FLUSH_INTERVAL_SECS`: Flush period (default: 30)
//! - `QUOTE_CONSUMER_DELETE_INTERVAL_DAYS`: Retention window (default: 7)
//! - `QUOTE_READER_OUTDATED_INTERVAL_SECS`: Staleness limit (default: 60)
//! - `CONVERTER_HTTP_PORT`: HTTP port (default: 8080)
//! - `SHUTDOWN_GRACE_SECS`: Graceful shutdown bound (default: 30)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use crypto_converter::application::services::{BoundedQueue, ConsumerScheduler, ConversionEngine};
use crypto_converter::infrastructure::exchange::{
    ExchangeTransport, MarketMap, ReconnectConfig, ReconnectPolicy,
};
use crypto_converter::infrastructure::http::{HttpServer, HttpState};
use crypto_converter::infrastructure::storage::build_storage;
use crypto_converter::infrastructure::telemetry;
use crypto_converter::{ConverterConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Crypto Converter");

    let _metrics_handle = init_metrics()?;

    let config = ConverterConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let transport_config = config.transport_config();

    // Storage
    let storage = build_storage(
        config.storage.kind,
        config.storage.clickhouse_dsn.as_deref(),
        config.storage.timeout,
    )?;
    let opened = retry_with_backoff(
        "open storage",
        &transport_config.reconnect,
        &shutdown_token,
        || storage.open(),
    )
    .await;
    if opened.is_none() {
        tracing::info!("Shutdown requested before storage was ready");
        return Ok(());
    }

    // Markets
    let markets = if config.exchange.symbols.is_empty() {
        let client = reqwest::Client::builder()
            .timeout(config.storage.timeout)
            .build()?;
        let loaded = retry_with_backoff(
            "load markets",
            &transport_config.reconnect,
            &shutdown_token,
            || {
                config
                    .exchange
                    .kind
                    .load_markets(&client, &config.exchange.rest_url)
            },
        )
        .await;
        let Some(markets) = loaded else {
            tracing::info!("Shutdown requested before markets were loaded");
            return Ok(());
        };
        markets
    } else {
        MarketMap::from_symbols(config.exchange.symbols.iter().cloned())
    };
    tracing::info!(
        exchange = config.exchange.kind.as_str(),
        markets = markets.len(),
        "Markets ready"
    );

    // Ingestion pipeline
    let queue = Arc::new(BoundedQueue::new(config.transport.local_queue_max_size));
    let codec = config.exchange.kind.codec(markets);
    let transport = ExchangeTransport::new(
        codec,
        Arc::clone(&queue),
        &transport_config,
        &shutdown_token,
    )?;
    transport.start();

    let scheduler = Arc::new(ConsumerScheduler::new(
        Arc::clone(&queue),
        Arc::clone(&storage),
        config.scheduler_config(),
    ));
    let scheduler_handle = scheduler.start(&shutdown_token);

    // Query path
    let engine = Arc::new(ConversionEngine::new(
        Arc::clone(&storage),
        config.engine_config(),
    ));
    let http_state = Arc::new(HttpState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        config.exchange.kind.as_str(),
        transport.registry(),
        Arc::clone(&queue),
        engine,
    ));
    let http_server = HttpServer::new(
        config.server.http_port,
        http_state,
        shutdown_token.clone(),
    );
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Crypto converter ready");

    shutdown_token.cancelled().await;

    let grace = config.server.shutdown_grace;
    let deadline = tokio::time::Instant::now() + grace;
    tracing::info!(timeout_secs = grace.as_secs(), "Graceful shutdown started");

    transport.stop(grace).await;
    let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
    match scheduler_handle.stop(remaining).await {
        Some(report) => tracing::info!(
            written = report.written,
            pending = report.pending,
            "Final flush completed"
        ),
        None => tracing::warn!("Final flush did not complete before the deadline"),
    }
    if tokio::time::timeout_at(deadline, http_task).await.is_err() {
        tracing::warn!("HTTP server did not stop before the deadline");
    }

    tracing::info!("Crypto converter stopped");
    Ok(())
}

/// Retry a startup step with exponential backoff until it succeeds.
///
/// Returns `None` if shutdown is requested first.
async fn retry_with_backoff<T, E, F, Fut>(
    step: &'static str,
    config: &ReconnectConfig,
    shutdown_token: &CancellationToken,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut policy = ReconnectPolicy::new(config.clone());
    loop {
        let result = tokio::select! {
            () = shutdown_token.cancelled() => return None,
            result = op() => result,
        };
        match result {
            Ok(value) => return Some(value),
            Err(e) => {
                let delay = policy.next_delay();
                tracing::warn!(
                    step,
                    attempt = policy.attempt_count(),
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Startup step failed, retrying"
                );
                tokio::select! {
                    () = shutdown_token.cancelled() => return None,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ConverterConfig) {
    tracing::info!(
        exchange = config.exchange.kind.as_str(),
        symbols = config.exchange.symbols.len(),
        storage = config.storage.kind.as_str(),
        http_port = config.server.http_port,
        pivot = %config.reader.pivot_currency,
        "Configuration loaded"
    );
    tracing::debug!(
        flush_interval = ?config.consumer.flush_interval,
        delete_interval = ?config.consumer.delete_interval,
        outdated_interval = ?config.reader.outdated_interval,
        queue_capacity = config.transport.local_queue_max_size,
        "Pipeline timing"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Wait for SIGTERM or SIGINT, then cancel the shutdown token.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
