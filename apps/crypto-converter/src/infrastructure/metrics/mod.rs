//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: Quotes received, decode errors, queue drops and depth
//! - **Connections**: Exchange connection gauge and reconnect attempts
//! - **Persistence**: Flush and retention outcomes, buffer size, latency
//! - **Queries**: Conversion outcomes and latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the already installed handle.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Ingestion
    describe_counter!(
        "crypto_converter_quotes_received_total",
        "Total quotes decoded from exchange streams"
    );
    describe_counter!(
        "crypto_converter_decode_errors_total",
        "Total inbound frames that failed to decode"
    );
    describe_counter!(
        "crypto_converter_queue_dropped_total",
        "Total quotes evicted from the transport queue (drop-oldest)"
    );
    describe_gauge!(
        "crypto_converter_queue_depth",
        "Quotes currently waiting in the transport queue"
    );

    // Connections
    describe_gauge!(
        "crypto_converter_websocket_connections",
        "Number of connected exchange streams"
    );
    describe_counter!(
        "crypto_converter_reconnects_total",
        "Total exchange reconnection attempts"
    );

    // Persistence
    describe_gauge!(
        "crypto_converter_buffer_quotes",
        "Quotes buffered and awaiting flush"
    );
    describe_counter!(
        "crypto_converter_out_of_order_quotes_total",
        "Quotes older than their symbol's last flushed observation"
    );
    describe_counter!(
        "crypto_converter_flush_total",
        "Per-symbol flush attempts by outcome"
    );
    describe_counter!(
        "crypto_converter_flushed_quotes_total",
        "Total quotes written to storage"
    );
    describe_histogram!(
        "crypto_converter_flush_seconds",
        "Duration of a full flush tick"
    );
    describe_counter!(
        "crypto_converter_retention_sweeps_total",
        "Retention sweeps by outcome"
    );
    describe_counter!(
        "crypto_converter_retention_deleted_total",
        "Records deleted by retention sweeps"
    );

    // Queries
    describe_counter!(
        "crypto_converter_conversions_total",
        "Conversion queries by outcome"
    );
    describe_histogram!(
        "crypto_converter_conversion_seconds",
        "Conversion query latency"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for storage jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Storage call succeeded.
    Success,
    /// Storage call failed or timed out.
    Failure,
}

impl JobOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record a quote decoded from an exchange stream.
pub fn record_quote_received(exchange: &'static str) {
    counter!("crypto_converter_quotes_received_total", "exchange" => exchange).increment(1);
}

/// Record an inbound frame that failed to decode.
pub fn record_decode_error(exchange: &'static str) {
    counter!("crypto_converter_decode_errors_total", "exchange" => exchange).increment(1);
}

/// Record quotes evicted from the transport queue.
pub fn record_queue_dropped(count: u64) {
    counter!("crypto_converter_queue_dropped_total").increment(count);
}

/// Update the transport queue depth.
#[allow(clippy::cast_precision_loss)]
pub fn set_queue_depth(depth: usize) {
    gauge!("crypto_converter_queue_depth").set(depth as f64);
}

/// Adjust the connected stream count for an exchange.
pub fn adjust_websocket_connections(exchange: &'static str, delta: f64) {
    gauge!("crypto_converter_websocket_connections", "exchange" => exchange).increment(delta);
}

/// Record an exchange reconnection attempt.
pub fn record_reconnect(exchange: &'static str) {
    counter!("crypto_converter_reconnects_total", "exchange" => exchange).increment(1);
}

/// Update the number of buffered quotes.
#[allow(clippy::cast_precision_loss)]
pub fn set_buffered_quotes(count: usize) {
    gauge!("crypto_converter_buffer_quotes").set(count as f64);
}

/// Record quotes that arrived out of order.
pub fn record_out_of_order(count: u64) {
    counter!("crypto_converter_out_of_order_quotes_total").increment(count);
}

/// Record one per-symbol flush attempt.
pub fn record_flush(outcome: JobOutcome, written: u64) {
    counter!("crypto_converter_flush_total", "outcome" => outcome.as_str()).increment(1);
    if outcome == JobOutcome::Success {
        counter!("crypto_converter_flushed_quotes_total").increment(written);
    }
}

/// Record the duration of a flush tick.
pub fn record_flush_duration(duration: Duration) {
    histogram!("crypto_converter_flush_seconds").record(duration.as_secs_f64());
}

/// Record a retention sweep.
pub fn record_retention(outcome: JobOutcome, deleted: u64) {
    counter!("crypto_converter_retention_sweeps_total", "outcome" => outcome.as_str())
        .increment(1);
    counter!("crypto_converter_retention_deleted_total").increment(deleted);
}

/// Record a conversion query and its latency.
///
/// `outcome` is `"ok"` or a conversion error code.
pub fn record_conversion(outcome: &'static str, duration: Duration) {
    counter!("crypto_converter_conversions_total", "outcome" => outcome).increment(1);
    histogram!("crypto_converter_conversion_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_outcome_as_str() {
        assert_eq!(JobOutcome::Success.as_str(), "success");
        assert_eq!(JobOutcome::Failure.as_str(), "failure");
    }

    #[test]
    fn recording_without_recorder_is_a_no_op() {
        record_quote_received("bybit");
        record_flush(JobOutcome::Success, 3);
        record_conversion("ok", Duration::from_millis(2));
        set_queue_depth(10);
    }
}
