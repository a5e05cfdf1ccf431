#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Crypto Converter - Quote Ingestion and Conversion Service
//!
//! Streams ticker quotes from a crypto exchange, persists them into a
//! retention-bounded store and answers "how much is X of A in B at time T"
//! against the stored history.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Quote and conversion value types
//!   - `market`: Symbols, quotes and millisecond timestamps
//!   - `conversion`: Conversion requests, results and errors
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Exchange codec and storage backend interfaces
//!   - `services`: Transport queue, quote buffer, consumer scheduler,
//!     conversion engine
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchange`: WebSocket clients, heartbeat, reconnection, codecs
//!   - `storage`: ClickHouse and in-memory backends
//!   - `config`: Environment-driven configuration
//!   - `http`: Health, metrics and conversion endpoints
//!
//! # Data Flow
//!
//! ```text
//! Exchange WS ──► codec ──► BoundedQueue ──► QuoteBuffer ──► StorageBackend
//!  (N slots)                (drop-oldest)    (per symbol)          │
//!                                                                  ▼
//!                               GET /convert ──► ConversionEngine ─┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote and conversion types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::conversion::{ConversionError, ConversionRequest, ConversionResult};
pub use domain::market::{Quote, StoredQuote, Symbol, Timestamp};

// Ports and services
pub use application::ports::{ExchangeCodec, StorageBackend, StorageError};
pub use application::services::{
    BoundedQueue, ConsumerScheduler, ConversionEngine, EngineConfig, FlushReport, QuoteBuffer,
    SchedulerConfig, SchedulerHandle,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ConverterConfig};

// HTTP server
pub use infrastructure::http::{HttpServer, HttpServerError, HttpState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
