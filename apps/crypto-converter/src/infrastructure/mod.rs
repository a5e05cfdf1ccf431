//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process-level
//! plumbing around them.

/// Configuration loaded from the environment.
pub mod config;

/// Exchange stream adapters and connection management.
pub mod exchange;

/// HTTP endpoint for health, metrics and conversion queries.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Quote storage backends.
pub mod storage;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
