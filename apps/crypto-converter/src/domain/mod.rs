//! Domain Layer - Core quote and conversion types.
//!
//! This layer contains the canonical representation of market quotes and
//! conversion results with no I/O dependencies. All types here are pure
//! Rust with serialization support.

/// Quotes, currency pairs and timestamps.
pub mod market;

/// Point-in-time conversion requests, results and errors.
pub mod conversion;
