//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (exchange codecs, storage).
pub mod ports;

/// Application services: buffering, scheduling and conversion.
pub mod services;
