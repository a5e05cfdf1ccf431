//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StorageBackend`: Durable quote store (batched insert, nearest-before
//!   lookup, age-based deletion)
//! - `ExchangeCodec`: Vendor-specific framing of an exchange's public stream

mod exchange;
mod storage;

pub use exchange::{CodecError, ExchangeCodec, InboundFrame, TransportProtocol};
pub use storage::{StorageBackend, StorageError, with_timeout};

#[cfg(test)]
pub use storage::MockStorageBackend;
