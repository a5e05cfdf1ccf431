//! Storage Backends
//!
//! Adapters implementing the `StorageBackend` port. The backend is chosen
//! once at startup from `DATABASE_TYPE`.

mod clickhouse;
mod memory;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use clickhouse::{ClickHouseDsn, ClickHouseStorage};
pub use memory::InMemoryStorage;

use crate::application::ports::{StorageBackend, StorageError};

/// Supported storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// ClickHouse over HTTP.
    ClickHouse,
    /// Process memory, not durable.
    Memory,
}

impl StorageKind {
    /// Name as configured.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClickHouse => "clickhouse",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "clickhouse" => Ok(Self::ClickHouse),
            "memory" => Ok(Self::Memory),
            other => Err(other.to_string()),
        }
    }
}

/// Build the configured backend. Does not call `open`.
///
/// # Errors
///
/// Returns `Connection` if ClickHouse is selected without a valid DSN.
pub fn build_storage(
    kind: StorageKind,
    clickhouse_dsn: Option<&str>,
    timeout: Duration,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    match kind {
        StorageKind::Memory => Ok(Arc::new(InMemoryStorage::new())),
        StorageKind::ClickHouse => {
            let dsn = clickhouse_dsn.ok_or_else(|| {
                StorageError::Connection("CLICKHOUSE_DSN is required for clickhouse".to_string())
            })?;
            Ok(Arc::new(ClickHouseStorage::new(dsn, timeout)?))
        }
    }
}
