//! Storage Backend Port (Driven Port)
//!
//! Interface for the durable, time-indexed quote store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::market::{StoredQuote, Symbol, Timestamp};

/// Storage failures.
///
/// Writes are retried on the next scheduler tick; reads surface the
/// failure to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Backend unreachable or connection dropped.
    #[error("storage connection error: {0}")]
    Connection(String),

    /// Call did not complete within the configured timeout.
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),

    /// Backend rejected the statement.
    #[error("storage query failed: {0}")]
    Query(String),

    /// Backend response could not be decoded.
    #[error("storage response decode failed: {0}")]
    Decode(String),
}

/// Durable quote store.
///
/// Implementations must tolerate concurrent reads during writes, and a
/// completed `insert_batch` must be visible to subsequent `latest_before`
/// calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend identifier for logs and metrics.
    fn name(&self) -> &'static str;

    /// Prepare the backend (create schema). Idempotent.
    async fn open(&self) -> Result<(), StorageError>;

    /// Insert a batch of records.
    async fn insert_batch(&self, records: &[StoredQuote]) -> Result<(), StorageError>;

    /// Most recent record for `symbol` with `observed_at <= at`.
    async fn latest_before(
        &self,
        symbol: &Symbol,
        at: Timestamp,
    ) -> Result<Option<StoredQuote>, StorageError>;

    /// Delete every record with `observed_at < cutoff`.
    ///
    /// Returns the number of deleted records when the backend reports it,
    /// zero otherwise.
    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, StorageError>;
}

/// Run a storage future with a deadline.
///
/// # Errors
///
/// Returns `StorageError::Timeout` when `limit` elapses first, otherwise
/// whatever the future returned.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(StorageError::Timeout(limit)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn with_timeout_maps_elapsed_to_timeout() {
        let result: Result<(), StorageError> = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(StorageError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test]
    async fn with_timeout_passes_through_result() {
        let ok = with_timeout(Duration::from_secs(1), async { Ok::<_, StorageError>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err = with_timeout(Duration::from_secs(1), async {
            Err::<(), _>(StorageError::Query("boom".to_string()))
        })
        .await;
        assert_eq!(err, Err(StorageError::Query("boom".to_string())));
    }
}
