//! In-memory storage backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{StorageBackend, StorageError};
use crate::domain::market::{StoredQuote, Symbol, Timestamp};

/// Per-symbol records ordered by `(observed_at, insertion sequence)`.
type SymbolIndex = BTreeMap<(Timestamp, u64), StoredQuote>;

/// Non-durable backend holding every record in process memory.
///
/// Duplicate observations are kept; the latest-before lookup returns the
/// most recently inserted record among equal timestamps.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    symbols: RwLock<HashMap<Symbol, SymbolIndex>>,
    sequence: AtomicU64,
}

impl InMemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.read().values().map(BTreeMap::len).sum()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn insert_batch(&self, records: &[StoredQuote]) -> Result<(), StorageError> {
        let mut symbols = self.symbols.write();
        for record in records {
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            symbols
                .entry(record.symbol.clone())
                .or_default()
                .insert((record.observed_at, seq), record.clone());
        }
        Ok(())
    }

    async fn latest_before(
        &self,
        symbol: &Symbol,
        at: Timestamp,
    ) -> Result<Option<StoredQuote>, StorageError> {
        let symbols = self.symbols.read();
        Ok(symbols.get(symbol).and_then(|index| {
            index
                .range(..=(at, u64::MAX))
                .next_back()
                .map(|(_, record)| record.clone())
        }))
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, StorageError> {
        let mut symbols = self.symbols.write();
        let mut deleted = 0usize;
        for index in symbols.values_mut() {
            let kept = index.split_off(&(cutoff, 0));
            deleted += index.len();
            *index = kept;
        }
        symbols.retain(|_, index| !index.is_empty());
        Ok(deleted as u64)
    }
}
