//! Per-symbol accumulation of quotes awaiting persistence.

use std::collections::HashMap;

use crate::domain::market::{Quote, Symbol, Timestamp};

#[derive(Debug, Default)]
struct BufferEntry {
    pending: Vec<Quote>,
    last_flushed: Option<Timestamp>,
}

/// Quotes received but not yet written, grouped by symbol.
///
/// Owned exclusively by the consumer scheduler. Entries are only cleared
/// after a successful write, so a failed flush is retried with the same
/// (possibly grown) batch.
#[derive(Debug, Default)]
pub struct QuoteBuffer {
    entries: HashMap<Symbol, BufferEntry>,
    out_of_order: u64,
}

impl QuoteBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a quote to its symbol's entry, preserving arrival order.
    ///
    /// Returns `false` if the quote is older than the last observation
    /// already flushed for the symbol. Such quotes are still kept.
    pub fn append(&mut self, quote: Quote) -> bool {
        let entry = self.entries.entry(quote.symbol().clone()).or_default();
        let in_order = entry
            .last_flushed
            .is_none_or(|last| quote.observed_at() >= last);
        if !in_order {
            self.out_of_order += 1;
        }
        entry.pending.push(quote);
        in_order
    }

    /// Symbols that have pending quotes.
    #[must_use]
    pub fn pending_symbols(&self) -> Vec<Symbol> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.pending.is_empty())
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Pending quotes for a symbol, in arrival order.
    #[must_use]
    pub fn pending(&self, symbol: &Symbol) -> &[Quote] {
        self.entries
            .get(symbol)
            .map_or(&[], |entry| entry.pending.as_slice())
    }

    /// Clear a symbol's pending quotes after they were written.
    ///
    /// Returns the number of quotes cleared.
    pub fn mark_flushed(&mut self, symbol: &Symbol) -> usize {
        let Some(entry) = self.entries.get_mut(symbol) else {
            return 0;
        };
        let newest = entry.pending.iter().map(Quote::observed_at).max();
        if let Some(newest) = newest {
            entry.last_flushed = Some(entry.last_flushed.map_or(newest, |last| last.max(newest)));
        }
        let cleared = entry.pending.len();
        entry.pending.clear();
        cleared
    }

    /// Newest observation flushed for a symbol.
    #[must_use]
    pub fn last_flushed(&self, symbol: &Symbol) -> Option<Timestamp> {
        self.entries.get(symbol).and_then(|entry| entry.last_flushed)
    }

    /// Total pending quotes across all symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(|entry| entry.pending.len()).sum()
    }

    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|entry| entry.pending.is_empty())
    }

    /// Total out-of-order arrivals seen.
    #[must_use]
    pub const fn out_of_order(&self) -> u64 {
        self.out_of_order
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn quote(pair: &str, price: i64, at: i64) -> Quote {
        Quote::new(
            pair.parse().unwrap(),
            Decimal::from(price),
            Timestamp::from_millis(at),
        )
        .unwrap()
    }

    #[test]
    fn groups_by_symbol_in_arrival_order() {
        let mut buffer = QuoteBuffer::new();
        buffer.append(quote("BTC/USDT", 1, 10));
        buffer.append(quote("ETH/USDT", 2, 11));
        buffer.append(quote("BTC/USDT", 3, 12));

        let btc: Symbol = "BTC/USDT".parse().unwrap();
        let prices: Vec<_> = buffer.pending(&btc).iter().map(Quote::price).collect();
        assert_eq!(prices, vec![Decimal::from(1), Decimal::from(3)]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.pending_symbols().len(), 2);
    }

    #[test]
    fn mark_flushed_clears_and_tracks_newest() {
        let mut buffer = QuoteBuffer::new();
        let btc: Symbol = "BTC/USDT".parse().unwrap();
        buffer.append(quote("BTC/USDT", 1, 30));
        buffer.append(quote("BTC/USDT", 1, 20));

        assert_eq!(buffer.mark_flushed(&btc), 2);
        assert!(buffer.is_empty());
        assert!(buffer.pending_symbols().is_empty());
        assert_eq!(buffer.last_flushed(&btc), Some(Timestamp::from_millis(30)));
    }

    #[test]
    fn counts_out_of_order_but_keeps_quote() {
        let mut buffer = QuoteBuffer::new();
        let btc: Symbol = "BTC/USDT".parse().unwrap();
        buffer.append(quote("BTC/USDT", 1, 100));
        buffer.mark_flushed(&btc);

        assert!(!buffer.append(quote("BTC/USDT", 1, 90)));
        assert!(buffer.append(quote("BTC/USDT", 1, 100)));
        assert_eq!(buffer.out_of_order(), 1);
        assert_eq!(buffer.pending(&btc).len(), 2);
    }

    #[test]
    fn unknown_symbol_has_nothing_pending() {
        let mut buffer = QuoteBuffer::new();
        let doge: Symbol = "DOGE/USDT".parse().unwrap();
        assert!(buffer.pending(&doge).is_empty());
        assert_eq!(buffer.mark_flushed(&doge), 0);
    }
}
