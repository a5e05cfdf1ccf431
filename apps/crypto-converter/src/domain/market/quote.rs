//! Quote records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Symbol, Timestamp};

/// A single price observation for a currency pair.
///
/// Immutable once created; `price` is always strictly positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuoteFields")]
pub struct Quote {
    symbol: Symbol,
    price: Decimal,
    observed_at: Timestamp,
}

impl Quote {
    /// Create a quote.
    ///
    /// # Errors
    ///
    /// Returns `QuoteError::NonPositivePrice` if `price <= 0`.
    pub fn new(symbol: Symbol, price: Decimal, observed_at: Timestamp) -> Result<Self, QuoteError> {
        if price <= Decimal::ZERO {
            return Err(QuoteError::NonPositivePrice { symbol, price });
        }
        Ok(Self {
            symbol,
            price,
            observed_at,
        })
    }

    /// Currency pair.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Observed price of one unit of base asset in quote asset.
    #[must_use]
    pub const fn price(&self) -> Decimal {
        self.price
    }

    /// Exchange-reported (or receipt) time of the observation.
    #[must_use]
    pub const fn observed_at(&self) -> Timestamp {
        self.observed_at
    }

    /// Attach an ingestion time, producing the durable form.
    #[must_use]
    pub fn into_stored(self, ingested_at: Timestamp) -> StoredQuote {
        StoredQuote {
            symbol: self.symbol,
            price: self.price,
            observed_at: self.observed_at,
            ingested_at,
        }
    }
}

/// Unvalidated wire form; deserialization goes through `Quote::new`.
#[derive(Deserialize)]
struct QuoteFields {
    symbol: Symbol,
    price: Decimal,
    observed_at: Timestamp,
}

impl TryFrom<QuoteFields> for Quote {
    type Error = QuoteError;

    fn try_from(fields: QuoteFields) -> Result<Self, Self::Error> {
        Self::new(fields.symbol, fields.price, fields.observed_at)
    }
}

/// Durable form of a quote as written to a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredQuote {
    /// Currency pair.
    pub symbol: Symbol,
    /// Observed price.
    pub price: Decimal,
    /// Observation time.
    pub observed_at: Timestamp,
    /// Time the record was flushed to storage.
    pub ingested_at: Timestamp,
}

/// Quote construction errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteError {
    /// Price was zero or negative.
    #[error("non-positive price {price} for {symbol}")]
    NonPositivePrice {
        /// Pair the price was reported for.
        symbol: Symbol,
        /// Rejected price.
        price: Decimal,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc_usdt() -> Symbol {
        Symbol::new("BTC", "USDT").unwrap()
    }

    #[test]
    fn rejects_zero_and_negative_price() {
        let ts = Timestamp::from_millis(1);
        assert!(Quote::new(btc_usdt(), Decimal::ZERO, ts).is_err());
        assert!(Quote::new(btc_usdt(), Decimal::new(-5, 0), ts).is_err());
    }

    #[test]
    fn deserialization_validates_price() {
        let quote: Quote = serde_json::from_str(
            r#"{"symbol":"BTC/USDT","price":"50500","observed_at":130}"#,
        )
        .unwrap();
        assert_eq!(quote.price(), Decimal::new(50_500, 0));
        assert_eq!(quote.observed_at(), Timestamp::from_millis(130));

        for price in ["0", "-1"] {
            let json = format!(r#"{{"symbol":"BTC/USDT","price":"{price}","observed_at":130}}"#);
            let err = serde_json::from_str::<Quote>(&json).unwrap_err();
            assert!(err.to_string().contains("non-positive price"), "{err}");
        }
    }

    #[test]
    fn into_stored_keeps_fields() {
        let quote = Quote::new(
            btc_usdt(),
            Decimal::new(50_500, 0),
            Timestamp::from_millis(130),
        )
        .unwrap();
        let stored = quote.into_stored(Timestamp::from_millis(200));
        assert_eq!(stored.symbol, btc_usdt());
        assert_eq!(stored.price, Decimal::new(50_500, 0));
        assert_eq!(stored.observed_at, Timestamp::from_millis(130));
        assert_eq!(stored.ingested_at, Timestamp::from_millis(200));
    }
}
