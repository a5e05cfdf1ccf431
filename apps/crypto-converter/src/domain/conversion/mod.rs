//! Conversion Types
//!
//! Point-in-time conversion of an amount from one asset into another.
//! Results are derived from stored quotes and never persisted.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::market::{Symbol, SymbolError, Timestamp, normalize_asset};

/// A validated conversion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    amount: Decimal,
    from_asset: String,
    to_asset: String,
    at: Option<Timestamp>,
}

impl ConversionRequest {
    /// Validate and build a request.
    ///
    /// `at = None` means "as of now".
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` for negative amounts and `InvalidAsset` for
    /// malformed asset names.
    pub fn new(
        amount: Decimal,
        from_asset: &str,
        to_asset: &str,
        at: Option<Timestamp>,
    ) -> Result<Self, ConversionError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ConversionError::InvalidAmount(amount.to_string()));
        }
        let from_asset = normalize_asset(from_asset).map_err(ConversionError::from)?;
        let to_asset = normalize_asset(to_asset).map_err(ConversionError::from)?;
        Ok(Self {
            amount,
            from_asset,
            to_asset,
            at,
        })
    }

    /// Amount of `from_asset` to convert.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.amount
    }

    /// Source asset.
    #[must_use]
    pub fn from_asset(&self) -> &str {
        &self.from_asset
    }

    /// Target asset.
    #[must_use]
    pub fn to_asset(&self) -> &str {
        &self.to_asset
    }

    /// Requested instant, if explicit.
    #[must_use]
    pub const fn at(&self) -> Option<Timestamp> {
        self.at
    }

    /// Direct pair `FROM/TO`.
    ///
    /// # Errors
    ///
    /// Never fails for a validated request; kept fallible for symmetry with
    /// `Symbol::new`.
    pub fn direct_pair(&self) -> Result<Symbol, SymbolError> {
        Symbol::new(&self.from_asset, &self.to_asset)
    }
}

/// Outcome of a successful conversion, with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Converted amount expressed in the target asset.
    pub amount: Decimal,
    /// Source asset.
    pub source_symbol: String,
    /// Target asset.
    pub target_symbol: String,
    /// Instant the conversion was evaluated at.
    pub requested_at: Timestamp,
    /// Observation time of the oldest quote used.
    pub quote_used_at: Timestamp,
    /// Units of target asset per unit of source asset.
    pub rate: Decimal,
}

/// Freshness of a stored quote relative to a requested instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within the outdated interval.
    Fresh,
    /// Older than the outdated interval.
    Stale,
}

/// Classify a quote observed at `observed_at` for a query at `requested_at`.
///
/// A gap exactly equal to `outdated_interval` is still fresh.
#[must_use]
pub fn freshness(
    observed_at: Timestamp,
    requested_at: Timestamp,
    outdated_interval: Duration,
) -> Freshness {
    let limit = i64::try_from(outdated_interval.as_millis()).unwrap_or(i64::MAX);
    if requested_at.millis_since(observed_at) > limit {
        Freshness::Stale
    } else {
        Freshness::Fresh
    }
}

/// User-facing conversion errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    /// No quote was ever stored at or before the requested instant.
    #[error("no quote available for {pair} at or before {at}")]
    NoQuoteAvailable {
        /// Pair that was looked up.
        pair: String,
        /// Requested instant.
        at: Timestamp,
    },

    /// The nearest quote is older than the outdated interval.
    #[error("latest quote for {pair} observed at {observed_at} is stale for {at}")]
    StaleQuote {
        /// Pair that was looked up.
        pair: String,
        /// Requested instant.
        at: Timestamp,
        /// Observation time of the nearest quote.
        observed_at: Timestamp,
    },

    /// Amount is negative.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Asset name is malformed.
    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    /// Storage backend failed while answering the query.
    #[error("quote storage unavailable: {0}")]
    Storage(String),
}

impl ConversionError {
    /// Stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoQuoteAvailable { .. } => "no_quote_available",
            Self::StaleQuote { .. } => "stale_quote",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InvalidAsset(_) => "invalid_asset",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<SymbolError> for ConversionError {
    fn from(err: SymbolError) -> Self {
        match err {
            SymbolError::InvalidAsset(asset) | SymbolError::MissingSeparator(asset) => {
                Self::InvalidAsset(asset)
            }
        }
    }
}
