//! Currency pair value object.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A currency pair such as `BTC/USDT`.
///
/// Both assets are normalized to uppercase and restricted to ASCII letters
/// and digits. The canonical text form `BASE/QUOTE` is also the storage key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol {
    base: String,
    quote: String,
}

impl Symbol {
    /// Create a pair from base and quote assets.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::InvalidAsset` if either asset is empty or
    /// contains characters other than ASCII letters and digits.
    pub fn new(base: &str, quote: &str) -> Result<Self, SymbolError> {
        let base = normalize_asset(base)?;
        let quote = normalize_asset(quote)?;
        Ok(Self { base, quote })
    }

    /// Base asset (the priced currency).
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Quote asset (the currency the price is expressed in).
    #[must_use]
    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// The same pair with legs swapped.
    #[must_use]
    pub fn inverse(&self) -> Self {
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }

    /// Exchange-style concatenated name, e.g. `BTCUSDT`.
    #[must_use]
    pub fn concatenated(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .trim()
            .split_once(['/', '-'])
            .ok_or_else(|| SymbolError::MissingSeparator(s.to_string()))?;
        Self::new(base, quote)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Check whether an asset name is well formed (already uppercase).
#[must_use]
pub fn is_valid_asset(asset: &str) -> bool {
    !asset.is_empty()
        && asset
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Uppercase and validate an asset name.
///
/// # Errors
///
/// Returns `SymbolError::InvalidAsset` when the normalized name is not
/// made of ASCII letters and digits only.
pub fn normalize_asset(asset: &str) -> Result<String, SymbolError> {
    let normalized = asset.trim().to_ascii_uppercase();
    if is_valid_asset(&normalized) {
        Ok(normalized)
    } else {
        Err(SymbolError::InvalidAsset(asset.to_string()))
    }
}

/// Symbol parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Asset name is empty or has forbidden characters.
    #[error("invalid asset name: {0:?}")]
    InvalidAsset(String),
    /// Pair text has no `/` or `-` separator.
    #[error("currency pair {0:?} must look like BASE/QUOTE")]
    MissingSeparator(String),
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("BTC/USDT" ; "slash separator")]
    #[test_case("BTC-USDT" ; "dash separator")]
    #[test_case("btc/usdt" ; "lowercase input")]
    #[test_case(" BTC/USDT " ; "surrounding whitespace")]
    fn parses_pair(input: &str) {
        let symbol: Symbol = input.parse().unwrap();
        assert_eq!(symbol.base(), "BTC");
        assert_eq!(symbol.quote(), "USDT");
        assert_eq!(symbol.to_string(), "BTC/USDT");
    }

    #[test_case("BTCUSDT" ; "no separator")]
    #[test_case("/USDT" ; "empty base")]
    #[test_case("BTC/" ; "empty quote")]
    #[test_case("BT C/USDT" ; "inner space")]
    #[test_case("BTC'/USDT" ; "quote character")]
    fn rejects_malformed_pair(input: &str) {
        assert!(input.parse::<Symbol>().is_err());
    }

    #[test]
    fn inverse_swaps_legs() {
        let symbol = Symbol::new("eth", "btc").unwrap();
        assert_eq!(symbol.inverse().to_string(), "BTC/ETH");
    }

    #[test]
    fn concatenated_name() {
        let symbol = Symbol::new("ETH", "USDT").unwrap();
        assert_eq!(symbol.concatenated(), "ETHUSDT");
    }

    #[test]
    fn serde_uses_canonical_text() {
        let symbol = Symbol::new("BTC", "USDT").unwrap();
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"BTC/USDT\"");
        let parsed: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, symbol);
    }

    #[test]
    fn asset_validation() {
        assert!(is_valid_asset("USDT"));
        assert!(is_valid_asset("1INCH"));
        assert!(!is_valid_asset("usdt"));
        assert!(!is_valid_asset(""));
        assert_eq!(normalize_asset("usdc").unwrap(), "USDC");
    }
}
