//! Market map: exchange instrument names to normalized symbols.
//!
//! Built from configured pairs, or loaded once at startup from the
//! exchange's REST instruments endpoint.

use std::collections::HashMap;

use serde::Deserialize;

use crate::domain::market::Symbol;

/// Exchange instrument name (e.g. `BTCUSDT`) → `Symbol`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketMap {
    by_instrument: HashMap<String, Symbol>,
}

impl MarketMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map keyed by the concatenated instrument name.
    #[must_use]
    pub fn from_symbols<I: IntoIterator<Item = Symbol>>(symbols: I) -> Self {
        let mut map = Self::new();
        for symbol in symbols {
            map.insert(symbol.concatenated(), symbol);
        }
        map
    }

    /// Add or replace an instrument.
    pub fn insert(&mut self, instrument: String, symbol: Symbol) {
        self.by_instrument.insert(instrument, symbol);
    }

    /// Symbol for an instrument name.
    #[must_use]
    pub fn get(&self, instrument: &str) -> Option<&Symbol> {
        self.by_instrument.get(instrument)
    }

    /// Instrument names in sorted order.
    #[must_use]
    pub fn instruments(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_instrument.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_instrument.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_instrument.is_empty()
    }
}

/// Errors loading markets over REST.
#[derive(Debug, thiserror::Error)]
pub enum MarketLoadError {
    /// Request failed or returned a non-success status.
    #[error("markets request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Exchange returned an API-level error.
    #[error("exchange returned error {code}: {message}")]
    Api {
        /// Exchange return code.
        code: i64,
        /// Exchange message.
        message: String,
    },

    /// No tradable instruments were found.
    #[error("exchange listed no usable instruments")]
    Empty,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentsResponse {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<InstrumentsResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentsResult {
    #[serde(default)]
    list: Vec<Instrument>,
    #[serde(default)]
    next_page_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    #[serde(default)]
    status: Option<String>,
}

/// Load Bybit spot instruments from `GET /v5/market/instruments-info`.
///
/// Instruments that are not trading or whose coins are not valid asset
/// names are skipped.
///
/// # Errors
///
/// Returns an error if the request fails, the exchange reports an error, or
/// no instrument is usable.
pub async fn load_bybit_markets(
    client: &reqwest::Client,
    rest_url: &str,
) -> Result<MarketMap, MarketLoadError> {
    let url = format!(
        "{}/v5/market/instruments-info",
        rest_url.trim_end_matches('/')
    );
    let mut map = MarketMap::new();
    let mut cursor: Option<String> = None;

    loop {
        let mut request = client.get(&url).query(&[("category", "spot")]);
        if let Some(c) = cursor.as_deref() {
            request = request.query(&[("cursor", c)]);
        }

        let body: InstrumentsResponse = request.send().await?.error_for_status()?.json().await?;
        if body.ret_code != 0 {
            return Err(MarketLoadError::Api {
                code: body.ret_code,
                message: body.ret_msg,
            });
        }
        let Some(result) = body.result else {
            break;
        };

        for instrument in result.list {
            if instrument
                .status
                .as_deref()
                .is_some_and(|s| !s.eq_ignore_ascii_case("trading"))
            {
                continue;
            }
            match Symbol::new(&instrument.base_coin, &instrument.quote_coin) {
                Ok(symbol) => map.insert(instrument.symbol, symbol),
                Err(e) => {
                    tracing::debug!(instrument = %instrument.symbol, error = %e, "Skipping instrument");
                }
            }
        }

        match result.next_page_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }

    if map.is_empty() {
        return Err(MarketLoadError::Empty);
    }
    tracing::info!(instruments = map.len(), "Loaded exchange markets");
    Ok(map)
}
