//! Conversion Query Engine
//!
//! Answers "what was `amount` of FROM worth in TO at instant T" using the
//! nearest stored quote at or before T. No interpolation: a quote older
//! than `outdated_interval` fails the query instead of being used.
//!
//! Routes are tried in order and the first one whose legs are all fresh
//! wins:
//!
//! 1. identity (`FROM == TO`)
//! 2. direct pair `FROM/TO`
//! 3. inverse pair `TO/FROM`
//! 4. pivot `FROM/PIVOT` and `TO/PIVOT`

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;

use crate::application::ports::{StorageBackend, with_timeout};
use crate::domain::conversion::{
    ConversionError, ConversionRequest, ConversionResult, Freshness, freshness,
};
use crate::domain::market::{StoredQuote, Symbol, Timestamp};
use crate::infrastructure::metrics;

/// Conversion engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum age of a quote relative to the requested instant.
    pub outdated_interval: Duration,
    /// Asset used to bridge pairs that are not listed directly.
    pub pivot_currency: String,
    /// Deadline for each storage lookup.
    pub storage_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            outdated_interval: Duration::from_secs(60),
            pivot_currency: "USDT".to_string(),
            storage_timeout: Duration::from_secs(10),
        }
    }
}

/// One quote lookup within a route. Inverted legs divide instead of multiply.
#[derive(Debug, Clone)]
struct Leg {
    symbol: Symbol,
    inverted: bool,
}

enum LegLookup {
    Fresh(StoredQuote),
    Stale(StoredQuote),
    Missing,
}

/// Point-in-time conversion over a storage backend.
pub struct ConversionEngine {
    storage: Arc<dyn StorageBackend>,
    config: EngineConfig,
}

impl std::fmt::Debug for ConversionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionEngine")
            .field("storage", &self.storage.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, config: EngineConfig) -> Self {
        Self { storage, config }
    }

    /// Engine settings.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Convert `request.amount()` of the source asset into the target asset.
    ///
    /// A request without an explicit instant is evaluated at the current time.
    ///
    /// # Errors
    ///
    /// - `NoQuoteAvailable` if no route has a quote at or before the instant
    /// - `StaleQuote` if quotes exist but all candidates are too old
    /// - `Storage` if the backend fails or times out
    /// - `InvalidAmount` if the result overflows
    pub async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionResult, ConversionError> {
        let started = Instant::now();
        let requested_at = request.at().unwrap_or_else(Timestamp::now);
        let result = self.evaluate(request, requested_at).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        metrics::record_conversion(outcome, started.elapsed());

        match &result {
            Ok(r) => tracing::debug!(
                from = request.from_asset(),
                to = request.to_asset(),
                at = %requested_at,
                rate = %r.rate,
                quote_used_at = %r.quote_used_at,
                "Conversion resolved"
            ),
            Err(e) => tracing::debug!(
                from = request.from_asset(),
                to = request.to_asset(),
                at = %requested_at,
                error = %e,
                "Conversion failed"
            ),
        }
        result
    }

    async fn evaluate(
        &self,
        request: &ConversionRequest,
        requested_at: Timestamp,
    ) -> Result<ConversionResult, ConversionError> {
        let direct = request.direct_pair()?;

        if request.from_asset() == request.to_asset() {
            return Ok(ConversionResult {
                amount: request.amount(),
                source_symbol: request.from_asset().to_string(),
                target_symbol: request.to_asset().to_string(),
                requested_at,
                quote_used_at: requested_at,
                rate: Decimal::ONE,
            });
        }

        let mut first_stale: Option<(Symbol, Timestamp)> = None;

        'routes: for route in self.routes(request)? {
            let mut quotes = Vec::with_capacity(route.len());
            for leg in &route {
                match self.lookup(&leg.symbol, requested_at).await? {
                    LegLookup::Fresh(quote) => quotes.push((leg, quote)),
                    LegLookup::Stale(quote) => {
                        first_stale.get_or_insert((leg.symbol.clone(), quote.observed_at));
                        continue 'routes;
                    }
                    LegLookup::Missing => continue 'routes,
                }
            }

            let rate = route_rate(&quotes).ok_or_else(|| {
                ConversionError::InvalidAmount(format!("rate for {direct} is not representable"))
            })?;
            let amount = request.amount().checked_mul(rate).ok_or_else(|| {
                ConversionError::InvalidAmount(format!("{} overflows", request.amount()))
            })?;
            let quote_used_at = quotes
                .iter()
                .map(|(_, quote)| quote.observed_at)
                .min()
                .unwrap_or(requested_at);

            return Ok(ConversionResult {
                amount,
                source_symbol: request.from_asset().to_string(),
                target_symbol: request.to_asset().to_string(),
                requested_at,
                quote_used_at,
                rate,
            });
        }

        Err(match first_stale {
            Some((pair, observed_at)) => ConversionError::StaleQuote {
                pair: pair.to_string(),
                at: requested_at,
                observed_at,
            },
            None => ConversionError::NoQuoteAvailable {
                pair: direct.to_string(),
                at: requested_at,
            },
        })
    }

    fn routes(&self, request: &ConversionRequest) -> Result<Vec<Vec<Leg>>, ConversionError> {
        let direct = request.direct_pair()?;
        let mut routes = vec![
            vec![Leg {
                symbol: direct.clone(),
                inverted: false,
            }],
            vec![Leg {
                symbol: direct.inverse(),
                inverted: true,
            }],
        ];

        let pivot = self.config.pivot_currency.as_str();
        if request.from_asset() != pivot && request.to_asset() != pivot {
            routes.push(vec![
                Leg {
                    symbol: Symbol::new(request.from_asset(), pivot)?,
                    inverted: false,
                },
                Leg {
                    symbol: Symbol::new(request.to_asset(), pivot)?,
                    inverted: true,
                },
            ]);
        }
        Ok(routes)
    }

    async fn lookup(&self, symbol: &Symbol, at: Timestamp) -> Result<LegLookup, ConversionError> {
        let found = with_timeout(
            self.config.storage_timeout,
            self.storage.latest_before(symbol, at),
        )
        .await
        .map_err(|e| {
            tracing::warn!(symbol = %symbol, error = %e, "Quote lookup failed");
            ConversionError::Storage(e.to_string())
        })?;

        Ok(match found {
            None => LegLookup::Missing,
            Some(quote) => match freshness(quote.observed_at, at, self.config.outdated_interval) {
                Freshness::Fresh => LegLookup::Fresh(quote),
                Freshness::Stale => LegLookup::Stale(quote),
            },
        })
    }
}

/// Product of non-inverted prices divided by product of inverted prices.
fn route_rate(quotes: &[(&Leg, StoredQuote)]) -> Option<Decimal> {
    let mut numerator = Decimal::ONE;
    let mut denominator = Decimal::ONE;
    for (leg, quote) in quotes {
        if leg.inverted {
            denominator = denominator.checked_mul(quote.price)?;
        } else {
            numerator = numerator.checked_mul(quote.price)?;
        }
    }
    numerator.checked_div(denominator)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_case::test_case;

    use super::*;
    use crate::application::ports::{MockStorageBackend, StorageError};

    fn stored(pair: &str, price: &str, at: i64) -> StoredQuote {
        StoredQuote {
            symbol: pair.parse().unwrap(),
            price: Decimal::from_str(price).unwrap(),
            observed_at: Timestamp::from_millis(at),
            ingested_at: Timestamp::from_millis(at),
        }
    }

    /// Mock storage answering `latest_before` from a fixed list.
    fn storage_with(quotes: Vec<StoredQuote>) -> Arc<dyn StorageBackend> {
        let mut storage = MockStorageBackend::new();
        storage.expect_name().return_const("mock");
        storage.expect_latest_before().returning(move |symbol, at| {
            Ok(quotes
                .iter()
                .filter(|q| &q.symbol == symbol && q.observed_at <= at)
                .max_by_key(|q| q.observed_at)
                .cloned())
        });
        Arc::new(storage)
    }

    fn engine(quotes: Vec<StoredQuote>) -> ConversionEngine {
        ConversionEngine::new(
            storage_with(quotes),
            EngineConfig {
                outdated_interval: Duration::from_millis(60),
                ..EngineConfig::default()
            },
        )
    }

    fn request(amount: &str, from: &str, to: &str, at: i64) -> ConversionRequest {
        ConversionRequest::new(
            Decimal::from_str(amount).unwrap(),
            from,
            to,
            Some(Timestamp::from_millis(at)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn uses_nearest_quote_before_instant() {
        let engine = engine(vec![
            stored("BTC/USDT", "50000", 100),
            stored("BTC/USDT", "50500", 130),
        ]);

        let result = engine.convert(&request("1", "BTC", "USDT", 150)).await.unwrap();
        assert_eq!(result.amount, Decimal::from(50500));
        assert_eq!(result.rate, Decimal::from(50500));
        assert_eq!(result.quote_used_at, Timestamp::from_millis(130));
        assert_eq!(result.requested_at, Timestamp::from_millis(150));
    }

    #[test_case(190, true ; "gap equal to outdated interval")]
    #[test_case(191, false ; "gap one past outdated interval")]
    #[tokio::test]
    async fn staleness_boundary(at: i64, ok: bool) {
        let engine = engine(vec![stored("BTC/USDT", "50500", 130)]);
        let result = engine.convert(&request("1", "BTC", "USDT", at)).await;
        if ok {
            assert!(result.is_ok());
        } else {
            assert!(matches!(result, Err(ConversionError::StaleQuote { .. })));
        }
    }

    #[tokio::test]
    async fn no_quote_before_instant() {
        let engine = engine(vec![stored("BTC/USDT", "50000", 100)]);
        let result = engine.convert(&request("1", "BTC", "USDT", 50)).await;
        assert!(matches!(result, Err(ConversionError::NoQuoteAvailable { .. })));
    }

    #[tokio::test]
    async fn inverse_pair_divides() {
        let engine = engine(vec![stored("BTC/USDT", "50000", 100)]);
        let result = engine.convert(&request("100000", "USDT", "BTC", 120)).await.unwrap();
        assert_eq!(result.amount, Decimal::from(2));
    }

    #[tokio::test]
    async fn pivot_route_uses_oldest_leg() {
        let engine = engine(vec![
            stored("BTC/USDT", "50000", 100),
            stored("ETH/USDT", "2000", 110),
        ]);
        let result = engine.convert(&request("2", "BTC", "ETH", 120)).await.unwrap();
        assert_eq!(result.rate, Decimal::from(25));
        assert_eq!(result.amount, Decimal::from(50));
        assert_eq!(result.quote_used_at, Timestamp::from_millis(100));
    }

    #[tokio::test]
    async fn fresh_later_route_beats_stale_direct_pair() {
        let engine = engine(vec![
            stored("BTC/ETH", "20", 10),
            stored("BTC/USDT", "50000", 100),
            stored("ETH/USDT", "2000", 100),
        ]);
        let result = engine.convert(&request("1", "BTC", "ETH", 120)).await.unwrap();
        assert_eq!(result.rate, Decimal::from(25));
    }

    #[tokio::test]
    async fn stale_pivot_leg_reports_stale() {
        let engine = engine(vec![
            stored("BTC/USDT", "50000", 100),
            stored("ETH/USDT", "2000", 10),
        ]);
        let result = engine.convert(&request("1", "BTC", "ETH", 120)).await;
        match result {
            Err(ConversionError::StaleQuote { pair, observed_at, .. }) => {
                assert_eq!(pair, "ETH/USDT");
                assert_eq!(observed_at, Timestamp::from_millis(10));
            }
            other => panic!("expected stale quote, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identity_needs_no_quote() {
        let engine = engine(Vec::new());
        let result = engine.convert(&request("3.5", "BTC", "btc", 1)).await.unwrap();
        assert_eq!(result.amount, Decimal::from_str("3.5").unwrap());
        assert_eq!(result.rate, Decimal::ONE);
        assert_eq!(result.quote_used_at, result.requested_at);
    }

    #[tokio::test]
    async fn zero_amount_converts_to_zero() {
        let engine = engine(vec![stored("BTC/USDT", "50000", 100)]);
        let result = engine.convert(&request("0", "BTC", "USDT", 100)).await.unwrap();
        assert!(result.amount.is_zero());
    }

    #[tokio::test]
    async fn future_instant_uses_latest_quote() {
        let engine = engine(vec![stored("BTC/USDT", "50000", 100)]);
        let result = engine.convert(&request("1", "BTC", "USDT", 160)).await.unwrap();
        assert_eq!(result.quote_used_at, Timestamp::from_millis(100));
    }

    #[tokio::test]
    async fn storage_failure_surfaces() {
        let mut storage = MockStorageBackend::new();
        storage.expect_name().return_const("mock");
        storage
            .expect_latest_before()
            .returning(|_, _| Err(StorageError::Timeout(Duration::from_secs(1))));
        let engine = ConversionEngine::new(Arc::new(storage), EngineConfig::default());

        let result = engine.convert(&request("1", "BTC", "USDT", 100)).await;
        assert!(matches!(result, Err(ConversionError::Storage(_))));
    }
}
