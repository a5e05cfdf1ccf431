//! Converter Configuration Settings
//!
//! Configuration types for the converter service, loaded from environment
//! variables. `validate` enforces cross-field constraints; any violation is
//! fatal at startup.

use std::time::Duration;

use crate::application::ports::TransportProtocol;
use crate::application::services::{EngineConfig, SchedulerConfig};
use crate::domain::market::{Symbol, is_valid_asset};
use crate::infrastructure::exchange::{
    ExchangeKind, HeartbeatConfig, ReconnectConfig, TransportConfig,
};
use crate::infrastructure::storage::StorageKind;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Exchange selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSettings {
    /// Exchange to stream from.
    pub kind: ExchangeKind,
    /// Pairs to subscribe to. Empty means every listed spot market.
    pub symbols: Vec<Symbol>,
    /// Stream URL override.
    pub ws_url: Option<String>,
    /// REST base URL used to list markets.
    pub rest_url: String,
}

/// Storage selection.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Backend kind.
    pub kind: StorageKind,
    /// ClickHouse DSN, required for `clickhouse`.
    pub clickhouse_dsn: Option<String>,
    /// Deadline for each storage call.
    pub timeout: Duration,
}

impl std::fmt::Debug for StorageSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSettings")
            .field("kind", &self.kind)
            .field(
                "clickhouse_dsn",
                &self.clickhouse_dsn.as_ref().map(|_| "[REDACTED]"),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Transport connection and queue settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    /// `(protocol, count)` connection slots.
    pub connections: Vec<(TransportProtocol, usize)>,
    /// Transport queue capacity.
    pub local_queue_max_size: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connections: vec![(TransportProtocol::Wss, 1)],
            local_queue_max_size: 10_000,
        }
    }
}

/// Flush and retention timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Flush period.
    pub flush_interval: Duration,
    /// Retention window.
    pub delete_interval: Duration,
    /// Retention sweep period.
    pub sweep_period: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            delete_interval: Duration::from_secs(7 * SECS_PER_DAY),
            sweep_period: Duration::from_secs(600),
        }
    }
}

/// Read path settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSettings {
    /// Maximum quote age for a query.
    pub outdated_interval: Duration,
    /// Bridge asset for indirect conversions.
    pub pivot_currency: String,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            outdated_interval: Duration::from_secs(60),
            pivot_currency: "USDT".to_string(),
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silent intervals tolerated before reconnecting.
    pub max_missed_pongs: u32,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(20),
            max_missed_pongs: 2,
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
        }
    }
}

/// HTTP server and shutdown settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Port for health, metrics and conversion endpoints.
    pub http_port: u16,
    /// Upper bound for graceful shutdown.
    pub shutdown_grace: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Complete converter configuration.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Exchange selection.
    pub exchange: ExchangeSettings,
    /// Storage selection.
    pub storage: StorageSettings,
    /// Transport settings.
    pub transport: TransportSettings,
    /// Flush and retention timing.
    pub consumer: ConsumerSettings,
    /// Read path settings.
    pub reader: ReaderSettings,
    /// WebSocket settings.
    pub websocket: WebSocketSettings,
    /// Server settings.
    pub server: ServerSettings,
}

impl ConverterConfig {
    /// Create configuration from environment variables and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a value cannot
    /// be parsed, or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source and validate it.
    ///
    /// # Errors
    ///
    /// See [`ConverterConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let kind = env.parse_with("EXCHANGE_NAME", ExchangeKind::Bybit, |v| {
            v.parse::<ExchangeKind>()
                .map_err(|other| format!("unknown exchange {other:?}"))
        })?;
        let exchange = ExchangeSettings {
            kind,
            symbols: env.parse_with("EXCHANGE_SYMBOLS", Vec::new(), parse_symbols)?,
            ws_url: env.get("EXCHANGE_WS_URL"),
            rest_url: env
                .get("EXCHANGE_REST_URL")
                .unwrap_or_else(|| kind.default_rest_url().to_string()),
        };

        let storage_kind = env
            .get("DATABASE_TYPE")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_TYPE".to_string()))?
            .parse::<StorageKind>()
            .map_err(|other| ConfigError::InvalidValue {
                key: "DATABASE_TYPE".to_string(),
                reason: format!("unknown storage {other:?}"),
            })?;
        let storage = StorageSettings {
            kind: storage_kind,
            clickhouse_dsn: env.get("CLICKHOUSE_DSN"),
            timeout: env.secs("STORAGE_TIMEOUT_SECS", Duration::from_secs(10))?,
        };

        let transport = TransportSettings {
            connections: env.parse_with(
                "TRANSPORT_CONNECTIONS",
                TransportSettings::default().connections,
                parse_connections,
            )?,
            local_queue_max_size: env.number(
                "TRANSPORT_LOCAL_QUEUE_MAX_SIZE",
                TransportSettings::default().local_queue_max_size,
            )?,
        };

        let consumer = ConsumerSettings {
            flush_interval: env.secs(
                "QUOTE_CONSUMER_FLUSH_INTERVAL_SECS",
                ConsumerSettings::default().flush_interval,
            )?,
            delete_interval: Duration::from_secs(
                env.number::<u64>("QUOTE_CONSUMER_DELETE_INTERVAL_DAYS", 7)?
                    .saturating_mul(SECS_PER_DAY),
            ),
            sweep_period: env.secs(
                "QUOTE_CONSUMER_SWEEP_PERIOD_SECS",
                ConsumerSettings::default().sweep_period,
            )?,
        };

        let reader = ReaderSettings {
            outdated_interval: env.secs(
                "QUOTE_READER_OUTDATED_INTERVAL_SECS",
                ReaderSettings::default().outdated_interval,
            )?,
            pivot_currency: env
                .get("PIVOT_CURRENCY")
                .map_or_else(|| ReaderSettings::default().pivot_currency, |v| {
                    v.trim().to_uppercase()
                }),
        };

        let defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: env
                .secs("WS_HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval)?,
            max_missed_pongs: env.number("WS_MAX_MISSED_PONGS", defaults.max_missed_pongs)?,
            reconnect_delay_initial: env.millis(
                "WS_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            )?,
            reconnect_delay_max: env
                .secs("WS_RECONNECT_DELAY_MAX_SECS", defaults.reconnect_delay_max)?,
            reconnect_delay_multiplier: env.number(
                "WS_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            )?,
        };

        let server = ServerSettings {
            http_port: env.number("CONVERTER_HTTP_PORT", ServerSettings::default().http_port)?,
            shutdown_grace: env.secs(
                "SHUTDOWN_GRACE_SECS",
                ServerSettings::default().shutdown_grace,
            )?,
        };

        let config = Self {
            exchange,
            storage,
            transport,
            consumer,
            reader,
            websocket,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let consumer = &self.consumer;
        if consumer.flush_interval.is_zero() {
            return invalid("flush interval must be positive".to_string());
        }
        if consumer.delete_interval.is_zero() {
            return invalid("delete interval must be positive".to_string());
        }
        if consumer.sweep_period.is_zero() {
            return invalid("retention sweep period must be positive".to_string());
        }
        if self.reader.outdated_interval.is_zero() {
            return invalid("outdated interval must be positive".to_string());
        }
        if consumer.flush_interval.saturating_mul(2) > self.reader.outdated_interval {
            return invalid(format!(
                "flush interval {:?} exceeds half of outdated interval {:?}",
                consumer.flush_interval, self.reader.outdated_interval
            ));
        }
        if self.storage.timeout.is_zero() {
            return invalid("storage timeout must be positive".to_string());
        }
        if self.storage.kind == StorageKind::ClickHouse && self.storage.clickhouse_dsn.is_none() {
            return Err(ConfigError::MissingEnvVar("CLICKHOUSE_DSN".to_string()));
        }
        if self.transport.connections.iter().map(|(_, n)| n).sum::<usize>() == 0 {
            return invalid("at least one transport connection is required".to_string());
        }
        if !is_valid_asset(&self.reader.pivot_currency) {
            return invalid(format!(
                "invalid pivot currency {:?}",
                self.reader.pivot_currency
            ));
        }
        let ws = &self.websocket;
        if ws.heartbeat_interval.is_zero() || ws.max_missed_pongs == 0 {
            return invalid("heartbeat interval and missed pongs must be positive".to_string());
        }
        if ws.reconnect_delay_initial.is_zero()
            || ws.reconnect_delay_initial > ws.reconnect_delay_max
        {
            return invalid("reconnect delays must satisfy 0 < initial <= max".to_string());
        }
        if !(ws.reconnect_delay_multiplier.is_finite() && ws.reconnect_delay_multiplier >= 1.0) {
            return invalid("reconnect delay multiplier must be >= 1.0".to_string());
        }
        Ok(())
    }

    /// Scheduler timing derived from this configuration.
    #[must_use]
    pub const fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            flush_interval: self.consumer.flush_interval,
            delete_interval: self.consumer.delete_interval,
            sweep_period: self.consumer.sweep_period,
            storage_timeout: self.storage.timeout,
        }
    }

    /// Conversion engine settings derived from this configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            outdated_interval: self.reader.outdated_interval,
            pivot_currency: self.reader.pivot_currency.clone(),
            storage_timeout: self.storage.timeout,
        }
    }

    /// Transport settings derived from this configuration.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        let ws = &self.websocket;
        TransportConfig {
            connections: self.transport.connections.clone(),
            url_override: self.exchange.ws_url.clone(),
            heartbeat: HeartbeatConfig {
                ping_interval: ws.heartbeat_interval,
                max_missed_pongs: ws.max_missed_pongs,
            },
            reconnect: ReconnectConfig {
                initial_delay: ws.reconnect_delay_initial,
                max_delay: ws.reconnect_delay_max,
                multiplier: ws.reconnect_delay_multiplier,
                ..ReconnectConfig::default()
            },
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse failure.
        reason: String,
    },
    /// Values parse but violate a constraint.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Variable source with typed accessors. Empty values count as unset.
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse_with<T, P>(&self, key: &str, default: T, parse: P) -> Result<T, ConfigError>
    where
        P: FnOnce(&str) -> Result<T, String>,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => parse(raw.trim()).map_err(|reason| ConfigError::InvalidValue {
                key: key.to_string(),
                reason,
            }),
        }
    }

    fn number<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.parse_with(key, default, |v| v.parse::<T>().map_err(|e| e.to_string()))
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.number(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        self.number(key, default).map(Duration::from_millis)
    }
}

fn parse_symbols(raw: &str) -> Result<Vec<Symbol>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Symbol>().map_err(|e| e.to_string()))
        .collect()
}

fn parse_connections(raw: &str) -> Result<Vec<(TransportProtocol, usize)>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (proto, count) = entry
                .split_once(':')
                .ok_or_else(|| format!("expected proto:count, got {entry:?}"))?;
            let protocol = TransportProtocol::parse(proto)
                .ok_or_else(|| format!("unsupported protocol {proto:?}"))?;
            let count = count
                .trim()
                .parse::<usize>()
                .map_err(|e| format!("invalid count in {entry:?}: {e}"))?;
            Ok((protocol, count))
        })
        .collect()
}
