//! Configuration Module
//!
//! Environment-driven configuration for the converter service.

mod settings;

pub use settings::{
    ConfigError, ConsumerSettings, ConverterConfig, ExchangeSettings, ReaderSettings,
    ServerSettings, StorageSettings, TransportSettings, WebSocketSettings,
};
