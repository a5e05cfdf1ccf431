//! Market Data Types
//!
//! Canonical internal representation of ticker quotes. These types are
//! exchange- and storage-agnostic: codecs produce them, storage backends
//! persist them, the conversion engine reads them back.

mod quote;
mod symbol;
mod timestamp;

pub use quote::{Quote, QuoteError, StoredQuote};
pub use symbol::{Symbol, SymbolError, is_valid_asset, normalize_asset};
pub use timestamp::Timestamp;
