//! Error taxonomy for the tax computation engine.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// Errors raised while normalizing transactions or computing gains.
///
/// Data-gap errors (`MissingRate`, `MissingInitialPrice`, `UnknownIsin`) are
/// collected per affected transaction and reported together. Consistency
/// errors (`InsufficientHolding`, `PoolUnderflow`) abort the affected
/// symbol's computation but never the whole run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
pub enum EngineError {
    #[error("no {currency}/GBP exchange rate at or before {date}")]
    MissingRate { currency: String, date: NaiveDate },

    #[error("no initial price for {symbol} on {date}")]
    MissingInitialPrice { symbol: String, date: NaiveDate },

    #[error(
        "disposal of {requested} {symbol} on {date} exceeds holdings \
         ({available} available); the transaction history is incomplete"
    )]
    InsufficientHolding {
        symbol: String,
        date: NaiveDate,
        requested: Decimal,
        available: Decimal,
    },

    #[error("pool underflow for {symbol}: requested {requested}, available {available}")]
    PoolUnderflow {
        symbol: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("unsupported transaction action: {0}")]
    UnsupportedAction(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("no ticker translation for ISIN {0}")]
    UnknownIsin(String),
}

/// An engine error attributed to the symbol (or income source) it affects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolError {
    pub symbol: String,
    pub error: EngineError,
}

impl std::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.symbol, self.error)
    }
}
