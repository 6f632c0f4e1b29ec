//! Normalized transaction input model.
//!
//! The engine consumes a broker-neutral transaction stream; translating raw
//! broker exports into this shape is a separate concern.

use crate::error::EngineError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::str::FromStr;

/// Transaction action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Purchase of a security
    Acquire,
    /// Sale of a security
    Dispose,
    /// Shares received in kind; cost basis comes from the initial price table
    TransferIn,
    Dividend,
    Interest,
    /// Management fee capitalized against a holding (e.g. ADR fees)
    Fee,
    /// Return of capital, reduces the holding's cost basis
    CapitalReturn,
    /// New shares received from a spin-off; the row's symbol is the
    /// destination ticker
    SpinOff,
    /// Share split; the row's quantity carries the split ratio
    Split,
}

impl Action {
    pub fn display(&self) -> &'static str {
        match self {
            Action::Acquire => "Acquire",
            Action::Dispose => "Dispose",
            Action::TransferIn => "TransferIn",
            Action::Dividend => "Dividend",
            Action::Interest => "Interest",
            Action::Fee => "Fee",
            Action::CapitalReturn => "CapitalReturn",
            Action::SpinOff => "SpinOff",
            Action::Split => "Split",
        }
    }

    /// Actions that change a security position rather than cash
    pub fn is_security_action(&self) -> bool {
        !matches!(self, Action::Dividend | Action::Interest)
    }
}

impl FromStr for Action {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Acquire" => Ok(Action::Acquire),
            "Dispose" => Ok(Action::Dispose),
            "TransferIn" => Ok(Action::TransferIn),
            "Dividend" => Ok(Action::Dividend),
            "Interest" => Ok(Action::Interest),
            "Fee" => Ok(Action::Fee),
            "CapitalReturn" => Ok(Action::CapitalReturn),
            "SpinOff" => Ok(Action::SpinOff),
            "Split" => Ok(Action::Split),
            other => Err(EngineError::UnsupportedAction(other.to_string())),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// A normalized broker transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub date: NaiveDate,
    /// Account the transaction happened in; interest is summarised per
    /// broker per month
    pub broker: String,
    pub action: Action,
    /// None for pure cash events such as account-level interest
    pub symbol: Option<String>,
    /// Units traded; zero for cash-only rows, the split ratio for `Split`
    pub quantity: Decimal,
    /// Unit price in the transaction currency; cash-only rows carry the
    /// full amount here with zero quantity
    pub unit_price: Decimal,
    pub fees: Decimal,
    /// ISO currency code
    pub currency: String,
}

impl Transaction {
    /// Gross value in the transaction currency, before fees.
    ///
    /// Cash-only rows (zero quantity) carry their amount in `unit_price`.
    pub fn gross_amount(&self) -> Decimal {
        if self.quantity.is_zero() {
            self.unit_price
        } else {
            self.quantity * self.unit_price
        }
    }

    /// Symbol, or an `InvalidTransaction` error for actions that require one
    pub fn require_symbol(&self) -> Result<&str, EngineError> {
        self.symbol.as_deref().ok_or_else(|| {
            EngineError::InvalidTransaction(format!(
                "{} on {} requires a symbol",
                self.action, self.date
            ))
        })
    }
}

/// CSV/JSON record format for normalized transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub date: String,
    pub broker: String,
    pub action: String,
    #[serde(default)]
    pub symbol: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    #[serde(default)]
    pub fees: Option<Decimal>,
    pub currency: String,
}

impl TryFrom<TransactionRecord> for Transaction {
    type Error = EngineError;

    fn try_from(record: TransactionRecord) -> Result<Self, Self::Error> {
        let date = NaiveDate::parse_from_str(&record.date, "%Y-%m-%d").map_err(|_| {
            EngineError::InvalidTransaction(format!("invalid date: {}", record.date))
        })?;
        let action = record.action.parse::<Action>()?;
        // Empty symbol cells deserialize as Some("")
        let symbol = record.symbol.filter(|s| !s.is_empty());

        if record.quantity < Decimal::ZERO {
            return Err(EngineError::InvalidTransaction(format!(
                "negative quantity {} for {} on {}",
                record.quantity, record.action, record.date
            )));
        }
        if action.is_security_action() && symbol.is_none() {
            return Err(EngineError::InvalidTransaction(format!(
                "{} on {} requires a symbol",
                record.action, record.date
            )));
        }

        Ok(Transaction {
            date,
            broker: record.broker,
            action,
            symbol,
            quantity: record.quantity,
            unit_price: record.unit_price,
            fees: record.fees.unwrap_or(Decimal::ZERO),
            currency: record.currency,
        })
    }
}

/// Input root for transaction JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInput {
    pub transactions: Vec<TransactionRecord>,
}

/// Read normalized transactions from CSV, sorted by date with input order
/// preserved for ties
pub fn read_csv<R: Read>(reader: R) -> anyhow::Result<Vec<Transaction>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let records: Result<Vec<TransactionRecord>, _> =
        rdr.deserialize::<TransactionRecord>().collect();
    let mut transactions = records?
        .into_iter()
        .map(Transaction::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    transactions.sort_by_key(|t| t.date);
    Ok(transactions)
}

/// Read normalized transactions from JSON
pub fn read_json<R: Read>(reader: R) -> anyhow::Result<Vec<Transaction>> {
    let input: TransactionInput = serde_json::from_reader(reader)?;
    let mut transactions = input
        .transactions
        .into_iter()
        .map(Transaction::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    transactions.sort_by_key(|t| t.date);
    Ok(transactions)
}
