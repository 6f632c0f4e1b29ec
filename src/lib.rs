//! UK Capital Gains Tax engine for security portfolios.
//!
//! Consumes a normalized, broker-neutral transaction stream plus exchange
//! rate and price lookup tables, applies the HMRC share identification
//! rules (same-day, bed & breakfast, Section 104 pooling), aggregates
//! dividend/interest/ERI income, and produces per-tax-year summaries with a
//! full per-disposal audit trail.

pub mod config;
pub mod currency;
pub mod error;
pub mod funds;
pub mod ledger;
pub mod prices;
pub mod tax;
pub mod transaction;

// Flat public surface for domain types and functions.
pub use config::{EngineConfig, SpinOffAllocation};
pub use currency::CurrencyConverter;
pub use error::{EngineError, SymbolError};
pub use funds::{EriEntry, EriTable, IsinTranslations};
pub use ledger::{CostAdjustment, LedgerEvent, LedgerEventKind, SecurityLedger};
pub use prices::InitialPrices;
pub use tax::{
    run_engine, DisposalRecord, EngineInputs, EngineReport, IncomeCategory, IncomeEvent,
    MatchEvent, MatchRule, MonthlyInterest, Section104Pool, TaxYear, TaxYearSummary,
};
pub use transaction::{Action, Transaction};
