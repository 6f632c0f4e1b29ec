//! Engine configuration.

use crate::tax::uk::{self, TaxYear};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Read;

/// How a spin-off's cost basis is carved out of the source holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinOffAllocation {
    /// Ticker the new shares were spun off from, e.g. MMM for SOLV
    pub source: String,
    /// Fraction of the source holding's cost allocated to the new shares
    pub cost_fraction: Decimal,
}

/// Configuration for a calculation run.
///
/// Loaded from JSON; every field has a sensible default so a config file is
/// only needed to override something.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Annual exempt amount per tax year end year; defaults to the published
    /// HMRC table
    pub exempt_amounts: HashMap<i32, Decimal>,
    /// Tickers whose distributions are taxed as interest rather than
    /// dividends (e.g. money market and bond fund holdings)
    pub interest_tickers: HashSet<String>,
    /// Validate that running holdings never go negative; disable when the
    /// input deliberately starts mid-history
    pub balance_check: bool,
    /// Spin-off cost allocations keyed by destination ticker
    pub spin_offs: HashMap<String, SpinOffAllocation>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            exempt_amounts: uk::default_exempt_amounts(),
            interest_tickers: HashSet::new(),
            balance_check: true,
            spin_offs: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Read configuration overrides from JSON
    pub fn read_json<R: Read>(reader: R) -> anyhow::Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Annual exempt amount for the given tax year, if known
    pub fn exempt_amount(&self, year: TaxYear) -> Option<Decimal> {
        self.exempt_amounts.get(&year.0).copied()
    }

    /// Whether distributions on this ticker are taxed as interest
    pub fn taxed_as_interest(&self, symbol: &str) -> bool {
        self.interest_tickers.contains(symbol)
    }

    pub fn spin_off_allocation(&self, dest: &str) -> Option<&SpinOffAllocation> {
        self.spin_offs.get(dest)
    }
}
