//! Aggregation of investment income: dividends, interest and offshore-fund
//! Excess Reported Income.

use crate::config::EngineConfig;
use crate::currency::CurrencyConverter;
use crate::error::{EngineError, SymbolError};
use crate::funds::{EriTable, IsinTranslations};
use crate::ledger::{CostAdjustment, SecurityLedger};
use crate::tax::uk::TaxYear;
use crate::transaction::{Action, Transaction};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Income classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IncomeCategory {
    Dividend,
    Interest,
    /// Offshore fund excess reported income, deemed received at the fund's
    /// reporting period end
    EriAdjustment,
}

impl IncomeCategory {
    pub fn display(&self) -> &'static str {
        match self {
            IncomeCategory::Dividend => "Dividend",
            IncomeCategory::Interest => "Interest",
            IncomeCategory::EriAdjustment => "ERI",
        }
    }
}

impl std::fmt::Display for IncomeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Individual income event record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncomeEvent {
    pub date: NaiveDate,
    pub tax_year: TaxYear,
    pub symbol: Option<String>,
    pub broker: String,
    pub category: IncomeCategory,
    pub amount_gbp: Decimal,
}

/// One summary line per broker per calendar month of interest, regardless
/// of the underlying payment frequency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyInterest {
    pub broker: String,
    pub year: i32,
    pub month: u32,
    pub amount_gbp: Decimal,
}

/// Income report: individual events, the monthly interest rollup, and the
/// pool cost write-backs ERI produces for later disposals
#[derive(Debug, Default)]
pub struct IncomeReport {
    pub events: Vec<IncomeEvent>,
    pub monthly_interest: Vec<MonthlyInterest>,
    pub pool_adjustments: Vec<CostAdjustment>,
    pub errors: Vec<SymbolError>,
}

/// Aggregate dividend, interest and ERI income from the transaction stream.
///
/// Rows that cannot be converted are recorded as errors and skipped; income
/// aggregation never aborts the run.
pub fn aggregate_income(
    transactions: &[Transaction],
    converter: &CurrencyConverter,
    ledger: &SecurityLedger,
    isin_translations: &IsinTranslations,
    eri_table: &EriTable,
    config: &EngineConfig,
) -> IncomeReport {
    let mut report = IncomeReport::default();

    for t in transactions {
        let category = match t.action {
            Action::Interest => IncomeCategory::Interest,
            Action::Dividend => match t.symbol.as_deref() {
                // Distributions from the configured funds (e.g. money
                // market funds) are taxed as interest
                Some(symbol) if config.taxed_as_interest(symbol) => IncomeCategory::Interest,
                _ => IncomeCategory::Dividend,
            },
            _ => continue,
        };
        let amount_gbp = match converter.to_gbp(t.gross_amount(), &t.currency, t.date) {
            Ok(amount) => amount,
            Err(error) => {
                report.errors.push(SymbolError {
                    symbol: t.symbol.clone().unwrap_or_else(|| t.broker.clone()),
                    error,
                });
                continue;
            }
        };
        report.events.push(IncomeEvent {
            date: t.date,
            tax_year: TaxYear::from_date(t.date),
            symbol: t.symbol.clone(),
            broker: t.broker.clone(),
            category,
            amount_gbp,
        });
    }

    aggregate_eri(&mut report, converter, ledger, isin_translations, eri_table);

    // Interest rollup: one line per broker per calendar month
    let mut by_month: BTreeMap<(String, i32, u32), Decimal> = BTreeMap::new();
    for event in &report.events {
        if event.category == IncomeCategory::Interest {
            *by_month
                .entry((event.broker.clone(), event.date.year(), event.date.month()))
                .or_insert(Decimal::ZERO) += event.amount_gbp;
        }
    }
    report.monthly_interest = by_month
        .into_iter()
        .map(|((broker, year, month), amount_gbp)| MonthlyInterest {
            broker,
            year,
            month,
            amount_gbp,
        })
        .collect();

    report.events.sort_by_key(|e| e.date);
    report
}

/// Deemed income from offshore reporting funds: units held at the fund's
/// reporting period end times the published excess per unit. The same amount
/// is written back into the holding's pool cost so a later disposal carries
/// the increased basis.
fn aggregate_eri(
    report: &mut IncomeReport,
    converter: &CurrencyConverter,
    ledger: &SecurityLedger,
    isin_translations: &IsinTranslations,
    eri_table: &EriTable,
) {
    for entry in eri_table.entries() {
        let symbol = match isin_translations.get(&entry.isin) {
            Some(symbol) => symbol.to_string(),
            None => {
                report.errors.push(SymbolError {
                    symbol: entry.isin.clone(),
                    error: EngineError::UnknownIsin(entry.isin.clone()),
                });
                continue;
            }
        };
        let units = ledger.holding_at(&symbol, entry.period_end);
        if units <= Decimal::ZERO {
            continue;
        }
        let amount_gbp = match converter.to_gbp(
            units * entry.excess_per_unit,
            &entry.currency,
            entry.period_end,
        ) {
            Ok(amount) => amount,
            Err(error) => {
                report.errors.push(SymbolError { symbol, error });
                continue;
            }
        };
        log::debug!(
            "ERI for {}: {} units x {} {} = £{} on {}",
            symbol,
            units,
            entry.excess_per_unit,
            entry.currency,
            amount_gbp,
            entry.period_end
        );
        report.events.push(IncomeEvent {
            date: entry.period_end,
            tax_year: TaxYear::from_date(entry.period_end),
            symbol: Some(symbol.clone()),
            broker: "N/A".to_string(),
            category: IncomeCategory::EriAdjustment,
            amount_gbp,
        });
        report.pool_adjustments.push(CostAdjustment {
            symbol,
            date: entry.period_end,
            delta_gbp: amount_gbp,
        });
    }
}
