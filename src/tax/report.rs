//! Result assembly: merges match events and income events into per-tax-year
//! summaries.
//!
//! This is the only place monetary amounts are rounded to pennies; the
//! engine carries full precision up to here.

use crate::config::EngineConfig;
use crate::currency::CurrencyConverter;
use crate::error::SymbolError;
use crate::funds::{EriTable, IsinTranslations};
use crate::ledger::SecurityLedger;
use crate::prices::InitialPrices;
use crate::tax::cgt::{match_symbol, DisposalRecord, MatchEvent, SymbolResult};
use crate::tax::income::{aggregate_income, IncomeCategory, IncomeEvent, MonthlyInterest};
use crate::tax::pool::Section104Pool;
use crate::tax::uk::TaxYear;
use crate::transaction::Transaction;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;

/// Everything a calculation run consumes
#[derive(Clone, Copy)]
pub struct EngineInputs<'a> {
    pub transactions: &'a [Transaction],
    pub converter: &'a CurrencyConverter,
    pub initial_prices: &'a InitialPrices,
    pub isin_translations: &'a IsinTranslations,
    pub eri_table: &'a EriTable,
    pub config: &'a EngineConfig,
}

/// Aggregate figures for one UK tax year
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxYearSummary {
    pub tax_year: TaxYear,
    pub disposal_count: usize,
    pub disposal_proceeds: Decimal,
    pub allowable_costs: Decimal,
    /// Sum of gains on profitable disposals
    pub capital_gain: Decimal,
    /// Sum of losses on loss-making disposals (zero or negative)
    pub capital_loss: Decimal,
    /// Annual exempt amount for the year, when configured
    pub exempt_amount: Option<Decimal>,
    /// max(0, total gain - exempt amount); None without an exempt amount
    pub taxable_gain: Option<Decimal>,
    pub dividend_income: Decimal,
    pub interest_income: Decimal,
    pub eri_income: Decimal,
}

impl TaxYearSummary {
    fn new(tax_year: TaxYear) -> Self {
        TaxYearSummary {
            tax_year,
            disposal_count: 0,
            disposal_proceeds: Decimal::ZERO,
            allowable_costs: Decimal::ZERO,
            capital_gain: Decimal::ZERO,
            capital_loss: Decimal::ZERO,
            exempt_amount: None,
            taxable_gain: None,
            dividend_income: Decimal::ZERO,
            interest_income: Decimal::ZERO,
            eri_income: Decimal::ZERO,
        }
    }

    /// Net gain across all disposals (gains plus losses)
    pub fn total_gain(&self) -> Decimal {
        self.capital_gain + self.capital_loss
    }
}

/// Final output of a calculation run, frozen by `Assembler::finalize`
#[derive(Debug, Serialize)]
pub struct EngineReport {
    pub years: Vec<TaxYearSummary>,
    pub disposals: Vec<DisposalRecord>,
    pub income_events: Vec<IncomeEvent>,
    pub monthly_interest: Vec<MonthlyInterest>,
    /// Closing Section 104 pools with a remaining holding
    pub pools: Vec<Section104Pool>,
    /// Per-symbol failures requiring correction of the input data; the
    /// summaries above cover only the symbols that computed
    pub errors: Vec<SymbolError>,
}

impl EngineReport {
    pub fn year(&self, tax_year: TaxYear) -> Option<&TaxYearSummary> {
        self.years.iter().find(|y| y.tax_year == tax_year)
    }

    /// Full audit trail, ordered by disposal
    pub fn match_events(&self) -> impl Iterator<Item = &MatchEvent> {
        self.disposals.iter().flat_map(|d| d.matches.iter())
    }
}

/// Run the full engine: ledger construction, income aggregation, per-symbol
/// matching and result assembly.
///
/// Per-symbol failures are collected in the report's error list; one bad
/// symbol never aborts the others.
pub fn run_engine(inputs: EngineInputs) -> EngineReport {
    let mut ledger = SecurityLedger::build(
        inputs.transactions,
        inputs.converter,
        inputs.initial_prices,
        inputs.config,
    );
    let income = aggregate_income(
        inputs.transactions,
        inputs.converter,
        &ledger,
        inputs.isin_translations,
        inputs.eri_table,
        inputs.config,
    );
    ledger.apply_cost_adjustments(&income.pool_adjustments);

    let mut assembler = Assembler::new(inputs.config);
    for error in &ledger.errors {
        assembler.add_error(error.clone());
    }
    for error in &income.errors {
        assembler.add_error(error.clone());
    }
    for (symbol, events) in ledger.streams() {
        match match_symbol(symbol, events) {
            Ok(result) => assembler.add_symbol(result),
            Err(error) => assembler.add_error(SymbolError {
                symbol: symbol.clone(),
                error,
            }),
        }
    }
    assembler.add_income(income.events, income.monthly_interest);
    assembler.finalize()
}

/// Accumulates per-symbol results and income into per-year summaries.
/// `finalize` applies the exempt amount, rounds to pennies and freezes the
/// report; summaries are never touched afterwards.
pub struct Assembler<'a> {
    config: &'a EngineConfig,
    years: BTreeMap<TaxYear, TaxYearSummary>,
    disposals: Vec<DisposalRecord>,
    income_events: Vec<IncomeEvent>,
    monthly_interest: Vec<MonthlyInterest>,
    pools: Vec<Section104Pool>,
    errors: Vec<SymbolError>,
}

impl<'a> Assembler<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Assembler {
            config,
            years: BTreeMap::new(),
            disposals: Vec::new(),
            income_events: Vec::new(),
            monthly_interest: Vec::new(),
            pools: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn year_mut(&mut self, tax_year: TaxYear) -> &mut TaxYearSummary {
        self.years
            .entry(tax_year)
            .or_insert_with(|| TaxYearSummary::new(tax_year))
    }

    pub fn add_symbol(&mut self, result: SymbolResult) {
        for disposal in &result.disposals {
            let summary = self.year_mut(disposal.tax_year);
            summary.disposal_count += 1;
            summary.disposal_proceeds += disposal.proceeds_gbp;
            summary.allowable_costs += disposal.allowable_cost_gbp;
            if disposal.gain_gbp >= Decimal::ZERO {
                summary.capital_gain += disposal.gain_gbp;
            } else {
                summary.capital_loss += disposal.gain_gbp;
            }
        }
        self.disposals.extend(result.disposals);
        if !result.pool.is_empty() {
            self.pools.push(result.pool);
        }
    }

    pub fn add_income(&mut self, events: Vec<IncomeEvent>, monthly_interest: Vec<MonthlyInterest>) {
        for event in &events {
            let summary = self.year_mut(event.tax_year);
            match event.category {
                IncomeCategory::Dividend => summary.dividend_income += event.amount_gbp,
                IncomeCategory::Interest => summary.interest_income += event.amount_gbp,
                IncomeCategory::EriAdjustment => summary.eri_income += event.amount_gbp,
            }
        }
        self.income_events.extend(events);
        self.monthly_interest.extend(monthly_interest);
    }

    pub fn add_error(&mut self, error: SymbolError) {
        self.errors.push(error);
    }

    /// Apply exempt amounts, round everything to pennies and freeze
    pub fn finalize(mut self) -> EngineReport {
        for (tax_year, summary) in &mut self.years {
            summary.exempt_amount = self.config.exempt_amount(*tax_year);
            summary.taxable_gain = match summary.exempt_amount {
                Some(exempt) => Some((summary.total_gain() - exempt).max(Decimal::ZERO)),
                None => {
                    log::warn!("no annual exempt amount configured for {}", tax_year);
                    None
                }
            };
            summary.disposal_proceeds = summary.disposal_proceeds.round_dp(2);
            summary.allowable_costs = summary.allowable_costs.round_dp(2);
            summary.capital_gain = summary.capital_gain.round_dp(2);
            summary.capital_loss = summary.capital_loss.round_dp(2);
            summary.taxable_gain = summary.taxable_gain.map(|g| g.round_dp(2));
            summary.dividend_income = summary.dividend_income.round_dp(2);
            summary.interest_income = summary.interest_income.round_dp(2);
            summary.eri_income = summary.eri_income.round_dp(2);
        }

        self.disposals.sort_by_key(|d| d.date);
        for disposal in &mut self.disposals {
            disposal.proceeds_gbp = disposal.proceeds_gbp.round_dp(2);
            disposal.allowable_cost_gbp = disposal.allowable_cost_gbp.round_dp(2);
            disposal.gain_gbp = disposal.gain_gbp.round_dp(2);
            disposal.pool_after.cost_gbp = disposal.pool_after.cost_gbp.round_dp(2);
            for m in &mut disposal.matches {
                m.cost_gbp = m.cost_gbp.round_dp(2);
                m.proceeds_gbp = m.proceeds_gbp.round_dp(2);
                m.gain_gbp = m.gain_gbp.round_dp(2);
            }
        }
        for event in &mut self.income_events {
            event.amount_gbp = event.amount_gbp.round_dp(2);
        }
        for row in &mut self.monthly_interest {
            row.amount_gbp = row.amount_gbp.round_dp(2);
        }
        for pool in &mut self.pools {
            pool.total_cost_gbp = pool.total_cost_gbp.round_dp(2);
        }
        self.errors.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        EngineReport {
            years: self.years.into_values().collect(),
            disposals: self.disposals,
            income_events: self.income_events,
            monthly_interest: self.monthly_interest,
            pools: self.pools,
            errors: self.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::funds::EriEntry;
    use crate::transaction::Action;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn txn(
        date_str: &str,
        action: Action,
        symbol: Option<&str>,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Transaction {
        Transaction {
            date: date(date_str),
            broker: "test".to_string(),
            action,
            symbol: symbol.map(String::from),
            quantity,
            unit_price,
            fees: Decimal::ZERO,
            currency: "GBP".to_string(),
        }
    }

    fn run(transactions: &[Transaction], config: &EngineConfig) -> EngineReport {
        run_engine(EngineInputs {
            transactions,
            converter: &CurrencyConverter::new(),
            initial_prices: &InitialPrices::new(),
            isin_translations: &IsinTranslations::new(),
            eri_table: &EriTable::new(),
            config,
        })
    }

    #[test]
    fn summary_applies_exempt_amount() {
        let mut config = EngineConfig::default();
        config.exempt_amounts.insert(2025, dec!(3000));
        let transactions = vec![
            txn("2024-05-01", Action::Acquire, Some("VWRL"), dec!(100), dec!(10)),
            txn("2024-09-01", Action::Dispose, Some("VWRL"), dec!(100), dec!(100)),
        ];
        let report = run(&transactions, &config);

        let year = report.year(TaxYear(2025)).unwrap();
        assert_eq!(year.disposal_count, 1);
        assert_eq!(year.disposal_proceeds, dec!(10000));
        assert_eq!(year.allowable_costs, dec!(1000));
        assert_eq!(year.capital_gain, dec!(9000));
        assert_eq!(year.exempt_amount, Some(dec!(3000)));
        assert_eq!(year.taxable_gain, Some(dec!(6000)));
    }

    #[test]
    fn taxable_gain_floors_at_zero() {
        let transactions = vec![
            txn("2024-05-01", Action::Acquire, Some("VWRL"), dec!(100), dec!(10)),
            txn("2024-09-01", Action::Dispose, Some("VWRL"), dec!(100), dec!(10.50)),
        ];
        let report = run(&transactions, &EngineConfig::default());

        let year = report.year(TaxYear(2025)).unwrap();
        assert_eq!(year.capital_gain, dec!(50));
        assert_eq!(year.taxable_gain, Some(Decimal::ZERO));
    }

    #[test]
    fn gains_and_losses_tracked_separately() {
        let transactions = vec![
            txn("2024-05-01", Action::Acquire, Some("AAA"), dec!(10), dec!(100)),
            txn("2024-05-01", Action::Acquire, Some("BBB"), dec!(10), dec!(100)),
            txn("2024-09-01", Action::Dispose, Some("AAA"), dec!(10), dec!(150)),
            txn("2024-09-01", Action::Dispose, Some("BBB"), dec!(10), dec!(80)),
        ];
        let report = run(&transactions, &EngineConfig::default());

        let year = report.year(TaxYear(2025)).unwrap();
        assert_eq!(year.capital_gain, dec!(500));
        assert_eq!(year.capital_loss, dec!(-200));
        assert_eq!(year.total_gain(), dec!(300));
    }

    #[test]
    fn disposals_split_across_tax_years() {
        let transactions = vec![
            txn("2024-01-01", Action::Acquire, Some("VWRL"), dec!(100), dec!(10)),
            txn("2024-04-05", Action::Dispose, Some("VWRL"), dec!(10), dec!(15)),
            txn("2024-04-06", Action::Dispose, Some("VWRL"), dec!(10), dec!(16)),
        ];
        let report = run(&transactions, &EngineConfig::default());

        assert_eq!(report.years.len(), 2);
        assert_eq!(report.year(TaxYear(2024)).unwrap().disposal_count, 1);
        assert_eq!(report.year(TaxYear(2025)).unwrap().disposal_count, 1);
    }

    #[test]
    fn income_flows_into_summaries() {
        let transactions = vec![
            txn("2024-06-01", Action::Dividend, Some("AAPL"), Decimal::ZERO, dec!(150)),
            txn("2024-07-01", Action::Interest, None, Decimal::ZERO, dec!(12.345)),
        ];
        let report = run(&transactions, &EngineConfig::default());

        let year = report.year(TaxYear(2025)).unwrap();
        assert_eq!(year.dividend_income, dec!(150));
        // Rounded to pennies at the boundary
        assert_eq!(year.interest_income, dec!(12.35));
        assert_eq!(report.monthly_interest.len(), 1);
    }

    #[test]
    fn bad_symbol_does_not_abort_good_symbol() {
        let mut bad = txn("2024-05-01", Action::Acquire, Some("AAPL"), dec!(10), dec!(100));
        bad.currency = "USD".to_string();
        let transactions = vec![
            bad,
            txn("2024-05-01", Action::Acquire, Some("VWRL"), dec!(100), dec!(10)),
            txn("2024-09-01", Action::Dispose, Some("VWRL"), dec!(50), dec!(20)),
        ];
        let report = run(&transactions, &EngineConfig::default());

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].symbol, "AAPL");
        assert!(matches!(report.errors[0].error, EngineError::MissingRate { .. }));
        assert_eq!(report.year(TaxYear(2025)).unwrap().disposal_count, 1);
    }

    #[test]
    fn rounding_only_at_the_boundary() {
        // 3 units for £100 gives a repeating-decimal unit cost; the final
        // figures still land on pennies
        let transactions = vec![
            txn("2024-05-01", Action::Acquire, Some("VWRL"), dec!(3), dec!(33.333333)),
            txn("2024-09-01", Action::Dispose, Some("VWRL"), dec!(1), dec!(40)),
        ];
        let report = run(&transactions, &EngineConfig::default());

        let disposal = &report.disposals[0];
        assert_eq!(disposal.allowable_cost_gbp, dec!(33.33));
        assert_eq!(disposal.gain_gbp, dec!(6.67));
    }

    #[test]
    fn eri_increases_income_and_later_disposal_cost() {
        let mut isin = IsinTranslations::new();
        isin.insert("IE00B3RBWM25", "VWRP");
        let mut eri = EriTable::new();
        eri.insert(EriEntry {
            isin: "IE00B3RBWM25".to_string(),
            period_end: date("2024-06-30"),
            excess_per_unit: dec!(0.5),
            currency: "GBP".to_string(),
        });
        let transactions = vec![
            txn("2024-01-15", Action::Acquire, Some("VWRP"), dec!(100), dec!(80)),
            txn("2024-12-01", Action::Dispose, Some("VWRP"), dec!(100), dec!(90)),
        ];
        let report = run_engine(EngineInputs {
            transactions: &transactions,
            converter: &CurrencyConverter::new(),
            initial_prices: &InitialPrices::new(),
            isin_translations: &isin,
            eri_table: &eri,
            config: &EngineConfig::default(),
        });

        let year = report.year(TaxYear(2025)).unwrap();
        assert_eq!(year.eri_income, dec!(50));
        // Basis 8000 + 50 write-back, proceeds 9000
        let disposal = &report.disposals[0];
        assert_eq!(disposal.allowable_cost_gbp, dec!(8050));
        assert_eq!(disposal.gain_gbp, dec!(950));
    }

    #[test]
    fn report_is_idempotent() {
        let transactions = vec![
            txn("2024-05-01", Action::Acquire, Some("VWRL"), dec!(100), dec!(10)),
            txn("2024-06-15", Action::Dispose, Some("VWRL"), dec!(40), dec!(12)),
            txn("2024-06-20", Action::Acquire, Some("VWRL"), dec!(20), dec!(11)),
        ];
        let first = run(&transactions, &EngineConfig::default());
        let second = run(&transactions, &EngineConfig::default());

        assert_eq!(first.years, second.years);
        assert_eq!(first.disposals, second.disposals);
        assert_eq!(
            first.match_events().collect::<Vec<_>>(),
            second.match_events().collect::<Vec<_>>()
        );
    }

    #[test]
    fn closing_pools_reported() {
        let transactions = vec![
            txn("2024-05-01", Action::Acquire, Some("VWRL"), dec!(100), dec!(10)),
            txn("2024-09-01", Action::Dispose, Some("VWRL"), dec!(40), dec!(12)),
        ];
        let report = run(&transactions, &EngineConfig::default());

        assert_eq!(report.pools.len(), 1);
        assert_eq!(report.pools[0].total_quantity, dec!(60));
        assert_eq!(report.pools[0].total_cost_gbp, dec!(600));
    }
}
