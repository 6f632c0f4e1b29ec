//! Report command - per-tax-year summaries of gains and income

use crate::cmd::InputFiles;
use capgains::{EngineReport, TaxYear, TaxYearSummary};
use clap::Args;
use rust_decimal::Decimal;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct ReportCommand {
    #[command(flatten)]
    inputs: InputFiles,

    /// Tax year to report (e.g., 2025 for 2024/25)
    #[arg(short, long)]
    year: Option<i32>,

    /// Output as JSON instead of formatted tables
    #[arg(long)]
    json: bool,
}

/// Row for the per-year summary table
#[derive(Debug, Tabled)]
struct SummaryRow {
    #[tabled(rename = "Tax Year")]
    tax_year: String,
    #[tabled(rename = "Disposals")]
    disposals: usize,
    #[tabled(rename = "Proceeds")]
    proceeds: String,
    #[tabled(rename = "Allowable Costs")]
    allowable_costs: String,
    #[tabled(rename = "Gains")]
    gains: String,
    #[tabled(rename = "Losses")]
    losses: String,
    #[tabled(rename = "Exempt Amount")]
    exempt: String,
    #[tabled(rename = "Taxable Gain")]
    taxable: String,
    #[tabled(rename = "Dividends")]
    dividends: String,
    #[tabled(rename = "Interest")]
    interest: String,
    #[tabled(rename = "ERI")]
    eri: String,
}

impl From<&TaxYearSummary> for SummaryRow {
    fn from(summary: &TaxYearSummary) -> Self {
        SummaryRow {
            tax_year: summary.tax_year.display(),
            disposals: summary.disposal_count,
            proceeds: gbp(summary.disposal_proceeds),
            allowable_costs: gbp(summary.allowable_costs),
            gains: gbp(summary.capital_gain),
            losses: gbp(-summary.capital_loss),
            exempt: summary.exempt_amount.map(gbp).unwrap_or_else(|| "?".to_string()),
            taxable: summary.taxable_gain.map(gbp).unwrap_or_else(|| "?".to_string()),
            dividends: gbp(summary.dividend_income),
            interest: gbp(summary.interest_income),
            eri: gbp(summary.eri_income),
        }
    }
}

/// Row for the monthly interest table
#[derive(Debug, Tabled)]
struct InterestRow {
    #[tabled(rename = "Broker")]
    broker: String,
    #[tabled(rename = "Month")]
    month: String,
    #[tabled(rename = "Interest")]
    amount: String,
}

fn gbp(amount: Decimal) -> String {
    format!("£{}", amount.round_dp(2))
}

impl ReportCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let report = self.inputs.load()?.run();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        let year = self.year.map(TaxYear);
        self.print_summaries(&report, year);
        self.print_monthly_interest(&report, year);
        self.print_pools(&report);
        print_errors(&report);
        Ok(())
    }

    fn print_summaries(&self, report: &EngineReport, year: Option<TaxYear>) {
        let rows: Vec<SummaryRow> = report
            .years
            .iter()
            .filter(|s| year.is_none_or(|y| s.tax_year == y))
            .map(SummaryRow::from)
            .collect();
        if rows.is_empty() {
            println!("No disposals or income for the selected period");
            return;
        }
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
            .to_string();
        println!("{}", table);
    }

    fn print_monthly_interest(&self, report: &EngineReport, year: Option<TaxYear>) {
        let rows: Vec<InterestRow> = report
            .monthly_interest
            .iter()
            .filter(|r| {
                year.is_none_or(|y| {
                    let date = chrono::NaiveDate::from_ymd_opt(r.year, r.month, 1).unwrap();
                    TaxYear::from_date(date) == y
                })
            })
            .map(|r| InterestRow {
                broker: r.broker.clone(),
                month: format!("{}-{:02}", r.year, r.month),
                amount: gbp(r.amount_gbp),
            })
            .collect();
        if rows.is_empty() {
            return;
        }
        println!("\nInterest by broker and month:");
        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
            .to_string();
        println!("{}", table);
    }

    fn print_pools(&self, report: &EngineReport) {
        if report.pools.is_empty() {
            return;
        }
        println!("\nClosing Section 104 pools:");
        for pool in &report.pools {
            println!(
                "  {}: {} units, cost {}",
                pool.symbol,
                pool.total_quantity,
                gbp(pool.total_cost_gbp)
            );
        }
    }
}

pub fn print_errors(report: &EngineReport) {
    if report.errors.is_empty() {
        return;
    }
    eprintln!("\n{} symbol(s) could not be computed; correct the input data:", report.errors.len());
    for error in &report.errors {
        eprintln!("  {}", error);
    }
}
