//! Matches command - the share identification audit trail, one row per
//! match event

use crate::cmd::InputFiles;
use capgains::TaxYear;
use clap::Args;
use std::io;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Args, Debug)]
pub struct MatchesCommand {
    #[command(flatten)]
    inputs: InputFiles,

    /// Tax year to filter (e.g., 2025 for 2024/25)
    #[arg(short, long)]
    year: Option<i32>,

    /// Filter by symbol
    #[arg(short, long)]
    symbol: Option<String>,

    /// Output as CSV instead of a formatted table
    #[arg(long)]
    csv: bool,
}

/// Row for the match audit trail
#[derive(Debug, Tabled, serde::Serialize)]
struct MatchRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Tax Year")]
    tax_year: String,
    #[tabled(rename = "Symbol")]
    symbol: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Acquired")]
    acquired: String,
    #[tabled(rename = "Quantity")]
    quantity: String,
    #[tabled(rename = "Cost")]
    cost_gbp: String,
    #[tabled(rename = "Proceeds")]
    proceeds_gbp: String,
    #[tabled(rename = "Gain")]
    gain_gbp: String,
}

impl MatchesCommand {
    pub fn exec(&self) -> anyhow::Result<()> {
        let report = self.inputs.load()?.run();
        let year = self.year.map(TaxYear);

        let rows: Vec<MatchRow> = report
            .disposals
            .iter()
            .filter(|d| year.is_none_or(|y| d.tax_year == y))
            .filter(|d| self.symbol.as_ref().is_none_or(|s| &d.symbol == s))
            .flat_map(|d| {
                d.matches.iter().map(|m| MatchRow {
                    date: d.date.format("%Y-%m-%d").to_string(),
                    tax_year: d.tax_year.display(),
                    symbol: d.symbol.clone(),
                    rule: m.rule.display().to_string(),
                    acquired: m
                        .acquired
                        .map(|a| a.format("%Y-%m-%d").to_string())
                        .unwrap_or_default(),
                    quantity: m.quantity.to_string(),
                    cost_gbp: m.cost_gbp.to_string(),
                    proceeds_gbp: m.proceeds_gbp.to_string(),
                    gain_gbp: m.gain_gbp.to_string(),
                })
            })
            .collect();

        if self.csv {
            let mut wtr = csv::Writer::from_writer(io::stdout());
            for row in &rows {
                wtr.serialize(row)?;
            }
            wtr.flush()?;
        } else if rows.is_empty() {
            println!("No disposals found matching filters");
        } else {
            let table = Table::new(&rows)
                .with(Style::rounded())
                .with(Modify::new(Rows::new(1..)).with(Alignment::right()))
                .to_string();
            println!("{}", table);
        }

        crate::cmd::report::print_errors(&report);
        Ok(())
    }
}
