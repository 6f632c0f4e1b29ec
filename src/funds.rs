//! Offshore reporting fund data: ISIN to ticker translations and Excess
//! Reported Income figures published per fund reporting period.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;

/// CSV record for the ISIN translation table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsinRecord {
    pub isin: String,
    pub symbol: String,
}

/// Mapping from fund ISIN to the ticker symbol used in transactions.
#[derive(Debug, Default, Clone)]
pub struct IsinTranslations {
    map: HashMap<String, String>,
}

impl IsinTranslations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read translations from CSV with `isin,symbol` columns
    pub fn read_csv<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut translations = IsinTranslations::new();
        for record in rdr.deserialize::<IsinRecord>() {
            let record = record?;
            translations.insert(&record.isin, &record.symbol);
        }
        Ok(translations)
    }

    pub fn insert(&mut self, isin: &str, symbol: &str) {
        self.map.insert(isin.to_string(), symbol.to_string());
    }

    pub fn get(&self, isin: &str) -> Option<&str> {
        self.map.get(isin).map(String::as_str)
    }
}

/// One fund reporting period's excess reported income per unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EriEntry {
    pub isin: String,
    /// End of the fund's reporting period; units held on this date incur
    /// the deemed income
    pub period_end: NaiveDate,
    pub excess_per_unit: Decimal,
    pub currency: String,
}

/// CSV record for the ERI table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EriRecord {
    pub isin: String,
    pub period_end: String,
    pub excess_per_unit: Decimal,
    pub currency: String,
}

/// Excess Reported Income figures, ordered by reporting period end.
#[derive(Debug, Default, Clone)]
pub struct EriTable {
    entries: Vec<EriEntry>,
}

impl EriTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read figures from CSV with `isin,period_end,excess_per_unit,currency`
    /// columns
    pub fn read_csv<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut table = EriTable::new();
        for record in rdr.deserialize::<EriRecord>() {
            let record = record?;
            let period_end = NaiveDate::parse_from_str(&record.period_end, "%Y-%m-%d")?;
            table.insert(EriEntry {
                isin: record.isin,
                period_end,
                excess_per_unit: record.excess_per_unit,
                currency: record.currency,
            });
        }
        Ok(table)
    }

    pub fn insert(&mut self, entry: EriEntry) {
        let index = self
            .entries
            .partition_point(|e| e.period_end <= entry.period_end);
        self.entries.insert(index, entry);
    }

    pub fn entries(&self) -> &[EriEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn translations_round_trip() {
        let csv_data = "isin,symbol\nIE00B3RBWM25,VWRL\n";
        let translations = IsinTranslations::read_csv(csv_data.as_bytes()).unwrap();
        assert_eq!(translations.get("IE00B3RBWM25"), Some("VWRL"));
        assert_eq!(translations.get("IE0000000000"), None);
    }

    #[test]
    fn eri_entries_sorted_by_period_end() {
        let mut table = EriTable::new();
        table.insert(EriEntry {
            isin: "IE00B3RBWM25".to_string(),
            period_end: date("2024-06-30"),
            excess_per_unit: dec!(0.42),
            currency: "USD".to_string(),
        });
        table.insert(EriEntry {
            isin: "IE00B3RBWM25".to_string(),
            period_end: date("2023-06-30"),
            excess_per_unit: dec!(0.38),
            currency: "USD".to_string(),
        });

        let ends: Vec<_> = table.entries().iter().map(|e| e.period_end).collect();
        assert_eq!(ends, vec![date("2023-06-30"), date("2024-06-30")]);
    }
}
