//! Conversion of transaction-currency amounts to GBP using the monthly
//! HMRC exchange rate table.

use crate::error::EngineError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;

/// CSV record for the exchange rate table
///
/// HMRC publishes one rate per currency per month, expressed as units of the
/// foreign currency per pound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRecord {
    /// First day of the month the rate applies from (ISO date)
    pub month: String,
    pub currency: String,
    pub rate: Decimal,
}

/// Converter which holds the monthly rate history.
///
/// A rate is valid from the date it was published until superseded, so
/// lookups take the most recent rate at or before the requested date.
#[derive(Debug, Default, Clone)]
pub struct CurrencyConverter {
    rates: HashMap<String, BTreeMap<NaiveDate, Decimal>>,
}

impl CurrencyConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read rates from CSV with `month,currency,rate` columns
    pub fn read_csv<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut converter = CurrencyConverter::new();
        for record in rdr.deserialize::<RateRecord>() {
            let record = record?;
            let month = NaiveDate::parse_from_str(&record.month, "%Y-%m-%d")?;
            converter.insert(&record.currency, month, record.rate);
        }
        Ok(converter)
    }

    pub fn insert(&mut self, currency: &str, month: NaiveDate, rate: Decimal) {
        self.rates
            .entry(currency.to_uppercase())
            .or_default()
            .insert(month, rate);
    }

    /// GBP/currency rate most recently published at or before `date`
    pub fn rate(&self, currency: &str, date: NaiveDate) -> Result<Decimal, EngineError> {
        self.rates
            .get(&currency.to_uppercase())
            .and_then(|by_month| by_month.range(..=date).next_back())
            .map(|(_, rate)| *rate)
            .ok_or_else(|| EngineError::MissingRate {
                currency: currency.to_uppercase(),
                date,
            })
    }

    /// Convert an amount from the given currency to GBP.
    ///
    /// GBP amounts pass through unchanged. Conversion happens before any
    /// rounding; rounding is deferred to the report boundary.
    pub fn to_gbp(
        &self,
        amount: Decimal,
        currency: &str,
        date: NaiveDate,
    ) -> Result<Decimal, EngineError> {
        if amount.is_zero() || currency.eq_ignore_ascii_case("GBP") {
            return Ok(amount);
        }
        let rate = self.rate(currency, date)?;
        Ok(amount / rate)
    }
}
