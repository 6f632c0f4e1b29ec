//! Initial price table for lots whose cost basis is not established by a
//! purchase: transfers-in-kind and spin-off share allocations.

use crate::error::EngineError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;

/// A unit price in its reference currency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialPrice {
    pub price: Decimal,
    pub currency: String,
}

/// CSV record for the initial price table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialPriceRecord {
    pub date: String,
    pub symbol: String,
    pub price: Decimal,
    pub currency: String,
}

/// Per-(symbol, date) unit prices supplied externally.
#[derive(Debug, Default, Clone)]
pub struct InitialPrices {
    prices: HashMap<(NaiveDate, String), InitialPrice>,
}

impl InitialPrices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read prices from CSV with `date,symbol,price,currency` columns
    pub fn read_csv<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut prices = InitialPrices::new();
        for record in rdr.deserialize::<InitialPriceRecord>() {
            let record = record?;
            let date = NaiveDate::parse_from_str(&record.date, "%Y-%m-%d")?;
            prices.insert(date, &record.symbol, record.price, &record.currency);
        }
        Ok(prices)
    }

    pub fn insert(&mut self, date: NaiveDate, symbol: &str, price: Decimal, currency: &str) {
        self.prices.insert(
            (date, symbol.to_string()),
            InitialPrice {
                price,
                currency: currency.to_string(),
            },
        );
    }

    /// Unit price for `symbol` on `date`, or `MissingInitialPrice`.
    ///
    /// Fatal only for the lot that needs the price, not the whole run.
    pub fn get(&self, date: NaiveDate, symbol: &str) -> Result<&InitialPrice, EngineError> {
        self.prices
            .get(&(date, symbol.to_string()))
            .ok_or_else(|| EngineError::MissingInitialPrice {
                symbol: symbol.to_string(),
                date,
            })
    }
}
