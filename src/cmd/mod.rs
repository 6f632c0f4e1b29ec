pub mod matches;
pub mod report;

use capgains::{
    run_engine, CurrencyConverter, EngineConfig, EngineInputs, EngineReport, EriTable,
    InitialPrices, IsinTranslations, Transaction,
};
use clap::Args;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Input files shared by all commands
#[derive(Args, Debug)]
pub struct InputFiles {
    /// CSV or JSON file containing normalized transactions
    #[arg(short, long)]
    transactions: PathBuf,

    /// CSV file with monthly exchange rates (month,currency,rate)
    #[arg(short, long)]
    rates: Option<PathBuf>,

    /// CSV file with initial prices for transfers and spin-offs
    /// (date,symbol,price,currency)
    #[arg(long)]
    initial_prices: Option<PathBuf>,

    /// CSV file with ISIN to ticker translations (isin,symbol)
    #[arg(long)]
    isin: Option<PathBuf>,

    /// CSV file with excess reported income figures
    /// (isin,period_end,excess_per_unit,currency)
    #[arg(long)]
    eri: Option<PathBuf>,

    /// JSON file with configuration overrides
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip validation that running holdings stay non-negative
    #[arg(long)]
    no_balance_check: bool,
}

pub struct LoadedInputs {
    transactions: Vec<Transaction>,
    converter: CurrencyConverter,
    initial_prices: InitialPrices,
    isin_translations: IsinTranslations,
    eri_table: EriTable,
    config: EngineConfig,
}

impl InputFiles {
    pub fn load(&self) -> anyhow::Result<LoadedInputs> {
        let transactions = read_transactions(&self.transactions)?;
        let converter = match &self.rates {
            Some(path) => CurrencyConverter::read_csv(File::open(path)?)?,
            None => CurrencyConverter::new(),
        };
        let initial_prices = match &self.initial_prices {
            Some(path) => InitialPrices::read_csv(File::open(path)?)?,
            None => InitialPrices::new(),
        };
        let isin_translations = match &self.isin {
            Some(path) => IsinTranslations::read_csv(File::open(path)?)?,
            None => IsinTranslations::new(),
        };
        let eri_table = match &self.eri {
            Some(path) => EriTable::read_csv(File::open(path)?)?,
            None => EriTable::new(),
        };
        let mut config = match &self.config {
            Some(path) => EngineConfig::read_json(File::open(path)?)?,
            None => EngineConfig::default(),
        };
        if self.no_balance_check {
            config.balance_check = false;
        }
        Ok(LoadedInputs {
            transactions,
            converter,
            initial_prices,
            isin_translations,
            eri_table,
            config,
        })
    }
}

impl LoadedInputs {
    pub fn run(&self) -> EngineReport {
        run_engine(EngineInputs {
            transactions: &self.transactions,
            converter: &self.converter,
            initial_prices: &self.initial_prices,
            isin_translations: &self.isin_translations,
            eri_table: &self.eri_table,
            config: &self.config,
        })
    }
}

fn read_transactions(path: &Path) -> anyhow::Result<Vec<Transaction>> {
    let file = File::open(path)?;
    if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
        capgains::transaction::read_json(file)
    } else {
        capgains::transaction::read_csv(file)
    }
}
