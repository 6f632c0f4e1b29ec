pub mod cgt;
pub mod income;
pub mod pool;
pub mod report;
pub mod uk;

pub use cgt::{match_symbol, DisposalRecord, MatchEvent, MatchRule, SymbolResult};
pub use income::{aggregate_income, IncomeCategory, IncomeEvent, IncomeReport, MonthlyInterest};
pub use pool::{PoolSnapshot, Section104Pool};
pub use report::{run_engine, EngineInputs, EngineReport, TaxYearSummary};
pub use uk::TaxYear;
