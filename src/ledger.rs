//! Security Ledger: turns the normalized transaction stream into one
//! chronologically ordered, GBP-normalized event stream per symbol.
//!
//! Corporate actions that only reshape existing positions (splits,
//! spin-offs, capitalized fees, returns of capital) are resolved here so the
//! matching engine sees nothing but acquisitions, disposals and pool cost
//! adjustments.

use crate::config::EngineConfig;
use crate::currency::CurrencyConverter;
use crate::error::{EngineError, SymbolError};
use crate::prices::InitialPrices;
use crate::transaction::{Action, Transaction};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

/// Tolerance for quantity comparisons, absorbing decimal rounding from
/// chained proportional draws
pub const QUANTITY_EPSILON: Decimal = dec!(0.000001);

/// A single GBP-normalized event in a symbol's stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub date: NaiveDate,
    /// Input-order sequence number; ties on date keep input order
    pub seq: usize,
    pub kind: LedgerEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEventKind {
    Acquire {
        quantity: Decimal,
        cost_gbp: Decimal,
    },
    Dispose {
        quantity: Decimal,
        proceeds_gbp: Decimal,
    },
    /// Non-disposal change to the pool's cost basis (capitalized fees,
    /// returns of capital, ERI write-backs, spin-off carve-outs)
    CostAdjust { delta_gbp: Decimal },
}

/// A pool cost write-back produced outside the ledger (currently only ERI)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostAdjustment {
    pub symbol: String,
    pub date: NaiveDate,
    pub delta_gbp: Decimal,
}

/// Per-symbol event streams plus the errors that excluded symbols from
/// computation.
#[derive(Debug, Default)]
pub struct SecurityLedger {
    streams: BTreeMap<String, Vec<LedgerEvent>>,
    /// Running holding after each position-changing event, per symbol
    holdings: BTreeMap<String, Vec<(NaiveDate, Decimal)>>,
    pub errors: Vec<SymbolError>,
}

impl SecurityLedger {
    /// Build per-symbol streams from the full transaction set.
    ///
    /// Normalization failures (missing rates or prices, invalid rows,
    /// negative balances) exclude only the affected symbol; everything else
    /// still computes.
    pub fn build(
        transactions: &[Transaction],
        converter: &CurrencyConverter,
        initial_prices: &InitialPrices,
        config: &EngineConfig,
    ) -> SecurityLedger {
        let mut streams: BTreeMap<String, Vec<LedgerEvent>> = BTreeMap::new();
        let mut failed: BTreeMap<String, EngineError> = BTreeMap::new();
        let mut splits: Vec<(String, NaiveDate, usize, Decimal)> = Vec::new();
        let mut spin_offs: Vec<(String, NaiveDate, usize, Decimal)> = Vec::new();

        for (seq, t) in transactions.iter().enumerate() {
            if !t.action.is_security_action() {
                continue;
            }
            let symbol = match t.require_symbol() {
                Ok(s) => s.to_string(),
                Err(error) => {
                    failed.entry(t.broker.clone()).or_insert(error);
                    continue;
                }
            };
            if failed.contains_key(&symbol) {
                continue;
            }
            if matches!(t.action, Action::Acquire | Action::Dispose | Action::TransferIn)
                && t.quantity.is_zero()
            {
                log::warn!("skipping zero-quantity {} of {} on {}", t.action, symbol, t.date);
                continue;
            }

            let kind = match t.action {
                Action::Acquire => converter
                    .to_gbp(t.gross_amount() + t.fees, &t.currency, t.date)
                    .map(|cost_gbp| {
                        Some(LedgerEventKind::Acquire {
                            quantity: t.quantity,
                            cost_gbp,
                        })
                    }),
                Action::TransferIn => transfer_in_cost(t, &symbol, converter, initial_prices)
                    .map(|cost_gbp| {
                        Some(LedgerEventKind::Acquire {
                            quantity: t.quantity,
                            cost_gbp,
                        })
                    }),
                Action::Dispose => converter
                    .to_gbp(t.gross_amount() - t.fees, &t.currency, t.date)
                    .map(|proceeds_gbp| {
                        Some(LedgerEventKind::Dispose {
                            quantity: t.quantity,
                            proceeds_gbp,
                        })
                    }),
                Action::Fee => converter
                    .to_gbp(t.gross_amount() + t.fees, &t.currency, t.date)
                    .map(|delta_gbp| Some(LedgerEventKind::CostAdjust { delta_gbp })),
                Action::CapitalReturn => converter
                    .to_gbp(t.gross_amount(), &t.currency, t.date)
                    .map(|amount| Some(LedgerEventKind::CostAdjust { delta_gbp: -amount })),
                Action::Split => {
                    if t.quantity <= Decimal::ZERO {
                        Err(EngineError::InvalidTransaction(format!(
                            "split ratio must be positive for {} on {}",
                            symbol, t.date
                        )))
                    } else {
                        splits.push((symbol.clone(), t.date, seq, t.quantity));
                        Ok(None)
                    }
                }
                Action::SpinOff => {
                    spin_offs.push((symbol.clone(), t.date, seq, t.quantity));
                    Ok(None)
                }
                Action::Dividend | Action::Interest => Ok(None),
            };

            match kind {
                Ok(Some(kind)) => streams.entry(symbol).or_default().push(LedgerEvent {
                    date: t.date,
                    seq,
                    kind,
                }),
                Ok(None) => {}
                Err(error) => {
                    failed.insert(symbol, error);
                }
            }
        }

        for events in streams.values_mut() {
            events.sort_by_key(|e| (e.date, e.seq));
        }

        // Splits restate every earlier event of the symbol in post-split
        // units: quantity scales, cost stays
        for (symbol, date, seq, ratio) in splits {
            if failed.contains_key(&symbol) {
                continue;
            }
            if let Some(events) = streams.get_mut(&symbol) {
                for e in events
                    .iter_mut()
                    .filter(|e| (e.date, e.seq) < (date, seq))
                {
                    match &mut e.kind {
                        LedgerEventKind::Acquire { quantity, .. }
                        | LedgerEventKind::Dispose { quantity, .. } => *quantity *= ratio,
                        LedgerEventKind::CostAdjust { .. } => {}
                    }
                }
                log::debug!("applied {}:1 split to {} on {}", ratio, symbol, date);
            }
        }

        // Spin-offs carve cost out of the source holding when an allocation
        // is configured, otherwise the new shares are valued from the
        // initial price table
        spin_offs.sort_by_key(|s| (s.1, s.2));
        for (dest, date, seq, quantity) in spin_offs {
            if failed.contains_key(&dest) {
                continue;
            }
            let event = match config.spin_off_allocation(&dest) {
                Some(allocation) => {
                    if let Some(error) = failed.get(&allocation.source).cloned() {
                        failed.insert(dest.clone(), error);
                        continue;
                    }
                    let cost_before = streams
                        .get(&allocation.source)
                        .map(|events| replay_cost(events, date, seq))
                        .unwrap_or(Decimal::ZERO);
                    let moved = cost_before * allocation.cost_fraction;
                    if let Some(events) = streams.get_mut(&allocation.source) {
                        insert_sorted(
                            events,
                            LedgerEvent {
                                date,
                                seq,
                                kind: LedgerEventKind::CostAdjust { delta_gbp: -moved },
                            },
                        );
                    }
                    log::debug!(
                        "spin-off {} -> {} on {}: moved cost {}",
                        allocation.source,
                        dest,
                        date,
                        moved
                    );
                    LedgerEvent {
                        date,
                        seq,
                        kind: LedgerEventKind::Acquire {
                            quantity,
                            cost_gbp: moved,
                        },
                    }
                }
                None => {
                    let cost = initial_prices.get(date, &dest).and_then(|p| {
                        converter.to_gbp(quantity * p.price, &p.currency, date)
                    });
                    match cost {
                        Ok(cost_gbp) => LedgerEvent {
                            date,
                            seq,
                            kind: LedgerEventKind::Acquire { quantity, cost_gbp },
                        },
                        Err(error) => {
                            failed.insert(dest, error);
                            continue;
                        }
                    }
                }
            };
            insert_sorted(streams.entry(dest).or_default(), event);
        }

        // Holdings timeline (matching-independent) and the optional
        // negative-balance validation
        let mut holdings: BTreeMap<String, Vec<(NaiveDate, Decimal)>> = BTreeMap::new();
        for (symbol, events) in &streams {
            if failed.contains_key(symbol) {
                continue;
            }
            let mut running = Decimal::ZERO;
            let mut timeline = Vec::new();
            for e in events {
                let delta = match &e.kind {
                    LedgerEventKind::Acquire { quantity, .. } => *quantity,
                    LedgerEventKind::Dispose { quantity, .. } => -*quantity,
                    LedgerEventKind::CostAdjust { .. } => continue,
                };
                let before = running;
                running += delta;
                if config.balance_check && running < -QUANTITY_EPSILON {
                    failed.insert(
                        symbol.clone(),
                        EngineError::InsufficientHolding {
                            symbol: symbol.clone(),
                            date: e.date,
                            requested: -delta,
                            available: before,
                        },
                    );
                    break;
                }
                timeline.push((e.date, running));
            }
            holdings.insert(symbol.clone(), timeline);
        }

        let errors: Vec<SymbolError> = failed
            .into_iter()
            .map(|(symbol, error)| SymbolError { symbol, error })
            .collect();
        for e in &errors {
            streams.remove(&e.symbol);
            holdings.remove(&e.symbol);
        }

        SecurityLedger {
            streams,
            holdings,
            errors,
        }
    }

    pub fn streams(&self) -> impl Iterator<Item = (&String, &Vec<LedgerEvent>)> {
        self.streams.iter()
    }

    pub fn events(&self, symbol: &str) -> Option<&[LedgerEvent]> {
        self.streams.get(symbol).map(Vec::as_slice)
    }

    /// Units held at the end of `date`
    pub fn holding_at(&self, symbol: &str, date: NaiveDate) -> Decimal {
        self.holdings
            .get(symbol)
            .and_then(|timeline| {
                let index = timeline.partition_point(|(d, _)| *d <= date);
                index.checked_sub(1).map(|i| timeline[i].1)
            })
            .unwrap_or(Decimal::ZERO)
    }

    /// Inject pool cost write-backs (ERI deemed income) into the streams.
    ///
    /// Adjustments land at the end of their day so same-day disposals are
    /// unaffected.
    pub fn apply_cost_adjustments(&mut self, adjustments: &[CostAdjustment]) {
        for adj in adjustments {
            match self.streams.get_mut(&adj.symbol) {
                Some(events) => insert_sorted(
                    events,
                    LedgerEvent {
                        date: adj.date,
                        seq: usize::MAX,
                        kind: LedgerEventKind::CostAdjust {
                            delta_gbp: adj.delta_gbp,
                        },
                    },
                ),
                None => log::warn!(
                    "dropping cost adjustment for {} on {}: symbol not computed",
                    adj.symbol,
                    adj.date
                ),
            }
        }
    }
}

fn transfer_in_cost(
    t: &Transaction,
    symbol: &str,
    converter: &CurrencyConverter,
    initial_prices: &InitialPrices,
) -> Result<Decimal, EngineError> {
    let price = initial_prices.get(t.date, symbol)?;
    let value = converter.to_gbp(t.quantity * price.price, &price.currency, t.date)?;
    let fees = converter.to_gbp(t.fees, &t.currency, t.date)?;
    Ok(value + fees)
}

/// Average-cost replay of a stream up to (but excluding) the given point,
/// used to value spin-off carve-outs
fn replay_cost(events: &[LedgerEvent], date: NaiveDate, seq: usize) -> Decimal {
    let mut quantity = Decimal::ZERO;
    let mut cost = Decimal::ZERO;
    for e in events.iter().take_while(|e| (e.date, e.seq) < (date, seq)) {
        match &e.kind {
            LedgerEventKind::Acquire {
                quantity: q,
                cost_gbp,
            } => {
                quantity += q;
                cost += cost_gbp;
            }
            LedgerEventKind::Dispose { quantity: q, .. } => {
                if quantity > Decimal::ZERO {
                    let drawn = (*q).min(quantity);
                    cost -= cost * drawn / quantity;
                    quantity -= drawn;
                }
            }
            LedgerEventKind::CostAdjust { delta_gbp } => {
                cost = (cost + delta_gbp).max(Decimal::ZERO);
            }
        }
    }
    cost
}

fn insert_sorted(events: &mut Vec<LedgerEvent>, event: LedgerEvent) {
    let index = events.partition_point(|e| (e.date, e.seq) <= (event.date, event.seq));
    events.insert(index, event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpinOffAllocation;
    use rust_decimal_macros::dec;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn txn(date_str: &str, action: Action, symbol: &str, quantity: Decimal, unit_price: Decimal) -> Transaction {
        Transaction {
            date: date(date_str),
            broker: "test".to_string(),
            action,
            symbol: Some(symbol.to_string()),
            quantity,
            unit_price,
            fees: Decimal::ZERO,
            currency: "GBP".to_string(),
        }
    }

    fn build(transactions: &[Transaction]) -> SecurityLedger {
        SecurityLedger::build(
            transactions,
            &CurrencyConverter::new(),
            &InitialPrices::new(),
            &EngineConfig::default(),
        )
    }


    #[test]
    fn acquisitions_and_disposals_normalized() {
        let transactions = vec![
            txn("2024-01-15", Action::Acquire, "VWRL", dec!(10), dec!(100)),
            txn("2024-06-15", Action::Dispose, "VWRL", dec!(4), dec!(110)),
        ];
        let ledger = build(&transactions);
        let events = ledger.events("VWRL").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].kind,
            LedgerEventKind::Acquire {
                quantity: dec!(10),
                cost_gbp: dec!(1000),
            }
        );
        assert_eq!(
            events[1].kind,
            LedgerEventKind::Dispose {
                quantity: dec!(4),
                proceeds_gbp: dec!(440),
            }
        );
    }

    #[test]
    fn fees_fold_into_cost_and_proceeds() {
        let mut buy = txn("2024-01-15", Action::Acquire, "VWRL", dec!(10), dec!(100));
        buy.fees = dec!(5);
        let mut sell = txn("2024-06-15", Action::Dispose, "VWRL", dec!(4), dec!(110));
        sell.fees = dec!(2);
        let ledger = build(&[buy, sell]);
        let events = ledger.events("VWRL").unwrap();
        assert_eq!(
            events[0].kind,
            LedgerEventKind::Acquire {
                quantity: dec!(10),
                cost_gbp: dec!(1005),
            }
        );
        assert_eq!(
            events[1].kind,
            LedgerEventKind::Dispose {
                quantity: dec!(4),
                proceeds_gbp: dec!(438),
            }
        );
    }

    #[test]
    fn foreign_currency_converted() {
        let mut converter = CurrencyConverter::new();
        converter.insert("USD", date("2024-01-01"), dec!(1.25));
        let mut t = txn("2024-01-15", Action::Acquire, "AAPL", dec!(10), dec!(125));
        t.currency = "USD".to_string();
        let ledger = SecurityLedger::build(
            &[t],
            &converter,
            &InitialPrices::new(),
            &EngineConfig::default(),
        );
        let events = ledger.events("AAPL").unwrap();
        assert_eq!(
            events[0].kind,
            LedgerEventKind::Acquire {
                quantity: dec!(10),
                cost_gbp: dec!(1000),
            }
        );
    }

    #[test]
    fn missing_rate_fails_only_that_symbol() {
        let mut bad = txn("2024-01-15", Action::Acquire, "AAPL", dec!(10), dec!(125));
        bad.currency = "USD".to_string();
        let good = txn("2024-01-15", Action::Acquire, "VWRL", dec!(10), dec!(100));
        let ledger = build(&[bad, good]);

        assert!(ledger.events("AAPL").is_none());
        assert!(ledger.events("VWRL").is_some());
        assert_eq!(ledger.errors.len(), 1);
        assert_eq!(ledger.errors[0].symbol, "AAPL");
        assert!(matches!(ledger.errors[0].error, EngineError::MissingRate { .. }));
    }

    #[test]
    fn transfer_in_uses_initial_price_table() {
        let mut prices = InitialPrices::new();
        prices.insert(date("2024-02-01"), "GOOG", dec!(50), "GBP");
        let t = txn("2024-02-01", Action::TransferIn, "GOOG", dec!(20), Decimal::ZERO);
        let ledger = SecurityLedger::build(
            &[t],
            &CurrencyConverter::new(),
            &prices,
            &EngineConfig::default(),
        );
        let events = ledger.events("GOOG").unwrap();
        assert_eq!(
            events[0].kind,
            LedgerEventKind::Acquire {
                quantity: dec!(20),
                cost_gbp: dec!(1000),
            }
        );
    }

    #[test]
    fn transfer_in_without_price_fails_symbol() {
        let t = txn("2024-02-01", Action::TransferIn, "GOOG", dec!(20), Decimal::ZERO);
        let ledger = build(&[t]);
        assert!(matches!(
            ledger.errors[0].error,
            EngineError::MissingInitialPrice { .. }
        ));
    }

    #[test]
    fn fee_and_capital_return_become_cost_adjustments() {
        let mut fee = txn("2024-03-01", Action::Fee, "AAPL", Decimal::ZERO, Decimal::ZERO);
        fee.fees = dec!(7.50);
        let cr = txn("2024-04-01", Action::CapitalReturn, "AAPL", Decimal::ZERO, dec!(120));
        let ledger = build(&[fee, cr]);
        let events = ledger.events("AAPL").unwrap();
        assert_eq!(events[0].kind, LedgerEventKind::CostAdjust { delta_gbp: dec!(7.50) });
        assert_eq!(events[1].kind, LedgerEventKind::CostAdjust { delta_gbp: dec!(-120) });
    }

    #[test]
    fn split_rescales_earlier_events_only() {
        let transactions = vec![
            txn("2024-01-15", Action::Acquire, "AAPL", dec!(10), dec!(100)),
            txn("2024-02-01", Action::Split, "AAPL", dec!(4), Decimal::ZERO),
            txn("2024-03-01", Action::Acquire, "AAPL", dec!(10), dec!(25)),
        ];
        let ledger = build(&transactions);
        let events = ledger.events("AAPL").unwrap();
        // Pre-split holding restated to 40 units, total cost preserved
        assert_eq!(
            events[0].kind,
            LedgerEventKind::Acquire {
                quantity: dec!(40),
                cost_gbp: dec!(1000),
            }
        );
        // Post-split acquisition untouched
        assert_eq!(
            events[1].kind,
            LedgerEventKind::Acquire {
                quantity: dec!(10),
                cost_gbp: dec!(250),
            }
        );
    }

    #[test]
    fn spin_off_with_configured_allocation_moves_cost() {
        let mut config = EngineConfig::default();
        config.spin_offs.insert(
            "SOLV".to_string(),
            SpinOffAllocation {
                source: "MMM".to_string(),
                cost_fraction: dec!(0.1),
            },
        );
        let transactions = vec![
            txn("2024-01-15", Action::Acquire, "MMM", dec!(100), dec!(10)),
            txn("2024-04-01", Action::SpinOff, "SOLV", dec!(25), Decimal::ZERO),
        ];
        let ledger = SecurityLedger::build(
            &transactions,
            &CurrencyConverter::new(),
            &InitialPrices::new(),
            &config,
        );

        let solv = ledger.events("SOLV").unwrap();
        assert_eq!(
            solv[0].kind,
            LedgerEventKind::Acquire {
                quantity: dec!(25),
                cost_gbp: dec!(100),
            }
        );
        let mmm = ledger.events("MMM").unwrap();
        assert_eq!(mmm[1].kind, LedgerEventKind::CostAdjust { delta_gbp: dec!(-100) });
    }

    #[test]
    fn spin_off_without_allocation_uses_initial_price() {
        let mut prices = InitialPrices::new();
        prices.insert(date("2024-04-01"), "SOLV", dec!(4), "GBP");
        let transactions = vec![
            txn("2024-01-15", Action::Acquire, "MMM", dec!(100), dec!(10)),
            txn("2024-04-01", Action::SpinOff, "SOLV", dec!(25), Decimal::ZERO),
        ];
        let ledger = SecurityLedger::build(
            &transactions,
            &CurrencyConverter::new(),
            &prices,
            &EngineConfig::default(),
        );

        let solv = ledger.events("SOLV").unwrap();
        assert_eq!(
            solv[0].kind,
            LedgerEventKind::Acquire {
                quantity: dec!(25),
                cost_gbp: dec!(100),
            }
        );
        // Source basis untouched without a configured allocation
        assert_eq!(ledger.events("MMM").unwrap().len(), 1);
    }

    #[test]
    fn balance_check_flags_overdrawn_symbol() {
        let transactions = vec![
            txn("2024-01-15", Action::Acquire, "AAPL", dec!(5), dec!(100)),
            txn("2024-02-15", Action::Dispose, "AAPL", dec!(8), dec!(110)),
        ];
        let ledger = build(&transactions);
        assert!(ledger.events("AAPL").is_none());
        assert_eq!(
            ledger.errors[0].error,
            EngineError::InsufficientHolding {
                symbol: "AAPL".to_string(),
                date: date("2024-02-15"),
                requested: dec!(8),
                available: dec!(5),
            }
        );
    }

    #[test]
    fn balance_check_can_be_disabled() {
        let mut config = EngineConfig::default();
        config.balance_check = false;
        let transactions = vec![
            txn("2024-01-15", Action::Acquire, "AAPL", dec!(5), dec!(100)),
            txn("2024-02-15", Action::Dispose, "AAPL", dec!(8), dec!(110)),
        ];
        let ledger = SecurityLedger::build(
            &transactions,
            &CurrencyConverter::new(),
            &InitialPrices::new(),
            &config,
        );
        assert!(ledger.events("AAPL").is_some());
        assert!(ledger.errors.is_empty());
    }

    #[test]
    fn holding_at_tracks_running_quantity() {
        let transactions = vec![
            txn("2024-01-15", Action::Acquire, "VWRL", dec!(10), dec!(100)),
            txn("2024-06-15", Action::Dispose, "VWRL", dec!(4), dec!(110)),
        ];
        let ledger = build(&transactions);
        assert_eq!(ledger.holding_at("VWRL", date("2024-01-14")), Decimal::ZERO);
        assert_eq!(ledger.holding_at("VWRL", date("2024-01-15")), dec!(10));
        assert_eq!(ledger.holding_at("VWRL", date("2024-06-30")), dec!(6));
        assert_eq!(ledger.holding_at("OTHER", date("2024-06-30")), Decimal::ZERO);
    }

    #[test]
    fn cost_adjustments_inserted_at_end_of_day() {
        let transactions = vec![
            txn("2024-01-15", Action::Acquire, "VWRL", dec!(10), dec!(100)),
        ];
        let mut ledger = build(&transactions);
        ledger.apply_cost_adjustments(&[CostAdjustment {
            symbol: "VWRL".to_string(),
            date: date("2024-01-15"),
            delta_gbp: dec!(4.20),
        }]);
        let events = ledger.events("VWRL").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, LedgerEventKind::CostAdjust { delta_gbp: dec!(4.20) });
    }
}
