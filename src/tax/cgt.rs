//! Share identification and gain calculation.
//!
//! Implements the HMRC matching order for each disposal:
//! 1. Same-day rule: match with acquisitions on the same day
//! 2. Bed & breakfast rule: match with acquisitions within 30 days after
//!    the disposal
//! 3. Section 104 pool: match against the pooled average cost
//!
//! Because rule 2 looks forward in time, matching runs as two passes over
//! the symbol's indexed event stream: pass one resolves same-day and B&B
//! matches with full visibility of later acquisitions, pass two replays the
//! stream chronologically feeding whatever neither rule consumed into the
//! Section 104 pool.

use crate::error::EngineError;
use crate::ledger::{LedgerEvent, LedgerEventKind, QUANTITY_EPSILON};
use crate::tax::pool::{PoolSnapshot, Section104Pool};
use crate::tax::uk::TaxYear;
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

/// Length of the bed & breakfast window in calendar days
pub const BED_AND_BREAKFAST_DAYS: i64 = 30;

/// Which HMRC rule produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchRule {
    SameDay,
    BedAndBreakfast,
    Section104,
}

impl MatchRule {
    pub fn display(&self) -> &'static str {
        match self {
            MatchRule::SameDay => "Same-Day",
            MatchRule::BedAndBreakfast => "B&B",
            MatchRule::Section104 => "Section 104",
        }
    }
}

impl std::fmt::Display for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// One disposed quantity linked to the acquisition (or pool draw) that
/// supplies its cost. Immutable once emitted; the match events of a disposal
/// sum to exactly the disposed quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchEvent {
    pub symbol: String,
    pub disposal_date: NaiveDate,
    pub rule: MatchRule,
    pub quantity: Decimal,
    pub cost_gbp: Decimal,
    pub proceeds_gbp: Decimal,
    pub gain_gbp: Decimal,
    /// Date of the matched acquisition; None for pool draws
    pub acquired: Option<NaiveDate>,
}

/// Record of a disposal with its full match breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisposalRecord {
    pub date: NaiveDate,
    pub tax_year: TaxYear,
    pub symbol: String,
    pub quantity: Decimal,
    pub proceeds_gbp: Decimal,
    pub allowable_cost_gbp: Decimal,
    pub gain_gbp: Decimal,
    pub matches: Vec<MatchEvent>,
    /// Pool state after this disposal
    pub pool_after: PoolSnapshot,
}

/// Outcome of matching one symbol's event stream
#[derive(Debug)]
pub struct SymbolResult {
    pub disposals: Vec<DisposalRecord>,
    pub pool: Section104Pool,
}

/// Match one symbol's chronologically ordered event stream.
///
/// Fails with `InsufficientHolding` when a disposal cannot be fully covered
/// by the three rules; the failure is isolated to this symbol.
pub fn match_symbol(symbol: &str, events: &[LedgerEvent]) -> Result<SymbolResult, EngineError> {
    let mut acq_remaining: Vec<Decimal> = events
        .iter()
        .map(|e| match &e.kind {
            LedgerEventKind::Acquire { quantity, .. } => *quantity,
            _ => Decimal::ZERO,
        })
        .collect();
    let mut disp_remaining: Vec<Decimal> = events
        .iter()
        .map(|e| match &e.kind {
            LedgerEventKind::Dispose { quantity, .. } => *quantity,
            _ => Decimal::ZERO,
        })
        .collect();
    let mut matched: Vec<Vec<MatchEvent>> = vec![Vec::new(); events.len()];

    // Pass one: same-day and B&B matches, disposals in chronological order.
    // An earlier disposal's B&B claim takes precedence over a later
    // disposal's use of the same acquisition.
    for i in 0..events.len() {
        let (quantity, proceeds_gbp) = match &events[i].kind {
            LedgerEventKind::Dispose {
                quantity,
                proceeds_gbp,
            } => (*quantity, *proceeds_gbp),
            _ => continue,
        };
        let date = events[i].date;
        let unit_proceeds = proceeds_gbp / quantity;

        // Same-day acquisitions, consumed in input order. Statute only says
        // "same day"; input order is this engine's documented tie-break.
        for j in 0..events.len() {
            if disp_remaining[i] <= QUANTITY_EPSILON {
                break;
            }
            if events[j].date == date {
                consume(
                    symbol,
                    MatchRule::SameDay,
                    date,
                    unit_proceeds,
                    &events[j],
                    &mut acq_remaining[j],
                    &mut disp_remaining[i],
                    &mut matched[i],
                );
            }
        }

        // Acquisitions strictly after the disposal, within 30 days,
        // earliest first
        let window_end = date + Duration::days(BED_AND_BREAKFAST_DAYS);
        for j in (i + 1)..events.len() {
            if disp_remaining[i] <= QUANTITY_EPSILON || events[j].date > window_end {
                break;
            }
            if events[j].date > date {
                consume(
                    symbol,
                    MatchRule::BedAndBreakfast,
                    date,
                    unit_proceeds,
                    &events[j],
                    &mut acq_remaining[j],
                    &mut disp_remaining[i],
                    &mut matched[i],
                );
            }
        }
    }

    // Pass two: chronological replay into the Section 104 pool
    let mut pool = Section104Pool::new(symbol);
    let mut disposals = Vec::new();
    for i in 0..events.len() {
        match &events[i].kind {
            LedgerEventKind::Acquire { quantity, cost_gbp } => {
                if acq_remaining[i] > QUANTITY_EPSILON {
                    let cost = cost_gbp * acq_remaining[i] / quantity;
                    pool.acquire(acq_remaining[i], cost);
                }
            }
            LedgerEventKind::CostAdjust { delta_gbp } => pool.adjust_cost(*delta_gbp),
            LedgerEventKind::Dispose {
                quantity,
                proceeds_gbp,
            } => {
                let date = events[i].date;
                let mut matches = std::mem::take(&mut matched[i]);
                if disp_remaining[i] > QUANTITY_EPSILON {
                    let drawn = disp_remaining[i];
                    let cost_gbp = pool.dispose(drawn).map_err(|e| match e {
                        EngineError::PoolUnderflow {
                            symbol,
                            requested,
                            available,
                        } => EngineError::InsufficientHolding {
                            symbol,
                            date,
                            requested,
                            available,
                        },
                        other => other,
                    })?;
                    let proceeds = proceeds_gbp / quantity * drawn;
                    matches.push(MatchEvent {
                        symbol: symbol.to_string(),
                        disposal_date: date,
                        rule: MatchRule::Section104,
                        quantity: drawn,
                        cost_gbp,
                        proceeds_gbp: proceeds,
                        gain_gbp: proceeds - cost_gbp,
                        acquired: None,
                    });
                }
                let allowable_cost_gbp: Decimal = matches.iter().map(|m| m.cost_gbp).sum();
                disposals.push(DisposalRecord {
                    date,
                    tax_year: TaxYear::from_date(date),
                    symbol: symbol.to_string(),
                    quantity: *quantity,
                    proceeds_gbp: *proceeds_gbp,
                    allowable_cost_gbp,
                    gain_gbp: *proceeds_gbp - allowable_cost_gbp,
                    matches,
                    pool_after: PoolSnapshot::from(&pool),
                });
            }
        }
    }

    Ok(SymbolResult { disposals, pool })
}

/// Consume as much of `acquisition` as the disposal still needs, emitting a
/// match event
#[allow(clippy::too_many_arguments)]
fn consume(
    symbol: &str,
    rule: MatchRule,
    disposal_date: NaiveDate,
    unit_proceeds: Decimal,
    acquisition: &LedgerEvent,
    acq_remaining: &mut Decimal,
    disp_remaining: &mut Decimal,
    out: &mut Vec<MatchEvent>,
) {
    if let LedgerEventKind::Acquire { quantity, cost_gbp } = &acquisition.kind {
        if *acq_remaining <= QUANTITY_EPSILON {
            return;
        }
        let quantity_matched = (*disp_remaining).min(*acq_remaining);
        let cost = cost_gbp * quantity_matched / quantity;
        let proceeds = unit_proceeds * quantity_matched;
        out.push(MatchEvent {
            symbol: symbol.to_string(),
            disposal_date,
            rule,
            quantity: quantity_matched,
            cost_gbp: cost,
            proceeds_gbp: proceeds,
            gain_gbp: proceeds - cost,
            acquired: Some(acquisition.date),
        });
        *acq_remaining -= quantity_matched;
        *disp_remaining -= quantity_matched;
        log::debug!(
            "{} match: {} {} on {} against {} acquisition",
            rule,
            quantity_matched,
            symbol,
            disposal_date,
            acquisition.date
        );
    }
}
