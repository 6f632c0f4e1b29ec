use crate::error::EngineError;
use crate::ledger::QUANTITY_EPSILON;
use rust_decimal::Decimal;
use serde::Serialize;

/// Section 104 holding: the pooled quantity and cost for one symbol.
///
/// Average unit cost is always recomputed from the two running totals,
/// never stored. Amounts stay unrounded here; rounding happens at the
/// report boundary.
#[derive(Debug, Clone, Serialize)]
pub struct Section104Pool {
    pub symbol: String,
    pub total_quantity: Decimal,
    pub total_cost_gbp: Decimal,
}

/// Snapshot of pool state at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub quantity: Decimal,
    pub cost_gbp: Decimal,
}

impl From<&Section104Pool> for PoolSnapshot {
    fn from(pool: &Section104Pool) -> Self {
        PoolSnapshot {
            quantity: pool.total_quantity,
            cost_gbp: pool.total_cost_gbp,
        }
    }
}

impl Section104Pool {
    pub fn new(symbol: impl Into<String>) -> Self {
        Section104Pool {
            symbol: symbol.into(),
            total_quantity: Decimal::ZERO,
            total_cost_gbp: Decimal::ZERO,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_quantity.is_zero() && self.total_cost_gbp.is_zero()
    }

    /// Add to the pool (acquisition)
    pub fn acquire(&mut self, quantity: Decimal, cost_gbp: Decimal) {
        self.total_quantity += quantity;
        self.total_cost_gbp += cost_gbp;
        log::debug!(
            "pool {} ADD: qty={}, cost={}. New total: qty={}, cost={}",
            self.symbol,
            quantity,
            cost_gbp,
            self.total_quantity,
            self.total_cost_gbp
        );
    }

    /// Remove from the pool (disposal), returning the allowable cost drawn.
    ///
    /// Drawing more than the pooled quantity (beyond a small epsilon for
    /// decimal rounding) is a `PoolUnderflow`: the history is missing
    /// acquisitions and silently clamping would misstate the gain.
    pub fn dispose(&mut self, quantity: Decimal) -> Result<Decimal, EngineError> {
        if quantity > self.total_quantity + QUANTITY_EPSILON {
            return Err(EngineError::PoolUnderflow {
                symbol: self.symbol.clone(),
                requested: quantity,
                available: self.total_quantity,
            });
        }
        let cost = if (self.total_quantity - quantity).abs() <= QUANTITY_EPSILON {
            let cost = self.total_cost_gbp;
            self.total_quantity = Decimal::ZERO;
            self.total_cost_gbp = Decimal::ZERO;
            cost
        } else {
            let cost = self.total_cost_gbp * quantity / self.total_quantity;
            self.total_quantity -= quantity;
            self.total_cost_gbp -= cost;
            cost
        };
        log::debug!(
            "pool {} REMOVE: qty={}, cost={}. Remaining: qty={}, cost={}",
            self.symbol,
            quantity,
            cost,
            self.total_quantity,
            self.total_cost_gbp
        );
        Ok(cost)
    }

    /// Non-disposal change to the pooled cost: ERI deemed income adds,
    /// returns of capital and spin-off carve-outs subtract. The pool cost
    /// never goes below zero.
    pub fn adjust_cost(&mut self, delta_gbp: Decimal) {
        let adjusted = self.total_cost_gbp + delta_gbp;
        if adjusted < Decimal::ZERO {
            log::warn!(
                "pool {} cost adjustment {} exceeds pooled cost {}, flooring at zero",
                self.symbol,
                delta_gbp,
                self.total_cost_gbp
            );
        }
        self.total_cost_gbp = adjusted.max(Decimal::ZERO);
        log::debug!(
            "pool {} ADJUST: delta={}. New cost={}",
            self.symbol,
            delta_gbp,
            self.total_cost_gbp
        );
    }

    /// Current average unit cost, or None for an empty pool
    pub fn average_cost(&self) -> Option<Decimal> {
        if self.total_quantity.is_zero() {
            None
        } else {
            Some(self.total_cost_gbp / self.total_quantity)
        }
    }
}
