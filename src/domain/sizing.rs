//! Position sizing.
//!
//! - `Fixed`: constant lot size
//! - `Percentage`: `equity × pct / 100 / (contract_size × price)`
//! - `Risk`: `(equity × pct / 100) / (stop_distance_pips × pip_value_per_lot)`
//!
//! Every size is floored to the lot step and capped at the maximum lot size.

use serde::Serialize;

use crate::domain::error::ComputationError;
use crate::domain::instrument::Instrument;

pub const DEFAULT_LOT_STEP: f64 = 0.01;
pub const DEFAULT_MAX_LOTS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PositionSizing {
    Fixed { lots: f64 },
    Percentage { pct: f64 },
    Risk { pct: f64 },
}

impl Default for PositionSizing {
    fn default() -> Self {
        PositionSizing::Fixed { lots: 0.1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LotLimits {
    pub lot_step: f64,
    pub max_lots: f64,
}

impl Default for LotLimits {
    fn default() -> Self {
        LotLimits {
            lot_step: DEFAULT_LOT_STEP,
            max_lots: DEFAULT_MAX_LOTS,
        }
    }
}

impl LotLimits {
    /// Floor `lots` to a whole number of steps, capped at the largest whole
    /// number of steps not above `max_lots`.
    pub fn clamp(&self, lots: f64) -> f64 {
        let steps = self.whole_steps(lots).min(self.whole_steps(self.max_lots));
        round_lots(steps * self.lot_step)
    }

    fn whole_steps(&self, lots: f64) -> f64 {
        // tolerance so that 0.3 / 0.01 does not floor to 29
        (lots / self.lot_step + 1e-9).floor()
    }
}

fn round_lots(lots: f64) -> f64 {
    (lots * 1e8).round() / 1e8
}

/// Compute an order size in lots.
///
/// `stop_distance_pips` is the distance between the reference price and the
/// initial stop, `None` when no stop is configured.
pub fn size_position(
    sizing: &PositionSizing,
    equity: f64,
    reference_price: f64,
    stop_distance_pips: Option<f64>,
    instrument: &Instrument,
    limits: &LotLimits,
) -> Result<f64, ComputationError> {
    if equity <= 0.0 {
        return Err(ComputationError::NonPositiveEquity { equity });
    }

    let raw = match *sizing {
        PositionSizing::Fixed { lots } => lots,
        PositionSizing::Percentage { pct } => {
            equity * pct / 100.0 / (instrument.contract_size * reference_price)
        }
        PositionSizing::Risk { pct } => {
            let stop_pips = stop_distance_pips.unwrap_or(0.0);
            if stop_pips <= 0.0 {
                return Err(ComputationError::ZeroStopDistance);
            }
            (equity * pct / 100.0) / (stop_pips * instrument.pip_value_per_lot())
        }
    };

    let lots = limits.clamp(raw);
    if lots < limits.lot_step || !lots.is_finite() {
        return Err(ComputationError::SizeBelowLotStep {
            size: raw,
            lot_step: limits.lot_step,
        });
    }
    Ok(lots)
}
