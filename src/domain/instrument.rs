//! Instrument conventions: pip size and contract size per symbol.

use serde::Serialize;

pub const STANDARD_LOT: f64 = 100_000.0;
const DEFAULT_PIP_SIZE: f64 = 0.0001;
const JPY_PIP_SIZE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instrument {
    pub symbol: String,
    pub pip_size: f64,
    pub contract_size: f64,
}

impl Instrument {
    /// Instrument with conventional forex defaults: JPY-quoted pairs use a
    /// 0.01 pip, everything else 0.0001; one lot is 100,000 units.
    pub fn forex(symbol: &str) -> Self {
        let normalized = symbol.trim().to_uppercase();
        let pip_size = if normalized.ends_with("JPY") {
            JPY_PIP_SIZE
        } else {
            DEFAULT_PIP_SIZE
        };
        Instrument {
            symbol: normalized,
            pip_size,
            contract_size: STANDARD_LOT,
        }
    }

    /// Value of one pip for one lot, in the quote currency.
    pub fn pip_value_per_lot(&self) -> f64 {
        self.pip_size * self.contract_size
    }

    pub fn pips_to_price(&self, pips: f64) -> f64 {
        pips * self.pip_size
    }

    pub fn price_to_pips(&self, distance: f64) -> f64 {
        distance / self.pip_size
    }
}
