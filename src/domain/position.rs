//! Positions and closed trades.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    /// Sized at the signal bar, waiting for the next bar's open.
    Pending,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    Signal,
    BacktestEnd,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Signal => "signal",
            ExitReason::BacktestEnd => "backtest_end",
        };
        f.write_str(s)
    }
}

/// A simulated position. While `Pending`, `entry_price` holds the signal-bar
/// reference price and the stop/target levels are relative to it; filling
/// re-anchors them on the actual fill price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub entry_index: usize,
    /// Lots.
    pub size: f64,
    pub stop_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    /// Trailing distance as a price difference.
    pub trailing_distance: Option<f64>,
    /// Set once the trailing ratchet has moved the stop.
    pub trailing_engaged: bool,
    pub status: PositionStatus,
    /// Commission charged so far.
    pub commission: f64,
    /// Monetary slippage on the entry leg.
    pub slippage: f64,
    pub mae: f64,
    pub mfe: f64,
    /// Money lost if the initial stop is hit, when a stop exists.
    pub initial_risk: Option<f64>,
}

impl Position {
    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Mark-to-market PnL at `price`, before costs.
    pub fn unrealized_pnl(&self, price: f64, contract_size: f64) -> f64 {
        (price - self.entry_price) * self.direction.sign() * self.size * contract_size
    }

    /// Track the worst and best excursion over a price range seen while open.
    pub fn record_excursion(&mut self, low: f64, high: f64, contract_size: f64) {
        let (worst, best) = match self.direction {
            Direction::Long => (low, high),
            Direction::Short => (high, low),
        };
        let adverse = (-self.unrealized_pnl(worst, contract_size)).max(0.0);
        let favorable = self.unrealized_pnl(best, contract_size).max(0.0);
        self.mae = self.mae.max(adverse);
        self.mfe = self.mfe.max(favorable);
    }
}

/// An immutable record of a closed position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub trade_number: usize,
    pub position_id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub size: f64,
    pub entry_price: f64,
    pub entry_time: NaiveDateTime,
    pub entry_index: usize,
    pub exit_price: f64,
    pub exit_time: NaiveDateTime,
    pub exit_index: usize,
    pub exit_reason: ExitReason,
    pub stop_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    pub gross_pnl: f64,
    /// Net of commission.
    pub pnl: f64,
    pub commission: f64,
    /// Monetary slippage over both legs; already reflected in the fill prices.
    pub slippage: f64,
    pub mae: f64,
    pub mfe: f64,
    pub duration_bars: usize,
    pub balance_before: f64,
    pub balance_after: f64,
    pub r_multiple: Option<f64>,
}

impl Trade {
    /// Return on the account balance the trade settled against.
    pub fn return_pct(&self) -> f64 {
        if self.balance_before > 0.0 {
            self.pnl / self.balance_before
        } else {
            0.0
        }
    }
}
