//! Account state for a single-symbol run: balance, open positions, closed
//! trades and the per-bar equity trace.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::position::{Direction, Position, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub time: NaiveDateTime,
    pub balance: f64,
    pub equity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub initial_capital: f64,
    /// Realised balance: initial capital plus net PnL of closed trades.
    pub balance: f64,
    pub positions: Vec<Position>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    next_position_id: u64,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            initial_capital,
            balance: initial_capital,
            positions: Vec::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
            next_position_id: 1,
        }
    }

    pub fn next_position_id(&mut self) -> u64 {
        let id = self.next_position_id;
        self.next_position_id += 1;
        id
    }

    pub fn open_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_open()).count()
    }

    /// Direction of the open exposure. All open positions share it.
    pub fn exposure(&self) -> Option<Direction> {
        self.positions
            .iter()
            .find(|p| p.is_open())
            .map(|p| p.direction)
    }

    /// Oldest open position, the one handed to exit predicates.
    pub fn primary_position(&self) -> Option<&Position> {
        self.positions.iter().find(|p| p.is_open())
    }

    pub fn unrealized_pnl(&self, price: f64, contract_size: f64) -> f64 {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.unrealized_pnl(price, contract_size))
            .sum()
    }

    pub fn equity(&self, price: f64, contract_size: f64) -> f64 {
        self.balance + self.unrealized_pnl(price, contract_size)
    }

    /// Remove and return every open position, oldest first.
    pub fn take_open_positions(&mut self) -> Vec<Position> {
        let (open, rest): (Vec<Position>, Vec<Position>) =
            self.positions.drain(..).partition(|p| p.is_open());
        self.positions = rest;
        open
    }

    /// Number to give the next recorded trade.
    pub fn next_trade_number(&self) -> usize {
        self.trades.len() + 1
    }

    /// Settle a closed trade into the balance.
    pub fn record_trade(&mut self, trade: Trade) {
        self.balance += trade.pnl;
        self.trades.push(trade);
    }

    pub fn record_equity(&mut self, time: NaiveDateTime, price: f64, contract_size: f64) {
        let equity = self.equity(price, contract_size);
        self.equity_curve.push(EquityPoint {
            time,
            balance: self.balance,
            equity,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::{ExitReason, PositionStatus};
    use chrono::NaiveDate;

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn sample_position(id: u64, direction: Direction, status: PositionStatus) -> Position {
        Position {
            id,
            symbol: "EURUSD".to_string(),
            direction,
            entry_price: 1.1000,
            entry_time: ts(1),
            entry_index: 1,
            size: 1.0,
            stop_price: None,
            take_profit_price: None,
            trailing_distance: None,
            trailing_engaged: false,
            status,
            commission: 0.0,
            slippage: 0.0,
            mae: 0.0,
            mfe: 0.0,
            initial_risk: None,
        }
    }

    fn sample_trade(pnl: f64) -> Trade {
        Trade {
            trade_number: 1,
            position_id: 1,
            symbol: "EURUSD".into(),
            direction: Direction::Long,
            size: 1.0,
            entry_price: 1.1,
            entry_time: ts(1),
            entry_index: 1,
            exit_price: 1.1,
            exit_time: ts(2),
            exit_index: 2,
            exit_reason: ExitReason::Signal,
            stop_price: None,
            take_profit_price: None,
            gross_pnl: pnl,
            pnl,
            commission: 0.0,
            slippage: 0.0,
            mae: 0.0,
            mfe: 0.0,
            duration_bars: 1,
            balance_before: 10_000.0,
            balance_after: 10_000.0 + pnl,
            r_multiple: None,
        }
    }

    #[test]
    fn new_portfolio() {
        let portfolio = Portfolio::new(10_000.0);
        assert!((portfolio.balance - 10_000.0).abs() < f64::EPSILON);
        assert!(portfolio.positions.is_empty());
        assert!(portfolio.trades.is_empty());
        assert!(portfolio.exposure().is_none());
        assert_eq!(portfolio.next_trade_number(), 1);
    }

    #[test]
    fn ids_increase() {
        let mut portfolio = Portfolio::new(10_000.0);
        assert_eq!(portfolio.next_position_id(), 1);
        assert_eq!(portfolio.next_position_id(), 2);
    }

    #[test]
    fn pending_positions_do_not_count_as_exposure() {
        let mut portfolio = Portfolio::new(10_000.0);
        portfolio
            .positions
            .push(sample_position(1, Direction::Long, PositionStatus::Pending));
        assert_eq!(portfolio.open_count(), 0);
        assert!(portfolio.exposure().is_none());
        assert!((portfolio.equity(1.2, 100_000.0) - 10_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn equity_marks_open_positions() {
        let mut portfolio = Portfolio::new(10_000.0);
        portfolio
            .positions
            .push(sample_position(1, Direction::Short, PositionStatus::Open));
        assert_eq!(portfolio.exposure(), Some(Direction::Short));
        // short 1 lot, price down 10 pips → +$100
        assert!((portfolio.equity(1.0990, 100_000.0) - 10_100.0).abs() < 1e-6);
        portfolio.record_equity(ts(3), 1.0990, 100_000.0);
        let point = portfolio.equity_curve[0];
        assert!((point.balance - 10_000.0).abs() < f64::EPSILON);
        assert!((point.equity - 10_100.0).abs() < 1e-6);
    }

    #[test]
    fn take_open_positions_leaves_pending() {
        let mut portfolio = Portfolio::new(10_000.0);
        portfolio
            .positions
            .push(sample_position(1, Direction::Long, PositionStatus::Open));
        portfolio
            .positions
            .push(sample_position(2, Direction::Long, PositionStatus::Pending));
        let open = portfolio.take_open_positions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, 1);
        assert_eq!(portfolio.positions.len(), 1);
        assert_eq!(portfolio.positions[0].id, 2);
    }

    #[test]
    fn record_trade_updates_balance() {
        let mut portfolio = Portfolio::new(10_000.0);
        portfolio.record_trade(sample_trade(-250.0));
        assert!((portfolio.balance - 9_750.0).abs() < f64::EPSILON);
        assert_eq!(portfolio.next_trade_number(), 2);
    }
}
