//! Fill simulation: spread, slippage, commission, protective levels and
//! intrabar stop/target resolution.
//!
//! Fill conventions:
//! - Every fill is shifted by half the spread plus slippage against the trader:
//!   buys fill higher, sells fill lower.
//! - When a bar touches both the stop and the target, the stop wins.
//! - A stop the bar opened through fills at the open; likewise a target gapped
//!   through fills at the (better) open.

use serde::{Deserialize, Serialize};

use crate::domain::bar::Bar;
use crate::domain::error::ComputationError;
use crate::domain::instrument::Instrument;
use crate::domain::position::{Direction, ExitReason, Position, PositionStatus, Trade};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionMode {
    /// `commission_per_lot` is charged on entry and again on exit.
    #[default]
    PerSide,
    /// `commission_per_lot` covers both legs.
    RoundTrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StopLoss {
    #[default]
    None,
    FixedPips { pips: f64 },
    AtrMultiple { period: usize, multiplier: f64 },
    Percentage { pct: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TakeProfit {
    #[default]
    None,
    FixedPips { pips: f64 },
    AtrMultiple { period: usize, multiplier: f64 },
    Percentage { pct: f64 },
    RiskReward { ratio: f64 },
}

/// Trading costs applied to every fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel<'a> {
    pub instrument: &'a Instrument,
    /// Overrides the per-bar spread when set.
    pub spread_pips: Option<f64>,
    pub slippage_pips: f64,
    pub commission_per_lot: f64,
    pub commission_mode: CommissionMode,
}

impl CostModel<'_> {
    fn half_spread(&self, bar: &Bar) -> f64 {
        let pips = self.spread_pips.or(bar.spread).unwrap_or(0.0);
        self.instrument.pips_to_price(pips) / 2.0
    }

    fn adverse_shift(&self, bar: &Bar) -> f64 {
        self.half_spread(bar) + self.instrument.pips_to_price(self.slippage_pips)
    }

    /// Fill price for opening a position in `direction` at `raw` mid price.
    pub fn entry_fill(&self, direction: Direction, raw: f64, bar: &Bar) -> f64 {
        raw + direction.sign() * self.adverse_shift(bar)
    }

    /// Fill price for closing a position in `direction` at `raw` mid price.
    pub fn exit_fill(&self, direction: Direction, raw: f64, bar: &Bar) -> f64 {
        raw - direction.sign() * self.adverse_shift(bar)
    }

    /// Commission for one leg.
    pub fn commission_per_side(&self, lots: f64) -> f64 {
        match self.commission_mode {
            CommissionMode::PerSide => lots * self.commission_per_lot,
            CommissionMode::RoundTrip => lots * self.commission_per_lot / 2.0,
        }
    }

    /// Monetary value of the configured slippage for one leg.
    pub fn slippage_cost(&self, lots: f64) -> f64 {
        self.slippage_pips * self.instrument.pip_value_per_lot() * lots
    }
}

/// Absolute stop price for a position entered at `entry` in `direction`.
/// `atr` is the ATR value at the signal bar when the stop is ATR based.
pub fn stop_price(
    stop: &StopLoss,
    direction: Direction,
    entry: f64,
    atr: Option<f64>,
    instrument: &Instrument,
) -> Result<Option<f64>, ComputationError> {
    let distance = match *stop {
        StopLoss::None => return Ok(None),
        StopLoss::FixedPips { pips } => instrument.pips_to_price(pips),
        StopLoss::AtrMultiple { period, multiplier } => {
            atr_value(atr, period)? * multiplier
        }
        StopLoss::Percentage { pct } => entry * pct / 100.0,
    };
    Ok(Some(entry - direction.sign() * distance))
}

/// Absolute take-profit price. `RiskReward` uses the stop distance and yields
/// no target when there is no stop distance.
pub fn take_profit_price(
    target: &TakeProfit,
    direction: Direction,
    entry: f64,
    stop: Option<f64>,
    atr: Option<f64>,
    instrument: &Instrument,
) -> Result<Option<f64>, ComputationError> {
    let distance = match *target {
        TakeProfit::None => return Ok(None),
        TakeProfit::FixedPips { pips } => instrument.pips_to_price(pips),
        TakeProfit::AtrMultiple { period, multiplier } => {
            atr_value(atr, period)? * multiplier
        }
        TakeProfit::Percentage { pct } => entry * pct / 100.0,
        TakeProfit::RiskReward { ratio } => {
            let stop_distance = stop.map_or(0.0, |s| (entry - s).abs());
            if stop_distance <= 0.0 {
                return Ok(None);
            }
            stop_distance * ratio
        }
    };
    Ok(Some(entry + direction.sign() * distance))
}

fn atr_value(atr: Option<f64>, period: usize) -> Result<f64, ComputationError> {
    atr.filter(|v| v.is_finite())
        .ok_or(ComputationError::IndicatorUnavailable {
            indicator: format!("ATR({period})"),
        })
}

/// Fill a pending position at the bar's open. Levels computed against the
/// reference price move with the fill so their distances are preserved.
pub fn fill_entry(position: &mut Position, bar: &Bar, costs: &CostModel<'_>) {
    let fill = costs.entry_fill(position.direction, bar.open, bar);
    let shift = fill - position.entry_price;
    position.stop_price = position.stop_price.map(|s| s + shift);
    position.take_profit_price = position.take_profit_price.map(|t| t + shift);
    if let (None, Some(distance)) = (position.stop_price, position.trailing_distance) {
        position.stop_price = Some(fill - position.direction.sign() * distance);
    }
    position.entry_price = fill;
    position.entry_time = bar.timestamp;
    position.status = PositionStatus::Open;
    position.commission = costs.commission_per_side(position.size);
    position.slippage = costs.slippage_cost(position.size);
    position.initial_risk = position.stop_price.map(|s| {
        (fill - s).abs() * position.size * costs.instrument.contract_size
    });
}

/// The raw (pre-cost) exit level and reason when this bar closes the position
/// through its stop or target.
pub fn intrabar_exit(position: &Position, bar: &Bar) -> Option<(f64, ExitReason)> {
    let long = position.is_long();

    if let Some(stop) = position.stop_price {
        let hit = if long { bar.low <= stop } else { bar.high >= stop };
        if hit {
            let gapped = if long { bar.open <= stop } else { bar.open >= stop };
            let level = if gapped { bar.open } else { stop };
            let reason = if position.trailing_engaged {
                ExitReason::TrailingStop
            } else {
                ExitReason::StopLoss
            };
            return Some((level, reason));
        }
    }

    if let Some(target) = position.take_profit_price {
        let hit = if long { bar.high >= target } else { bar.low <= target };
        if hit {
            let gapped = if long { bar.open >= target } else { bar.open <= target };
            let level = if gapped { bar.open } else { target };
            return Some((level, ExitReason::TakeProfit));
        }
    }

    None
}

/// One-directional trailing update after a bar that left the position open.
pub fn ratchet_trailing_stop(position: &mut Position, bar: &Bar) {
    let Some(distance) = position.trailing_distance else {
        return;
    };
    let candidate = match position.direction {
        Direction::Long => bar.high - distance,
        Direction::Short => bar.low + distance,
    };
    let next = match (position.direction, position.stop_price) {
        (_, None) => candidate,
        (Direction::Long, Some(current)) => current.max(candidate),
        (Direction::Short, Some(current)) => current.min(candidate),
    };
    if position.stop_price != Some(next) {
        position.stop_price = Some(next);
        position.trailing_engaged = true;
    }
}

/// Price range the position actually experienced on its exit bar: the path
/// runs from the open to the exit level, clipped to the bar.
pub fn exit_bar_range(bar: &Bar, exit_level: f64) -> (f64, f64) {
    let low = bar.low.max(exit_level.min(bar.open));
    let high = bar.high.min(exit_level.max(bar.open));
    (low, high)
}

/// Everything needed to turn a position into a trade.
#[derive(Debug, Clone, Copy)]
pub struct ExitFill<'b> {
    pub bar: &'b Bar,
    pub index: usize,
    /// Pre-cost exit level.
    pub raw_price: f64,
    pub reason: ExitReason,
    /// Account balance before this trade settles.
    pub balance: f64,
}

/// Close a position and produce its trade. The caller owns the balance and
/// trade numbering; `exit.balance` is the balance at settlement.
pub fn close_position(
    mut position: Position,
    exit: ExitFill<'_>,
    costs: &CostModel<'_>,
    trade_number: usize,
) -> Trade {
    let contract = costs.instrument.contract_size;
    let exit_price = costs.exit_fill(position.direction, exit.raw_price, exit.bar);
    let gross_pnl =
        (exit_price - position.entry_price) * position.direction.sign() * position.size * contract;
    let commission = position.commission + costs.commission_per_side(position.size);
    let slippage = position.slippage + costs.slippage_cost(position.size);
    let pnl = gross_pnl - commission;
    let r_multiple = position
        .initial_risk
        .filter(|risk| *risk > 0.0)
        .map(|risk| pnl / risk);

    position.status = PositionStatus::Closed;

    Trade {
        trade_number,
        position_id: position.id,
        symbol: position.symbol,
        direction: position.direction,
        size: position.size,
        entry_price: position.entry_price,
        entry_time: position.entry_time,
        entry_index: position.entry_index,
        exit_price,
        exit_time: exit.bar.timestamp,
        exit_index: exit.index,
        exit_reason: exit.reason,
        stop_price: position.stop_price,
        take_profit_price: position.take_profit_price,
        gross_pnl,
        pnl,
        commission,
        slippage,
        mae: position.mae,
        mfe: position.mfe,
        duration_bars: exit.index.saturating_sub(position.entry_index),
        balance_before: exit.balance,
        balance_after: exit.balance + pnl,
        r_multiple,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: NaiveDate::from_ymd_opt(2024, 2, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            volume: 100.0,
            spread: Some(2.0),
        }
    }

    fn costs(instrument: &Instrument) -> CostModel<'_> {
        CostModel {
            instrument,
            spread_pips: Some(1.0),
            slippage_pips: 0.5,
            commission_per_lot: 7.0,
            commission_mode: CommissionMode::PerSide,
        }
    }

    fn open_position(direction: Direction, entry: f64) -> Position {
        Position {
            id: 1,
            symbol: "EURUSD".into(),
            direction,
            entry_price: entry,
            entry_time: bar(entry, entry, entry, entry).timestamp,
            entry_index: 0,
            size: 1.0,
            stop_price: None,
            take_profit_price: None,
            trailing_distance: None,
            trailing_engaged: false,
            status: PositionStatus::Open,
            commission: 0.0,
            slippage: 0.0,
            mae: 0.0,
            mfe: 0.0,
            initial_risk: None,
        }
    }

    #[test]
    fn fills_are_adverse_to_the_trader() {
        let inst = Instrument::forex("EURUSD");
        let c = costs(&inst);
        let b = bar(1.1000, 1.1010, 1.0990, 1.1005);
        // half spread 0.5 pip + 0.5 pip slippage = 1 pip
        assert!((c.entry_fill(Direction::Long, 1.1000, &b) - 1.1001).abs() < 1e-12);
        assert!((c.entry_fill(Direction::Short, 1.1000, &b) - 1.0999).abs() < 1e-12);
        assert!((c.exit_fill(Direction::Long, 1.1000, &b) - 1.0999).abs() < 1e-12);
        assert!((c.exit_fill(Direction::Short, 1.1000, &b) - 1.1001).abs() < 1e-12);
    }

    #[test]
    fn bar_spread_used_when_config_unset() {
        let inst = Instrument::forex("EURUSD");
        let c = CostModel {
            spread_pips: None,
            slippage_pips: 0.0,
            ..costs(&inst)
        };
        let b = bar(1.1000, 1.1010, 1.0990, 1.1005);
        assert!((c.entry_fill(Direction::Long, 1.1000, &b) - 1.1001).abs() < 1e-12);
    }

    #[test]
    fn commission_modes() {
        let inst = Instrument::forex("EURUSD");
        let per_side = costs(&inst);
        let round_trip = CostModel {
            commission_mode: CommissionMode::RoundTrip,
            ..costs(&inst)
        };
        assert!((per_side.commission_per_side(0.1) * 2.0 - 1.4).abs() < 1e-12);
        assert!((round_trip.commission_per_side(0.1) * 2.0 - 0.7).abs() < 1e-12);
    }

    #[test]
    fn stop_and_target_levels() {
        let inst = Instrument::forex("EURUSD");
        let stop = stop_price(
            &StopLoss::FixedPips { pips: 50.0 },
            Direction::Long,
            1.1000,
            None,
            &inst,
        )
        .unwrap();
        assert!((stop.unwrap() - 1.0950).abs() < 1e-12);

        let target = take_profit_price(
            &TakeProfit::RiskReward { ratio: 2.0 },
            Direction::Long,
            1.1000,
            stop,
            None,
            &inst,
        )
        .unwrap();
        assert!((target.unwrap() - 1.1100).abs() < 1e-12);

        let short_stop = stop_price(
            &StopLoss::Percentage { pct: 1.0 },
            Direction::Short,
            1.2000,
            None,
            &inst,
        )
        .unwrap();
        assert!((short_stop.unwrap() - 1.2120).abs() < 1e-12);
    }

    #[test]
    fn risk_reward_without_stop_has_no_target() {
        let inst = Instrument::forex("EURUSD");
        let target = take_profit_price(
            &TakeProfit::RiskReward { ratio: 2.0 },
            Direction::Long,
            1.1,
            None,
            None,
            &inst,
        )
        .unwrap();
        assert!(target.is_none());
    }

    #[test]
    fn atr_stop_needs_atr_value() {
        let inst = Instrument::forex("EURUSD");
        let stop = StopLoss::AtrMultiple {
            period: 14,
            multiplier: 2.0,
        };
        let err = stop_price(&stop, Direction::Long, 1.1, None, &inst).unwrap_err();
        assert!(matches!(err, ComputationError::IndicatorUnavailable { .. }));
        let ok = stop_price(&stop, Direction::Long, 1.1, Some(0.0010), &inst).unwrap();
        assert!((ok.unwrap() - 1.0980).abs() < 1e-12);
    }

    #[test]
    fn straddling_bar_resolves_to_stop() {
        let mut pos = open_position(Direction::Long, 1.1000);
        pos.stop_price = Some(1.0950);
        pos.take_profit_price = Some(1.1100);
        let b = bar(1.1000, 1.1120, 1.0940, 1.1050);
        let (level, reason) = intrabar_exit(&pos, &b).unwrap();
        assert_eq!(reason, ExitReason::StopLoss);
        assert!((level - 1.0950).abs() < 1e-12);
    }

    #[test]
    fn short_straddle_also_resolves_to_stop() {
        let mut pos = open_position(Direction::Short, 1.1000);
        pos.stop_price = Some(1.1050);
        pos.take_profit_price = Some(1.0900);
        let b = bar(1.1000, 1.1060, 1.0890, 1.0950);
        assert_eq!(intrabar_exit(&pos, &b).unwrap().1, ExitReason::StopLoss);
    }

    #[test]
    fn gap_through_stop_fills_at_open() {
        let mut pos = open_position(Direction::Long, 1.1000);
        pos.stop_price = Some(1.0950);
        let b = bar(1.0930, 1.0960, 1.0920, 1.0940);
        let (level, _) = intrabar_exit(&pos, &b).unwrap();
        assert!((level - 1.0930).abs() < 1e-12);
    }

    #[test]
    fn gap_through_target_fills_at_better_open() {
        let mut pos = open_position(Direction::Long, 1.1000);
        pos.take_profit_price = Some(1.1050);
        let b = bar(1.1070, 1.1080, 1.1060, 1.1075);
        let (level, reason) = intrabar_exit(&pos, &b).unwrap();
        assert_eq!(reason, ExitReason::TakeProfit);
        assert!((level - 1.1070).abs() < 1e-12);
    }

    #[test]
    fn no_exit_inside_range() {
        let mut pos = open_position(Direction::Long, 1.1000);
        pos.stop_price = Some(1.0950);
        pos.take_profit_price = Some(1.1100);
        assert!(intrabar_exit(&pos, &bar(1.1000, 1.1050, 1.0960, 1.1010)).is_none());
    }

    #[test]
    fn trailing_ratchet_never_relaxes() {
        let mut pos = open_position(Direction::Long, 1.1000);
        pos.trailing_distance = Some(0.0020);
        pos.stop_price = Some(1.0980);

        ratchet_trailing_stop(&mut pos, &bar(1.1000, 1.1030, 1.0995, 1.1020));
        assert!((pos.stop_price.unwrap() - 1.1010).abs() < 1e-12);
        assert!(pos.trailing_engaged);

        ratchet_trailing_stop(&mut pos, &bar(1.1010, 1.1015, 1.1012, 1.1013));
        assert!((pos.stop_price.unwrap() - 1.1010).abs() < 1e-12);

        let (_, reason) = intrabar_exit(&pos, &bar(1.1012, 1.1013, 1.1000, 1.1005)).unwrap();
        assert_eq!(reason, ExitReason::TrailingStop);
    }

    #[test]
    fn trailing_ratchet_short_moves_down() {
        let mut pos = open_position(Direction::Short, 1.1000);
        pos.trailing_distance = Some(0.0020);
        pos.stop_price = Some(1.1020);
        ratchet_trailing_stop(&mut pos, &bar(1.0990, 1.0995, 1.0970, 1.0975));
        assert!((pos.stop_price.unwrap() - 1.0990).abs() < 1e-12);
        ratchet_trailing_stop(&mut pos, &bar(1.0990, 1.1000, 1.0985, 1.0995));
        assert!((pos.stop_price.unwrap() - 1.0990).abs() < 1e-12);
    }

    #[test]
    fn fill_entry_reanchors_levels() {
        let inst = Instrument::forex("EURUSD");
        let c = costs(&inst);
        let mut pos = open_position(Direction::Long, 1.1000);
        pos.status = PositionStatus::Pending;
        pos.stop_price = Some(1.0950);
        pos.take_profit_price = Some(1.1100);
        fill_entry(&mut pos, &bar(1.1010, 1.1020, 1.1000, 1.1015), &c);
        assert_eq!(pos.status, PositionStatus::Open);
        assert!((pos.entry_price - 1.1011).abs() < 1e-12);
        assert!((pos.stop_price.unwrap() - 1.0961).abs() < 1e-12);
        assert!((pos.take_profit_price.unwrap() - 1.1111).abs() < 1e-12);
        assert!((pos.commission - 7.0).abs() < 1e-12);
        // 50 pips × 1 lot × $10
        assert!((pos.initial_risk.unwrap() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn fill_entry_seeds_trailing_stop() {
        let inst = Instrument::forex("EURUSD");
        let c = costs(&inst);
        let mut pos = open_position(Direction::Short, 1.1000);
        pos.status = PositionStatus::Pending;
        pos.trailing_distance = Some(0.0030);
        fill_entry(&mut pos, &bar(1.1000, 1.1010, 1.0990, 1.1005), &c);
        assert!((pos.stop_price.unwrap() - (1.0999 + 0.0030)).abs() < 1e-12);
        assert!(!pos.trailing_engaged);
    }

    #[test]
    fn close_position_nets_commission_only() {
        let inst = Instrument::forex("EURUSD");
        let c = costs(&inst);
        let mut pos = open_position(Direction::Long, 1.1001);
        pos.commission = 7.0;
        pos.slippage = 5.0;
        pos.initial_risk = Some(500.0);
        let b = bar(1.1050, 1.1060, 1.1040, 1.1051);
        let trade = close_position(
            pos,
            ExitFill {
                bar: &b,
                index: 4,
                raw_price: 1.1051,
                reason: ExitReason::Signal,
                balance: 10_000.0,
            },
            &c,
            1,
        );
        // exit fill 1.1050; 49 pips × $10
        assert!((trade.exit_price - 1.1050).abs() < 1e-12);
        assert!((trade.gross_pnl - 490.0).abs() < 1e-6);
        assert!((trade.commission - 14.0).abs() < 1e-12);
        assert!((trade.pnl - 476.0).abs() < 1e-6);
        assert!((trade.slippage - 10.0).abs() < 1e-9);
        assert!((trade.balance_after - 10_476.0).abs() < 1e-6);
        assert!((trade.r_multiple.unwrap() - 476.0 / 500.0).abs() < 1e-9);
        assert_eq!(trade.duration_bars, 4);
    }

    #[test]
    fn exit_bar_range_follows_open_to_exit() {
        let b = bar(1.1000, 1.1030, 1.0940, 1.0990);
        let (low, high) = exit_bar_range(&b, 1.0950);
        assert!((low - 1.0950).abs() < 1e-12);
        assert!((high - 1.1000).abs() < 1e-12);
    }
}
