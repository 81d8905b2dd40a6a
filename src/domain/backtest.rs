//! Backtest engine and event loop.
//!
//! Per bar, in order:
//! 1. cancellation check
//! 2. signal exits deferred to this open (realistic fills), then pending entries fill at the open
//! 3. stop/target resolution for every open position, then the trailing ratchet
//! 4. signal evaluation at the close
//! 5. equity mark at the close
//!
//! Positions still open after the last bar are closed at its close.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::bar::{Bar, validate_bars};
use crate::domain::error::{ComputationError, FxsimError, RunIssue};
use crate::domain::execution::{
    CommissionMode, CostModel, ExitFill, StopLoss, TakeProfit, close_position, exit_bar_range,
    fill_entry, intrabar_exit, ratchet_trailing_stop, stop_price, take_profit_price,
};
use crate::domain::indicator::{IndicatorSeries, IndicatorType, compute_indicators};
use crate::domain::instrument::Instrument;
use crate::domain::metrics::MetricsSummary;
use crate::domain::portfolio::{EquityPoint, Portfolio};
use crate::domain::position::{Direction, ExitReason, Position, PositionStatus, Trade};
use crate::domain::signal::{Signal, SignalContext, evaluate_signal};
use crate::domain::sizing::{DEFAULT_LOT_STEP, DEFAULT_MAX_LOTS, LotLimits, PositionSizing, size_position};
use crate::domain::strategy::StrategySpec;

pub const DEFAULT_CUSTOM_TIME_BUDGET: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission_per_lot: f64,
    pub commission_mode: CommissionMode,
    /// Spread in pips. `None` uses each bar's own spread, or zero.
    pub spread_pips: Option<f64>,
    pub slippage_pips: f64,
    /// Signal exits fill at the next bar's open instead of the signal bar's close.
    pub use_realistic_fills: bool,
    pub max_positions: usize,
    pub position_sizing: PositionSizing,
    pub lot_step: f64,
    pub max_lots: f64,
    pub stop_loss: StopLoss,
    pub take_profit: TakeProfit,
    pub trailing_stop_pips: Option<f64>,
    pub allow_shorting: bool,
    /// Wall-clock limit for each custom strategy callback.
    pub custom_time_budget: Duration,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 10_000.0,
            commission_per_lot: 0.0,
            commission_mode: CommissionMode::PerSide,
            spread_pips: None,
            slippage_pips: 0.0,
            use_realistic_fills: false,
            max_positions: 1,
            position_sizing: PositionSizing::default(),
            lot_step: DEFAULT_LOT_STEP,
            max_lots: DEFAULT_MAX_LOTS,
            stop_loss: StopLoss::None,
            take_profit: TakeProfit::None,
            trailing_stop_pips: None,
            allow_shorting: false,
            custom_time_budget: DEFAULT_CUSTOM_TIME_BUDGET,
        }
    }
}

fn positive(name: &str, value: f64) -> Result<(), FxsimError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FxsimError::config(format!("{name} must be positive, got {value}")))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), FxsimError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FxsimError::config(format!("{name} must not be negative, got {value}")))
    }
}

fn percent(name: &str, value: f64) -> Result<(), FxsimError> {
    positive(name, value)?;
    if value > 100.0 {
        return Err(FxsimError::config(format!("{name} must be at most 100, got {value}")));
    }
    Ok(())
}

fn atr_period(name: &str, period: usize, multiplier: f64) -> Result<(), FxsimError> {
    if period == 0 {
        return Err(FxsimError::config(format!("{name} ATR period must be positive")));
    }
    positive(&format!("{name} ATR multiplier"), multiplier)
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), FxsimError> {
        positive("initial_capital", self.initial_capital)?;
        non_negative("commission_per_lot", self.commission_per_lot)?;
        if let Some(spread) = self.spread_pips {
            non_negative("spread_pips", spread)?;
        }
        non_negative("slippage_pips", self.slippage_pips)?;
        if self.max_positions == 0 {
            return Err(FxsimError::config("max_positions must be at least 1"));
        }
        positive("lot_step", self.lot_step)?;
        positive("max_lots", self.max_lots)?;
        if self.max_lots < self.lot_step {
            return Err(FxsimError::config(format!(
                "max_lots {} is below lot_step {}",
                self.max_lots, self.lot_step
            )));
        }

        match self.position_sizing {
            PositionSizing::Fixed { lots } => positive("fixed lot size", lots)?,
            PositionSizing::Percentage { pct } => percent("percentage sizing", pct)?,
            PositionSizing::Risk { pct } => percent("risk percentage", pct)?,
        }

        match self.stop_loss {
            StopLoss::None => {}
            StopLoss::FixedPips { pips } => positive("stop_loss pips", pips)?,
            StopLoss::AtrMultiple { period, multiplier } => atr_period("stop_loss", period, multiplier)?,
            StopLoss::Percentage { pct } => percent("stop_loss percentage", pct)?,
        }

        match self.take_profit {
            TakeProfit::None => {}
            TakeProfit::FixedPips { pips } => positive("take_profit pips", pips)?,
            TakeProfit::AtrMultiple { period, multiplier } => {
                atr_period("take_profit", period, multiplier)?
            }
            TakeProfit::Percentage { pct } => positive("take_profit percentage", pct)?,
            TakeProfit::RiskReward { ratio } => positive("risk_reward ratio", ratio)?,
        }

        if let Some(trailing) = self.trailing_stop_pips {
            positive("trailing_stop_pips", trailing)?;
        }
        if self.custom_time_budget.is_zero() {
            return Err(FxsimError::config("custom_time_budget must be positive"));
        }
        Ok(())
    }

    pub fn lot_limits(&self) -> LotLimits {
        LotLimits {
            lot_step: self.lot_step,
            max_lots: self.max_lots,
        }
    }

    pub fn cost_model<'a>(&self, instrument: &'a Instrument) -> CostModel<'a> {
        CostModel {
            instrument,
            spread_pips: self.spread_pips,
            slippage_pips: self.slippage_pips,
            commission_per_lot: self.commission_per_lot,
            commission_mode: self.commission_mode,
        }
    }

    /// ATR series read by the protective levels.
    pub fn required_indicators(&self) -> Vec<IndicatorType> {
        let mut types = Vec::new();
        if let StopLoss::AtrMultiple { period, .. } = self.stop_loss {
            types.push(IndicatorType::Atr(period));
        }
        if let TakeProfit::AtrMultiple { period, .. } = self.take_profit {
            let t = IndicatorType::Atr(period);
            if !types.contains(&t) {
                types.push(t);
            }
        }
        types
    }
}

/// Cooperative cancellation flag shared between a caller and running backtests.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub metrics: MetricsSummary,
    pub equity_curve: Vec<EquityPoint>,
    pub bars_processed: usize,
    pub execution_time_ms: u64,
    /// Entry signals rejected by sizing or level computation.
    pub skipped_signal_count: usize,
    /// Entry signals dropped because `max_positions` were already open.
    pub ignored_signal_count: usize,
    pub issues: Vec<RunIssue>,
}

/// Index of the first bar at which every series is valid.
fn warm_up_index(series: &HashMap<IndicatorType, IndicatorSeries>, bars: usize) -> usize {
    series
        .values()
        .map(|s| s.first_valid().unwrap_or(bars))
        .max()
        .unwrap_or(0)
}

/// Replay `bars` under `strategy`. Fails fast on invalid configuration, invalid
/// bars, a failing custom strategy or cancellation.
pub fn run_backtest(
    bars: &[Bar],
    instrument: &Instrument,
    strategy: &StrategySpec,
    config: &BacktestConfig,
    cancel: &CancelToken,
) -> Result<BacktestResult, FxsimError> {
    let started = Instant::now();

    config.validate()?;
    strategy.validate()?;
    validate_bars(bars)?;
    if bars.is_empty() {
        return Err(FxsimError::NoData {
            symbol: instrument.symbol.clone(),
        });
    }

    let mut required = strategy.required_indicators();
    for t in config.required_indicators() {
        if !required.contains(&t) {
            required.push(t);
        }
    }
    let indicators = compute_indicators(bars, &required)?;
    let warm_up = warm_up_index(&indicators, bars.len());
    if warm_up >= bars.len() {
        return Err(FxsimError::InsufficientData {
            symbol: instrument.symbol.clone(),
            bars: bars.len(),
            minimum: warm_up + 1,
        });
    }

    info!(
        symbol = %instrument.symbol,
        strategy = %strategy.describe(),
        bars = bars.len(),
        warm_up,
        "backtest started"
    );

    let mut engine = Engine {
        bars,
        instrument,
        strategy,
        config,
        costs: config.cost_model(instrument),
        limits: config.lot_limits(),
        indicators: &indicators,
        portfolio: Portfolio::new(config.initial_capital),
        pending_entries: Vec::new(),
        pending_exit: false,
        skipped_signal_count: 0,
        ignored_signal_count: 0,
        issues: Vec::new(),
    };

    for index in warm_up..bars.len() {
        if cancel.is_cancelled() {
            info!(symbol = %instrument.symbol, index, "backtest cancelled");
            return Err(FxsimError::Cancelled);
        }
        engine.step(index)?;
    }
    engine.finish();

    let Engine {
        portfolio,
        skipped_signal_count,
        ignored_signal_count,
        issues,
        ..
    } = engine;

    let metrics = MetricsSummary::compute(
        &portfolio.trades,
        &portfolio.equity_curve,
        portfolio.initial_capital,
    );
    let execution_time_ms = started.elapsed().as_millis() as u64;

    info!(
        symbol = %instrument.symbol,
        trades = portfolio.trades.len(),
        net_profit = metrics.net_profit,
        skipped_signal_count,
        ignored_signal_count,
        execution_time_ms,
        "backtest finished"
    );

    Ok(BacktestResult {
        trades: portfolio.trades,
        metrics,
        equity_curve: portfolio.equity_curve,
        bars_processed: bars.len() - warm_up,
        execution_time_ms,
        skipped_signal_count,
        ignored_signal_count,
        issues,
    })
}

struct Engine<'a> {
    bars: &'a [Bar],
    instrument: &'a Instrument,
    strategy: &'a StrategySpec,
    config: &'a BacktestConfig,
    costs: CostModel<'a>,
    limits: LotLimits,
    indicators: &'a HashMap<IndicatorType, IndicatorSeries>,
    portfolio: Portfolio,
    /// Sized entries waiting for the next open.
    pending_entries: Vec<Position>,
    /// A signal exit waiting for the next open.
    pending_exit: bool,
    skipped_signal_count: usize,
    ignored_signal_count: usize,
    issues: Vec<RunIssue>,
}

impl Engine<'_> {
    fn step(&mut self, index: usize) -> Result<(), FxsimError> {
        let bars = self.bars;
        let bar = &bars[index];

        if self.pending_exit {
            self.pending_exit = false;
            self.close_all(index, bar.open, ExitReason::Signal);
        }
        self.fill_pending(index);
        self.resolve_intrabar(index);

        let ctx = SignalContext {
            bars: self.bars,
            indicators: self.indicators,
            index,
            allow_shorting: self.config.allow_shorting,
            custom_time_budget: self.config.custom_time_budget,
        };
        let signal = evaluate_signal(self.strategy, &ctx, self.portfolio.primary_position())?;
        self.apply_signal(index, signal);

        self.portfolio
            .record_equity(bar.timestamp, bar.close, self.instrument.contract_size);
        Ok(())
    }

    fn fill_pending(&mut self, index: usize) {
        let bars = self.bars;
        let bar = &bars[index];
        for mut position in std::mem::take(&mut self.pending_entries) {
            fill_entry(&mut position, bar, &self.costs);
            debug!(
                id = position.id,
                direction = %position.direction,
                lots = position.size,
                price = position.entry_price,
                stop = ?position.stop_price,
                target = ?position.take_profit_price,
                timestamp = %bar.timestamp,
                "entry filled"
            );
            self.portfolio.positions.push(position);
        }
    }

    fn resolve_intrabar(&mut self, index: usize) {
        let bars = self.bars;
        let bar = &bars[index];
        let contract = self.instrument.contract_size;
        for mut position in self.portfolio.take_open_positions() {
            match intrabar_exit(&position, bar) {
                Some((level, reason)) => {
                    let (low, high) = exit_bar_range(bar, level);
                    position.record_excursion(low, high, contract);
                    self.settle(position, index, level, reason);
                }
                None => {
                    position.record_excursion(bar.low, bar.high, contract);
                    ratchet_trailing_stop(&mut position, bar);
                    self.portfolio.positions.push(position);
                }
            }
        }
    }

    fn apply_signal(&mut self, index: usize, signal: Signal) {
        let direction = match signal {
            Signal::None => return,
            Signal::Exit => {
                self.signal_exit(index);
                return;
            }
            Signal::Enter(d) => d,
        };

        let reversal = self.portfolio.exposure().is_some_and(|d| d != direction);
        if reversal {
            self.signal_exit(index);
        }

        let open = if reversal || self.pending_exit {
            0
        } else {
            self.portfolio.open_count()
        };
        if open + self.pending_entries.len() >= self.config.max_positions {
            self.ignored_signal_count += 1;
            warn!(
                index,
                %direction,
                max_positions = self.config.max_positions,
                "entry ignored at capacity"
            );
            return;
        }

        match self.prepare_entry(index, direction) {
            Ok(position) => self.pending_entries.push(position),
            Err(error) => {
                warn!(index, %direction, %error, "entry rejected");
                self.skipped_signal_count += 1;
                self.issues.push(RunIssue {
                    index,
                    timestamp: self.bars[index].timestamp,
                    error,
                });
            }
        }
    }

    /// Close every open position on a signal, now or at the next open.
    fn signal_exit(&mut self, index: usize) {
        if self.portfolio.open_count() == 0 {
            return;
        }
        if self.config.use_realistic_fills && index + 1 < self.bars.len() {
            self.pending_exit = true;
        } else {
            self.close_all(index, self.bars[index].close, ExitReason::Signal);
        }
    }

    /// Size an entry and compute its levels against the signal bar's close.
    fn prepare_entry(&mut self, index: usize, direction: Direction) -> Result<Position, ComputationError> {
        if index + 1 >= self.bars.len() {
            return Err(ComputationError::NoFillBar);
        }
        let bars = self.bars;
        let bar = &bars[index];
        let next = &bars[index + 1];
        let reference = bar.close;
        let atr_at = |period: usize| {
            self.indicators
                .get(&IndicatorType::Atr(period))
                .map(|s| s.simple_at(index))
        };
        let stop_atr = match self.config.stop_loss {
            StopLoss::AtrMultiple { period, .. } => atr_at(period),
            _ => None,
        };
        let target_atr = match self.config.take_profit {
            TakeProfit::AtrMultiple { period, .. } => atr_at(period),
            _ => None,
        };

        let stop = stop_price(&self.config.stop_loss, direction, reference, stop_atr, self.instrument)?;
        let target = take_profit_price(
            &self.config.take_profit,
            direction,
            reference,
            stop,
            target_atr,
            self.instrument,
        )?;
        let trailing_distance = self
            .config
            .trailing_stop_pips
            .map(|pips| self.instrument.pips_to_price(pips));

        let stop_distance = stop
            .map(|s| (reference - s).abs())
            .or(trailing_distance)
            .map(|d| self.instrument.price_to_pips(d));
        let equity = self
            .portfolio
            .equity(bar.close, self.instrument.contract_size);
        let size = size_position(
            &self.config.position_sizing,
            equity,
            reference,
            stop_distance,
            self.instrument,
            &self.limits,
        )?;

        Ok(Position {
            id: self.portfolio.next_position_id(),
            symbol: self.instrument.symbol.clone(),
            direction,
            entry_price: reference,
            entry_time: next.timestamp,
            entry_index: index + 1,
            size,
            stop_price: stop,
            take_profit_price: target,
            trailing_distance,
            trailing_engaged: false,
            status: PositionStatus::Pending,
            commission: 0.0,
            slippage: 0.0,
            mae: 0.0,
            mfe: 0.0,
            initial_risk: None,
        })
    }

    fn close_all(&mut self, index: usize, raw_price: f64, reason: ExitReason) {
        for position in self.portfolio.take_open_positions() {
            self.settle(position, index, raw_price, reason);
        }
    }

    fn settle(&mut self, position: Position, index: usize, raw_price: f64, reason: ExitReason) {
        let bars = self.bars;
        let exit = ExitFill {
            bar: &bars[index],
            index,
            raw_price,
            reason,
            balance: self.portfolio.balance,
        };
        let number = self.portfolio.next_trade_number();
        let trade = close_position(position, exit, &self.costs, number);
        debug!(
            trade = trade.trade_number,
            direction = %trade.direction,
            reason = %trade.exit_reason,
            price = trade.exit_price,
            pnl = trade.pnl,
            "position closed"
        );
        self.portfolio.record_trade(trade);
    }

    /// Force-close at the final close and re-mark the last equity point so the
    /// curve ends on the settled balance.
    fn finish(&mut self) {
        if self.portfolio.open_count() == 0 {
            return;
        }
        let bars = self.bars;
        let last = bars.len() - 1;
        let bar = &bars[last];
        self.close_all(last, bar.close, ExitReason::BacktestEnd);
        if self
            .portfolio
            .equity_curve
            .last()
            .is_some_and(|p| p.time == bar.timestamp)
        {
            self.portfolio.equity_curve.pop();
        }
        self.portfolio
            .record_equity(bar.timestamp, bar.close, self.instrument.contract_size);
    }
}

/// One independent run of a batch.
#[derive(Debug, Clone)]
pub struct BacktestJob {
    pub label: String,
    pub strategy: StrategySpec,
    pub config: BacktestConfig,
}

/// Run independent backtests over the same bars in parallel. Results come back
/// in job order.
pub fn run_batch(
    bars: &[Bar],
    instrument: &Instrument,
    jobs: &[BacktestJob],
    cancel: &CancelToken,
) -> Vec<Result<BacktestResult, FxsimError>> {
    info!(jobs = jobs.len(), bars = bars.len(), "batch started");
    jobs.par_iter()
        .map(|job| {
            let result = run_backtest(bars, instrument, &job.strategy, &job.config, cancel);
            if let Err(e) = &result {
                warn!(label = %job.label, error = %e, "batch job failed");
            }
            result
        })
        .collect()
}
