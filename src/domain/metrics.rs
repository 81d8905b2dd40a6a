//! Performance metrics and statistics.
//!
//! Return-based ratios use per-trade returns (`pnl / balance_before`); bars
//! between trades carry no realised return.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::Serialize;

use super::portfolio::EquityPoint;
use super::position::Trade;

/// Reported profit factor when there are profits but no losses.
pub const NO_LOSS_PROFIT_FACTOR: f64 = 999.99;

const PNL_EPSILON: f64 = 1e-9;
const SECONDS_PER_YEAR: f64 = 365.25 * 86_400.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyReturn {
    /// First day of the month.
    pub month: NaiveDate,
    pub return_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DrawdownPoint {
    pub time: NaiveDateTime,
    pub drawdown_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawdownPeriod {
    /// Time of the peak the decline started from.
    pub start: NaiveDateTime,
    pub trough: NaiveDateTime,
    /// First time equity regained the peak; `None` if it never did.
    pub end: Option<NaiveDateTime>,
    pub depth: f64,
    pub depth_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub break_even_trades: usize,
    pub win_rate: f64,
    pub loss_rate: f64,
    pub break_even_rate: f64,
    pub gross_profit: f64,
    /// Positive magnitude of all losing trades.
    pub gross_loss: f64,
    pub net_profit: f64,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub profit_factor: f64,
    pub expectancy: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub average_r_multiple: Option<f64>,
    pub average_duration_bars: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub total_return_percent: f64,
    pub annual_return_percent: f64,
    pub calmar_ratio: f64,
    pub recovery_factor: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub monthly_returns: Vec<MonthlyReturn>,
    pub drawdown_curve: Vec<DrawdownPoint>,
    pub drawdown_periods: Vec<DrawdownPeriod>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Win,
    Loss,
    BreakEven,
}

fn outcome(pnl: f64) -> Outcome {
    if pnl > PNL_EPSILON {
        Outcome::Win
    } else if pnl < -PNL_EPSILON {
        Outcome::Loss
    } else {
        Outcome::BreakEven
    }
}

impl MetricsSummary {
    pub fn compute(trades: &[Trade], equity_curve: &[EquityPoint], initial_capital: f64) -> Self {
        let total_trades = trades.len();
        let mut winning_trades = 0usize;
        let mut losing_trades = 0usize;
        let mut gross_profit = 0.0_f64;
        let mut gross_loss = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;

        for trade in trades {
            match outcome(trade.pnl) {
                Outcome::Win => {
                    winning_trades += 1;
                    gross_profit += trade.pnl;
                    largest_win = largest_win.max(trade.pnl);
                }
                Outcome::Loss => {
                    losing_trades += 1;
                    gross_loss += -trade.pnl;
                    largest_loss = largest_loss.max(-trade.pnl);
                }
                Outcome::BreakEven => {}
            }
        }
        let break_even_trades = total_trades - winning_trades - losing_trades;

        let rate = |count: usize| ratio(count as f64, total_trades as f64);
        let net_profit: f64 = trades.iter().map(|t| t.pnl).sum();

        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            NO_LOSS_PROFIT_FACTOR
        } else {
            0.0
        };

        let r_values: Vec<f64> = trades.iter().filter_map(|t| t.r_multiple).collect();
        let average_r_multiple = (!r_values.is_empty()).then(|| mean(&r_values));

        let (max_consecutive_wins, max_consecutive_losses) = max_streaks(trades);

        let final_equity = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital + net_profit);

        let dd = drawdown(equity_curve, initial_capital);

        let returns: Vec<f64> = trades.iter().map(Trade::return_pct).collect();
        let total_return_percent = ratio(final_equity - initial_capital, initial_capital) * 100.0;
        let annual_return_percent = annual_return(equity_curve, initial_capital, final_equity);

        MetricsSummary {
            initial_capital,
            final_equity,
            total_trades,
            winning_trades,
            losing_trades,
            break_even_trades,
            win_rate: rate(winning_trades),
            loss_rate: rate(losing_trades),
            break_even_rate: rate(break_even_trades),
            gross_profit,
            gross_loss,
            net_profit,
            total_commission: trades.iter().map(|t| t.commission).sum(),
            total_slippage: trades.iter().map(|t| t.slippage).sum(),
            profit_factor,
            expectancy: ratio(net_profit, total_trades as f64),
            average_win: ratio(gross_profit, winning_trades as f64),
            average_loss: ratio(gross_loss, losing_trades as f64),
            largest_win,
            largest_loss,
            average_r_multiple,
            average_duration_bars: ratio(
                trades.iter().map(|t| t.duration_bars as f64).sum(),
                total_trades as f64,
            ),
            max_consecutive_wins,
            max_consecutive_losses,
            max_drawdown: dd.max_drawdown,
            max_drawdown_percent: dd.max_drawdown_percent,
            sharpe_ratio: sharpe_ratio(&returns),
            sortino_ratio: sortino_ratio(&returns),
            total_return_percent,
            annual_return_percent,
            calmar_ratio: ratio(annual_return_percent, dd.max_drawdown_percent),
            recovery_factor: ratio(net_profit, dd.max_drawdown),
            equity_curve: equity_curve.to_vec(),
            monthly_returns: monthly_returns(equity_curve, initial_capital),
            drawdown_curve: dd.curve,
            drawdown_periods: dd.periods,
        }
    }
}

/// `num / den`, or 0 when the denominator is not positive.
fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

fn mean(values: &[f64]) -> f64 {
    ratio(values.iter().sum(), values.len() as f64)
}

/// Mean over population standard deviation of per-trade returns.
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let variance = returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / returns.len() as f64;
    ratio(m, variance.sqrt())
}

/// Mean over downside deviation (target 0): the root mean square of the
/// negative returns, measured about zero rather than about their mean.
pub fn sortino_ratio(returns: &[f64]) -> f64 {
    let negatives: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if negatives.is_empty() {
        return 0.0;
    }
    let downside = (negatives.iter().map(|r| r * r).sum::<f64>() / negatives.len() as f64).sqrt();
    ratio(mean(returns), downside)
}

/// Longest runs of wins and losses in trade order. Break-even trades end both.
pub fn max_streaks(trades: &[Trade]) -> (usize, usize) {
    let (mut wins, mut losses) = (0usize, 0usize);
    let (mut max_wins, mut max_losses) = (0usize, 0usize);
    for trade in trades {
        match outcome(trade.pnl) {
            Outcome::Win => {
                wins += 1;
                losses = 0;
            }
            Outcome::Loss => {
                losses += 1;
                wins = 0;
            }
            Outcome::BreakEven => {
                wins = 0;
                losses = 0;
            }
        }
        max_wins = max_wins.max(wins);
        max_losses = max_losses.max(losses);
    }
    (max_wins, max_losses)
}

struct Drawdown {
    max_drawdown: f64,
    max_drawdown_percent: f64,
    curve: Vec<DrawdownPoint>,
    periods: Vec<DrawdownPeriod>,
}

/// Running-peak drawdown. The peak starts at the initial capital.
fn drawdown(equity_curve: &[EquityPoint], initial_capital: f64) -> Drawdown {
    let mut peak = initial_capital;
    let mut peak_time: Option<NaiveDateTime> = None;
    let mut max_drawdown = 0.0_f64;
    let mut max_drawdown_percent = 0.0_f64;
    let mut curve = Vec::with_capacity(equity_curve.len());
    let mut periods = Vec::new();
    let mut current: Option<DrawdownPeriod> = None;

    for point in equity_curve {
        if point.equity >= peak {
            if let Some(mut open) = current.take() {
                open.end = Some(point.time);
                periods.push(open);
            }
            peak = point.equity;
            peak_time = Some(point.time);
            curve.push(DrawdownPoint {
                time: point.time,
                drawdown_percent: 0.0,
            });
            continue;
        }

        let dd = peak - point.equity;
        let dd_percent = ratio(dd, peak) * 100.0;
        max_drawdown = max_drawdown.max(dd);
        max_drawdown_percent = max_drawdown_percent.max(dd_percent);
        curve.push(DrawdownPoint {
            time: point.time,
            drawdown_percent: dd_percent,
        });

        let period = current.get_or_insert(DrawdownPeriod {
            start: peak_time.unwrap_or(point.time),
            trough: point.time,
            end: None,
            depth: 0.0,
            depth_percent: 0.0,
        });
        if dd > period.depth {
            period.depth = dd;
            period.depth_percent = dd_percent;
            period.trough = point.time;
        }
    }
    periods.extend(current);

    Drawdown {
        max_drawdown,
        max_drawdown_percent,
        curve,
        periods,
    }
}

/// Compound annual growth over the calendar span of the equity curve, using
/// 365.25-day years. Zero when the span is empty or the figure is not finite.
fn annual_return(equity_curve: &[EquityPoint], initial_capital: f64, final_equity: f64) -> f64 {
    let (Some(first), Some(last)) = (equity_curve.first(), equity_curve.last()) else {
        return 0.0;
    };
    let years = (last.time - first.time).num_seconds() as f64 / SECONDS_PER_YEAR;
    if years <= 0.0 || initial_capital <= 0.0 {
        return 0.0;
    }
    let growth = final_equity / initial_capital;
    let annual = if growth > 0.0 {
        (growth.powf(1.0 / years) - 1.0) * 100.0
    } else {
        -100.0
    };
    if annual.is_finite() { annual } else { 0.0 }
}

/// Month-end equity against the previous month-end (or the initial capital).
fn monthly_returns(equity_curve: &[EquityPoint], initial_capital: f64) -> Vec<MonthlyReturn> {
    let mut out = Vec::new();
    let mut previous_end = initial_capital;
    let mut i = 0;
    while i < equity_curve.len() {
        let key = (equity_curve[i].time.year(), equity_curve[i].time.month());
        let mut j = i;
        while j + 1 < equity_curve.len()
            && (equity_curve[j + 1].time.year(), equity_curve[j + 1].time.month()) == key
        {
            j += 1;
        }
        let month_end = equity_curve[j].equity;
        if let Some(month) = NaiveDate::from_ymd_opt(key.0, key.1, 1) {
            out.push(MonthlyReturn {
                month,
                return_percent: ratio(month_end - previous_end, previous_end) * 100.0,
            });
        }
        previous_end = month_end;
        i = j + 1;
    }
    out
}
