//! Signal evaluation: maps (strategy, indicators, bar index, exposure) to one decision.
//!
//! Decision order with open exposure in direction `d`:
//! 1. exit condition for `d` → `Exit`
//! 2. entry condition for the opposite direction → enter it (reversal)
//! 3. entry condition for `d` → enter `d` again
//!
//! When flat, long entries are checked before short entries. Short entries are
//! produced only when shorting is allowed.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crate::domain::bar::Bar;
use crate::domain::error::FxsimError;
use crate::domain::indicator::{IndicatorSeries, IndicatorType};
use crate::domain::position::{Direction, Position};
use crate::domain::rule::{Condition, IndicatorField, IndicatorRef};
use crate::domain::rule_eval::{crosses_above, crosses_below, evaluate_conditions, resolve_indicator};
use crate::domain::strategy::{
    CustomStrategy, IndicatorStrategy, MovingAverage, RulesStrategy, StrategyError, StrategySpec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    None,
    Enter(Direction),
    Exit,
}

/// Read-only view of the run at one bar.
pub struct SignalContext<'a> {
    pub bars: &'a [Bar],
    pub indicators: &'a HashMap<IndicatorType, IndicatorSeries>,
    pub index: usize,
    pub allow_shorting: bool,
    pub custom_time_budget: Duration,
}

/// Entry/exit conditions for both directions at one bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Flags {
    entry_long: bool,
    exit_long: bool,
    entry_short: bool,
    exit_short: bool,
}

impl Flags {
    fn entry(&self, d: Direction) -> bool {
        match d {
            Direction::Long => self.entry_long,
            Direction::Short => self.entry_short,
        }
    }

    fn exit(&self, d: Direction) -> bool {
        match d {
            Direction::Long => self.exit_long,
            Direction::Short => self.exit_short,
        }
    }

    fn decide(&self, exposure: Option<Direction>, allow_shorting: bool) -> Signal {
        let permitted = |d: Direction| d == Direction::Long || allow_shorting;
        match exposure {
            Some(d) => {
                if self.exit(d) {
                    Signal::Exit
                } else if permitted(d.opposite()) && self.entry(d.opposite()) {
                    Signal::Enter(d.opposite())
                } else if self.entry(d) {
                    Signal::Enter(d)
                } else {
                    Signal::None
                }
            }
            None => {
                if self.entry_long {
                    Signal::Enter(Direction::Long)
                } else if allow_shorting && self.entry_short {
                    Signal::Enter(Direction::Short)
                } else {
                    Signal::None
                }
            }
        }
    }
}

/// Evaluate the strategy at `ctx.index`. `position` is the oldest open
/// position, if any. Only custom strategies can fail.
pub fn evaluate_signal(
    strategy: &StrategySpec,
    ctx: &SignalContext<'_>,
    position: Option<&Position>,
) -> Result<Signal, FxsimError> {
    let exposure = position.map(|p| p.direction);
    match strategy {
        StrategySpec::Indicator(kind) => {
            Ok(indicator_flags(kind, ctx).decide(exposure, ctx.allow_shorting))
        }
        StrategySpec::Rules(rules) => Ok(rules_flags(rules, ctx).decide(exposure, ctx.allow_shorting)),
        StrategySpec::Custom(custom) => custom_signal(custom.as_ref(), ctx, position),
    }
}

fn rules_flags(rules: &RulesStrategy, ctx: &SignalContext<'_>) -> Flags {
    let eval = |conditions: &[Condition]| {
        evaluate_conditions(conditions, ctx.bars, ctx.indicators, ctx.index)
    };
    Flags {
        entry_long: eval(&rules.entry_long),
        exit_long: eval(&rules.exit_long),
        entry_short: eval(&rules.entry_short),
        exit_short: eval(&rules.exit_short),
    }
}

/// Current and previous value of one indicator field.
fn pair(ctx: &SignalContext<'_>, indicator_type: IndicatorType, field: IndicatorField) -> (f64, f64) {
    let r = IndicatorRef {
        indicator_type,
        field,
    };
    let current = resolve_indicator(&r, ctx.indicators, ctx.index);
    let previous = match ctx.index.checked_sub(1) {
        Some(prev) => resolve_indicator(&r, ctx.indicators, prev),
        None => f64::NAN,
    };
    (previous, current)
}

fn indicator_flags(kind: &IndicatorStrategy, ctx: &SignalContext<'_>) -> Flags {
    let types = kind.required_indicators();
    match *kind {
        IndicatorStrategy::MaCrossover { ma, fast, slow } => {
            let (fast_t, slow_t) = match ma {
                MovingAverage::Sma => (IndicatorType::Sma(fast), IndicatorType::Sma(slow)),
                MovingAverage::Ema => (IndicatorType::Ema(fast), IndicatorType::Ema(slow)),
            };
            let (f0, f1) = pair(ctx, fast_t, IndicatorField::Value);
            let (s0, s1) = pair(ctx, slow_t, IndicatorField::Value);
            let up = crosses_above(f0, f1, s0, s1);
            let down = crosses_below(f0, f1, s0, s1);
            Flags {
                entry_long: up,
                exit_long: down,
                entry_short: down,
                exit_short: up,
            }
        }
        IndicatorStrategy::Rsi {
            oversold,
            overbought,
            ..
        } => {
            let (r0, r1) = pair(ctx, types[0].clone(), IndicatorField::Value);
            Flags {
                entry_long: crosses_above(r0, r1, oversold, oversold),
                exit_long: r1 >= overbought,
                entry_short: crosses_below(r0, r1, overbought, overbought),
                exit_short: r1 <= oversold,
            }
        }
        IndicatorStrategy::Macd { .. } => {
            let (l0, l1) = pair(ctx, types[0].clone(), IndicatorField::MacdLine);
            let (s0, s1) = pair(ctx, types[0].clone(), IndicatorField::MacdSignal);
            let up = crosses_above(l0, l1, s0, s1);
            let down = crosses_below(l0, l1, s0, s1);
            Flags {
                entry_long: up,
                exit_long: down,
                entry_short: down,
                exit_short: up,
            }
        }
        IndicatorStrategy::Bollinger { .. } => {
            let t = types[0].clone();
            let (lo0, lo1) = pair(ctx, t.clone(), IndicatorField::BollingerLower);
            let (mid0, mid1) = pair(ctx, t.clone(), IndicatorField::BollingerMiddle);
            let (up0, up1) = pair(ctx, t, IndicatorField::BollingerUpper);
            let c1 = ctx.bars[ctx.index].close;
            let c0 = match ctx.index.checked_sub(1) {
                Some(prev) => ctx.bars[prev].close,
                None => f64::NAN,
            };
            Flags {
                entry_long: crosses_below(c0, c1, lo0, lo1),
                exit_long: crosses_below(c0, c1, mid0, mid1),
                entry_short: crosses_above(c0, c1, up0, up1),
                exit_short: crosses_above(c0, c1, mid0, mid1),
            }
        }
        IndicatorStrategy::Stochastic {
            oversold,
            overbought,
            ..
        } => {
            let (k0, k1) = pair(ctx, types[0].clone(), IndicatorField::StochasticK);
            let (d0, d1) = pair(ctx, types[0].clone(), IndicatorField::StochasticD);
            let up = crosses_above(k0, k1, d0, d1);
            let down = crosses_below(k0, k1, d0, d1);
            Flags {
                entry_long: up && k1 < oversold,
                exit_long: down,
                entry_short: down && k1 > overbought,
                exit_short: up,
            }
        }
        IndicatorStrategy::Adx { threshold, .. } => {
            let (p0, p1) = pair(ctx, types[0].clone(), IndicatorField::PlusDi);
            let (m0, m1) = pair(ctx, types[0].clone(), IndicatorField::MinusDi);
            let (_, adx) = pair(ctx, types[0].clone(), IndicatorField::Adx);
            let bull = crosses_above(p0, p1, m0, m1);
            let bear = crosses_above(m0, m1, p0, p1);
            let trending = adx > threshold;
            Flags {
                entry_long: bull && trending,
                exit_long: bear,
                entry_short: bear && trending,
                exit_short: bull,
            }
        }
    }
}

fn custom_signal(
    custom: &dyn CustomStrategy,
    ctx: &SignalContext<'_>,
    position: Option<&Position>,
) -> Result<Signal, FxsimError> {
    let bar = &ctx.bars[ctx.index];
    let history = &ctx.bars[..=ctx.index];

    if let Some(pos) = position {
        let exit = guarded_call(ctx, || custom.should_exit(bar, history, pos))?;
        if exit {
            return Ok(Signal::Exit);
        }
    }

    let wanted = guarded_call(ctx, || custom.should_enter(bar, history))?;
    Ok(match wanted {
        Some(Direction::Short) if !ctx.allow_shorting => Signal::None,
        Some(d) => Signal::Enter(d),
        None => Signal::None,
    })
}

/// Run a user callback, turning an error, a panic or a budget overrun into a
/// fatal evaluation error for this bar.
fn guarded_call<T>(
    ctx: &SignalContext<'_>,
    f: impl FnOnce() -> Result<T, StrategyError>,
) -> Result<T, FxsimError> {
    let bar = &ctx.bars[ctx.index];
    let fail = |cause: String| FxsimError::Evaluation {
        index: ctx.index,
        timestamp: bar.timestamp,
        cause,
    };

    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    let elapsed = started.elapsed();

    let value = match outcome {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => return Err(fail(e.to_string())),
        Err(payload) => {
            return Err(fail(format!("panicked: {}", panic_message(payload.as_ref()))));
        }
    };
    if elapsed > ctx.custom_time_budget {
        return Err(fail(format!(
            "exceeded time budget of {:?} (took {:?})",
            ctx.custom_time_budget, elapsed
        )));
    }
    Ok(value)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
