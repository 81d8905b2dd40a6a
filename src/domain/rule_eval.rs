//! Condition evaluation against bars and pre-computed indicator values.
//!
//! # Evaluation Semantics
//!
//! - Conditions fold strictly left to right: `acc = c0`, then
//!   `acc = acc AND/OR ci` using `ci.logic`. There is no precedence grouping.
//! - An empty list evaluates to `false`.
//! - `crosses_above`/`crosses_below` require `index >= 1` and return `false` at index 0.
//! - Any NaN operand (indicator in warmup, missing series) makes a condition false.

use std::collections::HashMap;

use crate::domain::bar::Bar;
use crate::domain::indicator::{IndicatorSeries, IndicatorType, IndicatorValue};
use crate::domain::rule::{Comparator, Condition, IndicatorField, IndicatorRef, Logic, Operand};

const EPSILON: f64 = 1e-9;

pub fn evaluate_conditions(
    conditions: &[Condition],
    bars: &[Bar],
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
    index: usize,
) -> bool {
    let Some((first, rest)) = conditions.split_first() else {
        return false;
    };
    let mut acc = evaluate_condition(first, bars, indicators, index);
    for c in rest {
        acc = match c.logic {
            Logic::And => acc && evaluate_condition(c, bars, indicators, index),
            Logic::Or => acc || evaluate_condition(c, bars, indicators, index),
        };
    }
    acc
}

pub fn evaluate_condition(
    condition: &Condition,
    bars: &[Bar],
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
    index: usize,
) -> bool {
    let left = resolve_operand(&condition.left, bars, indicators, index);
    let right = resolve_operand(&condition.right, bars, indicators, index);
    match condition.comparator {
        Comparator::Greater => left > right,
        Comparator::GreaterOrEqual => left >= right,
        Comparator::Less => left < right,
        Comparator::LessOrEqual => left <= right,
        Comparator::Equal => (left - right).abs() < EPSILON,
        Comparator::CrossesAbove | Comparator::CrossesBelow => {
            if index == 0 {
                return false;
            }
            let left_prev = resolve_operand(&condition.left, bars, indicators, index - 1);
            let right_prev = resolve_operand(&condition.right, bars, indicators, index - 1);
            if condition.comparator == Comparator::CrossesAbove {
                crosses_above(left_prev, left, right_prev, right)
            } else {
                crosses_below(left_prev, left, right_prev, right)
            }
        }
    }
}

/// `a` was at or below `b` on the previous bar and is strictly above it now.
pub fn crosses_above(a_prev: f64, a: f64, b_prev: f64, b: f64) -> bool {
    a > b && a_prev <= b_prev
}

/// `a` was at or above `b` on the previous bar and is strictly below it now.
pub fn crosses_below(a_prev: f64, a: f64, b_prev: f64, b: f64) -> bool {
    a < b && a_prev >= b_prev
}

pub fn resolve_operand(
    operand: &Operand,
    bars: &[Bar],
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
    index: usize,
) -> f64 {
    let Some(bar) = bars.get(index) else {
        return f64::NAN;
    };
    match operand {
        Operand::Open => bar.open,
        Operand::High => bar.high,
        Operand::Low => bar.low,
        Operand::Close => bar.close,
        Operand::Volume => bar.volume,
        Operand::Constant(v) => *v,
        Operand::Indicator(ind_ref) => resolve_indicator(ind_ref, indicators, index),
    }
}

pub fn resolve_indicator(
    ind_ref: &IndicatorRef,
    indicators: &HashMap<IndicatorType, IndicatorSeries>,
    index: usize,
) -> f64 {
    indicators
        .get(&ind_ref.indicator_type)
        .and_then(|series| series.values.get(index))
        .filter(|point| point.valid)
        .map_or(f64::NAN, |point| extract_field(&point.value, ind_ref.field))
}

pub fn extract_field(value: &IndicatorValue, field: IndicatorField) -> f64 {
    match (value, field) {
        (IndicatorValue::Simple(v), IndicatorField::Value) => *v,
        (IndicatorValue::Macd { line, .. }, IndicatorField::MacdLine) => *line,
        (IndicatorValue::Macd { signal, .. }, IndicatorField::MacdSignal) => *signal,
        (IndicatorValue::Macd { histogram, .. }, IndicatorField::MacdHistogram) => *histogram,
        (IndicatorValue::Stochastic { k, .. }, IndicatorField::StochasticK) => *k,
        (IndicatorValue::Stochastic { d, .. }, IndicatorField::StochasticD) => *d,
        (IndicatorValue::Bollinger { upper, .. }, IndicatorField::BollingerUpper) => *upper,
        (IndicatorValue::Bollinger { middle, .. }, IndicatorField::BollingerMiddle) => *middle,
        (IndicatorValue::Bollinger { lower, .. }, IndicatorField::BollingerLower) => *lower,
        (IndicatorValue::Adx { adx, .. }, IndicatorField::Adx) => *adx,
        (IndicatorValue::Adx { plus_di, .. }, IndicatorField::PlusDi) => *plus_di,
        (IndicatorValue::Adx { minus_di, .. }, IndicatorField::MinusDi) => *minus_di,
        _ => f64::NAN,
    }
}
