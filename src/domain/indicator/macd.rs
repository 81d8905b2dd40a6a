//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line, seeded from the first valid line values
//! Histogram = MACD Line - Signal Line
//!
//! Warmup: slow - 1 + signal - 1 bars.

use crate::domain::bar::Bar;
use crate::domain::indicator::ema::ema_of;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(
    bars: &[Bar],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> IndicatorSeries {
    let indicator_type = IndicatorType::Macd {
        fast,
        slow,
        signal: signal_period,
    };
    if bars.is_empty() || fast == 0 || slow == 0 || signal_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema_fast = ema_of(&closes, fast);
    let ema_slow = ema_of(&closes, slow);

    let line: Vec<Option<f64>> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let line_start = line.iter().position(Option::is_some).unwrap_or(line.len());
    let line_values: Vec<f64> = line[line_start..].iter().flatten().copied().collect();
    let signal_tail = ema_of(&line_values, signal_period);

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let signal = i
                .checked_sub(line_start)
                .and_then(|j| signal_tail.get(j).copied().flatten());
            match (line[i], signal) {
                (Some(l), Some(s)) => IndicatorPoint {
                    timestamp: bar.timestamp,
                    valid: true,
                    value: IndicatorValue::Macd {
                        line: l,
                        signal: s,
                        histogram: l - s,
                    },
                },
                _ => IndicatorPoint {
                    timestamp: bar.timestamp,
                    valid: false,
                    value: IndicatorValue::Macd {
                        line: line[i].unwrap_or(0.0),
                        signal: 0.0,
                        histogram: 0.0,
                    },
                },
            }
        })
        .collect();

    IndicatorSeries {
        indicator_type,
        values,
    }
}

pub fn calculate_macd_default(bars: &[Bar]) -> IndicatorSeries {
    calculate_macd(bars, DEFAULT_FAST, DEFAULT_SLOW, DEFAULT_SIGNAL)
}
