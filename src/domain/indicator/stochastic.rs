//! Stochastic oscillator.
//!
//! %K = 100 × (close - lowest low) / (highest high - lowest low) over `k_period`
//! bars, 50 when the range is zero. %D is the SMA of %K over `d_period`.
//! Warmup: `k_period - 1 + d_period - 1` bars.

use crate::domain::bar::Bar;
use crate::domain::indicator::sma::rolling_mean;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub fn calculate_stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> IndicatorSeries {
    let indicator_type = IndicatorType::Stochastic { k_period, d_period };
    if k_period == 0 || d_period == 0 {
        return IndicatorSeries {
            indicator_type,
            values: Vec::new(),
        };
    }

    let k_values: Vec<Option<f64>> = (0..bars.len())
        .map(|i| {
            if i + 1 < k_period {
                return None;
            }
            let window = &bars[i + 1 - k_period..=i];
            let hh = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let ll = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let range = hh - ll;
            Some(if range <= 0.0 {
                50.0
            } else {
                100.0 * (bars[i].close - ll) / range
            })
        })
        .collect();

    let k_start = k_period - 1;
    let k_tail: Vec<f64> = k_values.iter().flatten().copied().collect();
    let d_tail = rolling_mean(&k_tail, d_period);

    let values = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let d = i
                .checked_sub(k_start)
                .and_then(|j| d_tail.get(j).copied().flatten());
            match (k_values[i], d) {
                (Some(k), Some(d)) => IndicatorPoint {
                    timestamp: bar.timestamp,
                    valid: true,
                    value: IndicatorValue::Stochastic { k, d },
                },
                (k, _) => IndicatorPoint {
                    timestamp: bar.timestamp,
                    valid: false,
                    value: IndicatorValue::Stochastic {
                        k: k.unwrap_or(0.0),
                        d: 0.0,
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
