//! ATR (Average True Range) with Wilder smoothing.
//!
//! The first bar's true range is high - low. The first valid value, at index
//! `period - 1`, is the mean of the first `period` true ranges; after that
//! `atr = (prev * (period - 1) + tr) / period`.

use crate::domain::bar::Bar;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub fn calculate_atr(bars: &[Bar], period: usize) -> IndicatorSeries {
    let mut values = Vec::with_capacity(bars.len());
    let mut atr = 0.0;
    let mut tr_sum = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        let tr = if i == 0 {
            bar.high - bar.low
        } else {
            bar.true_range(bars[i - 1].close)
        };

        let valid = period > 0 && i + 1 >= period;
        if period > 0 {
            if i + 1 < period {
                tr_sum += tr;
            } else if i + 1 == period {
                atr = (tr_sum + tr) / period as f64;
            } else {
                atr = (atr * (period - 1) as f64 + tr) / period as f64;
            }
        }

        values.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid,
            value: IndicatorValue::Simple(if valid { atr } else { 0.0 }),
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Atr(period),
        values,
    }
}
