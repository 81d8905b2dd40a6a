//! ADX (Average Directional Index) with +DI / -DI.
//!
//! Directional movement and true range are Wilder-smoothed over `period`:
//! the first smoothed value (index `period`) is the sum of the first `period`
//! raw values, then `s = s - s / period + x`.
//!
//! +DI = 100 × smoothed(+DM) / smoothed(TR), likewise -DI.
//! DX = 100 × |+DI - -DI| / (+DI + -DI), 0 when both are 0.
//! ADX seeds with the mean of the first `period` DX values (index `2 × period - 1`)
//! and is Wilder-averaged afterwards.

use crate::domain::bar::Bar;
use crate::domain::indicator::{IndicatorPoint, IndicatorSeries, IndicatorType, IndicatorValue};

pub fn calculate_adx(bars: &[Bar], period: usize) -> IndicatorSeries {
    let invalid = |bar: &Bar| IndicatorPoint {
        timestamp: bar.timestamp,
        valid: false,
        value: IndicatorValue::Adx {
            adx: 0.0,
            plus_di: 0.0,
            minus_di: 0.0,
        },
    };

    if period == 0 {
        return IndicatorSeries {
            indicator_type: IndicatorType::Adx(period),
            values: bars.iter().map(invalid).collect(),
        };
    }

    let n = period as f64;
    let mut values = Vec::with_capacity(bars.len());
    let (mut s_tr, mut s_plus, mut s_minus) = (0.0, 0.0, 0.0);
    let mut dx_sum = 0.0;
    let mut adx = 0.0;

    for (i, bar) in bars.iter().enumerate() {
        if i == 0 {
            values.push(invalid(bar));
            continue;
        }
        let prev = &bars[i - 1];
        let up = bar.high - prev.high;
        let down = prev.low - bar.low;
        let plus_dm = if up > down && up > 0.0 { up } else { 0.0 };
        let minus_dm = if down > up && down > 0.0 { down } else { 0.0 };
        let tr = bar.true_range(prev.close);

        if i <= period {
            s_tr += tr;
            s_plus += plus_dm;
            s_minus += minus_dm;
            if i < period {
                values.push(invalid(bar));
                continue;
            }
        } else {
            s_tr = s_tr - s_tr / n + tr;
            s_plus = s_plus - s_plus / n + plus_dm;
            s_minus = s_minus - s_minus / n + minus_dm;
        }

        let (plus_di, minus_di) = if s_tr > 0.0 {
            (100.0 * s_plus / s_tr, 100.0 * s_minus / s_tr)
        } else {
            (0.0, 0.0)
        };
        let di_sum = plus_di + minus_di;
        let dx = if di_sum > 0.0 {
            100.0 * (plus_di - minus_di).abs() / di_sum
        } else {
            0.0
        };

        // DX count at this bar is i - period + 1.
        let dx_count = i + 1 - period;
        let valid = if dx_count < period {
            dx_sum += dx;
            false
        } else if dx_count == period {
            adx = (dx_sum + dx) / n;
            true
        } else {
            adx = (adx * (n - 1.0) + dx) / n;
            true
        };

        values.push(IndicatorPoint {
            timestamp: bar.timestamp,
            valid,
            value: IndicatorValue::Adx {
                adx: if valid { adx } else { 0.0 },
                plus_di,
                minus_di,
            },
        });
    }

    IndicatorSeries {
        indicator_type: IndicatorType::Adx(period),
        values,
    }
}
