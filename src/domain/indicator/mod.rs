//! Technical indicator implementations.
//!
//! This module provides types for representing indicator values and series:
//! - `IndicatorPoint`: A single point in an indicator time series
//! - `IndicatorValue`: Enum for different indicator output shapes
//! - `IndicatorType`: Enum for indicator identity + parameters (serves as HashMap key)
//! - `IndicatorSeries`: A time series of indicator values, index-aligned with the bars

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod stochastic;

pub use adx::calculate_adx;
pub use atr::calculate_atr;
pub use bollinger::calculate_bollinger;
pub use ema::calculate_ema;
pub use macd::calculate_macd;
pub use rsi::calculate_rsi;
pub use sma::calculate_sma;
pub use stochastic::calculate_stochastic;

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::fmt;

use crate::domain::bar::Bar;
use crate::domain::error::FxsimError;

#[derive(Debug, Clone)]
pub struct IndicatorPoint {
    pub timestamp: NaiveDateTime,
    pub valid: bool,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Stochastic {
        k: f64,
        d: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
    Adx {
        adx: f64,
        plus_di: f64,
        minus_di: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Atr(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Stochastic {
        k_period: usize,
        d_period: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
    Adx(usize),
}

#[derive(Debug, Clone)]
pub struct IndicatorSeries {
    pub indicator_type: IndicatorType,
    pub values: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    /// Index of the first valid point, if any.
    pub fn first_valid(&self) -> Option<usize> {
        self.values.iter().position(|p| p.valid)
    }

    /// The `Simple` value at `index`, or NaN when out of range, in warmup, or not simple.
    pub fn simple_at(&self, index: usize) -> f64 {
        match self.values.get(index) {
            Some(IndicatorPoint {
                valid: true,
                value: IndicatorValue::Simple(v),
                ..
            }) => *v,
            _ => f64::NAN,
        }
    }
}

impl IndicatorType {
    /// Reject non-positive periods before any computation happens.
    pub fn validate(&self) -> Result<(), FxsimError> {
        let periods: Vec<usize> = match self {
            IndicatorType::Sma(n)
            | IndicatorType::Ema(n)
            | IndicatorType::Rsi(n)
            | IndicatorType::Atr(n)
            | IndicatorType::Adx(n) => vec![*n],
            IndicatorType::Macd { fast, slow, signal } => vec![*fast, *slow, *signal],
            IndicatorType::Stochastic { k_period, d_period } => vec![*k_period, *d_period],
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                if *stddev_mult_x100 == 0 {
                    return Err(FxsimError::config(format!(
                        "{self}: band multiplier must be positive"
                    )));
                }
                vec![*period]
            }
        };
        if periods.contains(&0) {
            return Err(FxsimError::config(format!(
                "{self}: period must be positive"
            )));
        }
        if let IndicatorType::Macd { fast, slow, .. } = self {
            if fast >= slow {
                return Err(FxsimError::config(format!(
                    "{self}: fast period must be shorter than slow period"
                )));
            }
        }
        Ok(())
    }

    /// Compute this indicator over `bars`.
    pub fn calculate(&self, bars: &[Bar]) -> Result<IndicatorSeries, FxsimError> {
        self.validate()?;
        let series = match self {
            IndicatorType::Sma(n) => calculate_sma(bars, *n),
            IndicatorType::Ema(n) => calculate_ema(bars, *n),
            IndicatorType::Rsi(n) => calculate_rsi(bars, *n),
            IndicatorType::Atr(n) => calculate_atr(bars, *n),
            IndicatorType::Adx(n) => calculate_adx(bars, *n),
            IndicatorType::Macd { fast, slow, signal } => {
                calculate_macd(bars, *fast, *slow, *signal)
            }
            IndicatorType::Stochastic { k_period, d_period } => {
                calculate_stochastic(bars, *k_period, *d_period)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => calculate_bollinger(bars, *period, *stddev_mult_x100),
        };
        Ok(series)
    }
}

/// Compute every requested indicator once. Every type is validated before
/// any series is computed.
pub fn compute_indicators(
    bars: &[Bar],
    types: &[IndicatorType],
) -> Result<HashMap<IndicatorType, IndicatorSeries>, FxsimError> {
    for t in types {
        t.validate()?;
    }
    let mut map = HashMap::with_capacity(types.len());
    for t in types {
        if !map.contains_key(t) {
            map.insert(t.clone(), t.calculate(bars)?);
        }
    }
    Ok(map)
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Atr(period) => write!(f, "ATR({})", period),
            IndicatorType::Adx(period) => write!(f, "ADX({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Stochastic { k_period, d_period } => {
                write!(f, "STOCHASTIC({},{})", k_period, d_period)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
        }
    }
}
