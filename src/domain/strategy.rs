//! Strategy definitions.
//!
//! A strategy is one of three shapes, fixed for the whole run:
//! - `Indicator`: a built-in rule implied by the indicator kind
//! - `Rules`: ordered condition lists per decision
//! - `Custom`: user code behind the `CustomStrategy` trait

use std::fmt;
use std::sync::Arc;

use crate::domain::bar::Bar;
use crate::domain::error::FxsimError;
use crate::domain::indicator::IndicatorType;
use crate::domain::position::{Direction, Position};
use crate::domain::rule::{Condition, format_conditions, referenced_indicators};

pub type StrategyError = Box<dyn std::error::Error + Send + Sync>;

/// User-supplied entry/exit predicates. `history` holds every bar up to and
/// including `bar`.
pub trait CustomStrategy: Send + Sync {
    fn name(&self) -> &str {
        "custom"
    }

    fn should_enter(&self, bar: &Bar, history: &[Bar]) -> Result<Option<Direction>, StrategyError>;

    fn should_exit(
        &self,
        bar: &Bar,
        history: &[Bar],
        position: &Position,
    ) -> Result<bool, StrategyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovingAverage {
    Sma,
    Ema,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorStrategy {
    MaCrossover {
        ma: MovingAverage,
        fast: usize,
        slow: usize,
    },
    Rsi {
        period: usize,
        oversold: f64,
        overbought: f64,
    },
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Bollinger {
        period: usize,
        k: f64,
    },
    Stochastic {
        k_period: usize,
        d_period: usize,
        oversold: f64,
        overbought: f64,
    },
    Adx {
        period: usize,
        threshold: f64,
    },
}

impl IndicatorStrategy {
    pub fn required_indicators(&self) -> Vec<IndicatorType> {
        match *self {
            IndicatorStrategy::MaCrossover { ma, fast, slow } => match ma {
                MovingAverage::Sma => vec![IndicatorType::Sma(fast), IndicatorType::Sma(slow)],
                MovingAverage::Ema => vec![IndicatorType::Ema(fast), IndicatorType::Ema(slow)],
            },
            IndicatorStrategy::Rsi { period, .. } => vec![IndicatorType::Rsi(period)],
            IndicatorStrategy::Macd { fast, slow, signal } => {
                vec![IndicatorType::Macd { fast, slow, signal }]
            }
            IndicatorStrategy::Bollinger { period, k } => vec![IndicatorType::Bollinger {
                period,
                stddev_mult_x100: (k * 100.0).round() as u32,
            }],
            IndicatorStrategy::Stochastic {
                k_period, d_period, ..
            } => vec![IndicatorType::Stochastic { k_period, d_period }],
            IndicatorStrategy::Adx { period, .. } => vec![IndicatorType::Adx(period)],
        }
    }

    pub fn validate(&self) -> Result<(), FxsimError> {
        match *self {
            IndicatorStrategy::MaCrossover { fast, slow, .. } if fast >= slow => {
                return Err(FxsimError::config(format!(
                    "moving average crossover needs fast < slow, got {fast} and {slow}"
                )));
            }
            IndicatorStrategy::Rsi {
                oversold,
                overbought,
                ..
            }
            | IndicatorStrategy::Stochastic {
                oversold,
                overbought,
                ..
            } => validate_band(oversold, overbought)?,
            IndicatorStrategy::Bollinger { k, .. } if !(k.is_finite() && k > 0.0) => {
                return Err(FxsimError::config(format!(
                    "bollinger multiplier must be positive, got {k}"
                )));
            }
            IndicatorStrategy::Adx { threshold, .. }
                if !(threshold.is_finite() && (0.0..=100.0).contains(&threshold)) =>
            {
                return Err(FxsimError::config(format!(
                    "adx threshold must be within 0..=100, got {threshold}"
                )));
            }
            _ => {}
        }
        for t in self.required_indicators() {
            t.validate()?;
        }
        Ok(())
    }
}

fn validate_band(oversold: f64, overbought: f64) -> Result<(), FxsimError> {
    let in_range = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
    if !(in_range(oversold) && in_range(overbought) && oversold < overbought) {
        return Err(FxsimError::config(format!(
            "oscillator thresholds must satisfy 0 <= oversold < overbought <= 100, got {oversold} and {overbought}"
        )));
    }
    Ok(())
}

impl fmt::Display for IndicatorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorStrategy::MaCrossover { ma, fast, slow } => {
                let name = match ma {
                    MovingAverage::Sma => "SMA",
                    MovingAverage::Ema => "EMA",
                };
                write!(f, "{name}({fast}) x {name}({slow}) crossover")
            }
            IndicatorStrategy::Rsi {
                period,
                oversold,
                overbought,
            } => write!(f, "RSI({period}) {oversold}/{overbought}"),
            IndicatorStrategy::Macd { fast, slow, signal } => {
                write!(f, "MACD({fast},{slow},{signal}) signal cross")
            }
            IndicatorStrategy::Bollinger { period, k } => {
                write!(f, "BOLLINGER({period},{k}) band reversal")
            }
            IndicatorStrategy::Stochastic {
                k_period,
                d_period,
                oversold,
                overbought,
            } => write!(
                f,
                "STOCHASTIC({k_period},{d_period}) {oversold}/{overbought}"
            ),
            IndicatorStrategy::Adx { period, threshold } => {
                write!(f, "ADX({period}) > {threshold} DI cross")
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RulesStrategy {
    pub entry_long: Vec<Condition>,
    pub exit_long: Vec<Condition>,
    pub entry_short: Vec<Condition>,
    pub exit_short: Vec<Condition>,
}

impl RulesStrategy {
    fn all_conditions(&self) -> impl Iterator<Item = &Vec<Condition>> {
        [
            &self.entry_long,
            &self.exit_long,
            &self.entry_short,
            &self.exit_short,
        ]
        .into_iter()
    }

    pub fn required_indicators(&self) -> Vec<IndicatorType> {
        let flat: Vec<Condition> = self.all_conditions().flatten().cloned().collect();
        referenced_indicators(&flat)
    }
}

#[derive(Clone)]
pub enum StrategySpec {
    Indicator(IndicatorStrategy),
    Rules(RulesStrategy),
    Custom(Arc<dyn CustomStrategy>),
}

impl StrategySpec {
    /// Indicators the signal evaluator reads.
    pub fn required_indicators(&self) -> Vec<IndicatorType> {
        match self {
            StrategySpec::Indicator(s) => s.required_indicators(),
            StrategySpec::Rules(r) => r.required_indicators(),
            StrategySpec::Custom(_) => Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), FxsimError> {
        match self {
            StrategySpec::Indicator(s) => s.validate(),
            StrategySpec::Rules(r) => {
                if r.entry_long.is_empty() && r.entry_short.is_empty() {
                    return Err(FxsimError::config(
                        "rules strategy has no entry conditions",
                    ));
                }
                for t in r.required_indicators() {
                    t.validate()?;
                }
                Ok(())
            }
            StrategySpec::Custom(_) => Ok(()),
        }
    }

    /// Short human-readable description for reports.
    pub fn describe(&self) -> String {
        match self {
            StrategySpec::Indicator(s) => s.to_string(),
            StrategySpec::Rules(r) => {
                let mut parts = vec![format!("entry_long: {}", format_conditions(&r.entry_long))];
                for (name, list) in [
                    ("exit_long", &r.exit_long),
                    ("entry_short", &r.entry_short),
                    ("exit_short", &r.exit_short),
                ] {
                    if !list.is_empty() {
                        parts.push(format!("{name}: {}", format_conditions(list)));
                    }
                }
                parts.join("; ")
            }
            StrategySpec::Custom(c) => format!("custom: {}", c.name()),
        }
    }
}

impl fmt::Debug for StrategySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategySpec::Indicator(s) => f.debug_tuple("Indicator").field(s).finish(),
            StrategySpec::Rules(r) => f.debug_tuple("Rules").field(r).finish(),
            StrategySpec::Custom(c) => f.debug_tuple("Custom").field(&c.name()).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule_parser::parse_conditions;

    struct AlwaysLong;

    impl CustomStrategy for AlwaysLong {
        fn name(&self) -> &str {
            "always-long"
        }

        fn should_enter(&self, _bar: &Bar, _history: &[Bar]) -> Result<Option<Direction>, StrategyError> {
            Ok(Some(Direction::Long))
        }

        fn should_exit(&self, _bar: &Bar, _history: &[Bar], _position: &Position) -> Result<bool, StrategyError> {
            Ok(false)
        }
    }

    #[test]
    fn ma_crossover_requires_both_averages() {
        let s = IndicatorStrategy::MaCrossover {
            ma: MovingAverage::Ema,
            fast: 10,
            slow: 30,
        };
        assert_eq!(
            s.required_indicators(),
            vec![IndicatorType::Ema(10), IndicatorType::Ema(30)]
        );
        assert!(s.validate().is_ok());
    }

    #[test]
    fn ma_crossover_fast_must_be_shorter() {
        let s = IndicatorStrategy::MaCrossover {
            ma: MovingAverage::Sma,
            fast: 30,
            slow: 10,
        };
        assert!(matches!(s.validate(), Err(FxsimError::Config { .. })));
    }

    #[test]
    fn zero_period_rejected() {
        let s = IndicatorStrategy::Rsi {
            period: 0,
            oversold: 30.0,
            overbought: 70.0,
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let s = IndicatorStrategy::Stochastic {
            k_period: 14,
            d_period: 3,
            oversold: 80.0,
            overbought: 20.0,
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn bollinger_multiplier_maps_to_indicator_key() {
        let s = IndicatorStrategy::Bollinger { period: 20, k: 2.5 };
        assert_eq!(
            s.required_indicators(),
            vec![IndicatorType::Bollinger {
                period: 20,
                stddev_mult_x100: 250
            }]
        );
    }

    #[test]
    fn rules_strategy_collects_indicators() {
        let spec = StrategySpec::Rules(RulesStrategy {
            entry_long: parse_conditions("close crosses_above SMA(20)").unwrap(),
            exit_long: parse_conditions("RSI(14) > 70 OR close < SMA(20)").unwrap(),
            ..Default::default()
        });
        assert_eq!(
            spec.required_indicators(),
            vec![IndicatorType::Sma(20), IndicatorType::Rsi(14)]
        );
        assert!(spec.validate().is_ok());
        assert_eq!(
            spec.describe(),
            "entry_long: close crosses_above SMA(20); exit_long: RSI(14) > 70 OR close < SMA(20)"
        );
    }

    #[test]
    fn rules_strategy_without_entries_rejected() {
        let spec = StrategySpec::Rules(RulesStrategy::default());
        assert!(spec.validate().is_err());
    }

    #[test]
    fn custom_strategy_describes_itself() {
        let spec = StrategySpec::Custom(Arc::new(AlwaysLong));
        assert!(spec.required_indicators().is_empty());
        assert_eq!(spec.describe(), "custom: always-long");
        assert_eq!(format!("{spec:?}"), "Custom(\"always-long\")");
    }
}
