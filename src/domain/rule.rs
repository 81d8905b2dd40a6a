//! Condition data structures for rules-based strategies.
//!
//! A rules strategy is a flat, ordered list of conditions per decision:
//! - `Operand`: what can be compared (price fields, constants, indicators)
//! - `IndicatorRef`: an indicator with a specific output field
//! - `Comparator`: relational or crossover operator
//! - `Logic`: how a condition joins the accumulated result of those before it

use std::fmt;

use crate::domain::indicator::IndicatorType;

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Open,
    High,
    Low,
    Close,
    Volume,
    Constant(f64),
    Indicator(IndicatorRef),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRef {
    pub indicator_type: IndicatorType,
    pub field: IndicatorField,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorField {
    Value,
    MacdLine,
    MacdSignal,
    MacdHistogram,
    StochasticK,
    StochasticD,
    BollingerUpper,
    BollingerMiddle,
    BollingerLower,
    Adx,
    PlusDi,
    MinusDi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    Equal,
    CrossesAbove,
    CrossesBelow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    #[default]
    And,
    Or,
}

/// One `{field, operator, value, logic}` entry. `logic` joins this condition to
/// the result accumulated so far and is ignored on the first condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: Operand,
    pub comparator: Comparator,
    pub right: Operand,
    pub logic: Logic,
}

impl Operand {
    pub fn indicator_type(&self) -> Option<&IndicatorType> {
        match self {
            Operand::Indicator(r) => Some(&r.indicator_type),
            _ => None,
        }
    }
}

/// Every indicator referenced by `conditions`, in first-use order, without duplicates.
pub fn referenced_indicators(conditions: &[Condition]) -> Vec<IndicatorType> {
    let mut out: Vec<IndicatorType> = Vec::new();
    for c in conditions {
        for t in [c.left.indicator_type(), c.right.indicator_type()]
            .into_iter()
            .flatten()
        {
            if !out.contains(t) {
                out.push(t.clone());
            }
        }
    }
    out
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Open => write!(f, "open"),
            Operand::High => write!(f, "high"),
            Operand::Low => write!(f, "low"),
            Operand::Close => write!(f, "close"),
            Operand::Volume => write!(f, "volume"),
            Operand::Constant(v) => write!(f, "{}", v),
            Operand::Indicator(r) => {
                let prefix = match r.field {
                    IndicatorField::Value | IndicatorField::Adx => None,
                    IndicatorField::MacdLine => Some("MACD_LINE"),
                    IndicatorField::MacdSignal => Some("MACD_SIGNAL"),
                    IndicatorField::MacdHistogram => Some("MACD_HISTOGRAM"),
                    IndicatorField::StochasticK => Some("STOCHASTIC_K"),
                    IndicatorField::StochasticD => Some("STOCHASTIC_D"),
                    IndicatorField::BollingerUpper => Some("BOLLINGER_UPPER"),
                    IndicatorField::BollingerMiddle => Some("BOLLINGER_MIDDLE"),
                    IndicatorField::BollingerLower => Some("BOLLINGER_LOWER"),
                    IndicatorField::PlusDi => Some("PLUS_DI"),
                    IndicatorField::MinusDi => Some("MINUS_DI"),
                };
                match prefix {
                    None => write!(f, "{}", r.indicator_type),
                    Some(p) => {
                        // reuse the "(args)" suffix of the indicator's own display
                        let full = r.indicator_type.to_string();
                        let args = full.find('(').map(|i| &full[i..]).unwrap_or("");
                        write!(f, "{}{}", p, args)
                    }
                }
            }
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::Greater => ">",
            Comparator::GreaterOrEqual => ">=",
            Comparator::Less => "<",
            Comparator::LessOrEqual => "<=",
            Comparator::Equal => "==",
            Comparator::CrossesAbove => "crosses_above",
            Comparator::CrossesBelow => "crosses_below",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.comparator, self.right)
    }
}

/// Render a condition list back into the text form accepted by the parser.
pub fn format_conditions(conditions: &[Condition]) -> String {
    let mut out = String::new();
    for (i, c) in conditions.iter().enumerate() {
        if i > 0 {
            out.push_str(match c.logic {
                Logic::And => " AND ",
                Logic::Or => " OR ",
            });
        }
        out.push_str(&c.to_string());
    }
    out
}
