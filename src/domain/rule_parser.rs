//! Condition list parser.
//!
//! Recursive descent parser for the condition grammar used by rules strategies:
//!
//! ```text
//! conditions := ε | condition (("AND" | "OR") condition)*
//! condition  := operand comparator operand
//! comparator := ">" | ">=" | "<" | "<=" | "==" | "crosses_above" | "crosses_below"
//! operand    := number | open | high | low | close | volume | indicator
//! ```
//!
//! Errors carry the character offset of the offending token.

use crate::domain::error::ParseError;
use crate::domain::indicator::IndicatorType;
use crate::domain::rule::{Comparator, Condition, IndicatorField, IndicatorRef, Logic, Operand};

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.error(format!("expected '{}', found end of input", expected))),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        let remaining = self.remaining();
        remaining.starts_with(keyword)
            && !remaining[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> String {
        let word: String = self
            .remaining()
            .chars()
            .take_while(|ch| ch.is_alphanumeric() || *ch == '_')
            .collect();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_integer(&mut self) -> Result<usize, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            self.advance();
        }
        if start == self.pos {
            return Err(ParseError {
                message: "expected integer".to_string(),
                position: start,
            });
        }
        let num_str = &self.input[start..self.pos];
        num_str.parse::<usize>().map_err(|_| ParseError {
            message: format!("invalid integer: {}", num_str),
            position: start,
        })
    }

    /// `(a)` for single-period indicators.
    fn parse_period_args(&mut self) -> Result<usize, ParseError> {
        self.expect_char('(')?;
        let period = self.parse_integer()?;
        self.expect_char(')')?;
        Ok(period)
    }

    fn parse_macd_args(&mut self) -> Result<IndicatorType, ParseError> {
        self.expect_char('(')?;
        let fast = self.parse_integer()?;
        self.expect_char(',')?;
        let slow = self.parse_integer()?;
        self.expect_char(',')?;
        let signal = self.parse_integer()?;
        self.expect_char(')')?;
        Ok(IndicatorType::Macd { fast, slow, signal })
    }

    fn parse_stochastic_args(&mut self) -> Result<IndicatorType, ParseError> {
        self.expect_char('(')?;
        let k_period = self.parse_integer()?;
        self.expect_char(',')?;
        let d_period = self.parse_integer()?;
        self.expect_char(')')?;
        Ok(IndicatorType::Stochastic { k_period, d_period })
    }

    fn parse_bollinger_args(&mut self) -> Result<IndicatorType, ParseError> {
        self.expect_char('(')?;
        let period = self.parse_integer()?;
        self.expect_char(',')?;
        let start = self.pos;
        let mult = self.parse_number()?;
        if mult <= 0.0 {
            return Err(ParseError {
                message: format!("band multiplier must be positive, found {}", mult),
                position: start,
            });
        }
        self.expect_char(')')?;
        Ok(IndicatorType::Bollinger {
            period,
            stddev_mult_x100: (mult * 100.0).round() as u32,
        })
    }

    fn parse_indicator(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let word: String = self
            .remaining()
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .collect();
        self.pos += word.len();

        let (indicator_type, field) = match word.as_str() {
            "SMA" => (IndicatorType::Sma(self.parse_period_args()?), IndicatorField::Value),
            "EMA" => (IndicatorType::Ema(self.parse_period_args()?), IndicatorField::Value),
            "RSI" => (IndicatorType::Rsi(self.parse_period_args()?), IndicatorField::Value),
            "ATR" => (IndicatorType::Atr(self.parse_period_args()?), IndicatorField::Value),
            "ADX" => (IndicatorType::Adx(self.parse_period_args()?), IndicatorField::Adx),
            "PLUS_DI" => (IndicatorType::Adx(self.parse_period_args()?), IndicatorField::PlusDi),
            "MINUS_DI" => (IndicatorType::Adx(self.parse_period_args()?), IndicatorField::MinusDi),
            "MACD_LINE" => (self.parse_macd_args()?, IndicatorField::MacdLine),
            "MACD_SIGNAL" => (self.parse_macd_args()?, IndicatorField::MacdSignal),
            "MACD_HISTOGRAM" => (self.parse_macd_args()?, IndicatorField::MacdHistogram),
            "STOCHASTIC_K" => (self.parse_stochastic_args()?, IndicatorField::StochasticK),
            "STOCHASTIC_D" => (self.parse_stochastic_args()?, IndicatorField::StochasticD),
            "BOLLINGER_UPPER" => (self.parse_bollinger_args()?, IndicatorField::BollingerUpper),
            "BOLLINGER_MIDDLE" => (self.parse_bollinger_args()?, IndicatorField::BollingerMiddle),
            "BOLLINGER_LOWER" => (self.parse_bollinger_args()?, IndicatorField::BollingerLower),
            _ => {
                self.pos = start;
                return Err(self.error(format!("expected operand, found '{}'", self.peek_word())));
            }
        };

        Ok(Operand::Indicator(IndicatorRef {
            indicator_type,
            field,
        }))
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();

        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            let num = self.parse_number()?;
            return Ok(Operand::Constant(num));
        }

        for (name, operand) in [
            ("open", Operand::Open),
            ("high", Operand::High),
            ("low", Operand::Low),
            ("close", Operand::Close),
            ("volume", Operand::Volume),
        ] {
            if self.consume_keyword(name) {
                return Ok(operand);
            }
        }

        self.parse_indicator()
    }

    fn parse_comparator(&mut self) -> Result<Comparator, ParseError> {
        self.skip_whitespace();
        // two-character operators must be tried first
        for (token, comparator) in [
            (">=", Comparator::GreaterOrEqual),
            ("<=", Comparator::LessOrEqual),
            ("==", Comparator::Equal),
            (">", Comparator::Greater),
            ("<", Comparator::Less),
        ] {
            if self.remaining().starts_with(token) {
                self.pos += token.len();
                return Ok(comparator);
            }
        }
        for (keyword, comparator) in [
            ("crosses_above", Comparator::CrossesAbove),
            ("crosses_below", Comparator::CrossesBelow),
        ] {
            if self.consume_keyword(keyword) {
                return Ok(comparator);
            }
        }
        let found = self.peek_word();
        Err(self.error(format!(
            "expected comparator (>, >=, <, <=, ==, crosses_above, crosses_below), found '{}'",
            found
        )))
    }

    fn parse_condition(&mut self, logic: Logic) -> Result<Condition, ParseError> {
        let left = self.parse_operand()?;
        let comparator = self.parse_comparator()?;
        let right = self.parse_operand()?;
        Ok(Condition {
            left,
            comparator,
            right,
            logic,
        })
    }

    fn parse_logic(&mut self) -> Option<Logic> {
        self.skip_whitespace();
        if self.consume_keyword("AND") || self.consume_keyword("and") {
            Some(Logic::And)
        } else if self.consume_keyword("OR") || self.consume_keyword("or") {
            Some(Logic::Or)
        } else {
            None
        }
    }

    fn parse(&mut self) -> Result<Vec<Condition>, ParseError> {
        self.skip_whitespace();
        if self.pos == self.input.len() {
            return Ok(Vec::new());
        }

        let mut conditions = vec![self.parse_condition(Logic::And)?];
        while let Some(logic) = self.parse_logic() {
            conditions.push(self.parse_condition(logic)?);
        }

        self.skip_whitespace();
        if self.pos < self.input.len() {
            return Err(self.error(format!(
                "expected AND, OR or end of input, found '{}'",
                self.peek_word()
            )));
        }
        Ok(conditions)
    }
}

/// Parse a condition list. Blank input yields an empty list, which never fires.
pub fn parse_conditions(input: &str) -> Result<Vec<Condition>, ParseError> {
    Parser::new(input).parse()
}
