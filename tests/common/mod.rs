#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use fxsim::domain::backtest::{BacktestConfig, BacktestResult, CancelToken, run_backtest};
use fxsim::domain::bar::Bar;
use fxsim::domain::error::FxsimError;
use fxsim::domain::instrument::Instrument;
use fxsim::domain::position::{Direction, Position};
use fxsim::domain::rule_parser::parse_conditions;
use fxsim::domain::strategy::{CustomStrategy, RulesStrategy, StrategyError, StrategySpec};
use fxsim::ports::data_port::DataPort;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }

    fn check(&self, symbol: &str) -> Result<(), FxsimError> {
        match self.errors.get(symbol) {
            Some(reason) => Err(FxsimError::Data {
                index: 0,
                timestamp: ts(0),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, FxsimError> {
        self.check(symbol)?;
        let bars = self.data.get(symbol).cloned().unwrap_or_default();
        Ok(bars
            .into_iter()
            .filter(|b| start.is_none_or(|s| b.timestamp >= s))
            .filter(|b| end.is_none_or(|e| b.timestamp <= e))
            .collect())
    }

    fn list_symbols(&self) -> Result<Vec<String>, FxsimError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }

    fn data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, FxsimError> {
        self.check(symbol)?;
        match self.data.get(symbol) {
            Some(bars) if !bars.is_empty() => {
                let min = bars.iter().map(|b| b.timestamp).min().unwrap();
                let max = bars.iter().map(|b| b.timestamp).max().unwrap();
                Ok(Some((min, max, bars.len())))
            }
            _ => Ok(None),
        }
    }
}

/// 2024-01-01 00:00 plus `hours`.
pub fn ts(hours: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::hours(hours)
}

pub fn bar(hour: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: ts(hour),
        open,
        high,
        low,
        close,
        volume: 1000.0,
        spread: None,
    }
}

/// Bars with open = high = low = close.
pub fn flat_bars(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| bar(i as i64, c, c, c, c))
        .collect()
}

/// A deterministic oscillating series: each bar opens at the previous close.
pub fn wave_bars(count: usize) -> Vec<Bar> {
    let mut prev = 1.1000;
    (0..count)
        .map(|i| {
            let t = i as f64;
            let close = 1.1000 + 0.0080 * (t / 6.0).sin() + 0.0020 * (t / 2.3).cos();
            let open = prev;
            prev = close;
            bar(
                i as i64,
                open,
                open.max(close) + 0.0006,
                open.min(close) - 0.0006,
                close,
            )
        })
        .collect()
}

pub fn eurusd() -> Instrument {
    Instrument::forex("EURUSD")
}

pub fn rules_long(entry: &str, exit: &str) -> StrategySpec {
    StrategySpec::Rules(RulesStrategy {
        entry_long: parse_conditions(entry).unwrap(),
        exit_long: parse_conditions(exit).unwrap(),
        ..RulesStrategy::default()
    })
}

pub fn run(bars: &[Bar], strategy: &StrategySpec, config: &BacktestConfig) -> BacktestResult {
    run_backtest(bars, &eurusd(), strategy, config, &CancelToken::new()).unwrap()
}

/// Enters once at bar `at` and never exits on its own.
pub struct EnterAt {
    pub at: usize,
    pub direction: Direction,
}

impl CustomStrategy for EnterAt {
    fn name(&self) -> &str {
        "enter-at"
    }

    fn should_enter(&self, _bar: &Bar, history: &[Bar]) -> Result<Option<Direction>, StrategyError> {
        Ok((history.len() - 1 == self.at).then_some(self.direction))
    }

    fn should_exit(&self, _bar: &Bar, _history: &[Bar], _position: &Position) -> Result<bool, StrategyError> {
        Ok(false)
    }
}

/// Wants a long position on every bar.
pub struct AlwaysLong;

impl CustomStrategy for AlwaysLong {
    fn should_enter(&self, _bar: &Bar, _history: &[Bar]) -> Result<Option<Direction>, StrategyError> {
        Ok(Some(Direction::Long))
    }

    fn should_exit(&self, _bar: &Bar, _history: &[Bar], _position: &Position) -> Result<bool, StrategyError> {
        Ok(false)
    }
}

/// Fails at bar `at`, by error or by panic.
pub struct FailAt {
    pub at: usize,
    pub panic: bool,
}

impl CustomStrategy for FailAt {
    fn name(&self) -> &str {
        "fail-at"
    }

    fn should_enter(&self, _bar: &Bar, history: &[Bar]) -> Result<Option<Direction>, StrategyError> {
        if history.len() - 1 == self.at {
            if self.panic {
                panic!("strategy blew up");
            }
            return Err("boom".into());
        }
        Ok(None)
    }

    fn should_exit(&self, _bar: &Bar, _history: &[Bar], _position: &Position) -> Result<bool, StrategyError> {
        Ok(false)
    }
}

pub fn custom(strategy: impl CustomStrategy + 'static) -> StrategySpec {
    StrategySpec::Custom(Arc::new(strategy))
}
