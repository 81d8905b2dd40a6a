//! Configuration validation.
//!
//! Validates every INI field before a backtest is built. Sections:
//! `[data]`, `[backtest]`, `[strategy]`.

use crate::domain::bar::parse_timestamp;
use crate::domain::error::FxsimError;
use crate::domain::execution::{StopLoss, TakeProfit};
use crate::ports::config_port::ConfigPort;

pub const STRATEGY_TYPES: [&str; 7] = [
    "rules",
    "ma_crossover",
    "rsi",
    "macd",
    "bollinger",
    "stochastic",
    "adx",
];

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> FxsimError {
    FxsimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> FxsimError {
    FxsimError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

/// A present, non-blank value.
fn value(config: &dyn ConfigPort, section: &str, key: &str) -> Option<String> {
    config
        .get_string(section, key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, FxsimError> {
    match value(config, section, key) {
        None => Ok(None),
        Some(s) => s
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(section, key, format!("expected a number, got {s:?}"))),
    }
}

fn integer(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<i64>, FxsimError> {
    match value(config, section, key) {
        None => Ok(None),
        Some(s) => s
            .parse::<i64>()
            .map(Some)
            .map_err(|_| invalid(section, key, format!("expected an integer, got {s:?}"))),
    }
}

fn require_positive(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), FxsimError> {
    if let Some(v) = number(config, section, key)? {
        if v <= 0.0 {
            return Err(invalid(section, key, format!("{key} must be positive")));
        }
    }
    Ok(())
}

fn require_non_negative(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), FxsimError> {
    if let Some(v) = number(config, section, key)? {
        if v < 0.0 {
            return Err(invalid(section, key, format!("{key} must be non-negative")));
        }
    }
    Ok(())
}

fn require_bool(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), FxsimError> {
    match value(config, section, key) {
        None => Ok(()),
        Some(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "1" | "false" | "no" | "0" => Ok(()),
            _ => Err(invalid(section, key, format!("expected a boolean, got {s:?}"))),
        },
    }
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), FxsimError> {
    if value(config, "data", "dir").is_none() {
        return Err(missing("data", "dir"));
    }
    if value(config, "data", "symbol").is_none() {
        return Err(missing("data", "symbol"));
    }

    let mut bounds = [None, None];
    for (slot, key) in bounds.iter_mut().zip(["start", "end"]) {
        if let Some(s) = value(config, "data", key) {
            let ts = parse_timestamp(&s).ok_or_else(|| {
                invalid(
                    "data",
                    key,
                    format!("invalid {key} {s:?}, expected YYYY-MM-DD[ HH:MM:SS]"),
                )
            })?;
            *slot = Some(ts);
        }
    }
    if let [Some(start), Some(end)] = bounds {
        if start >= end {
            return Err(invalid("data", "start", "start must be before end"));
        }
    }

    require_positive(config, "data", "pip_size")?;
    require_positive(config, "data", "contract_size")?;
    Ok(())
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), FxsimError> {
    validate_initial_capital(config)?;
    require_non_negative(config, "backtest", "commission_per_lot")?;
    validate_commission_mode(config)?;
    require_non_negative(config, "backtest", "spread_pips")?;
    require_non_negative(config, "backtest", "slippage_pips")?;
    require_bool(config, "backtest", "use_realistic_fills")?;
    require_bool(config, "backtest", "allow_shorting")?;
    validate_max_positions(config)?;
    validate_position_sizing(config)?;
    require_positive(config, "backtest", "lot_step")?;
    require_positive(config, "backtest", "max_lots")?;
    validate_levels(config)?;
    require_positive(config, "backtest", "trailing_stop_pips")?;
    if let Some(ms) = integer(config, "backtest", "custom_time_budget_ms")? {
        if ms <= 0 {
            return Err(invalid(
                "backtest",
                "custom_time_budget_ms",
                "custom_time_budget_ms must be positive",
            ));
        }
    }
    Ok(())
}

fn validate_initial_capital(config: &dyn ConfigPort) -> Result<(), FxsimError> {
    match number(config, "backtest", "initial_capital")? {
        None => Err(missing("backtest", "initial_capital")),
        Some(v) if v <= 0.0 => Err(invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        )),
        Some(_) => Ok(()),
    }
}

fn validate_commission_mode(config: &dyn ConfigPort) -> Result<(), FxsimError> {
    match value(config, "backtest", "commission_mode").as_deref() {
        None | Some("per_side") | Some("round_trip") => Ok(()),
        Some(other) => Err(invalid(
            "backtest",
            "commission_mode",
            format!("expected per_side or round_trip, got {other:?}"),
        )),
    }
}

fn validate_max_positions(config: &dyn ConfigPort) -> Result<(), FxsimError> {
    if let Some(v) = integer(config, "backtest", "max_positions")? {
        if v < 1 {
            return Err(invalid(
                "backtest",
                "max_positions",
                "max_positions must be at least 1",
            ));
        }
    }
    Ok(())
}

fn validate_position_sizing(config: &dyn ConfigPort) -> Result<(), FxsimError> {
    let kind = value(config, "backtest", "position_sizing").unwrap_or_else(|| "fixed".into());
    let size = number(config, "backtest", "position_size")?;
    match kind.as_str() {
        "fixed" => {
            if size.is_some_and(|s| s <= 0.0) {
                return Err(invalid(
                    "backtest",
                    "position_size",
                    "fixed position_size must be a positive lot count",
                ));
            }
        }
        "percentage" | "risk" => match size {
            None => return Err(missing("backtest", "position_size")),
            Some(s) if s <= 0.0 || s > 100.0 => {
                return Err(invalid(
                    "backtest",
                    "position_size",
                    "position_size must be a percentage between 0 and 100",
                ));
            }
            Some(_) => {}
        },
        other => {
            return Err(invalid(
                "backtest",
                "position_sizing",
                format!("expected fixed, percentage or risk, got {other:?}"),
            ));
        }
    }
    Ok(())
}

fn validate_levels(config: &dyn ConfigPort) -> Result<(), FxsimError> {
    if let Some(s) = value(config, "backtest", "stop_loss") {
        parse_stop_loss(&s).map_err(|reason| invalid("backtest", "stop_loss", reason))?;
    }
    if let Some(s) = value(config, "backtest", "take_profit") {
        parse_take_profit(&s).map_err(|reason| invalid("backtest", "take_profit", reason))?;
    }
    Ok(())
}

fn level_args(spec: &str) -> (String, Vec<&str>) {
    let mut parts = spec.split(':').map(str::trim);
    let kind = parts.next().unwrap_or_default().to_lowercase();
    (kind, parts.collect())
}

fn positive_arg(raw: &str, what: &str) -> Result<f64, String> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
        .ok_or_else(|| format!("{what} must be a positive number, got {raw:?}"))
}

fn period_arg(raw: &str) -> Result<usize, String> {
    raw.parse::<usize>()
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| format!("ATR period must be a positive integer, got {raw:?}"))
}

/// `none`, `pips:<n>`, `atr:<period>:<multiplier>` or `pct:<percent>`.
pub fn parse_stop_loss(spec: &str) -> Result<StopLoss, String> {
    let (kind, args) = level_args(spec);
    match (kind.as_str(), args.as_slice()) {
        ("none", []) => Ok(StopLoss::None),
        ("pips", [pips]) => Ok(StopLoss::FixedPips {
            pips: positive_arg(pips, "pips")?,
        }),
        ("atr", [period, multiplier]) => Ok(StopLoss::AtrMultiple {
            period: period_arg(period)?,
            multiplier: positive_arg(multiplier, "multiplier")?,
        }),
        ("pct", [pct]) => {
            let pct = positive_arg(pct, "percentage")?;
            if pct > 100.0 {
                return Err(format!("percentage must be at most 100, got {pct}"));
            }
            Ok(StopLoss::Percentage { pct })
        }
        _ => Err(format!(
            "expected none, pips:<n>, atr:<period>:<multiplier> or pct:<percent>, got {spec:?}"
        )),
    }
}

/// As [`parse_stop_loss`], plus `rr:<ratio>` (a multiple of the stop distance).
pub fn parse_take_profit(spec: &str) -> Result<TakeProfit, String> {
    let (kind, args) = level_args(spec);
    match (kind.as_str(), args.as_slice()) {
        ("none", []) => Ok(TakeProfit::None),
        ("pips", [pips]) => Ok(TakeProfit::FixedPips {
            pips: positive_arg(pips, "pips")?,
        }),
        ("atr", [period, multiplier]) => Ok(TakeProfit::AtrMultiple {
            period: period_arg(period)?,
            multiplier: positive_arg(multiplier, "multiplier")?,
        }),
        ("pct", [pct]) => Ok(TakeProfit::Percentage {
            pct: positive_arg(pct, "percentage")?,
        }),
        ("rr", [ratio]) => Ok(TakeProfit::RiskReward {
            ratio: positive_arg(ratio, "ratio")?,
        }),
        _ => Err(format!(
            "expected none, pips:<n>, atr:<period>:<multiplier>, pct:<percent> or rr:<ratio>, got {spec:?}"
        )),
    }
}

/// Checks the strategy type and the keys it needs. Rule syntax is checked when
/// the rules are parsed.
pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), FxsimError> {
    let kind = value(config, "strategy", "type").unwrap_or_else(|| "rules".into());
    let required: &[&str] = match kind.as_str() {
        "rules" => {
            if value(config, "strategy", "entry_long").is_none()
                && value(config, "strategy", "entry_short").is_none()
            {
                return Err(missing("strategy", "entry_long"));
            }
            &[]
        }
        "ma_crossover" => &["fast", "slow"],
        "rsi" => &["period"],
        "macd" => &[],
        "bollinger" => &["period"],
        "stochastic" => &["k_period", "d_period"],
        "adx" => &["period"],
        other => {
            return Err(invalid(
                "strategy",
                "type",
                format!("unknown strategy type {other:?}, expected one of {}", STRATEGY_TYPES.join(", ")),
            ));
        }
    };
    for key in required {
        if value(config, "strategy", key).is_none() {
            return Err(missing("strategy", key));
        }
    }

    for key in ["period", "fast", "slow", "signal", "k_period", "d_period"] {
        if let Some(v) = integer(config, "strategy", key)? {
            if v < 1 {
                return Err(invalid("strategy", key, format!("{key} must be at least 1")));
            }
        }
    }
    for key in ["oversold", "overbought", "threshold"] {
        if let Some(v) = number(config, "strategy", key)? {
            if !(0.0..=100.0).contains(&v) {
                return Err(invalid(
                    "strategy",
                    key,
                    format!("{key} must be between 0 and 100"),
                ));
            }
        }
    }
    require_positive(config, "strategy", "k")?;
    if let Some(ma) = value(config, "strategy", "ma") {
        if !matches!(ma.to_lowercase().as_str(), "sma" | "ema") {
            return Err(invalid("strategy", "ma", format!("expected sma or ema, got {ma:?}")));
        }
    }
    Ok(())
}
