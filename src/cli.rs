//! CLI definition and dispatch.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_trades_adapter::CsvTradesAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::json_report_adapter::JsonReportAdapter;
use crate::domain::backtest::{BacktestConfig, CancelToken, DEFAULT_CUSTOM_TIME_BUDGET, run_backtest};
use crate::domain::bar::parse_timestamp;
use crate::domain::config_validation::{
    parse_stop_loss, parse_take_profit, validate_backtest_config, validate_data_config,
    validate_strategy_config,
};
use crate::domain::error::FxsimError;
use crate::domain::execution::{CommissionMode, StopLoss, TakeProfit};
use crate::domain::instrument::Instrument;
use crate::domain::rule::{Condition, format_conditions};
use crate::domain::rule_parser::parse_conditions;
use crate::domain::sizing::{DEFAULT_LOT_STEP, DEFAULT_MAX_LOTS, PositionSizing};
use crate::domain::strategy::{IndicatorStrategy, MovingAverage, RulesStrategy, StrategySpec};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use crate::ports::report_port::{ReportPort, RunReport};

#[derive(Parser, Debug)]
#[command(name = "fxsim", about = "Forex strategy backtester")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Override [data] symbol
        #[arg(long)]
        symbol: Option<String>,
        /// Write the JSON report here
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write the trade list as CSV here
        #[arg(long)]
        trades: Option<PathBuf>,
        /// Validate and print the plan without running
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a configuration and show the parsed strategy
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show the data range for a symbol
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
    },
    /// List symbols available in the data directory
    ListSymbols {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Data directory; overrides [data] dir
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            symbol,
            output,
            trades,
            dry_run,
        } => {
            if dry_run {
                run_dry_run(&config)
            } else {
                run_backtest_command(&config, symbol.as_deref(), output.as_deref(), trades.as_deref())
            }
        }
        Command::Validate { config } => run_validate(&config),
        Command::Info { config, symbol } => run_info(&config, symbol.as_deref()),
        Command::ListSymbols { config, data_dir } => {
            run_list_symbols(config.as_deref(), data_dir.as_deref())
        }
    }
}

fn fail(err: &FxsimError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

/// Where the bars come from and how prices are quoted.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSettings {
    pub dir: PathBuf,
    pub instrument: Instrument,
    pub start: Option<chrono::NaiveDateTime>,
    pub end: Option<chrono::NaiveDateTime>,
}

pub fn build_data_settings(
    adapter: &dyn ConfigPort,
    symbol_override: Option<&str>,
) -> Result<DataSettings, FxsimError> {
    let dir = adapter
        .get_string("data", "dir")
        .ok_or_else(|| FxsimError::ConfigMissing {
            section: "data".into(),
            key: "dir".into(),
        })?;
    let symbol = match symbol_override {
        Some(s) => s.to_string(),
        None => adapter
            .get_string("data", "symbol")
            .ok_or_else(|| FxsimError::ConfigMissing {
                section: "data".into(),
                key: "symbol".into(),
            })?,
    };

    let mut instrument = Instrument::forex(&symbol);
    instrument.pip_size = adapter.get_double("data", "pip_size", instrument.pip_size);
    instrument.contract_size = adapter.get_double("data", "contract_size", instrument.contract_size);

    let bound = |key: &str| adapter.get_string("data", key).and_then(|s| parse_timestamp(&s));
    Ok(DataSettings {
        dir: PathBuf::from(dir.trim()),
        instrument,
        start: bound("start"),
        end: bound("end"),
    })
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, FxsimError> {
    let invalid = |key: &str, reason: String| FxsimError::ConfigInvalid {
        section: "backtest".into(),
        key: key.into(),
        reason,
    };

    let commission_mode = match adapter.get_string("backtest", "commission_mode").as_deref() {
        Some("round_trip") => CommissionMode::RoundTrip,
        _ => CommissionMode::PerSide,
    };

    let size = adapter.get_double("backtest", "position_size", 0.1);
    let position_sizing = match adapter
        .get_string("backtest", "position_sizing")
        .as_deref()
        .unwrap_or("fixed")
    {
        "percentage" => PositionSizing::Percentage { pct: size },
        "risk" => PositionSizing::Risk { pct: size },
        _ => PositionSizing::Fixed { lots: size },
    };

    let stop_loss = match adapter.get_string("backtest", "stop_loss") {
        Some(s) => parse_stop_loss(&s).map_err(|r| invalid("stop_loss", r))?,
        None => StopLoss::None,
    };
    let take_profit = match adapter.get_string("backtest", "take_profit") {
        Some(s) => parse_take_profit(&s).map_err(|r| invalid("take_profit", r))?,
        None => TakeProfit::None,
    };

    let spread_pips = adapter
        .get_string("backtest", "spread_pips")
        .and_then(|s| s.trim().parse::<f64>().ok());
    let trailing_stop_pips = adapter
        .get_string("backtest", "trailing_stop_pips")
        .and_then(|s| s.trim().parse::<f64>().ok());
    let budget_ms = adapter.get_int(
        "backtest",
        "custom_time_budget_ms",
        DEFAULT_CUSTOM_TIME_BUDGET.as_millis() as i64,
    );

    Ok(BacktestConfig {
        initial_capital: adapter.get_double("backtest", "initial_capital", 10_000.0),
        commission_per_lot: adapter.get_double("backtest", "commission_per_lot", 0.0),
        commission_mode,
        spread_pips,
        slippage_pips: adapter.get_double("backtest", "slippage_pips", 0.0),
        use_realistic_fills: adapter.get_bool("backtest", "use_realistic_fills", false),
        max_positions: adapter.get_int("backtest", "max_positions", 1).max(0) as usize,
        position_sizing,
        lot_step: adapter.get_double("backtest", "lot_step", DEFAULT_LOT_STEP),
        max_lots: adapter.get_double("backtest", "max_lots", DEFAULT_MAX_LOTS),
        stop_loss,
        take_profit,
        trailing_stop_pips,
        allow_shorting: adapter.get_bool("backtest", "allow_shorting", false),
        custom_time_budget: Duration::from_millis(budget_ms.max(0) as u64),
    })
}

/// Parse one rule key; a blank or missing key is an empty list.
fn parse_rule(adapter: &dyn ConfigPort, key: &str) -> Result<Vec<Condition>, FxsimError> {
    let text = adapter.get_string("strategy", key).unwrap_or_default();
    parse_conditions(&text).map_err(|e| {
        eprintln!(
            "error: failed to parse {key}:\n{}",
            e.display_with_context(&text)
        );
        FxsimError::from(e)
    })
}

pub fn build_strategy(adapter: &dyn ConfigPort) -> Result<StrategySpec, FxsimError> {
    let kind = adapter
        .get_string("strategy", "type")
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_else(|| "rules".into());
    let period = |key: &str, default: i64| adapter.get_int("strategy", key, default).max(0) as usize;
    let level = |key: &str, default: f64| adapter.get_double("strategy", key, default);

    let strategy = match kind.as_str() {
        "rules" => StrategySpec::Rules(RulesStrategy {
            entry_long: parse_rule(adapter, "entry_long")?,
            exit_long: parse_rule(adapter, "exit_long")?,
            entry_short: parse_rule(adapter, "entry_short")?,
            exit_short: parse_rule(adapter, "exit_short")?,
        }),
        "ma_crossover" => {
            let ma = match adapter.get_string("strategy", "ma").as_deref().map(str::trim) {
                Some(s) if s.eq_ignore_ascii_case("ema") => MovingAverage::Ema,
                _ => MovingAverage::Sma,
            };
            StrategySpec::Indicator(IndicatorStrategy::MaCrossover {
                ma,
                fast: period("fast", 10),
                slow: period("slow", 30),
            })
        }
        "rsi" => StrategySpec::Indicator(IndicatorStrategy::Rsi {
            period: period("period", 14),
            oversold: level("oversold", 30.0),
            overbought: level("overbought", 70.0),
        }),
        "macd" => StrategySpec::Indicator(IndicatorStrategy::Macd {
            fast: period("fast", 12),
            slow: period("slow", 26),
            signal: period("signal", 9),
        }),
        "bollinger" => StrategySpec::Indicator(IndicatorStrategy::Bollinger {
            period: period("period", 20),
            k: level("k", 2.0),
        }),
        "stochastic" => StrategySpec::Indicator(IndicatorStrategy::Stochastic {
            k_period: period("k_period", 14),
            d_period: period("d_period", 3),
            oversold: level("oversold", 20.0),
            overbought: level("overbought", 80.0),
        }),
        "adx" => StrategySpec::Indicator(IndicatorStrategy::Adx {
            period: period("period", 14),
            threshold: level("threshold", 25.0),
        }),
        other => {
            return Err(FxsimError::ConfigInvalid {
                section: "strategy".into(),
                key: "type".into(),
                reason: format!("unknown strategy type {other:?}"),
            });
        }
    };
    strategy.validate()?;
    Ok(strategy)
}

/// Everything a run needs, validated and built from one config file.
pub struct RunPlan {
    pub data: DataSettings,
    pub config: BacktestConfig,
    pub strategy: StrategySpec,
}

pub fn build_plan(adapter: &dyn ConfigPort, symbol_override: Option<&str>) -> Result<RunPlan, FxsimError> {
    validate_data_config(adapter)?;
    validate_backtest_config(adapter)?;
    validate_strategy_config(adapter)?;
    let plan = RunPlan {
        data: build_data_settings(adapter, symbol_override)?,
        config: build_backtest_config(adapter)?,
        strategy: build_strategy(adapter)?,
    };
    plan.config.validate()?;
    Ok(plan)
}

fn print_plan(plan: &RunPlan) {
    let instrument = &plan.data.instrument;
    eprintln!("\nData:");
    eprintln!("  dir:        {}", plan.data.dir.display());
    eprintln!("  symbol:     {}", instrument.symbol);
    eprintln!("  pip size:   {}", instrument.pip_size);
    if let Some(start) = plan.data.start {
        eprintln!("  start:      {start}");
    }
    if let Some(end) = plan.data.end {
        eprintln!("  end:        {end}");
    }

    eprintln!("\nStrategy:");
    match &plan.strategy {
        StrategySpec::Rules(r) => {
            for (name, list) in [
                ("entry_long", &r.entry_long),
                ("exit_long", &r.exit_long),
                ("entry_short", &r.entry_short),
                ("exit_short", &r.exit_short),
            ] {
                if !list.is_empty() {
                    eprintln!("  {name:<12}{}", format_conditions(list));
                }
            }
        }
        other => eprintln!("  {}", other.describe()),
    }

    let mut indicators: Vec<String> = plan
        .strategy
        .required_indicators()
        .into_iter()
        .chain(plan.config.required_indicators())
        .map(|t| t.to_string())
        .collect();
    indicators.sort();
    indicators.dedup();
    if !indicators.is_empty() {
        eprintln!("\nIndicators to compute:");
        for ind in &indicators {
            eprintln!("  {ind}");
        }
    }
}

pub fn run_dry_run(config_path: &Path) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let plan = match build_plan(&adapter, None) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };
    print_plan(&plan);
    eprintln!("\nDry run complete: configuration is valid");
    ExitCode::SUCCESS
}

fn run_backtest_command(
    config_path: &Path,
    symbol_override: Option<&str>,
    output_path: Option<&Path>,
    trades_path: Option<&Path>,
) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let plan = match build_plan(&adapter, symbol_override) {
        Ok(p) => p,
        Err(e) => return fail(&e),
    };

    let data_port = CsvAdapter::new(plan.data.dir.clone());
    let instrument = &plan.data.instrument;
    let bars = match data_port.fetch_bars(&instrument.symbol, plan.data.start, plan.data.end) {
        Ok(b) if b.is_empty() => {
            return fail(&FxsimError::NoData {
                symbol: instrument.symbol.clone(),
            });
        }
        Ok(b) => b,
        Err(e) => return fail(&e),
    };

    let description = plan.strategy.describe();
    eprintln!("Running backtest: {} ({} bars)", instrument.symbol, bars.len());
    eprintln!("  Strategy: {description}");

    let result = match run_backtest(
        &bars,
        instrument,
        &plan.strategy,
        &plan.config,
        &CancelToken::new(),
    ) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    let m = &result.metrics;
    eprintln!("\n=== Results ===");
    eprintln!("Net Profit:       {:.2}", m.net_profit);
    eprintln!("Total Return:     {:.2}%", m.total_return_percent);
    eprintln!("Annualized:       {:.2}%", m.annual_return_percent);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.2}%", m.max_drawdown_percent);
    eprintln!("Total Trades:     {}", m.total_trades);
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", m.profit_factor);
    if result.skipped_signal_count > 0 || result.ignored_signal_count > 0 {
        eprintln!(
            "Signals:          {} skipped, {} ignored at capacity",
            result.skipped_signal_count, result.ignored_signal_count
        );
    }

    let report = RunReport {
        symbol: &instrument.symbol,
        strategy: &description,
        result: &result,
    };
    let outputs: [(Option<&Path>, &dyn ReportPort, &str); 2] = [
        (output_path, &JsonReportAdapter, "Report"),
        (trades_path, &CsvTradesAdapter, "Trades"),
    ];
    for (path, port, label) in outputs {
        let Some(path) = path else { continue };
        if let Err(e) = port.write(&report, path) {
            return fail(&e);
        }
        eprintln!("{label} written to: {}", path.display());
    }
    if output_path.is_none() {
        match JsonReportAdapter::to_string(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => return fail(&e),
        }
    }
    ExitCode::SUCCESS
}

fn run_validate(config_path: &Path) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    match build_plan(&adapter, None) {
        Ok(plan) => {
            print_plan(&plan);
            eprintln!("\nConfiguration is valid.");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn run_info(config_path: &Path, symbol_override: Option<&str>) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let data = match build_data_settings(&adapter, symbol_override) {
        Ok(d) => d,
        Err(e) => return fail(&e),
    };
    let port = CsvAdapter::new(data.dir.clone());
    let symbol = &data.instrument.symbol;
    match port.data_range(symbol) {
        Ok(Some((first, last, count))) => {
            println!("{symbol}: {count} bars, {first} to {last}");
            ExitCode::SUCCESS
        }
        Ok(None) => fail(&FxsimError::NoData {
            symbol: symbol.clone(),
        }),
        Err(e) => fail(&e),
    }
}

fn run_list_symbols(config_path: Option<&Path>, data_dir: Option<&Path>) -> ExitCode {
    let dir = match (data_dir, config_path) {
        (Some(dir), _) => dir.to_path_buf(),
        (None, Some(path)) => {
            let adapter = match load_config(path) {
                Ok(a) => a,
                Err(code) => return code,
            };
            match adapter.get_string("data", "dir") {
                Some(d) => PathBuf::from(d.trim()),
                None => {
                    return fail(&FxsimError::ConfigMissing {
                        section: "data".into(),
                        key: "dir".into(),
                    });
                }
            }
        }
        (None, None) => {
            eprintln!("error: --config or --data-dir is required for list-symbols");
            return ExitCode::from(2);
        }
    };

    let symbols = match CsvAdapter::new(dir.clone()).list_symbols() {
        Ok(s) => s,
        Err(e) => return fail(&e),
    };
    if symbols.is_empty() {
        eprintln!("No symbols found in {}", dir.display());
    } else {
        for symbol in &symbols {
            println!("{symbol}");
        }
        eprintln!("{} symbols found", symbols.len());
    }
    ExitCode::SUCCESS
}
