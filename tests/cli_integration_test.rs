//! CLI integration tests.
//!
//! Tests cover:
//! - Config parsing (build_backtest_config, build_strategy, build_data_settings)
//! - Validation failures and their exit codes
//! - Full backtest command against CSV data and INI files on disk

mod common;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use common::*;
use fxsim::adapters::file_config_adapter::FileConfigAdapter;
use fxsim::cli::{self, Cli, Command};
use fxsim::domain::error::FxsimError;
use fxsim::domain::execution::{CommissionMode, StopLoss, TakeProfit};
use fxsim::domain::sizing::PositionSizing;
use fxsim::domain::strategy::{IndicatorStrategy, MovingAverage, StrategySpec};

fn write_temp_ini(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Same exit status, compared through Debug since ExitCode has no PartialEq.
fn assert_exit(code: ExitCode, expected: u8) {
    assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::from(expected)));
}

fn write_csv(dir: &Path, symbol: &str, count: usize) {
    let mut content = String::from("timestamp,open,high,low,close,volume\n");
    for b in wave_bars(count) {
        content.push_str(&format!(
            "{},{:.5},{:.5},{:.5},{:.5},{}\n",
            b.timestamp.format("%Y-%m-%d %H:%M:%S"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    fs::write(dir.join(format!("{symbol}.csv")), content).unwrap();
}

const VALID_INI: &str = r#"
[data]
dir = ./data
symbol = EURUSD

[backtest]
initial_capital = 25000
commission_per_lot = 7
commission_mode = round_trip
spread_pips = 1.5
slippage_pips = 0.2
use_realistic_fills = true
max_positions = 3
position_sizing = risk
position_size = 2
stop_loss = atr:14:2.5
take_profit = rr:2
trailing_stop_pips = 25
allow_shorting = yes
custom_time_budget_ms = 250

[strategy]
type = rules
entry_long = close > SMA(20) AND RSI(14) < 70
exit_long = close < SMA(20)
"#;

mod config_building {
    use super::*;

    #[test]
    fn build_backtest_config_valid_full() {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let config = cli::build_backtest_config(&adapter).unwrap();

        assert!((config.initial_capital - 25_000.0).abs() < f64::EPSILON);
        assert!((config.commission_per_lot - 7.0).abs() < f64::EPSILON);
        assert_eq!(config.commission_mode, CommissionMode::RoundTrip);
        assert_eq!(config.spread_pips, Some(1.5));
        assert!((config.slippage_pips - 0.2).abs() < f64::EPSILON);
        assert!(config.use_realistic_fills);
        assert_eq!(config.max_positions, 3);
        assert_eq!(config.position_sizing, PositionSizing::Risk { pct: 2.0 });
        assert_eq!(
            config.stop_loss,
            StopLoss::AtrMultiple {
                period: 14,
                multiplier: 2.5
            }
        );
        assert_eq!(config.take_profit, TakeProfit::RiskReward { ratio: 2.0 });
        assert_eq!(config.trailing_stop_pips, Some(25.0));
        assert!(config.allow_shorting);
        assert_eq!(config.custom_time_budget, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn build_backtest_config_uses_defaults() {
        let adapter = FileConfigAdapter::from_string("[backtest]\ninitial_capital = 5000\n").unwrap();
        let config = cli::build_backtest_config(&adapter).unwrap();

        assert!((config.initial_capital - 5_000.0).abs() < f64::EPSILON);
        assert_eq!(config.commission_mode, CommissionMode::PerSide);
        assert_eq!(config.spread_pips, None);
        assert_eq!(config.max_positions, 1);
        assert_eq!(config.position_sizing, PositionSizing::Fixed { lots: 0.1 });
        assert_eq!(config.stop_loss, StopLoss::None);
        assert_eq!(config.take_profit, TakeProfit::None);
        assert!(!config.use_realistic_fills);
        assert!(!config.allow_shorting);
    }

    #[test]
    fn build_backtest_config_rejects_bad_stop() {
        let adapter = FileConfigAdapter::from_string("[backtest]\nstop_loss = atr:14\n").unwrap();
        let err = cli::build_backtest_config(&adapter).unwrap_err();
        assert!(matches!(err, FxsimError::ConfigInvalid { key, .. } if key == "stop_loss"));
    }

    #[test]
    fn build_strategy_rules() {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        match cli::build_strategy(&adapter).unwrap() {
            StrategySpec::Rules(rules) => {
                assert_eq!(rules.entry_long.len(), 2);
                assert_eq!(rules.exit_long.len(), 1);
                assert!(rules.entry_short.is_empty());
                assert!(rules.exit_short.is_empty());
            }
            other => panic!("expected rules strategy, got {other:?}"),
        }
    }

    #[test]
    fn build_strategy_ma_crossover() {
        let adapter = FileConfigAdapter::from_string(
            "[strategy]\ntype = ma_crossover\nma = ema\nfast = 8\nslow = 21\n",
        )
        .unwrap();
        let strategy = cli::build_strategy(&adapter).unwrap();
        assert!(matches!(
            strategy,
            StrategySpec::Indicator(IndicatorStrategy::MaCrossover {
                ma: MovingAverage::Ema,
                fast: 8,
                slow: 21
            })
        ));
    }

    #[test]
    fn build_strategy_indicator_defaults() {
        let adapter = FileConfigAdapter::from_string("[strategy]\ntype = rsi\n").unwrap();
        match cli::build_strategy(&adapter).unwrap() {
            StrategySpec::Indicator(IndicatorStrategy::Rsi {
                period,
                oversold,
                overbought,
            }) => {
                assert_eq!(period, 14);
                assert!((oversold - 30.0).abs() < f64::EPSILON);
                assert!((overbought - 70.0).abs() < f64::EPSILON);
            }
            other => panic!("expected RSI strategy, got {other:?}"),
        }
    }

    #[test]
    fn build_strategy_unknown_type() {
        let adapter = FileConfigAdapter::from_string("[strategy]\ntype = martingale\n").unwrap();
        let err = cli::build_strategy(&adapter).unwrap_err();
        assert!(matches!(err, FxsimError::ConfigInvalid { key, .. } if key == "type"));
    }

    #[test]
    fn build_strategy_bad_rule_is_parse_error() {
        let adapter =
            FileConfigAdapter::from_string("[strategy]\nentry_long = close >> SMA(20)\n").unwrap();
        let err = cli::build_strategy(&adapter).unwrap_err();
        assert!(matches!(err, FxsimError::RuleParse(_)));
        assert_eq!(err.exit_status(), 4);
    }

    #[test]
    fn build_data_settings_with_overrides() {
        let ini = "[data]\ndir = /var/fx\nsymbol = usdjpy\nstart = 2024-01-01\nend = 2024-02-01 12:00:00\n";
        let adapter = FileConfigAdapter::from_string(ini).unwrap();

        let data = cli::build_data_settings(&adapter, None).unwrap();
        assert_eq!(data.dir, PathBuf::from("/var/fx"));
        assert_eq!(data.instrument.symbol, "USDJPY");
        assert!((data.instrument.pip_size - 0.01).abs() < f64::EPSILON);
        assert_eq!(data.start, Some(ts(0)));
        assert_eq!(data.end, Some(ts(31 * 24 + 12)));

        let data = cli::build_data_settings(&adapter, Some("gbpusd")).unwrap();
        assert_eq!(data.instrument.symbol, "GBPUSD");
        assert!((data.instrument.pip_size - 0.0001).abs() < f64::EPSILON);
    }

    #[test]
    fn build_data_settings_missing_dir() {
        let adapter = FileConfigAdapter::from_string("[data]\nsymbol = EURUSD\n").unwrap();
        let err = cli::build_data_settings(&adapter, None).unwrap_err();
        assert!(matches!(err, FxsimError::ConfigMissing { key, .. } if key == "dir"));
    }

    #[test]
    fn build_plan_validates_every_section() {
        let ini = VALID_INI.replace("max_positions = 3", "max_positions = 0");
        let adapter = FileConfigAdapter::from_string(&ini).unwrap();
        let err = cli::build_plan(&adapter, None).err().unwrap();
        assert!(matches!(err, FxsimError::ConfigInvalid { ref key, .. } if key == "max_positions"));
        assert_eq!(err.exit_status(), 2);
    }
}

mod commands {
    use super::*;

    fn ini_for(dir: &Path) -> String {
        format!(
            "[data]\ndir = {}\nsymbol = EURUSD\n\n\
             [backtest]\ninitial_capital = 10000\nspread_pips = 1\ncommission_per_lot = 7\n\
             stop_loss = pips:30\ntake_profit = rr:2\nallow_shorting = true\n\n\
             [strategy]\ntype = ma_crossover\nfast = 5\nslow = 20\n",
            dir.display()
        )
    }

    fn backtest(config: PathBuf, output: Option<PathBuf>, trades: Option<PathBuf>, dry_run: bool) -> Cli {
        Cli {
            verbose: 0,
            command: Command::Backtest {
                config,
                symbol: None,
                output,
                trades,
                dry_run,
            },
        }
    }

    #[test]
    fn backtest_writes_reports() {
        let dir = tempfile::TempDir::new().unwrap();
        write_csv(dir.path(), "EURUSD", 200);
        let ini = write_temp_ini(&ini_for(dir.path()));
        let report = dir.path().join("report.json");
        let trades = dir.path().join("trades.csv");

        let code = cli::run(backtest(
            ini.path().to_path_buf(),
            Some(report.clone()),
            Some(trades.clone()),
            false,
        ));
        assert_exit(code, 0);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(json["symbol"], "EURUSD");
        let trade_count = json["trades"].as_array().unwrap().len();
        assert_eq!(json["metrics"]["total_trades"], trade_count);

        let csv = fs::read_to_string(&trades).unwrap();
        assert!(csv.starts_with("trade_number,"));
        assert_eq!(csv.lines().count(), trade_count + 1);
    }

    #[test]
    fn dry_run_does_not_need_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let ini = write_temp_ini(&ini_for(&dir.path().join("missing")));
        let code = cli::run(backtest(ini.path().to_path_buf(), None, None, true));
        assert_exit(code, 0);
    }

    #[test]
    fn missing_symbol_file_is_no_data() {
        let dir = tempfile::TempDir::new().unwrap();
        let ini = write_temp_ini(&ini_for(dir.path()));
        let output = dir.path().join("report.json");
        let code = cli::run(backtest(ini.path().to_path_buf(), Some(output.clone()), None, false));
        assert_exit(code, 5);
        assert!(!output.exists());
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let code = cli::run(Cli {
            verbose: 0,
            command: Command::Validate {
                config: PathBuf::from("/nonexistent/fxsim.ini"),
            },
        });
        assert_exit(code, 2);
    }

    #[test]
    fn validate_reports_rule_errors() {
        let ini = write_temp_ini(
            "[data]\ndir = /tmp\nsymbol = EURUSD\n[backtest]\ninitial_capital = 1000\n\
             [strategy]\nentry_long = close > SMA(20) AND\n",
        );
        let code = cli::run(Cli {
            verbose: 0,
            command: Command::Validate {
                config: ini.path().to_path_buf(),
            },
        });
        assert_exit(code, 4);
    }

    #[test]
    fn info_and_list_symbols() {
        let dir = tempfile::TempDir::new().unwrap();
        write_csv(dir.path(), "EURUSD", 30);
        write_csv(dir.path(), "USDJPY", 10);
        let ini = write_temp_ini(&ini_for(dir.path()));

        let code = cli::run(Cli {
            verbose: 0,
            command: Command::Info {
                config: ini.path().to_path_buf(),
                symbol: Some("usdjpy".into()),
            },
        });
        assert_exit(code, 0);

        let code = cli::run(Cli {
            verbose: 0,
            command: Command::Info {
                config: ini.path().to_path_buf(),
                symbol: Some("AUDUSD".into()),
            },
        });
        assert_exit(code, 5);

        let code = cli::run(Cli {
            verbose: 0,
            command: Command::ListSymbols {
                config: None,
                data_dir: Some(dir.path().to_path_buf()),
            },
        });
        assert_exit(code, 0);
    }
}
