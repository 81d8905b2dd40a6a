//! JSON report adapter: trades, metrics and run diagnostics in one document.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::domain::error::{FxsimError, RunIssue};
use crate::domain::metrics::MetricsSummary;
use crate::domain::position::Trade;
use crate::ports::report_port::{ReportPort, RunReport};

#[derive(Serialize)]
struct Diagnostics<'a> {
    bars_processed: usize,
    execution_time_ms: u64,
    skipped_signal_count: usize,
    ignored_signal_count: usize,
    issues: &'a [RunIssue],
}

#[derive(Serialize)]
struct ReportDocument<'a> {
    symbol: &'a str,
    strategy: &'a str,
    trades: &'a [Trade],
    metrics: &'a MetricsSummary,
    diagnostics: Diagnostics<'a>,
}

impl<'a> From<&RunReport<'a>> for ReportDocument<'a> {
    fn from(report: &RunReport<'a>) -> Self {
        let result = report.result;
        ReportDocument {
            symbol: report.symbol,
            strategy: report.strategy,
            trades: &result.trades,
            metrics: &result.metrics,
            diagnostics: Diagnostics {
                bars_processed: result.bars_processed,
                execution_time_ms: result.execution_time_ms,
                skipped_signal_count: result.skipped_signal_count,
                ignored_signal_count: result.ignored_signal_count,
                issues: &result.issues,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct JsonReportAdapter;

impl JsonReportAdapter {
    pub fn to_string(report: &RunReport<'_>) -> Result<String, FxsimError> {
        Ok(serde_json::to_string_pretty(&ReportDocument::from(report))?)
    }
}

impl ReportPort for JsonReportAdapter {
    fn write(&self, report: &RunReport<'_>, output_path: &Path) -> Result<(), FxsimError> {
        let mut writer = BufWriter::new(File::create(output_path)?);
        serde_json::to_writer_pretty(&mut writer, &ReportDocument::from(report))?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::{BacktestConfig, BacktestResult, CancelToken, run_backtest};
    use crate::domain::indicator::test_support::make_bars;
    use crate::domain::instrument::Instrument;
    use crate::domain::rule_parser::parse_conditions;
    use crate::domain::strategy::{RulesStrategy, StrategySpec};
    use tempfile::TempDir;

    fn sample_result() -> BacktestResult {
        let bars = make_bars(&[1.1000, 1.1050, 1.1100, 1.1000, 1.0950]);
        let strategy = StrategySpec::Rules(RulesStrategy {
            entry_long: parse_conditions("close > SMA(2)").unwrap(),
            exit_long: parse_conditions("close < SMA(2)").unwrap(),
            ..RulesStrategy::default()
        });
        run_backtest(
            &bars,
            &Instrument::forex("EURUSD"),
            &strategy,
            &BacktestConfig::default(),
            &CancelToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn writes_document_with_all_sections() {
        let result = sample_result();
        let report = RunReport {
            symbol: "EURUSD",
            strategy: "entry_long: close > SMA(2)",
            result: &result,
        };
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        JsonReportAdapter.write(&report, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["symbol"], "EURUSD");
        assert_eq!(doc["trades"].as_array().unwrap().len(), result.trades.len());
        assert_eq!(doc["trades"][0]["exit_reason"], "signal");
        assert_eq!(doc["trades"][0]["direction"], "long");
        assert_eq!(
            doc["metrics"]["total_trades"].as_u64().unwrap() as usize,
            result.trades.len()
        );
        assert!(doc["diagnostics"]["issues"].is_array());
        assert_eq!(doc["diagnostics"]["skipped_signal_count"], 0);
    }

    #[test]
    fn serialization_is_deterministic() {
        let a = sample_result();
        let b = sample_result();
        let render = |result: &BacktestResult| {
            JsonReportAdapter::to_string(&RunReport {
                symbol: "EURUSD",
                strategy: "s",
                result,
            })
            .unwrap()
        };
        let strip = |s: String| {
            s.lines()
                .filter(|l| !l.contains("execution_time_ms"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        assert_eq!(strip(render(&a)), strip(render(&b)));
    }

    #[test]
    fn unwritable_path_is_io_error() {
        let result = sample_result();
        let report = RunReport {
            symbol: "EURUSD",
            strategy: "s",
            result: &result,
        };
        let err = JsonReportAdapter
            .write(&report, Path::new("/nonexistent/dir/report.json"))
            .unwrap_err();
        assert!(matches!(err, FxsimError::Io(_)));
    }
}
