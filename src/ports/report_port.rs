//! Report generation port trait.

use std::path::Path;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::FxsimError;

/// One finished run and what produced it.
#[derive(Debug, Clone, Copy)]
pub struct RunReport<'a> {
    pub symbol: &'a str,
    pub strategy: &'a str,
    pub result: &'a BacktestResult,
}

/// Port for writing backtest reports.
pub trait ReportPort {
    fn write(&self, report: &RunReport<'_>, output_path: &Path) -> Result<(), FxsimError>;
}
