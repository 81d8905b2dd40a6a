//! Trade list export: one CSV row per closed trade.

use std::io::Write;
use std::path::Path;

use crate::domain::error::FxsimError;
use crate::domain::position::Trade;
use crate::ports::report_port::{ReportPort, RunReport};

#[derive(Debug, Default)]
pub struct CsvTradesAdapter;

impl CsvTradesAdapter {
    pub fn write_trades<W: Write>(trades: &[Trade], writer: W) -> Result<(), FxsimError> {
        let mut wtr = csv::Writer::from_writer(writer);
        for trade in trades {
            wtr.serialize(trade)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

impl ReportPort for CsvTradesAdapter {
    fn write(&self, report: &RunReport<'_>, output_path: &Path) -> Result<(), FxsimError> {
        let file = std::fs::File::create(output_path)?;
        Self::write_trades(&report.result.trades, file)
    }
}
