//! CSV file data adapter.
//!
//! One file per symbol, `<dir>/<SYMBOL>.csv`, with the header
//! `timestamp,open,high,low,close,volume[,spread]`.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::debug;

use crate::domain::bar::{Bar, parse_timestamp};
use crate::domain::error::FxsimError;
use crate::ports::data_port::DataPort;

#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    spread: Option<f64>,
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.csv", symbol.trim().to_uppercase()))
    }

    fn read_all(&self, symbol: &str) -> Result<Vec<Bar>, FxsimError> {
        let path = self.csv_path(symbol);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FxsimError::NoData {
                    symbol: symbol.to_uppercase(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (i, result) in rdr.deserialize::<CsvBar>().enumerate() {
            let row = result?;
            let timestamp =
                parse_timestamp(&row.timestamp).ok_or_else(|| FxsimError::DataFormat {
                    path: path.display().to_string(),
                    record: i + 1,
                    reason: format!("invalid timestamp {:?}", row.timestamp),
                })?;
            bars.push(Bar {
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
                spread: row.spread,
            });
        }

        debug!(path = %path.display(), bars = bars.len(), "loaded bars");
        Ok(bars)
    }
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, FxsimError> {
        let mut bars = self.read_all(symbol)?;
        bars.retain(|b| {
            start.is_none_or(|s| b.timestamp >= s) && end.is_none_or(|e| b.timestamp <= e)
        });
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, FxsimError> {
        let mut symbols = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if !is_csv {
                continue;
            }
            if let Some(stem) = path.file_stem() {
                symbols.push(stem.to_string_lossy().to_uppercase());
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    fn data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, FxsimError> {
        let bars = match self.read_all(symbol) {
            Ok(bars) => bars,
            Err(FxsimError::NoData { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let first = bars.iter().map(|b| b.timestamp).min();
        let last = bars.iter().map(|b| b.timestamp).max();
        Ok(first.zip(last).map(|(f, l)| (f, l, bars.len())))
    }
}
