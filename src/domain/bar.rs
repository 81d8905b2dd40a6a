//! OHLCV bar representation and input validation.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::error::FxsimError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Quoted spread for this bar in pips, when the data source supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread: Option<f64>,
}

impl Bar {
    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Parse `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or a bare `YYYY-MM-DD`
/// (midnight).
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Check the ordering and OHLC invariants, failing on the first offending bar.
pub fn validate_bars(bars: &[Bar]) -> Result<(), FxsimError> {
    for (i, bar) in bars.iter().enumerate() {
        let data_error = |reason: String| FxsimError::Data {
            index: i,
            timestamp: bar.timestamp,
            reason,
        };

        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(data_error("non-finite price".into()));
        }
        if prices.iter().any(|&p| p <= 0.0) {
            return Err(data_error("non-positive price".into()));
        }
        if !bar.volume.is_finite() || bar.volume < 0.0 {
            return Err(data_error(format!("invalid volume {}", bar.volume)));
        }
        if let Some(spread) = bar.spread {
            if !spread.is_finite() || spread < 0.0 {
                return Err(data_error(format!("invalid spread {spread}")));
            }
        }
        if bar.high < bar.open.max(bar.close) {
            return Err(data_error(format!(
                "high {} below max(open, close) {}",
                bar.high,
                bar.open.max(bar.close)
            )));
        }
        if bar.low > bar.open.min(bar.close) {
            return Err(data_error(format!(
                "low {} above min(open, close) {}",
                bar.low,
                bar.open.min(bar.close)
            )));
        }
        if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
            return Err(data_error(format!(
                "timestamp not after previous bar {}",
                bars[i - 1].timestamp
            )));
        }
    }
    Ok(())
}
