//! Bar data access port trait.

use chrono::NaiveDateTime;

use crate::domain::bar::Bar;
use crate::domain::error::FxsimError;

pub trait DataPort {
    /// Bars for `symbol` with timestamps inside the inclusive bounds, in
    /// source order.
    fn fetch_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<Bar>, FxsimError>;

    fn list_symbols(&self) -> Result<Vec<String>, FxsimError>;

    /// First timestamp, last timestamp and bar count, or `None` when the
    /// symbol has no data.
    fn data_range(
        &self,
        symbol: &str,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, FxsimError>;
}
