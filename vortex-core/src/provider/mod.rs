//! Provider capability: a uniform fetch-historical-data contract with three
//! concrete implementations (spec.md §4.1).

pub mod barchart;
pub mod ibkr;
pub mod yahoo;

use crate::error::DataProviderError;
use crate::instrument::Instrument;
use crate::period::{FrequencyAttributes, Period};
use crate::series::PriceSeries;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Uniform contract every data provider implements (spec.md §4.1).
///
/// `login`/`logout` are idempotent: calling `logout` on a provider that was
/// never logged in must not fail. Implementations hold session/cookie state
/// behind interior mutability so the trait can be shared as `Arc<dyn
/// Provider>` across worker threads (spec.md §5).
pub trait Provider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn login(&self) -> Result<(), DataProviderError>;

    fn logout(&self) -> Result<(), DataProviderError>;

    fn supported_frequencies(&self) -> &[FrequencyAttributes];

    fn max_range(&self, period: Period) -> Option<ChronoDuration> {
        self.supported_frequencies()
            .iter()
            .find(|a| a.frequency == period)
            .map(|a| a.max_range())
    }

    fn min_start(&self, period: Period, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.supported_frequencies()
            .iter()
            .find(|a| a.frequency == period)
            .map(|a| a.min_start_at(now))
    }

    /// The sole data-plane operation.
    fn fetch_historical_data(
        &self,
        instrument: &Instrument,
        period: Period,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PriceSeries, DataProviderError>;
}

/// Per-provider column rename table (spec.md §4.1).
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub date_col: &'static str,
    pub close_col: &'static str,
    pub extra_cols: &'static [&'static str],
}

pub const BARCHART_COLUMNS: ColumnMap = ColumnMap {
    date_col: "Time",
    close_col: "Last",
    extra_cols: &["Open Interest"],
};

pub const YAHOO_COLUMNS: ColumnMap = ColumnMap {
    date_col: "Date",
    close_col: "Close",
    extra_cols: &["Adj Close", "Dividends", "Stock Splits"],
};

pub const IBKR_COLUMNS: ColumnMap = ColumnMap {
    date_col: "date",
    close_col: "close",
    extra_cols: &["wap", "count"],
};

/// Rename a raw header list to the canonical `Datetime`/`Close` names per
/// `map`, leaving every other column untouched. Used by providers that
/// receive tabular (CSV-shaped) responses, e.g. Barchart.
pub fn rename_headers(headers: &[String], map: ColumnMap) -> Vec<String> {
    headers
        .iter()
        .map(|h| {
            if h == map.date_col {
                "Datetime".to_string()
            } else if h == map.close_col {
                "Close".to_string()
            } else {
                h.clone()
            }
        })
        .collect()
}
