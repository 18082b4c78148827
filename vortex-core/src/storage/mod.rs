//! Storage capability: a shared directory-layout policy plus two concrete
//! backends, `Csv` and `Parquet` (spec.md §4.3).

pub mod csv;
pub mod metadata;
pub mod parquet;

use crate::error::StorageError;
use crate::instrument::month_code_to_number;
use crate::instrument::Instrument;
use crate::period::Period;
use crate::series::PriceSeries;
use std::path::{Path, PathBuf};

pub use metadata::Metadata;

/// Storage backend contract every variant implements (spec.md §4.3).
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Create parent directories, sort `series.bars` ascending, write the
    /// data file, and write the sidecar metadata.
    fn persist(
        &self,
        series: &PriceSeries,
        instrument: &Instrument,
        period: Period,
    ) -> Result<(), StorageError>;

    /// Read sidecar + data file; `FileNotFound` if either is missing.
    fn load(&self, instrument: &Instrument, period: Period) -> Result<PriceSeries, StorageError>;
}

/// Directory-layout policy shared by every storage backend (spec.md §4.3):
///
/// - Future: `{base}/futures/{period}/{symbol}/{symbol}_{YYYYMM}00.{ext}`
/// - Stock:  `{base}/stocks/{period}/{symbol}.{ext}`
/// - Forex:  `{base}/forex/{period}/{symbol}.{ext}`
pub fn data_path(
    base: &Path,
    instrument: &Instrument,
    period: Period,
    ext: &str,
) -> Result<PathBuf, StorageError> {
    let period_str = period.as_str();
    let symbol = instrument.symbol();
    match instrument {
        Instrument::Future { year, month_code, .. } => {
            let month = month_code_to_number(*month_code)
                .map_err(|e| StorageError::FileCorrupted(e.to_string()))?;
            Ok(base
                .join("futures")
                .join(period_str)
                .join(symbol)
                .join(format!("{symbol}_{year}{month:02}00.{ext}")))
        }
        Instrument::Stock { .. } => Ok(base
            .join("stocks")
            .join(period_str)
            .join(format!("{symbol}.{ext}"))),
        Instrument::Forex { .. } => Ok(base
            .join("forex")
            .join(period_str)
            .join(format!("{symbol}.{ext}"))),
    }
}

/// Sidecar metadata path: same basename plus `.json`.
pub fn sidecar_path(data_path: &Path) -> PathBuf {
    let mut p = data_path.as_os_str().to_os_string();
    p.push(".json");
    PathBuf::from(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::Period;

    #[test]
    fn stock_path_has_no_subdirectory() {
        let base = Path::new("/data");
        let instrument = Instrument::Stock { symbol: "AAPL".into() };
        let path = data_path(base, &instrument, Period::D1, "csv").unwrap();
        assert_eq!(path, Path::new("/data/stocks/1d/AAPL.csv"));
    }

    #[test]
    fn future_path_nests_under_symbol_directory() {
        let base = Path::new("/data");
        let instrument = Instrument::new_future("GC", 2024, 'M', None, 90).unwrap();
        let path = data_path(base, &instrument, Period::D1, "parquet").unwrap();
        assert_eq!(
            path,
            Path::new("/data/futures/1d/GCM24/GCM24_20240600.parquet")
        );
    }

    #[test]
    fn sidecar_path_appends_json_suffix() {
        let data = Path::new("/data/stocks/1d/AAPL.csv");
        assert_eq!(sidecar_path(data), Path::new("/data/stocks/1d/AAPL.csv.json"));
    }
}
