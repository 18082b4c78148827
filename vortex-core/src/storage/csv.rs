//! CSV storage backend.
//!
//! `trendlab-core` has no CSV-backed bar storage; the wire format here is
//! grounded on `trendlab-runner/src/export.rs`'s
//! `csv::Writer` usage, and the atomic-write discipline follows
//! `data/cache.rs`'s write-`.tmp`-then-rename pattern for Parquet.

use super::{data_path, metadata, sidecar_path, Storage};
use crate::error::StorageError;
use crate::instrument::Instrument;
use crate::period::Period;
use crate::series::{Bar, PriceSeries};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

#[derive(Debug)]
pub struct CsvStorage {
    base: PathBuf,
}

impl CsvStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn extra_columns(bars: &[Bar]) -> Vec<String> {
        let mut cols: BTreeSet<&str> = BTreeSet::new();
        for bar in bars {
            for key in bar.extra.keys() {
                cols.insert(key.as_str());
            }
        }
        cols.into_iter().map(str::to_string).collect()
    }

    fn write_csv(path: &std::path::Path, bars: &[Bar]) -> Result<(), StorageError> {
        let extra_cols = Self::extra_columns(bars);
        let mut header = vec!["Datetime", "Open", "High", "Low", "Close", "Volume"]
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        header.extend(extra_cols.iter().cloned());

        let file = fs::File::create(path).map_err(|e| StorageError::PermissionDenied(e.to_string()))?;
        let mut writer = ::csv::Writer::from_writer(file);
        writer
            .write_record(&header)
            .map_err(|e| StorageError::FileCorrupted(format!("csv header write: {e}")))?;

        for bar in bars {
            let mut record = vec![
                bar.datetime.format(DATETIME_FORMAT).to_string(),
                bar.open.to_string(),
                bar.high.to_string(),
                bar.low.to_string(),
                bar.close.to_string(),
                bar.volume.to_string(),
            ];
            for col in &extra_cols {
                record.push(bar.extra.get(col).map(|v| v.to_string()).unwrap_or_default());
            }
            writer
                .write_record(&record)
                .map_err(|e| StorageError::FileCorrupted(format!("csv row write: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| StorageError::PermissionDenied(e.to_string()))?;
        Ok(())
    }

    fn read_csv(path: &std::path::Path) -> Result<Vec<Bar>, StorageError> {
        let content = fs::read_to_string(path).map_err(|e| StorageError::PermissionDenied(e.to_string()))?;
        let mut lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        let header: Vec<&str> = lines[0].split(',').collect();
        // Tolerate a single trailing footer line emitted by some upstream
        // providers whose column count doesn't match the header.
        if let Some(last) = lines.last() {
            if !last.is_empty() && last.split(',').count() != header.len() {
                lines.pop();
            }
        }

        let datetime_idx = header.iter().position(|h| *h == "Datetime").ok_or_else(|| {
            StorageError::FileCorrupted("missing Datetime column".into())
        })?;
        let open_idx = header.iter().position(|h| *h == "Open");
        let high_idx = header.iter().position(|h| *h == "High");
        let low_idx = header.iter().position(|h| *h == "Low");
        let close_idx = header.iter().position(|h| *h == "Close");
        let volume_idx = header.iter().position(|h| *h == "Volume");
        let extra_indices: Vec<(usize, &str)> = header
            .iter()
            .enumerate()
            .filter(|(_, h)| {
                !matches!(**h, "Datetime" | "Open" | "High" | "Low" | "Close" | "Volume")
            })
            .map(|(i, h)| (i, *h))
            .collect();

        let mut bars = Vec::with_capacity(lines.len().saturating_sub(1));
        for line in &lines[1..] {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != header.len() {
                continue;
            }
            let datetime = DateTime::parse_from_str(fields[datetime_idx], DATETIME_FORMAT)
                .map_err(|e| StorageError::FileCorrupted(format!("bad Datetime: {e}")))?
                .with_timezone(&Utc);

            let parse_f64 = |idx: Option<usize>| -> f64 {
                idx.and_then(|i| fields.get(i))
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(f64::NAN)
            };

            let mut extra = std::collections::BTreeMap::new();
            for (i, name) in &extra_indices {
                if let Some(v) = fields.get(*i).and_then(|s| s.parse::<f64>().ok()) {
                    extra.insert(name.to_string(), v);
                }
            }

            bars.push(Bar {
                datetime,
                open: parse_f64(open_idx),
                high: parse_f64(high_idx),
                low: parse_f64(low_idx),
                close: parse_f64(close_idx),
                volume: parse_f64(volume_idx),
                extra,
            });
        }
        Ok(bars)
    }
}

impl Storage for CsvStorage {
    fn persist(
        &self,
        series: &PriceSeries,
        instrument: &Instrument,
        period: Period,
    ) -> Result<(), StorageError> {
        let path = data_path(&self.base, instrument, period, "csv")
            .map_err(|e| StorageError::FileCorrupted(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::PermissionDenied(e.to_string()))?;
        }

        let mut bars = series.bars.clone();
        bars.sort_by_key(|b| b.datetime);

        let tmp = path.with_extension("csv.tmp");
        Self::write_csv(&tmp, &bars)?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StorageError::PermissionDenied(format!("atomic rename failed: {e}"))
        })?;

        metadata::write(&sidecar_path(&path), &series.metadata)
    }

    fn load(&self, instrument: &Instrument, period: Period) -> Result<PriceSeries, StorageError> {
        let path = data_path(&self.base, instrument, period, "csv")
            .map_err(|e| StorageError::FileCorrupted(e.to_string()))?;
        if !path.is_file() {
            return Err(StorageError::FileNotFound(path.display().to_string()));
        }
        let meta_path = sidecar_path(&path);
        let metadata = metadata::read(&meta_path)?;
        let mut bars = Self::read_csv(&path)?;
        bars.sort_by_key(|b| b.datetime);
        Ok(PriceSeries { bars, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn bar(ts: DateTime<Utc>, close: f64) -> Bar {
        Bar {
            datetime: ts,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 100.0,
            extra: BTreeMap::new(),
        }
    }

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn persist_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let storage = CsvStorage::new(dir.path());
        let instrument = Instrument::Stock { symbol: "AAPL".into() };
        let now = day(2024, 6, 1);
        let bars = vec![bar(day(2024, 1, 2), 101.0), bar(day(2024, 1, 3), 102.0)];
        let series = PriceSeries::new(bars, &instrument, Period::D1, day(2024, 1, 1), day(2024, 1, 31), "yahoo", now);

        storage.persist(&series, &instrument, Period::D1).unwrap();
        let loaded = storage.load(&instrument, Period::D1).unwrap();

        assert_eq!(loaded.bars.len(), 2);
        assert_eq!(loaded.bars[0].close, 101.0);
        assert_eq!(loaded.metadata.symbol, "AAPL");
    }

    #[test]
    fn load_missing_file_errors() {
        let dir = tempdir().unwrap();
        let storage = CsvStorage::new(dir.path());
        let instrument = Instrument::Stock { symbol: "MSFT".into() };
        assert!(matches!(
            storage.load(&instrument, Period::D1),
            Err(StorageError::FileNotFound(_))
        ));
    }

    #[test]
    fn read_csv_tolerates_trailing_footer_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("footer.csv");
        fs::write(&path, "Datetime,Open,High,Low,Close,Volume\n2024-01-02T00:00:00+0000,1,2,0,1.5,100\nsome footer text\n").unwrap();
        let bars = CsvStorage::read_csv(&path).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn extra_columns_are_written_and_read_back() {
        let dir = tempdir().unwrap();
        let storage = CsvStorage::new(dir.path());
        let instrument = Instrument::Stock { symbol: "AAPL".into() };
        let mut b = bar(day(2024, 1, 2), 101.0);
        b.extra.insert("Adj Close".to_string(), 100.5);
        let now = day(2024, 6, 1);
        let series = PriceSeries::new(vec![b], &instrument, Period::D1, day(2024, 1, 1), day(2024, 1, 31), "yahoo", now);
        storage.persist(&series, &instrument, Period::D1).unwrap();
        let loaded = storage.load(&instrument, Period::D1).unwrap();
        assert_eq!(loaded.bars[0].extra.get("Adj Close"), Some(&100.5));
    }
}
