//! Parquet storage backend (spec.md §4.3), grounded on `data/cache.rs`'s
//! `ParquetCache`: atomic writes, integrity validation on load, and a
//! `blake3` content hash recorded alongside the sidecar metadata.
//!
//! `PriceSeries` itself holds `Vec<Bar>` (see `series.rs`); the conversion
//! to/from a Polars `DataFrame` happens only at this module's I/O boundary,
//! mirroring `cache.rs`'s `bars_to_dataframe`/`dataframe_to_bars` helpers.

use super::{data_path, metadata, sidecar_path, Storage};
use crate::error::StorageError;
use crate::instrument::Instrument;
use crate::period::Period;
use crate::series::{Bar, PriceSeries};
use chrono::{DateTime, TimeZone, Utc};
use polars::prelude::*;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::PathBuf;

#[derive(Debug)]
pub struct ParquetStorage {
    base: PathBuf,
}

impl ParquetStorage {
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

    fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, StorageError> {
        let extra_cols = Self::extra_columns(bars);
        let datetime: Vec<i64> = bars.iter().map(|b| b.datetime.timestamp_millis()).collect();
        let open: Vec<f64> = bars.iter().map(|b| b.open).collect();
        let high: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let low: Vec<f64> = bars.iter().map(|b| b.low).collect();
        let close: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volume: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let mut columns = vec![
            Series::new("datetime".into(), datetime),
            Series::new("open".into(), open),
            Series::new("high".into(), high),
            Series::new("low".into(), low),
            Series::new("close".into(), close),
            Series::new("volume".into(), volume),
        ];
        for col in &extra_cols {
            let values: Vec<f64> = bars.iter().map(|b| b.extra.get(col).copied().unwrap_or(f64::NAN)).collect();
            columns.push(Series::new(col.as_str().into(), values));
        }

        DataFrame::new(columns.into_iter().map(Into::into).collect())
            .map_err(|e| StorageError::FileCorrupted(format!("dataframe construction: {e}")))
    }

    fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<Bar>, StorageError> {
        let fixed = ["datetime", "open", "high", "low", "close", "volume"];
        let extra_cols: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .filter(|name| !fixed.contains(&name.as_str()))
            .collect();

        let datetime = df
            .column("datetime")
            .and_then(|c| c.i64())
            .map_err(|e| StorageError::FileCorrupted(format!("missing datetime column: {e}")))?;
        let open = df.column("open").and_then(|c| c.f64()).map_err(|e| StorageError::FileCorrupted(e.to_string()))?;
        let high = df.column("high").and_then(|c| c.f64()).map_err(|e| StorageError::FileCorrupted(e.to_string()))?;
        let low = df.column("low").and_then(|c| c.f64()).map_err(|e| StorageError::FileCorrupted(e.to_string()))?;
        let close = df.column("close").and_then(|c| c.f64()).map_err(|e| StorageError::FileCorrupted(e.to_string()))?;
        let volume = df.column("volume").and_then(|c| c.f64()).map_err(|e| StorageError::FileCorrupted(e.to_string()))?;

        let extra_series: Vec<(&str, &ChunkedArray<Float64Type>)> = extra_cols
            .iter()
            .map(|name| {
                let c = df.column(name).and_then(|c| c.f64())
                    .map_err(|e| StorageError::FileCorrupted(e.to_string()))?;
                Ok((name.as_str(), c))
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let mut bars = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let millis = datetime.get(i).ok_or_else(|| StorageError::FileCorrupted("null datetime".into()))?;
            let dt: DateTime<Utc> = Utc.timestamp_millis_opt(millis).single()
                .ok_or_else(|| StorageError::FileCorrupted("invalid datetime".into()))?;

            let mut extra = std::collections::BTreeMap::new();
            for (name, series) in &extra_series {
                if let Some(v) = series.get(i) {
                    extra.insert(name.to_string(), v);
                }
            }

            bars.push(Bar {
                datetime: dt,
                open: open.get(i).unwrap_or(f64::NAN),
                high: high.get(i).unwrap_or(f64::NAN),
                low: low.get(i).unwrap_or(f64::NAN),
                close: close.get(i).unwrap_or(f64::NAN),
                volume: volume.get(i).unwrap_or(f64::NAN),
                extra,
            });
        }
        Ok(bars)
    }

    fn write_parquet(df: &mut DataFrame, path: &std::path::Path) -> Result<(), StorageError> {
        let file = File::create(path).map_err(|e| StorageError::PermissionDenied(e.to_string()))?;
        ParquetWriter::new(file)
            .finish(df)
            .map_err(|e| StorageError::FileCorrupted(format!("parquet write: {e}")))?;
        Ok(())
    }

    fn read_parquet(path: &std::path::Path) -> Result<DataFrame, StorageError> {
        let file = File::open(path).map_err(|e| StorageError::PermissionDenied(e.to_string()))?;
        ParquetReader::new(file)
            .finish()
            .map_err(|e| StorageError::FileCorrupted(format!("parquet read: {e}")))
    }
}

impl Storage for ParquetStorage {
    fn persist(
        &self,
        series: &PriceSeries,
        instrument: &Instrument,
        period: Period,
    ) -> Result<(), StorageError> {
        let path = data_path(&self.base, instrument, period, "parquet")
            .map_err(|e| StorageError::FileCorrupted(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::PermissionDenied(e.to_string()))?;
        }

        let mut bars = series.bars.clone();
        bars.sort_by_key(|b| b.datetime);
        let mut df = Self::bars_to_dataframe(&bars)?;

        let tmp = path.with_extension("parquet.tmp");
        Self::write_parquet(&mut df, &tmp)?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StorageError::PermissionDenied(format!("atomic rename failed: {e}"))
        })?;

        let content_hash = blake3::hash(
            &serde_json::to_vec(&bars).map_err(|e| StorageError::FileCorrupted(format!("hash serialization: {e}")))?,
        );
        let mut sidecar_metadata = series.metadata.clone();
        sidecar_metadata.content_hash = Some(content_hash.to_hex().to_string());
        metadata::write(&sidecar_path(&path), &sidecar_metadata)
    }

    fn load(&self, instrument: &Instrument, period: Period) -> Result<PriceSeries, StorageError> {
        let path = data_path(&self.base, instrument, period, "parquet")
            .map_err(|e| StorageError::FileCorrupted(e.to_string()))?;
        if !path.is_file() {
            return Err(StorageError::FileNotFound(path.display().to_string()));
        }

        let df = Self::read_parquet(&path).or_else(|e| {
            let quarantine = path.with_extension("parquet.quarantined");
            let _ = std::fs::rename(&path, &quarantine);
            Err(e)
        })?;
        if df.height() == 0 {
            return Err(StorageError::FileCorrupted("parquet file has zero rows".into()));
        }

        let metadata = metadata::read(&sidecar_path(&path))?;
        let mut bars = Self::dataframe_to_bars(&df)?;
        bars.sort_by_key(|b| b.datetime);
        Ok(PriceSeries { bars, metadata })
    }
}
