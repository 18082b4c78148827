//! `PriceSeries` and its sidecar `Metadata` (spec.md §3).

use crate::instrument::Instrument;
use crate::period::Period;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single normalized OHLCV bar. `extra` carries provider-specific columns
/// (`Open Interest`, `Adj Close`, `Dividends`, `Stock Splits`, `wap`,
/// `count`, …) after the per-provider column-rename pass in spec.md §4.1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub extra: BTreeMap<String, f64>,
}

/// A time-indexed table of bars plus its sidecar metadata.
///
/// Invariant: `bars` is sorted ascending by `datetime` with a unique index
/// (spec.md §3, §8).
#[derive(Debug, Clone)]
pub struct PriceSeries {
    pub bars: Vec<Bar>,
    pub metadata: Metadata,
}

/// Sidecar metadata persisted alongside every data file (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub symbol: String,
    pub period: Period,
    pub requested_start: DateTime<Utc>,
    pub requested_end: DateTime<Utc>,
    pub first_row_date: Option<DateTime<Utc>>,
    pub last_row_date: Option<DateTime<Utc>>,
    pub data_provider: String,
    /// Set when the last bar of a fetch has zero volume — a heuristic for
    /// expired futures contracts (spec.md §3).
    pub expiration_date: Option<DateTime<Utc>>,
    pub created_date: DateTime<Utc>,
    /// `blake3` content fingerprint of the bars, set by `ParquetStorage`
    /// (spec.md §4.3 ambient-stack hashing note). `None` until persisted.
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl PriceSeries {
    /// Build a series from fetched bars, sorting and deriving
    /// `first_row_date`/`last_row_date` and the expiration heuristic.
    pub fn new(
        mut bars: Vec<Bar>,
        instrument: &Instrument,
        period: Period,
        requested_start: DateTime<Utc>,
        requested_end: DateTime<Utc>,
        data_provider: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        bars.sort_by_key(|b| b.datetime);
        let first_row_date = bars.first().map(|b| b.datetime);
        let last_row_date = bars.last().map(|b| b.datetime);
        let expiration_date = bars
            .last()
            .filter(|b| b.volume == 0.0)
            .map(|b| b.datetime);

        Self {
            bars,
            metadata: Metadata {
                symbol: instrument.symbol().to_string(),
                period,
                requested_start,
                requested_end,
                first_row_date,
                last_row_date,
                data_provider: data_provider.into(),
                expiration_date,
                created_date: now,
                content_hash: None,
            },
        }
    }

    /// Merge this series with a newly fetched one: concatenate, deduplicate
    /// on the timestamp keeping the most recent value (`keep=last`), and
    /// re-sort (spec.md §4.6 step 6).
    ///
    /// Associative under dedup: `merge(merge(a, b), c) == merge(a, merge(b, c))`
    /// because both orders reduce to "keep the bar for each timestamp that
    /// appears last among {a, b, c} in merge order" — see spec.md §8.
    pub fn merge(mut self, newer: PriceSeries) -> PriceSeries {
        let requested_start = self.metadata.requested_start.min(newer.metadata.requested_start);
        let requested_end = self.metadata.requested_end.max(newer.metadata.requested_end);
        let created_date = self.metadata.created_date.max(newer.metadata.created_date);
        let data_provider = newer.metadata.data_provider.clone();
        let symbol = newer.metadata.symbol.clone();
        let period = newer.metadata.period;

        // `newer`'s bars are appended after `self`'s so that, for any shared
        // timestamp, the newer value is the one retained.
        self.bars.extend(newer.bars);
        self.bars.sort_by_key(|b| b.datetime);
        self.bars.dedup_by(|a, b| {
            if a.datetime == b.datetime {
                // `dedup_by` passes adjacent elements in reverse slice order:
                // `a` is the later element (dropped), `b` is the earlier one
                // (kept). After the stable sort, the later slice position for
                // equal timestamps is the newer-series bar, so copy `a` into
                // the survivor `b` to keep it.
                *b = a.clone();
                true
            } else {
                false
            }
        });

        let first_row_date = self.bars.first().map(|b| b.datetime);
        let last_row_date = self.bars.last().map(|b| b.datetime);
        let expiration_date = self
            .bars
            .last()
            .filter(|b| b.volume == 0.0)
            .map(|b| b.datetime);

        PriceSeries {
            bars: self.bars,
            metadata: Metadata {
                symbol,
                period,
                requested_start,
                requested_end,
                first_row_date,
                last_row_date,
                data_provider,
                expiration_date,
                created_date,
                content_hash: None,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Tolerance for deciding whether existing on-disk data already covers a
/// job's requested window (spec.md §9 Open Question — preserved as a magic
/// constant per the source, with a config override hook at the call site).
pub const MIN_DAYS_TO_TRIGGER_UPDATE: i64 = 7;

/// Is `existing`'s coverage `[first_row_date, last_row_date]` a superset of
/// `[job_start, job_end]` within `MIN_DAYS_TO_TRIGGER_UPDATE` tolerance?
pub fn is_data_coverage_acceptable(
    existing: &Metadata,
    job_start: DateTime<Utc>,
    job_end: DateTime<Utc>,
    tolerance_days: i64,
) -> bool {
    let tolerance = chrono::Duration::days(tolerance_days);
    match (existing.first_row_date, existing.last_row_date) {
        (Some(first), Some(last)) => first <= job_start + tolerance && last + tolerance >= job_end,
        _ => false,
    }
}
