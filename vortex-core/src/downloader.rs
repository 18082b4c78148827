//! Per-job UPDATING/BACKFILLING state machine (spec.md §4.6), grounded on
//! `data/download.rs`'s fetch → ingest → cache pipeline shape.

use crate::error::{DataProviderError, StorageError, TracedError, VortexError};
use crate::planner::DownloadJob;
use crate::provider::Provider;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::recovery::RecoveryPlanner;
use crate::resilience::retry::RetryPolicy;
use crate::resilience::fetch_with_resilience;
use crate::series::{is_data_coverage_acceptable, PriceSeries, MIN_DAYS_TO_TRIGGER_UPDATE};
use crate::storage::Storage;
use rand::Rng;
use std::thread;
use std::time::Duration;

/// Operating mode for a job (spec.md §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Merge fetched data with whatever's already on disk.
    Updating,
    /// Overwrite existing data unconditionally.
    Backfilling,
}

/// Result of processing a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Fetched, merged (if applicable), and persisted.
    Ok,
    /// Existing coverage already satisfied the job; nothing fetched.
    Exists,
    /// Fetch succeeded but returned fewer than 3 rows.
    LowData,
    /// Fetch failed with `DataNotFound`.
    NotFound,
    /// `dry_run` suppressed the fetch (no `dry_run_fetch` override).
    Skipped,
}

/// Run configuration relevant to the downloader (a subset of `CoreConfig`).
#[derive(Debug, Clone)]
pub struct DownloaderOptions {
    pub mode: Mode,
    pub dry_run: bool,
    pub dry_run_fetch: bool,
    pub force_backup: bool,
    pub random_sleep_max: f64,
    pub coverage_tolerance_days: i64,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            mode: Mode::Updating,
            dry_run: false,
            dry_run_fetch: false,
            force_backup: false,
            random_sleep_max: 0.0,
            coverage_tolerance_days: MIN_DAYS_TO_TRIGGER_UPDATE,
        }
    }
}

pub struct Downloader<'a> {
    pub provider: &'a dyn Provider,
    pub primary: &'a dyn Storage,
    pub backup: Option<&'a dyn Storage>,
    pub breaker: &'a CircuitBreaker,
    pub retry: RetryPolicy,
    pub recovery: RecoveryPlanner,
    pub options: DownloaderOptions,
}

impl<'a> Downloader<'a> {
    fn anti_bot_sleep(&self) {
        if self.options.random_sleep_max <= 0.0 {
            return;
        }
        let secs = rand::thread_rng().gen_range(1.0..=1.0 + self.options.random_sleep_max);
        thread::sleep(Duration::from_secs_f64(secs));
    }

    fn should_fetch(&self) -> bool {
        !self.options.dry_run || self.options.dry_run_fetch
    }

    /// Process one job end to end, returning its outcome or propagating an
    /// unexpected error. `LowData`/`NotFound` are reported, not propagated,
    /// per spec.md §4.6's exception-handling table.
    pub fn process_job(&self, job: &DownloadJob) -> Result<JobOutcome, TracedError> {
        let existing = match self.primary.load(&job.instrument, job.period) {
            Ok(series) => Some(series),
            Err(StorageError::FileNotFound(_)) => None,
            Err(e) => return Err(TracedError::new(VortexError::Storage(e))),
        };

        if self.options.mode == Mode::Updating {
            if let Some(existing) = &existing {
                if is_data_coverage_acceptable(&existing.metadata, job.start, job.end, self.options.coverage_tolerance_days) {
                    if self.options.force_backup {
                        if let Some(backup) = self.backup {
                            if !self.options.dry_run {
                                backup
                                    .persist(existing, &job.instrument, job.period)
                                    .map_err(|e| TracedError::new(VortexError::Storage(e)))?;
                            }
                        }
                    }
                    return Ok(JobOutcome::Exists);
                }
            }
        }

        if !self.should_fetch() {
            return Ok(JobOutcome::Skipped);
        }

        let (fetch_start, fetch_end) = match (self.options.mode, &existing) {
            (Mode::Updating, Some(existing)) => adjust_window(existing, job),
            _ => (job.start, job.end),
        };
        if fetch_start >= fetch_end {
            return Ok(JobOutcome::Exists);
        }

        self.anti_bot_sleep();

        let fetched = match fetch_with_resilience(
            self.provider,
            self.breaker,
            &self.retry,
            &self.recovery,
            &job.instrument,
            job.period,
            fetch_start,
            fetch_end,
        ) {
            Ok(series) => series,
            Err(traced) => {
                return match &traced.error {
                    VortexError::DataProvider(DataProviderError::DataNotFound { .. }) => Ok(JobOutcome::NotFound),
                    _ => Err(traced),
                };
            }
        };

        if fetched.len() < 3 {
            return Ok(JobOutcome::LowData);
        }

        let merged = match (self.options.mode, existing) {
            (Mode::Updating, Some(existing)) => existing.merge(fetched),
            _ => fetched,
        };

        if self.options.dry_run {
            return Ok(JobOutcome::Ok);
        }

        self.primary
            .persist(&merged, &job.instrument, job.period)
            .map_err(|e| TracedError::new(VortexError::Storage(e)))?;
        if let Some(backup) = self.backup {
            backup
                .persist(&merged, &job.instrument, job.period)
                .map_err(|e| TracedError::new(VortexError::Storage(e)))?;
        }

        Ok(JobOutcome::Ok)
    }
}

/// Gap detection (spec.md §4.6 step 2): fetch only the missing portion(s) of
/// `job`'s window given `existing`'s coverage.
fn adjust_window(existing: &PriceSeries, job: &DownloadJob) -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
    let mut start = job.start;
    let mut end = job.end;
    if let Some(last) = existing.metadata.last_row_date {
        if last < job.end {
            start = last;
        }
    }
    if let Some(first) = existing.metadata.first_row_date {
        if first > job.end {
            end = first;
        }
    }
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataProviderError;
    use crate::instrument::Instrument;
    use crate::period::{FrequencyAttributes, MinStart, Period};
    use crate::series::Bar;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::BTreeMap as StdBTreeMap;
    use std::sync::Mutex;

    fn day(n: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::days(n)
    }

    fn bar(ts: chrono::DateTime<Utc>) -> Bar {
        Bar { datetime: ts, open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: 10.0, extra: StdBTreeMap::new() }
    }

    #[derive(Debug)]
    struct StubProvider {
        frequencies: Vec<FrequencyAttributes>,
        response: Mutex<Option<Result<PriceSeries, DataProviderError>>>,
    }

    impl Provider for StubProvider {
        fn name(&self) -> &str { "stub" }
        fn login(&self) -> Result<(), DataProviderError> { Ok(()) }
        fn logout(&self) -> Result<(), DataProviderError> { Ok(()) }
        fn supported_frequencies(&self) -> &[FrequencyAttributes] { &self.frequencies }
        fn fetch_historical_data(
            &self,
            _instrument: &Instrument,
            _period: Period,
            _start: chrono::DateTime<Utc>,
            _end: chrono::DateTime<Utc>,
        ) -> Result<PriceSeries, DataProviderError> {
            self.response.lock().unwrap().take().expect("single-use stub response")
        }
    }

    #[derive(Debug, Default)]
    struct MemStorage {
        series: Mutex<Option<PriceSeries>>,
    }

    impl Storage for MemStorage {
        fn persist(&self, series: &PriceSeries, _instrument: &Instrument, _period: Period) -> Result<(), StorageError> {
            *self.series.lock().unwrap() = Some(series.clone());
            Ok(())
        }
        fn load(&self, _instrument: &Instrument, _period: Period) -> Result<PriceSeries, StorageError> {
            self.series.lock().unwrap().clone().ok_or_else(|| StorageError::FileNotFound("mem".into()))
        }
    }

    fn instrument() -> Instrument {
        Instrument::Stock { symbol: "AAPL".into() }
    }

    fn frequencies() -> Vec<FrequencyAttributes> {
        vec![FrequencyAttributes {
            frequency: Period::D1,
            max_records_per_download: 10_000,
            max_window: ChronoDuration::days(365),
            min_start: MinStart::Absolute(day(-3650)),
        }]
    }

    #[test]
    fn no_existing_data_persists_fetched_series() {
        let provider = StubProvider {
            frequencies: frequencies(),
            response: Mutex::new(Some(Ok(PriceSeries::new(
                (0..30).map(day).map(bar).collect(),
                &instrument(),
                Period::D1,
                day(0),
                day(30),
                "stub",
                day(40),
            )))),
        };
        let storage = MemStorage::default();
        let breaker = CircuitBreaker::default_provider();
        let downloader = Downloader {
            provider: &provider,
            primary: &storage,
            backup: None,
            breaker: &breaker,
            retry: RetryPolicy::default(),
            recovery: RecoveryPlanner::new(false),
            options: DownloaderOptions::default(),
        };
        let job = DownloadJob { instrument: instrument(), period: Period::D1, start: day(0), end: day(30) };

        let outcome = downloader.process_job(&job).unwrap();
        assert_eq!(outcome, JobOutcome::Ok);
        assert_eq!(storage.series.lock().unwrap().as_ref().unwrap().len(), 30);
    }

    #[test]
    fn sufficient_coverage_skips_fetch() {
        let provider = StubProvider { frequencies: frequencies(), response: Mutex::new(None) };
        let storage = MemStorage::default();
        let existing = PriceSeries::new(
            (0..10).map(day).map(bar).collect(),
            &instrument(),
            Period::D1,
            day(0),
            day(10),
            "stub",
            day(10),
        );
        storage.persist(&existing, &instrument(), Period::D1).unwrap();

        let breaker = CircuitBreaker::default_provider();
        let downloader = Downloader {
            provider: &provider,
            primary: &storage,
            backup: None,
            breaker: &breaker,
            retry: RetryPolicy::default(),
            recovery: RecoveryPlanner::new(false),
            options: DownloaderOptions::default(),
        };
        let job = DownloadJob { instrument: instrument(), period: Period::D1, start: day(0), end: day(9) };

        let outcome = downloader.process_job(&job).unwrap();
        assert_eq!(outcome, JobOutcome::Exists);
    }

    #[test]
    fn low_data_is_reported_not_propagated() {
        let provider = StubProvider {
            frequencies: frequencies(),
            response: Mutex::new(Some(Ok(PriceSeries::new(
                vec![bar(day(0)), bar(day(1))],
                &instrument(),
                Period::D1,
                day(0),
                day(30),
                "stub",
                day(30),
            )))),
        };
        let storage = MemStorage::default();
        let breaker = CircuitBreaker::default_provider();
        let downloader = Downloader {
            provider: &provider,
            primary: &storage,
            backup: None,
            breaker: &breaker,
            retry: RetryPolicy::default(),
            recovery: RecoveryPlanner::new(false),
            options: DownloaderOptions::default(),
        };
        let job = DownloadJob { instrument: instrument(), period: Period::D1, start: day(0), end: day(30) };

        let outcome = downloader.process_job(&job).unwrap();
        assert_eq!(outcome, JobOutcome::LowData);
        assert!(storage.series.lock().unwrap().is_none());
    }

    #[test]
    fn data_not_found_is_reported_not_propagated() {
        let provider = StubProvider {
            frequencies: frequencies(),
            response: Mutex::new(Some(Err(DataProviderError::DataNotFound { symbol: "AAPL".into() }))),
        };
        let storage = MemStorage::default();
        let breaker = CircuitBreaker::default_provider();
        let downloader = Downloader {
            provider: &provider,
            primary: &storage,
            backup: None,
            breaker: &breaker,
            retry: RetryPolicy::default(),
            recovery: RecoveryPlanner::new(false),
            options: DownloaderOptions::default(),
        };
        let job = DownloadJob { instrument: instrument(), period: Period::D1, start: day(0), end: day(30) };

        let outcome = downloader.process_job(&job).unwrap();
        assert_eq!(outcome, JobOutcome::NotFound);
    }

    #[test]
    fn dry_run_without_fetch_override_skips_entirely() {
        let provider = StubProvider { frequencies: frequencies(), response: Mutex::new(None) };
        let storage = MemStorage::default();
        let breaker = CircuitBreaker::default_provider();
        let mut options = DownloaderOptions::default();
        options.dry_run = true;
        let downloader = Downloader {
            provider: &provider,
            primary: &storage,
            backup: None,
            breaker: &breaker,
            retry: RetryPolicy::default(),
            recovery: RecoveryPlanner::new(false),
            options,
        };
        let job = DownloadJob { instrument: instrument(), period: Period::D1, start: day(0), end: day(30) };

        let outcome = downloader.process_job(&job).unwrap();
        assert_eq!(outcome, JobOutcome::Skipped);
    }

    #[test]
    fn partial_coverage_adjusts_window_and_merges() {
        let existing_bars: Vec<Bar> = (0..181).map(day).map(bar).collect();
        let fetched_bars: Vec<Bar> = (180..365).map(day).map(bar).collect();
        let provider = StubProvider {
            frequencies: frequencies(),
            response: Mutex::new(Some(Ok(PriceSeries::new(
                fetched_bars,
                &instrument(),
                Period::D1,
                day(180),
                day(365),
                "stub",
                day(365),
            )))),
        };
        let storage = MemStorage::default();
        let existing = PriceSeries::new(existing_bars, &instrument(), Period::D1, day(0), day(180), "stub", day(180));
        storage.persist(&existing, &instrument(), Period::D1).unwrap();

        let breaker = CircuitBreaker::default_provider();
        let downloader = Downloader {
            provider: &provider,
            primary: &storage,
            backup: None,
            breaker: &breaker,
            retry: RetryPolicy::default(),
            recovery: RecoveryPlanner::new(false),
            options: DownloaderOptions::default(),
        };
        let job = DownloadJob { instrument: instrument(), period: Period::D1, start: day(0), end: day(365) };

        let outcome = downloader.process_job(&job).unwrap();
        assert_eq!(outcome, JobOutcome::Ok);
        // union of existing (0..181, 181 bars) and fetched (180..365, 185 bars)
        // overlapping at index 180 (1 bar): 181 + 185 - 1 = 365.
        assert_eq!(storage.series.lock().unwrap().as_ref().unwrap().len(), 365);
    }
}
