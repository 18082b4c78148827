//! Job processor: drives the scheduled job list through the downloader,
//! sequentially by default or with one worker thread per instrument for
//! bounded parallelism (spec.md §5), grounded on `data/download.rs`'s
//! progress-reporting/summary shape.

use crate::downloader::{Downloader, DownloaderOptions, JobOutcome};
use crate::error::{TracedError, VortexError};
use crate::planner::DownloadJob;
use crate::provider::Provider;
use crate::resilience::circuit_breaker::{BreakerRegistry, CircuitBreaker};
use crate::resilience::recovery::RecoveryPlanner;
use crate::resilience::retry::RetryPolicy;
use crate::storage::Storage;
use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// Aggregate result of a processor run (spec.md §4.6).
#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub total: usize,
    pub succeeded: usize,
    pub low_data: Vec<String>,
    pub not_found: Vec<String>,
    pub aborted: bool,
}

impl DownloadSummary {
    pub fn all_succeeded(&self) -> bool {
        !self.aborted && self.low_data.is_empty() && self.not_found.is_empty() && self.succeeded == self.total
    }
}

fn job_label(job: &DownloadJob) -> String {
    format!("{}/{}", job.instrument.symbol(), job.period.as_str())
}

/// Reports per-job and per-batch progress during a processor run, grounded
/// on `data/download.rs`'s `DownloadProgress` callback. Interactive
/// consumers (a future CLI layer) can implement this directly; `vortex-core`
/// itself only ships `TracingProgress`.
pub trait DownloadProgress: Send + Sync {
    fn on_start(&self, job: &str, index: usize, total: usize);
    fn on_complete(&self, job: &str, index: usize, total: usize, outcome: &Result<JobOutcome, TracedError>);
    fn on_batch_complete(&self, summary: &DownloadSummary);
}

/// Default `DownloadProgress` that emits structured `tracing` events instead
/// of `StdoutProgress`-style println! calls, so progress carries the active
/// correlation ID like every other log line in this crate.
#[derive(Debug, Default)]
pub struct TracingProgress;

impl DownloadProgress for TracingProgress {
    fn on_start(&self, job: &str, index: usize, total: usize) {
        info!(job, index = index + 1, total, "starting job");
    }

    fn on_complete(&self, job: &str, index: usize, total: usize, outcome: &Result<JobOutcome, TracedError>) {
        match outcome {
            Ok(o) => info!(job, index = index + 1, total, outcome = ?o, "job complete"),
            Err(e) => error!(job, index = index + 1, total, error = %e, "job failed"),
        }
    }

    fn on_batch_complete(&self, summary: &DownloadSummary) {
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            low_data = summary.low_data.len(),
            not_found = summary.not_found.len(),
            aborted = summary.aborted,
            "batch complete"
        );
    }
}

/// Run `jobs` sequentially through `downloader`, reporting per-job and
/// per-batch progress through `progress` and absorbing `LowData`/
/// `DataNotFound` per spec.md §4.6's exception table. `AllowanceExceeded`
/// aborts the remaining jobs; any other error propagates.
pub fn run_sequential(
    jobs: &[DownloadJob],
    downloader: &Downloader,
    progress: &dyn DownloadProgress,
) -> Result<DownloadSummary, TracedError> {
    let total = jobs.len();
    let mut summary = DownloadSummary { total, ..Default::default() };

    for (index, job) in jobs.iter().enumerate() {
        let label = job_label(job);
        progress.on_start(&label, index, total);
        let result = downloader.process_job(job);
        progress.on_complete(&label, index, total, &result);

        match result {
            Ok(JobOutcome::Ok | JobOutcome::Exists | JobOutcome::Skipped) => {
                summary.succeeded += 1;
            }
            Ok(JobOutcome::LowData) => {
                summary.low_data.push(label);
            }
            Ok(JobOutcome::NotFound) => {
                summary.not_found.push(label);
            }
            Err(traced) if matches!(traced.error, VortexError::DataProvider(crate::error::DataProviderError::AllowanceExceeded { .. })) => {
                summary.aborted = true;
                break;
            }
            Err(traced) => return Err(traced),
        }
    }

    progress.on_batch_complete(&summary);
    Ok(summary)
}

/// Per-instrument job queues processed concurrently, one worker thread per
/// instrument, preserving each instrument's temporal ordering while running
/// different instruments in parallel (spec.md §5).
pub fn run_parallel(
    plans: BTreeMap<String, Vec<DownloadJob>>,
    provider: Arc<dyn Provider>,
    primary: Arc<dyn Storage>,
    backup: Option<Arc<dyn Storage>>,
    retry: RetryPolicy,
    recovery_fallback_providers_configured: bool,
    options: DownloaderOptions,
    progress: &dyn DownloadProgress,
) -> Result<DownloadSummary, TracedError> {
    let total: usize = plans.values().map(|v| v.len()).sum();
    let breaker = BreakerRegistry::new().get_or_create(provider.name());
    let (tx, rx) = mpsc::channel::<Result<(String, JobOutcome), (String, TracedError)>>();

    let mut handles = Vec::new();
    for (key, jobs) in plans {
        let provider = Arc::clone(&provider);
        let primary = Arc::clone(&primary);
        let backup = backup.as_ref().map(Arc::clone);
        let breaker = Arc::clone(&breaker);
        let retry = retry.clone();
        let options = options.clone();
        let tx = tx.clone();

        let handle = thread::spawn(move || {
            let recovery = RecoveryPlanner::new(recovery_fallback_providers_configured);
            let downloader = Downloader {
                provider: provider.as_ref(),
                primary: primary.as_ref(),
                backup: backup.as_deref(),
                breaker: breaker.as_ref(),
                retry,
                recovery,
                options,
            };
            for job in &jobs {
                let label = job_label(job);
                match downloader.process_job(job) {
                    Ok(outcome) => {
                        if tx.send(Ok((label, outcome))).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err((key.clone(), e)));
                        return;
                    }
                }
            }
        });
        handles.push(handle);
    }
    drop(tx);

    let mut summary = DownloadSummary { total, ..Default::default() };
    let mut processed = 0;
    let mut propagate: Option<TracedError> = None;

    for msg in rx {
        let index = processed;
        processed += 1;
        match msg {
            Ok((label, outcome @ (JobOutcome::Ok | JobOutcome::Exists | JobOutcome::Skipped))) => {
                progress.on_complete(&label, index, total, &Ok(outcome));
                summary.succeeded += 1;
            }
            Ok((label, outcome @ JobOutcome::LowData)) => {
                progress.on_complete(&label, index, total, &Ok(outcome));
                summary.low_data.push(label);
            }
            Ok((label, outcome @ JobOutcome::NotFound)) => {
                progress.on_complete(&label, index, total, &Ok(outcome));
                summary.not_found.push(label);
            }
            Err((key, traced))
                if matches!(traced.error, VortexError::DataProvider(crate::error::DataProviderError::AllowanceExceeded { .. })) =>
            {
                progress.on_complete(&key, index, total, &Err(traced));
                summary.aborted = true;
            }
            Err((key, traced)) => {
                progress.on_complete(&key, index, total, &Err(traced.clone()));
                propagate.get_or_insert(traced);
            }
        }
    }

    for handle in handles {
        let _ = handle.join();
    }

    progress.on_batch_complete(&summary);
    if let Some(err) = propagate {
        return Err(err);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DataProviderError, StorageError};
    use crate::instrument::Instrument;
    use crate::period::{FrequencyAttributes, MinStart, Period};
    use crate::series::{Bar, PriceSeries};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::collections::BTreeMap as StdBTreeMap;
    use std::sync::Mutex;

    fn day(n: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::days(n)
    }

    fn bar(ts: chrono::DateTime<Utc>) -> Bar {
        Bar { datetime: ts, open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: 10.0, extra: StdBTreeMap::new() }
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

    #[derive(Debug)]
    struct StubProvider {
        frequencies: Vec<FrequencyAttributes>,
        responses: Mutex<Vec<Result<PriceSeries, DataProviderError>>>,
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
            self.responses.lock().unwrap().pop().expect("enough stub responses queued")
        }
    }

    #[derive(Debug, Default)]
    struct NullStorage;

    impl Storage for NullStorage {
        fn persist(&self, _series: &PriceSeries, _instrument: &Instrument, _period: Period) -> Result<(), StorageError> {
            Ok(())
        }
        fn load(&self, _instrument: &Instrument, _period: Period) -> Result<PriceSeries, StorageError> {
            Err(StorageError::FileNotFound("null".into()))
        }
    }

    fn ok_series(rows: i64) -> Result<PriceSeries, DataProviderError> {
        Ok(PriceSeries::new(
            (0..rows).map(day).map(bar).collect(),
            &instrument(),
            Period::D1,
            day(0),
            day(rows),
            "stub",
            day(rows),
        ))
    }

    #[test]
    fn sequential_run_reports_low_data_and_continues() {
        let provider = StubProvider {
            frequencies: frequencies(),
            responses: Mutex::new(vec![ok_series(30)]),
        };

        let storage = NullStorage;
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
        let jobs = vec![DownloadJob { instrument: instrument(), period: Period::D1, start: day(0), end: day(30) }];

        let summary = run_sequential(&jobs, &downloader, &TracingProgress).unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.succeeded, 1);
        assert!(summary.low_data.is_empty());
    }

    #[test]
    fn allowance_exceeded_aborts_remaining_jobs() {
        let provider = StubProvider {
            frequencies: frequencies(),
            responses: Mutex::new(vec![
                Err(DataProviderError::AllowanceExceeded { provider: "stub".into() }),
            ]),
        };
        let storage = NullStorage;
        let breaker = CircuitBreaker::default_provider();
        let mut retry = RetryPolicy::default();
        retry.max_attempts = 1;
        let downloader = Downloader {
            provider: &provider,
            primary: &storage,
            backup: None,
            breaker: &breaker,
            retry,
            recovery: RecoveryPlanner::new(false),
            options: DownloaderOptions::default(),
        };
        let jobs = vec![
            DownloadJob { instrument: instrument(), period: Period::D1, start: day(0), end: day(30) },
            DownloadJob { instrument: instrument(), period: Period::D1, start: day(30), end: day(60) },
        ];

        let summary = run_sequential(&jobs, &downloader, &TracingProgress).unwrap();
        assert!(summary.aborted);
        assert_eq!(summary.succeeded, 0);
    }

    #[test]
    fn parallel_run_drains_each_instrument_on_its_own_thread() {
        let provider = Arc::new(StubProvider {
            frequencies: frequencies(),
            responses: Mutex::new(vec![ok_series(30), ok_series(30)]),
        });
        let storage: Arc<dyn Storage> = Arc::new(NullStorage);

        let mut plans: BTreeMap<String, Vec<DownloadJob>> = BTreeMap::new();
        plans.insert("AAPL".into(), vec![DownloadJob {
            instrument: Instrument::Stock { symbol: "AAPL".into() },
            period: Period::D1,
            start: day(0),
            end: day(30),
        }]);
        plans.insert("MSFT".into(), vec![DownloadJob {
            instrument: Instrument::Stock { symbol: "MSFT".into() },
            period: Period::D1,
            start: day(0),
            end: day(30),
        }]);

        let summary = run_parallel(
            plans,
            provider,
            storage,
            None,
            RetryPolicy::default(),
            false,
            DownloaderOptions::default(),
            &TracingProgress,
        )
        .unwrap();

        assert_eq!(summary.total, 2);
        assert!(summary.all_succeeded());
    }

    #[test]
    fn parallel_run_absorbs_allowance_exceeded_without_propagating() {
        let provider = Arc::new(StubProvider {
            frequencies: frequencies(),
            responses: Mutex::new(vec![
                Err(DataProviderError::AllowanceExceeded { provider: "stub".into() }),
            ]),
        });
        let storage: Arc<dyn Storage> = Arc::new(NullStorage);

        let mut plans: BTreeMap<String, Vec<DownloadJob>> = BTreeMap::new();
        plans.insert("AAPL".into(), vec![DownloadJob {
            instrument: Instrument::Stock { symbol: "AAPL".into() },
            period: Period::D1,
            start: day(0),
            end: day(30),
        }]);
        let mut retry = RetryPolicy::default();
        retry.max_attempts = 1;

        let summary = run_parallel(
            plans,
            provider,
            storage,
            None,
            retry,
            false,
            DownloaderOptions::default(),
            &TracingProgress,
        )
        .unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.succeeded, 0);
    }
}
