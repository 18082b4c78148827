//! Job planner: expands an `InstrumentConfig` map into `DownloadJob` lists
//! (spec.md §4.4).

use crate::instrument::{AssetType, Instrument, InstrumentConfig};
use crate::period::Period;
use crate::provider::Provider;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::collections::BTreeMap;

/// A single unit of work for the downloader: fetch `instrument`/`period`
/// over `[start, end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadJob {
    pub instrument: Instrument,
    pub period: Period,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Plan every enabled instrument's job list against `provider`.
///
/// Each instrument key maps to its job list in the order the planner
/// produced it, then reversed (most-recent window first) so the scheduler
/// can pop from the tail while the run still drains earliest-first
/// (spec.md §4.4 step 4).
pub fn plan(
    instruments: &BTreeMap<String, InstrumentConfig>,
    provider: &dyn Provider,
    start_year: i32,
    end_year: i32,
    now: DateTime<Utc>,
) -> BTreeMap<String, Vec<DownloadJob>> {
    let mut plans = BTreeMap::new();
    for (key, config) in instruments {
        if config.is_disabled() {
            continue;
        }
        let mut jobs = plan_instrument(config, provider, start_year, end_year, now);
        jobs.reverse();
        if !jobs.is_empty() {
            plans.insert(key.clone(), jobs);
        }
    }
    plans
}

fn year_bounds(start_year: i32, end_year: i32, config_start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let mut start = Utc.with_ymd_and_hms(start_year, 1, 1, 0, 0, 0).single().unwrap();
    if let Some(override_start) = config_start {
        if override_start > start {
            start = override_start;
        }
    }
    let mut end = Utc
        .with_ymd_and_hms(end_year, 12, 31, 23, 59, 59)
        .single()
        .unwrap();
    if end > now {
        end = now;
    }
    (start, end)
}

fn plan_instrument(
    config: &InstrumentConfig,
    provider: &dyn Provider,
    start_year: i32,
    end_year: i32,
    now: DateTime<Utc>,
) -> Vec<DownloadJob> {
    let config_start = config
        .start_date
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt));
    let (start, end) = year_bounds(start_year, end_year, config_start, now);
    if start > end {
        return Vec::new();
    }

    match config.asset_class {
        AssetType::Future => plan_future(config, provider, start.year(), end.year(), start, end),
        AssetType::Stock | AssetType::Forex => plan_undated(config, provider, start, end),
    }
}

fn plan_future(
    config: &InstrumentConfig,
    provider: &dyn Provider,
    start_year: i32,
    end_year: i32,
    bound_start: DateTime<Utc>,
    bound_end: DateTime<Utc>,
) -> Vec<DownloadJob> {
    let Ok(cycle) = config.cycle_codes() else {
        return Vec::new();
    };
    if cycle.is_empty() {
        return Vec::new();
    }
    let days_count = config.days_count.unwrap_or(0);

    let mut jobs = Vec::new();
    for year in start_year..=end_year {
        for &month_code in &cycle {
            let Ok(instrument) = Instrument::new_future(&config.code, year, month_code, config.tick_date, days_count) else {
                continue;
            };
            let Some((contract_start, contract_end)) = instrument.validity_range() else {
                continue;
            };
            let clamped_start = contract_start.max(bound_start);
            let clamped_end = contract_end.min(bound_end);
            if clamped_start >= clamped_end {
                continue;
            }

            for &period in &config.periods {
                if !provider.supported_frequencies().iter().any(|f| f.frequency == period) {
                    continue;
                }
                if period.is_intraday() {
                    if let Some(tick_date) = config.tick_date {
                        let tick_start = Utc.from_utc_datetime(&tick_date.and_hms_opt(0, 0, 0).unwrap());
                        if clamped_start < tick_start {
                            continue;
                        }
                    }
                }
                let Some(min_start) = provider.min_start(period, bound_end) else {
                    continue;
                };
                if clamped_start < min_start {
                    continue;
                }
                jobs.push(DownloadJob {
                    instrument: instrument.clone(),
                    period,
                    start: clamped_start,
                    end: clamped_end,
                });
            }
        }
    }
    jobs
}

fn plan_undated(
    config: &InstrumentConfig,
    provider: &dyn Provider,
    bound_start: DateTime<Utc>,
    bound_end: DateTime<Utc>,
) -> Vec<DownloadJob> {
    let instrument = match config.asset_class {
        AssetType::Stock => Instrument::Stock { symbol: config.code.clone() },
        AssetType::Forex => Instrument::Forex { symbol: config.code.clone() },
        AssetType::Future => unreachable!("plan_undated only called for Stock/Forex"),
    };

    let mut jobs = Vec::new();
    for &period in &config.periods {
        if !provider.supported_frequencies().iter().any(|f| f.frequency == period) {
            continue;
        }

        let mut start = bound_start;
        if period.is_intraday() {
            if let Some(tick_date) = config.tick_date {
                let tick_start = Utc.from_utc_datetime(&tick_date.and_hms_opt(0, 0, 0).unwrap());
                if start < tick_start {
                    start = tick_start;
                }
            }
        }
        let Some(min_start) = provider.min_start(period, bound_end) else {
            continue;
        };
        if start < min_start {
            start = min_start;
        }
        if start >= bound_end {
            continue;
        }

        let Some(max_range) = provider.max_range(period) else {
            jobs.push(DownloadJob { instrument: instrument.clone(), period, start, end: bound_end });
            continue;
        };

        let mut window_start = start;
        while window_start < bound_end {
            let window_end = (window_start + max_range).min(bound_end);
            jobs.push(DownloadJob {
                instrument: instrument.clone(),
                period,
                start: window_start,
                end: window_end,
            });
            window_start = window_end;
        }
    }
    jobs
}
