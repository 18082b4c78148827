//! Yahoo Finance provider.
//!
//! Fetches OHLCV bars from Yahoo's v8 chart API. Grounded directly on
//! `trendlab-core/src/data/yahoo.rs`'s request/retry/parse shape, adapted to
//! the `Provider` trait and `DataProviderError` taxonomy and extended to the
//! full period set this engine supports.

use super::Provider;
use crate::error::DataProviderError;
use crate::instrument::Instrument;
use crate::period::{FrequencyAttributes, MinStart, Period};
use crate::series::{Bar, PriceSeries};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance data provider.
#[derive(Debug)]
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    frequencies: Vec<FrequencyAttributes>,
    max_attempts: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .cookie_store(true)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            frequencies: default_frequencies(),
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }

    fn interval_param(period: Period) -> &'static str {
        match period {
            Period::M1 => "1m",
            Period::M2 => "2m",
            Period::M5 => "5m",
            Period::M10 => "15m", // Yahoo has no 10m bucket; callers should prefer 15m
            Period::M15 => "15m",
            Period::M20 => "30m", // likewise, no 20m bucket
            Period::M30 => "30m",
            Period::H1 => "1h",
            Period::D1 => "1d",
            Period::W1 => "1wk",
            Period::Mo1 => "1mo",
            Period::Mo3 => "3mo",
        }
    }

    fn chart_url(symbol: &str, period: Period, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}\
             ?period1={}&period2={}&interval={}\
             &includeAdjustedClose=true",
            start.timestamp(),
            end.timestamp(),
            Self::interval_param(period),
        )
    }

    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<Vec<Bar>, DataProviderError> {
        let result = resp.chart.result.ok_or_else(|| {
            if let Some(err) = resp.chart.error {
                if err.code == "Not Found" {
                    DataProviderError::DataNotFound {
                        symbol: symbol.to_string(),
                    }
                } else {
                    DataProviderError::ProviderError(format!("{}: {}", err.code, err.description))
                }
            } else {
                DataProviderError::ProviderError("empty chart result with no error".into())
            }
        })?;

        let data = result.into_iter().next().ok_or_else(|| {
            DataProviderError::DataNotFound {
                symbol: symbol.to_string(),
            }
        })?;

        let timestamps = data
            .timestamp
            .ok_or_else(|| DataProviderError::ProviderError("no timestamps in response".into()))?;

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataProviderError::ProviderError("no quote block in response".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let mut bars = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            // Skip holidays/non-trading bars where the whole row is null.
            if open.is_none() && high.is_none() && low.is_none() && close.is_none() {
                continue;
            }

            let datetime = DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| DataProviderError::ProviderError(format!("invalid timestamp: {ts}")))?;

            let mut extra = BTreeMap::new();
            if let Some(adj) = adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten()) {
                extra.insert("Adj Close".to_string(), adj);
            }

            bars.push(Bar {
                datetime,
                open: open.unwrap_or(f64::NAN),
                high: high.unwrap_or(f64::NAN),
                low: low.unwrap_or(f64::NAN),
                close: close.unwrap_or(f64::NAN),
                volume: volume.unwrap_or(0) as f64,
                extra,
            });
        }

        if bars.is_empty() {
            return Err(DataProviderError::DataNotFound {
                symbol: symbol.to_string(),
            });
        }

        Ok(bars)
    }

    fn fetch_with_retry(
        &self,
        symbol: &str,
        period: Period,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, DataProviderError> {
        let url = Self::chart_url(symbol, period, start, end);
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                std::thread::sleep(self.base_delay * 2u32.pow(attempt - 1));
            }

            let _scope = crate::correlation::enter_with_provider("yahoo-http-request", "yahoo_finance");

            match self.client.get(&url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs);
                        last_error = Some(DataProviderError::RateLimited { retry_after });
                        continue;
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(DataProviderError::AuthenticationFailed(
                            "Yahoo Finance rejected the request (401/403)".into(),
                        ));
                    }

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(DataProviderError::DataNotFound {
                            symbol: symbol.to_string(),
                        });
                    }

                    if !status.is_success() {
                        last_error = Some(DataProviderError::ProviderError(format!(
                            "HTTP {status} for {symbol}"
                        )));
                        continue;
                    }

                    let chart: ChartResponse = resp.json().map_err(|e| {
                        DataProviderError::ProviderError(format!(
                            "failed to parse chart response for {symbol}: {e}"
                        ))
                    })?;

                    return Self::parse_response(symbol, chart);
                }
                Err(e) => {
                    last_error = Some(DataProviderError::ConnectionFailed(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataProviderError::ProviderError("max attempts exceeded".into())))
    }
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn login(&self) -> Result<(), DataProviderError> {
        Ok(())
    }

    fn logout(&self) -> Result<(), DataProviderError> {
        Ok(())
    }

    fn supported_frequencies(&self) -> &[FrequencyAttributes] {
        &self.frequencies
    }

    fn fetch_historical_data(
        &self,
        instrument: &Instrument,
        period: Period,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PriceSeries, DataProviderError> {
        // Yahoo's chart API timestamps are already absolute UTC instants, so
        // unlike Barchart/IBKR there is no US/Central localization pass here.
        let bars = self.fetch_with_retry(instrument.symbol(), period, start, end)?;
        Ok(PriceSeries::new(
            bars,
            instrument,
            period,
            start,
            end,
            self.name(),
            Utc::now(),
        ))
    }
}

fn default_frequencies() -> Vec<FrequencyAttributes> {
    vec![
        FrequencyAttributes {
            frequency: Period::M5,
            max_records_per_download: 20_000,
            max_window: ChronoDuration::days(60),
            min_start: MinStart::RelativeToNow(ChronoDuration::days(60)),
        },
        FrequencyAttributes {
            frequency: Period::M15,
            max_records_per_download: 20_000,
            max_window: ChronoDuration::days(60),
            min_start: MinStart::RelativeToNow(ChronoDuration::days(60)),
        },
        FrequencyAttributes {
            frequency: Period::H1,
            max_records_per_download: 20_000,
            max_window: ChronoDuration::days(730),
            min_start: MinStart::RelativeToNow(ChronoDuration::days(730)),
        },
        FrequencyAttributes {
            frequency: Period::D1,
            max_records_per_download: 100_000,
            max_window: ChronoDuration::days(365 * 10),
            min_start: MinStart::Absolute(
                chrono::TimeZone::with_ymd_and_hms(&Utc, 1970, 1, 1, 0, 0, 0).unwrap(),
            ),
        },
        FrequencyAttributes {
            frequency: Period::W1,
            max_records_per_download: 100_000,
            max_window: ChronoDuration::days(365 * 20),
            min_start: MinStart::Absolute(
                chrono::TimeZone::with_ymd_and_hms(&Utc, 1970, 1, 1, 0, 0, 0).unwrap(),
            ),
        },
        FrequencyAttributes {
            frequency: Period::Mo1,
            max_records_per_download: 100_000,
            max_window: ChronoDuration::days(365 * 20),
            min_start: MinStart::Absolute(
                chrono::TimeZone::with_ymd_and_hms(&Utc, 1970, 1, 1, 0, 0, 0).unwrap(),
            ),
        },
    ]
}
