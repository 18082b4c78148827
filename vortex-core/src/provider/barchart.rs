//! Barchart.com provider.
//!
//! No `trendlab-core` analog has this Barchart-shaped surface: the
//! CSRF/XSRF token dance and the `/my/download` HTTP surface
//! are grounded on `spec.md` §6, the HTTP client/retry shape is carried over
//! from `trendlab-core/src/data/yahoo.rs`, and HTML token scraping uses the
//! `scraper` crate already present in the retrieval corpus.

use super::{rename_headers, Provider, BARCHART_COLUMNS};
use crate::error::DataProviderError;
use crate::instrument::Instrument;
use crate::period::{FrequencyAttributes, MinStart, Period};
use crate::series::{Bar, PriceSeries};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

const BASE_URL: &str = "https://www.barchart.com";

#[derive(Debug, Clone, Default)]
struct Tokens {
    csrf_token: String,
    xsrf_token: String,
}

/// Barchart.com data provider: form-based login, CSRF/XSRF token refresh on
/// every exchange, and a pre-flight usage check ahead of every download.
#[derive(Debug)]
pub struct BarchartProvider {
    client: reqwest::blocking::Client,
    username: String,
    password: String,
    daily_limit: u32,
    tokens: Mutex<Tokens>,
    logged_in: Mutex<bool>,
    frequencies: Vec<FrequencyAttributes>,
}

impl BarchartProvider {
    pub fn new(username: impl Into<String>, password: impl Into<String>, daily_limit: u32) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .cookie_store(true)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            username: username.into(),
            password: password.into(),
            daily_limit,
            tokens: Mutex::new(Tokens::default()),
            logged_in: Mutex::new(false),
            frequencies: default_frequencies(),
        }
    }

    /// Extract the hidden `_token` input from a login-form HTML page.
    fn scrape_csrf_token(html: &str) -> Result<String, DataProviderError> {
        let doc = Html::parse_document(html);
        let selector = Selector::parse(r#"input[name="_token"]"#)
            .map_err(|e| DataProviderError::ProviderError(format!("bad selector: {e:?}")))?;
        doc.select(&selector)
            .next()
            .and_then(|el| el.value().attr("value"))
            .map(str::to_string)
            .ok_or_else(|| {
                DataProviderError::ProviderError("CSRF token input not found on login page".into())
            })
    }

    /// Extract the `csrf-token` meta tag from an authenticated page.
    fn scrape_meta_csrf(html: &str) -> Result<String, DataProviderError> {
        let doc = Html::parse_document(html);
        let selector = Selector::parse(r#"meta[name="csrf-token"]"#)
            .map_err(|e| DataProviderError::ProviderError(format!("bad selector: {e:?}")))?;
        doc.select(&selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(str::to_string)
            .ok_or_else(|| {
                DataProviderError::ProviderError("csrf-token meta tag not found".into())
            })
    }

    /// URL-decode the `XSRF-TOKEN` cookie value from a `Set-Cookie`-style
    /// cookie jar snapshot. Barchart URL-encodes this cookie's value.
    fn decode_xsrf_cookie(raw: &str) -> String {
        raw.replace("%3D", "=").replace("%2F", "/").replace("%2B", "+")
    }

    fn download_path(asset_class: &str, symbol: &str) -> String {
        format!("{BASE_URL}/{asset_class}/quotes/{symbol}/historical-download")
    }

    fn asset_class_segment(instrument: &Instrument) -> &'static str {
        match instrument.asset_type() {
            crate::instrument::AssetType::Future => "futures",
            crate::instrument::AssetType::Stock => "stocks",
            crate::instrument::AssetType::Forex => "forex",
        }
    }

    /// Pre-flight usage check: POST `{onlyCheckPermissions: true}` to the
    /// download endpoint and raise `AllowanceExceeded` if the remaining quota
    /// has been consumed (spec.md §4.1, §6).
    fn check_usage(&self, symbol: &str) -> Result<(), DataProviderError> {
        let tokens = self.tokens.lock().unwrap().clone();
        let resp = self
            .client
            .post(format!("{BASE_URL}/my/download"))
            .header("content-type", "application/x-www-form-urlencoded")
            .header("x-xsrf-token", &tokens.xsrf_token)
            .header("Referer", BASE_URL)
            .form(&[
                ("_token", tokens.csrf_token.as_str()),
                ("symbol", symbol),
                ("onlyCheckPermissions", "true"),
            ])
            .send()
            .map_err(|e| DataProviderError::ConnectionFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(DataProviderError::ProviderError(format!(
                "usage check returned HTTP {}",
                resp.status()
            )));
        }

        let body: UsageCheckResponse = resp
            .json()
            .map_err(|e| DataProviderError::ProviderError(format!("usage check parse: {e}")))?;

        if body.error.unwrap_or(false) || body.count > self.daily_limit {
            return Err(DataProviderError::AllowanceExceeded {
                provider: self.name().to_string(),
            });
        }
        Ok(())
    }

    /// Parse the CSV body returned by `/my/download` into normalized bars,
    /// localizing `Datetime` from US/Central to UTC.
    fn parse_csv(body: &str, period: Period) -> Result<Vec<Bar>, DataProviderError> {
        let mut lines: Vec<&str> = body.lines().collect();
        // Tolerate a trailing footer line some upstream responses include.
        if lines.last().map(|l| !l.contains(',')).unwrap_or(false) {
            lines.pop();
        }
        if lines.is_empty() {
            return Err(DataProviderError::ProviderError("empty CSV body".into()));
        }

        let headers: Vec<String> = lines[0].split(',').map(str::to_string).collect();
        let renamed = rename_headers(&headers, BARCHART_COLUMNS);
        let datetime_idx = renamed
            .iter()
            .position(|h| h == "Datetime")
            .ok_or_else(|| DataProviderError::ProviderError("no Datetime column after rename".into()))?;
        let close_idx = renamed
            .iter()
            .position(|h| h == "Close")
            .ok_or_else(|| DataProviderError::ProviderError("no Close column after rename".into()))?;
        let open_idx = renamed.iter().position(|h| h == "Open");
        let high_idx = renamed.iter().position(|h| h == "High");
        let low_idx = renamed.iter().position(|h| h == "Low");
        let volume_idx = renamed.iter().position(|h| h == "Volume");
        let oi_idx = renamed.iter().position(|h| h == "Open Interest");

        let central = chrono_tz::US::Central;
        let mut bars = Vec::with_capacity(lines.len() - 1);
        for line in &lines[1..] {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != renamed.len() {
                continue;
            }
            let raw_dt = fields[datetime_idx];
            let naive = if period.is_intraday() {
                NaiveDateTime::parse_from_str(raw_dt, "%m/%d/%Y %H:%M")
            } else {
                NaiveDateTime::parse_from_str(&format!("{raw_dt} 00:00"), "%Y-%m-%d %H:%M")
            }
            .map_err(|e| DataProviderError::ProviderError(format!("bad datetime '{raw_dt}': {e}")))?;

            let datetime: DateTime<Utc> = central
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(|| {
                    DataProviderError::ProviderError(format!("ambiguous local time: {naive}"))
                })?
                .with_timezone(&Utc);

            let parse_f64 = |idx: Option<usize>| -> f64 {
                idx.and_then(|i| fields.get(i))
                    .and_then(|s| s.parse::<f64>().ok())
                    .unwrap_or(f64::NAN)
            };

            let mut extra = BTreeMap::new();
            if let Some(i) = oi_idx {
                if let Some(v) = fields.get(i).and_then(|s| s.parse::<f64>().ok()) {
                    extra.insert("Open Interest".to_string(), v);
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

#[derive(Debug, serde::Deserialize)]
struct UsageCheckResponse {
    #[serde(default)]
    count: u32,
    #[serde(default)]
    error: Option<bool>,
}

impl Provider for BarchartProvider {
    fn name(&self) -> &str {
        "barchart"
    }

    fn login(&self) -> Result<(), DataProviderError> {
        if *self.logged_in.lock().unwrap() {
            return Ok(());
        }
        let login_url = format!("{BASE_URL}/login");
        let page = self
            .client
            .get(&login_url)
            .send()
            .map_err(|e| DataProviderError::ConnectionFailed(e.to_string()))?;
        let body = page.text().map_err(|e| DataProviderError::ConnectionFailed(e.to_string()))?;
        let csrf_token = Self::scrape_csrf_token(&body)?;

        let resp = self
            .client
            .post(&login_url)
            .form(&[
                ("email", self.username.as_str()),
                ("password", self.password.as_str()),
                ("_token", csrf_token.as_str()),
            ])
            .send()
            .map_err(|e| DataProviderError::ConnectionFailed(e.to_string()))?;

        if resp.url().as_str() == login_url {
            return Err(DataProviderError::AuthenticationFailed(
                "login redirected back to the login page".into(),
            ));
        }

        self.tokens.lock().unwrap().csrf_token = csrf_token;
        *self.logged_in.lock().unwrap() = true;
        Ok(())
    }

    fn logout(&self) -> Result<(), DataProviderError> {
        *self.logged_in.lock().unwrap() = false;
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
        self.login()?;

        let symbol = instrument.symbol();
        let download_page_url = Self::download_path(Self::asset_class_segment(instrument), symbol);
        let page = self
            .client
            .get(&download_page_url)
            .send()
            .map_err(|e| DataProviderError::ConnectionFailed(e.to_string()))?;
        let xsrf_cookie = page
            .headers()
            .get("set-cookie")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_default();
        let body = page.text().map_err(|e| DataProviderError::ConnectionFailed(e.to_string()))?;
        let meta_csrf = Self::scrape_meta_csrf(&body)?;
        {
            let mut tokens = self.tokens.lock().unwrap();
            tokens.csrf_token = meta_csrf;
            tokens.xsrf_token = Self::decode_xsrf_cookie(&xsrf_cookie);
        }

        self.check_usage(symbol)?;

        let tokens = self.tokens.lock().unwrap().clone();
        let period_str = if period.is_intraday() { "minutes" } else { "daily" };
        let resp = self
            .client
            .post(format!("{BASE_URL}/my/download"))
            .header("content-type", "application/x-www-form-urlencoded")
            .header("x-xsrf-token", &tokens.xsrf_token)
            .header("Referer", &download_page_url)
            .form(&[
                ("_token", tokens.csrf_token.as_str()),
                ("fileName", symbol),
                ("symbol", symbol),
                ("startDate", &start.format("%Y-%m-%d").to_string()),
                ("endDate", &end.format("%Y-%m-%d").to_string()),
                ("orderBy", "tradeTime"),
                ("orderDir", "asc"),
                ("method", "historical"),
                ("limit", "10000"),
                ("customView", "true"),
                ("type", period_str),
                ("period", period_str),
            ])
            .send()
            .map_err(|e| DataProviderError::ConnectionFailed(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(DataProviderError::RateLimited { retry_after });
        }
        if !resp.status().is_success() {
            return Err(DataProviderError::ProviderError(format!(
                "download returned HTTP {}",
                resp.status()
            )));
        }

        let csv_body = resp.text().map_err(|e| DataProviderError::ConnectionFailed(e.to_string()))?;
        let bars = Self::parse_csv(&csv_body, period)?;

        Ok(PriceSeries::new(bars, instrument, period, start, end, self.name(), Utc::now()))
    }
}

fn default_frequencies() -> Vec<FrequencyAttributes> {
    vec![
        FrequencyAttributes {
            frequency: Period::M1,
            max_records_per_download: 10_000,
            max_window: ChronoDuration::days(5),
            min_start: MinStart::RelativeToNow(ChronoDuration::days(90)),
        },
        FrequencyAttributes {
            frequency: Period::D1,
            max_records_per_download: 10_000,
            max_window: ChronoDuration::days(365 * 5),
            min_start: MinStart::Absolute(Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap()),
        },
    ]
}
