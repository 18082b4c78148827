//! Interactive Brokers provider.
//!
//! A real IBKR session is a stateful TWS/IB Gateway socket connection — an
//! external system this crate does not own. Modeled here as an injected
//! `IbkrGateway` collaborator (grounded in the same dependency-injection
//! shape `trendlab-core`'s `DataProvider` trait uses to let `ingest.rs`
//! substitute fakes in tests) so `IbkrProvider` itself stays a thin adapter
//! between that collaborator and the `Provider` contract.

use super::Provider;
use crate::error::DataProviderError;
use crate::instrument::Instrument;
use crate::period::{FrequencyAttributes, MinStart, Period};
use crate::series::{Bar, PriceSeries};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Connection parameters for a TWS/IB Gateway session (spec.md §6).
#[derive(Debug, Clone)]
pub struct IbkrConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i64,
    pub timeout: Duration,
}

impl Default for IbkrConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7497,
            client_id: 0,
            timeout: Duration::from_secs(30),
        }
    }
}

/// One raw row of historical data as returned by the gateway, before
/// column normalization.
#[derive(Debug, Clone)]
pub struct IbkrRow {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub wap: f64,
    pub count: f64,
}

/// The external collaborator: an active TWS/IB Gateway connection capable of
/// requesting historical bars. A production implementation would wrap the
/// vendor socket client; tests substitute an in-memory fake.
pub trait IbkrGateway: Send + Sync + std::fmt::Debug {
    fn connect(&self, config: &IbkrConfig) -> Result<(), DataProviderError>;
    fn disconnect(&self) -> Result<(), DataProviderError>;
    fn request_historical_data(
        &self,
        symbol: &str,
        period: Period,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<IbkrRow>, DataProviderError>;
}

#[derive(Debug)]
pub struct IbkrProvider<G: IbkrGateway> {
    gateway: G,
    config: IbkrConfig,
    frequencies: Vec<FrequencyAttributes>,
}

impl<G: IbkrGateway> IbkrProvider<G> {
    pub fn new(gateway: G, config: IbkrConfig) -> Self {
        Self {
            gateway,
            config,
            frequencies: default_frequencies(),
        }
    }

    /// IBKR rows arrive already typed (`date`/`close`/`wap`/`count`), so the
    /// `IBKR_COLUMNS` mapping (spec.md §4.1) is applied structurally here
    /// rather than by renaming a dynamic header list as Barchart's CSV path
    /// does.
    fn rows_to_bars(rows: Vec<IbkrRow>) -> Vec<Bar> {
        rows.into_iter()
            .filter_map(|row| {
                let datetime = DateTime::parse_from_rfc3339(&row.date)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()?;
                let mut extra = BTreeMap::new();
                extra.insert("wap".to_string(), row.wap);
                extra.insert("count".to_string(), row.count);
                Some(Bar {
                    datetime,
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.volume,
                    extra,
                })
            })
            .collect()
    }
}

impl<G: IbkrGateway> Provider for IbkrProvider<G> {
    fn name(&self) -> &str {
        "ibkr"
    }

    fn login(&self) -> Result<(), DataProviderError> {
        self.gateway.connect(&self.config)
    }

    fn logout(&self) -> Result<(), DataProviderError> {
        self.gateway.disconnect()
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
        let rows = self
            .gateway
            .request_historical_data(instrument.symbol(), period, start, end)?;
        let bars = Self::rows_to_bars(rows);
        if bars.is_empty() {
            return Err(DataProviderError::DataNotFound {
                symbol: instrument.symbol().to_string(),
            });
        }
        Ok(PriceSeries::new(bars, instrument, period, start, end, self.name(), Utc::now()))
    }
}

fn default_frequencies() -> Vec<FrequencyAttributes> {
    vec![
        FrequencyAttributes {
            frequency: Period::M1,
            max_records_per_download: 2_000,
            max_window: ChronoDuration::days(1),
            min_start: MinStart::RelativeToNow(ChronoDuration::days(180)),
        },
        FrequencyAttributes {
            frequency: Period::D1,
            max_records_per_download: 2_000,
            max_window: ChronoDuration::days(365),
            min_start: MinStart::RelativeToNow(ChronoDuration::days(365 * 5)),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FakeGateway {
        rows: Mutex<Vec<IbkrRow>>,
        connected: Mutex<bool>,
    }

    impl IbkrGateway for FakeGateway {
        fn connect(&self, _config: &IbkrConfig) -> Result<(), DataProviderError> {
            *self.connected.lock().unwrap() = true;
            Ok(())
        }

        fn disconnect(&self) -> Result<(), DataProviderError> {
            *self.connected.lock().unwrap() = false;
            Ok(())
        }

        fn request_historical_data(
            &self,
            _symbol: &str,
            _period: Period,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<IbkrRow>, DataProviderError> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    fn sample_row() -> IbkrRow {
        IbkrRow {
            date: "2024-01-02T00:00:00Z".to_string(),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 1000.0,
            wap: 1.4,
            count: 42.0,
        }
    }

    #[test]
    fn fetch_maps_wap_and_count_into_extra_columns() {
        let gw = FakeGateway {
            rows: Mutex::new(vec![sample_row()]),
            connected: Mutex::new(false),
        };
        let provider = IbkrProvider::new(gw, IbkrConfig::default());
        let instrument = Instrument::Stock { symbol: "AAPL".into() };
        let start = Utc::now() - ChronoDuration::days(1);
        let end = Utc::now();
        let series = provider
            .fetch_historical_data(&instrument, Period::D1, start, end)
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.bars[0].extra.get("wap"), Some(&1.4));
        assert_eq!(series.bars[0].extra.get("count"), Some(&42.0));
    }

    #[test]
    fn fetch_errors_on_empty_rows() {
        let gw = FakeGateway::default();
        let provider = IbkrProvider::new(gw, IbkrConfig::default());
        let instrument = Instrument::Stock { symbol: "AAPL".into() };
        let start = Utc::now() - ChronoDuration::days(1);
        let end = Utc::now();
        let err = provider
            .fetch_historical_data(&instrument, Period::D1, start, end)
            .unwrap_err();
        assert!(matches!(err, DataProviderError::DataNotFound { .. }));
    }

    #[test]
    fn login_and_logout_delegate_to_gateway() {
        let gw = FakeGateway::default();
        let provider = IbkrProvider::new(gw, IbkrConfig::default());
        provider.login().unwrap();
        assert!(*provider.gateway.connected.lock().unwrap());
        provider.logout().unwrap();
        assert!(!*provider.gateway.connected.lock().unwrap());
    }
}
