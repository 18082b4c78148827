//! Bar-frequency vocabulary and per-frequency provider constraints.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Closed enum of bar frequencies (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "2m")]
    M2,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "10m")]
    M10,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "20m")]
    M20,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1W")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
    #[serde(rename = "3M")]
    Mo3,
}

impl Period {
    /// String value used in the enum's wire representation (sidecar JSON,
    /// instrument config files).
    pub fn as_str(self) -> &'static str {
        match self {
            Period::M1 => "1m",
            Period::M2 => "2m",
            Period::M5 => "5m",
            Period::M10 => "10m",
            Period::M15 => "15m",
            Period::M20 => "20m",
            Period::M30 => "30m",
            Period::H1 => "1h",
            Period::D1 => "1d",
            Period::W1 => "1W",
            Period::Mo1 => "1M",
            Period::Mo3 => "3M",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "1m" => Period::M1,
            "2m" => Period::M2,
            "5m" => Period::M5,
            "10m" => Period::M10,
            "15m" => Period::M15,
            "20m" => Period::M20,
            "30m" => Period::M30,
            "1h" => Period::H1,
            "1d" => Period::D1,
            "1W" => Period::W1,
            "1M" => Period::Mo1,
            "3M" => Period::Mo3,
            _ => return None,
        })
    }

    /// Nominal bar duration, used to size fetch windows.
    pub fn nominal_duration(self) -> ChronoDuration {
        match self {
            Period::M1 => ChronoDuration::minutes(1),
            Period::M2 => ChronoDuration::minutes(2),
            Period::M5 => ChronoDuration::minutes(5),
            Period::M10 => ChronoDuration::minutes(10),
            Period::M15 => ChronoDuration::minutes(15),
            Period::M20 => ChronoDuration::minutes(20),
            Period::M30 => ChronoDuration::minutes(30),
            Period::H1 => ChronoDuration::hours(1),
            Period::D1 => ChronoDuration::days(1),
            Period::W1 => ChronoDuration::weeks(1),
            Period::Mo1 => ChronoDuration::days(30),
            Period::Mo3 => ChronoDuration::days(90),
        }
    }

    /// Whether this period requires the special handling intraday periods
    /// get (tick-date gating, US/Central localization before UTC conversion).
    pub fn is_intraday(self) -> bool {
        self.nominal_duration() < ChronoDuration::days(1)
    }
}

/// Per-period provider metadata (spec.md §3).
#[derive(Debug, Clone)]
pub struct FrequencyAttributes {
    pub frequency: Period,
    /// Bar cap per request.
    pub max_records_per_download: usize,
    /// Time cap per request.
    pub max_window: ChronoDuration,
    /// Earliest supported date, either absolute or relative to `now`.
    pub min_start: MinStart,
}

/// Earliest date a provider supports for a given frequency.
#[derive(Debug, Clone, Copy)]
pub enum MinStart {
    Absolute(DateTime<Utc>),
    RelativeToNow(ChronoDuration),
}

impl MinStart {
    pub fn resolve(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            MinStart::Absolute(dt) => dt,
            MinStart::RelativeToNow(d) => now - d,
        }
    }
}

impl FrequencyAttributes {
    pub fn max_range(&self) -> ChronoDuration {
        self.max_window
    }

    pub fn min_start_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.min_start.resolve(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_wire_strings() {
        for p in [
            Period::M1,
            Period::M2,
            Period::M5,
            Period::M10,
            Period::M15,
            Period::M20,
            Period::M30,
            Period::H1,
            Period::D1,
            Period::W1,
            Period::Mo1,
            Period::Mo3,
        ] {
            assert_eq!(Period::from_str_opt(p.as_str()), Some(p));
        }
    }

    #[test]
    fn intraday_flag() {
        assert!(Period::M1.is_intraday());
        assert!(Period::H1.is_intraday());
        assert!(!Period::D1.is_intraday());
        assert!(!Period::W1.is_intraday());
    }

    #[test]
    fn relative_min_start_resolves_against_now() {
        let now = Utc::now();
        let attrs = FrequencyAttributes {
            frequency: Period::M5,
            max_records_per_download: 10_000,
            max_window: ChronoDuration::days(7),
            min_start: MinStart::RelativeToNow(ChronoDuration::days(60)),
        };
        assert_eq!(attrs.min_start_at(now), now - ChronoDuration::days(60));
    }
}
