//! Instrument model: stock, forex, and future tagged union, plus the
//! declarative per-instrument configuration the planner expands.

use crate::error::InstrumentError;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Futures month codes, in calendar order (spec.md §3).
pub const MONTH_CODES: [char; 12] = [
    'F', 'G', 'H', 'J', 'K', 'M', 'N', 'Q', 'U', 'V', 'X', 'Z',
];

/// Convert a roll-cycle month code to its calendar month number (1-12).
pub fn month_code_to_number(code: char) -> Result<u32, InstrumentError> {
    MONTH_CODES
        .iter()
        .position(|&c| c == code)
        .map(|idx| (idx + 1) as u32)
        .ok_or(InstrumentError::InvalidMonthCode(code))
}

/// Instrument identity and shape (spec.md §3 tagged union).
///
/// Identity invariant: `(asset_type, symbol, [year, month for futures])`
/// uniquely identifies an instrument; `PartialEq`/`Eq` are derived structurally
/// which already implements that invariant since the variant discriminant and
/// all identity fields participate in the derived comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instrument {
    Stock { symbol: String },
    Forex { symbol: String },
    Future {
        symbol: String,
        futures_code: String,
        year: i32,
        month_code: char,
        tick_date: Option<NaiveDate>,
        days_count: i64,
    },
}

impl Instrument {
    pub fn symbol(&self) -> &str {
        match self {
            Instrument::Stock { symbol } => symbol,
            Instrument::Forex { symbol } => symbol,
            Instrument::Future { symbol, .. } => symbol,
        }
    }

    pub fn asset_type(&self) -> AssetType {
        match self {
            Instrument::Stock { .. } => AssetType::Stock,
            Instrument::Forex { .. } => AssetType::Forex,
            Instrument::Future { .. } => AssetType::Future,
        }
    }

    /// Build a new future, validating the month code.
    pub fn new_future(
        futures_code: impl Into<String>,
        year: i32,
        month_code: char,
        tick_date: Option<NaiveDate>,
        days_count: i64,
    ) -> Result<Self, InstrumentError> {
        month_code_to_number(month_code)?;
        let futures_code = futures_code.into();
        let symbol = format!("{futures_code}{month_code}{}", year % 100);
        Ok(Instrument::Future {
            symbol,
            futures_code,
            year,
            month_code,
            tick_date,
            days_count,
        })
    }

    /// The finite validity range `[contract_start, contract_end]` derived
    /// from year + month + days_count (spec.md §3). Only meaningful for
    /// `Future`; returns `None` for undated instruments.
    pub fn validity_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            Instrument::Future {
                year,
                month_code,
                days_count,
                ..
            } => {
                let month = month_code_to_number(*month_code).ok()?;
                let contract_end = Utc.with_ymd_and_hms(*year, month, 1, 0, 0, 0).single()?;
                let contract_start = contract_end - chrono::Duration::days(*days_count);
                Some((contract_start, contract_end))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Stock,
    Forex,
    Future,
}

/// Declarative plan per logical instrument (spec.md §3, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub asset_class: AssetType,
    pub code: String,
    /// Roll cycle month-code string, e.g. "HMUZ". Only meaningful for futures.
    #[serde(default)]
    pub cycle: Option<String>,
    /// Empty means disabled.
    #[serde(default)]
    pub periods: Vec<crate::period::Period>,
    #[serde(default)]
    pub tick_date: Option<NaiveDate>,
    #[serde(default)]
    pub days_count: Option<i64>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

impl InstrumentConfig {
    pub fn is_disabled(&self) -> bool {
        self.periods.is_empty()
    }

    /// The roll cycle as an ordered list of validated month codes.
    pub fn cycle_codes(&self) -> Result<Vec<char>, InstrumentError> {
        let cycle = self.cycle.as_deref().unwrap_or("");
        if cycle.is_empty() {
            return Ok(Vec::new());
        }
        cycle.chars().map(|c| month_code_to_number(c).map(|_| c)).collect()
    }
}
