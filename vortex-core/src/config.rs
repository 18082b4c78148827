//! Run configuration (spec.md §6), grounded on `trendlab-runner/src/config.rs`'s
//! serde-derived, TOML/JSON-loadable shape.

use crate::error::ConfigurationError;
use crate::instrument::InstrumentConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Per-provider credentials and self-imposed quota (spec.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub daily_limit: Option<u32>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// IBKR's TWS/Gateway connection parameters (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IbkrConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for IbkrConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7497,
            client_id: 1,
            timeout: Duration::from_secs(30),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Top-level run configuration: the strongly-typed form of spec.md §6's
/// configuration table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoreConfig {
    pub output_directory: String,
    #[serde(default)]
    pub backup_enabled: bool,
    #[serde(default)]
    pub force_backup: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub dry_run_fetch: bool,
    #[serde(default)]
    pub random_sleep_max: f64,
    pub default_provider: String,
    #[serde(default)]
    pub coverage_tolerance_days: Option<i64>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub ibkr: IbkrConfig,
    #[serde(default)]
    pub instruments: BTreeMap<String, InstrumentConfig>,
}

impl CoreConfig {
    /// Load from a TOML file at `path`.
    pub fn load_toml(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::InvalidValue {
                field: path.display().to_string(),
                reason: e.to_string(),
            })?;
        toml::from_str(&content).map_err(|e| ConfigurationError::InvalidValue {
            field: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Load the instrument configuration map from a separate JSON file
    /// (spec.md §6's "Instrument configuration file").
    pub fn load_instruments_json(path: impl AsRef<Path>) -> Result<BTreeMap<String, InstrumentConfig>, ConfigurationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::InvalidValue {
                field: path.display().to_string(),
                reason: e.to_string(),
            })?;
        serde_json::from_str(&content).map_err(|e| ConfigurationError::InvalidValue {
            field: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Daily download cap for `provider`, if configured.
    pub fn daily_limit(&self, provider: &str) -> Option<u32> {
        self.providers.get(provider).and_then(|p| p.daily_limit)
    }

    /// Validate the options that have no sensible default and must be
    /// present before a run starts.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.output_directory.trim().is_empty() {
            return Err(ConfigurationError::MissingOption("output_directory".into()));
        }
        if self.default_provider.trim().is_empty() {
            return Err(ConfigurationError::MissingOption("default_provider".into()));
        }
        if let Some(provider) = self.providers.get(&self.default_provider) {
            if matches!(self.default_provider.as_str(), "barchart" | "ibkr")
                && (provider.username.is_none() || provider.password.is_none())
            {
                return Err(ConfigurationError::MissingOption(format!(
                    "{}.username/{}.password",
                    self.default_provider, self.default_provider
                )));
            }
        }
        Ok(())
    }
}
