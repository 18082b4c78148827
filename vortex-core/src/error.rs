//! Error taxonomy for the download orchestration engine.
//!
//! Every error surfaced by `vortex-core` is a [`VortexError`]. Subkinds carry
//! enough context for both logs and a user-facing CLI to act on, without the
//! core ever depending on a CLI's rendering concerns.

use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Provider-facing fetch failures, one kind per distinct failure mode in
/// `spec.md` §4.1.
#[derive(Debug, Error, Clone)]
pub enum DataProviderError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("rate limited{}", retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("data not found for {symbol}")]
    DataNotFound { symbol: String },

    #[error("daily allowance exceeded for provider '{provider}'")]
    AllowanceExceeded { provider: String },

    #[error("too few rows returned ({rows} < 3)")]
    LowData { rows: usize },

    #[error("provider error: {0}")]
    ProviderError(String),
}

impl DataProviderError {
    /// Whether the resilience layer's retry policy should attempt this
    /// error again (spec.md §4.1 failure-mode table).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataProviderError::ConnectionFailed(_)
                | DataProviderError::RateLimited { .. }
                | DataProviderError::ProviderError(_)
        )
    }
}

/// Storage-layer failures.
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("disk space exhausted: {0}")]
    DiskSpace(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file corrupted: {0}")]
    FileCorrupted(String),
}

/// Instrument construction/validation failures.
#[derive(Debug, Error, Clone)]
pub enum InstrumentError {
    #[error("invalid month code '{0}'")]
    InvalidMonthCode(char),

    #[error("empty roll cycle for futures instrument")]
    EmptyCycle,

    #[error("{0}")]
    Other(String),
}

/// Configuration validation failures.
#[derive(Debug, Error, Clone)]
pub enum ConfigurationError {
    #[error("missing required option '{0}'")]
    MissingOption(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Top-level catch-all error taxonomy, per `spec.md` §7.
#[derive(Debug, Error, Clone)]
pub enum VortexError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("instrument error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("data provider error: {0}")]
    DataProvider(#[from] DataProviderError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("circuit breaker open for provider '{provider}'")]
    CircuitOpen { provider: String },

    #[error("manual intervention required: {0}")]
    ManualIntervention(String),

    #[error("{0}")]
    Other(String),
}

impl VortexError {
    /// A stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            VortexError::Configuration(_) => "CONFIGURATION_ERROR",
            VortexError::Instrument(_) => "INSTRUMENT_ERROR",
            VortexError::DataProvider(DataProviderError::AuthenticationFailed(_)) => {
                "AUTHENTICATION_FAILED"
            }
            VortexError::DataProvider(DataProviderError::ConnectionFailed(_)) => {
                "CONNECTION_FAILED"
            }
            VortexError::DataProvider(DataProviderError::RateLimited { .. }) => "RATE_LIMITED",
            VortexError::DataProvider(DataProviderError::DataNotFound { .. }) => "DATA_NOT_FOUND",
            VortexError::DataProvider(DataProviderError::AllowanceExceeded { .. }) => {
                "ALLOWANCE_EXCEEDED"
            }
            VortexError::DataProvider(DataProviderError::LowData { .. }) => "LOW_DATA",
            VortexError::DataProvider(DataProviderError::ProviderError(_)) => "PROVIDER_ERROR",
            VortexError::Storage(_) => "STORAGE_ERROR",
            VortexError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            VortexError::ManualIntervention(_) => "MANUAL_INTERVENTION",
            VortexError::Other(_) => "VORTEX_ERROR",
        }
    }

    /// User-facing next step.
    pub fn help_text(&self) -> String {
        match self {
            VortexError::DataProvider(DataProviderError::AuthenticationFailed(_)) => {
                "Check the configured credentials and re-authenticate with the provider.".into()
            }
            VortexError::DataProvider(DataProviderError::AllowanceExceeded { provider }) => {
                format!("The daily download allowance for '{provider}' is exhausted; wait for the quota to reset or raise daily_limit.")
            }
            VortexError::CircuitOpen { provider } => {
                format!("Provider '{provider}' is failing repeatedly; wait for the cooldown to expire before retrying.")
            }
            VortexError::ManualIntervention(_) => {
                "This failure cannot be resolved automatically; operator action is required.".into()
            }
            _ => "Check the error message for details.".into(),
        }
    }

    /// Short user-action hint, distinct from `help_text` (spec.md §7).
    pub fn user_action(&self) -> &'static str {
        match self {
            VortexError::DataProvider(DataProviderError::AuthenticationFailed(_)) => {
                "re-authenticate"
            }
            VortexError::DataProvider(DataProviderError::AllowanceExceeded { .. }) => "wait",
            VortexError::CircuitOpen { .. } => "wait",
            VortexError::ManualIntervention(_) => "investigate",
            _ => "retry",
        }
    }

    /// Process exit code mapped by error kind (spec.md §7).
    pub fn exit_code(&self) -> i32 {
        match self {
            VortexError::Configuration(_) => 3,
            VortexError::DataProvider(DataProviderError::ConnectionFailed(_)) => 4,
            VortexError::Storage(StorageError::PermissionDenied(_)) => 5,
            VortexError::Storage(_) => 6,
            VortexError::DataProvider(_) => 7,
            VortexError::Instrument(_) => 8,
            VortexError::CircuitOpen { .. } => 7,
            VortexError::ManualIntervention(_) => 7,
            VortexError::Other(_) => 10,
        }
    }
}

/// An error decorated with the active correlation ID and a free-form context
/// map, per spec.md §4.7 ("every exception carrying a correlation_id field").
#[derive(Debug, Clone)]
pub struct TracedError {
    pub error: VortexError,
    pub correlation_id: Option<String>,
    pub context: BTreeMap<String, String>,
}

impl TracedError {
    pub fn new(error: VortexError) -> Self {
        Self {
            error,
            correlation_id: crate::correlation::current_id(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Display for TracedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.correlation_id {
            Some(id) => write!(f, "[{id}] {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for TracedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type Result<T> = std::result::Result<T, VortexError>;
