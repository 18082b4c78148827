//! Recovery-action planner (spec.md §4.2).
//!
//! Advisory only: the retry policy is what actually drives behavior; the
//! planner's ordered action list exists to annotate errors for logging and a
//! future operator-facing surface (e.g. a CLI layer deciding what to print).

use crate::error::DataProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    ImmediateRetry,
    ExponentialBackoff,
    ProviderFallback,
    GracefulDegradation,
    CircuitBreaker,
    ManualIntervention,
}

#[derive(Debug, Default)]
pub struct RecoveryPlanner {
    pub fallback_providers_configured: bool,
}

impl RecoveryPlanner {
    pub fn new(fallback_providers_configured: bool) -> Self {
        Self {
            fallback_providers_configured,
        }
    }

    /// Ordered recovery actions for `error`, most-preferred first.
    pub fn plan(&self, error: &DataProviderError) -> Vec<RecoveryAction> {
        match error {
            DataProviderError::AuthenticationFailed(_) => vec![RecoveryAction::ManualIntervention],

            DataProviderError::ConnectionFailed(_) => {
                let mut actions = vec![RecoveryAction::ExponentialBackoff];
                if self.fallback_providers_configured {
                    actions.push(RecoveryAction::ProviderFallback);
                }
                actions
            }

            DataProviderError::RateLimited { .. } => vec![RecoveryAction::ExponentialBackoff],

            DataProviderError::DataNotFound { .. } => {
                if self.fallback_providers_configured {
                    vec![RecoveryAction::ProviderFallback]
                } else {
                    vec![]
                }
            }

            DataProviderError::AllowanceExceeded { .. } => vec![RecoveryAction::GracefulDegradation],

            DataProviderError::LowData { .. } => vec![RecoveryAction::GracefulDegradation],

            DataProviderError::ProviderError(_) => {
                vec![RecoveryAction::ExponentialBackoff, RecoveryAction::CircuitBreaker]
            }
        }
    }
}
