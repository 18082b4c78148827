//! Resilience layer: composes, outermost to innermost, correlation context
//! establishment, the circuit breaker, retry with backoff, and the recovery
//! planner around every `fetch_historical_data` call (spec.md §4.2).

pub mod circuit_breaker;
pub mod recovery;
pub mod retry;

use crate::correlation;
use crate::error::{TracedError, VortexError};
use crate::instrument::Instrument;
use crate::period::Period;
use crate::provider::Provider;
use crate::series::PriceSeries;
use chrono::{DateTime, Utc};
use circuit_breaker::CircuitBreaker;
use recovery::RecoveryPlanner;
use retry::RetryPolicy;

/// Fetch `instrument`/`period`/`[start, end]` from `provider`, wrapped with a
/// correlation scope, the provider's circuit breaker, and the retry policy.
/// The recovery planner's output is attached to the surfaced error as
/// context rather than acted on automatically (spec.md §4.2: "the planner's
/// decisions are advisory").
pub fn fetch_with_resilience(
    provider: &dyn Provider,
    breaker: &CircuitBreaker,
    retry: &RetryPolicy,
    recovery: &RecoveryPlanner,
    instrument: &Instrument,
    period: Period,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<PriceSeries, TracedError> {
    let _scope = correlation::enter_with_provider("fetch-historical-data", provider.name());

    if !breaker.is_allowed() {
        return Err(TracedError::new(VortexError::CircuitOpen {
            provider: provider.name().to_string(),
        }));
    }

    let outcome = retry.execute(|| {
        let result = provider.fetch_historical_data(instrument, period, start, end);
        match &result {
            Ok(_) => breaker.record_success(),
            Err(_) => breaker.record_failure(),
        }
        result
    });

    match outcome {
        Ok(series) => Ok(series),
        Err(exhausted) => {
            let actions = recovery.plan(&exhausted.error);
            let traced = TracedError::new(VortexError::DataProvider(exhausted.error))
                .with_context("attempts_made", exhausted.attempts_made.to_string())
                .with_context("recovery_actions", format!("{actions:?}"));
            Err(traced)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataProviderError;
    use crate::period::FrequencyAttributes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct FlakyProvider {
        frequencies: Vec<FrequencyAttributes>,
        calls: AtomicU32,
        fail_times: u32,
    }

    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
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
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(DataProviderError::ConnectionFailed("flaky".into()))
            } else {
                Ok(PriceSeries::new(vec![], instrument, period, start, end, self.name(), Utc::now()))
            }
        }
    }

    fn instrument() -> Instrument {
        Instrument::Stock { symbol: "AAPL".into() }
    }

    #[test]
    fn succeeds_after_retrying_past_transient_failures() {
        let provider = FlakyProvider {
            frequencies: vec![],
            calls: AtomicU32::new(0),
            fail_times: 2,
        };
        let breaker = CircuitBreaker::new(10, Duration::from_secs(60));
        let retry = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        };
        let recovery = RecoveryPlanner::new(false);
        let now = Utc::now();
        let result = fetch_with_resilience(
            &provider, &breaker, &retry, &recovery, &instrument(), Period::D1, now, now,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn open_breaker_fails_fast_without_calling_provider() {
        let provider = FlakyProvider {
            frequencies: vec![],
            calls: AtomicU32::new(0),
            fail_times: 0,
        };
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.trip();
        let retry = RetryPolicy::default();
        let recovery = RecoveryPlanner::new(false);
        let now = Utc::now();
        let result = fetch_with_resilience(
            &provider, &breaker, &retry, &recovery, &instrument(), Period::D1, now, now,
        );
        assert!(matches!(result, Err(TracedError { error: VortexError::CircuitOpen { .. }, .. })));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exhausted_retries_attach_attempt_count_context() {
        let provider = FlakyProvider {
            frequencies: vec![],
            calls: AtomicU32::new(0),
            fail_times: 100,
        };
        let breaker = CircuitBreaker::new(100, Duration::from_secs(60));
        let retry = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::default()
        };
        let recovery = RecoveryPlanner::new(false);
        let now = Utc::now();
        let result = fetch_with_resilience(
            &provider, &breaker, &retry, &recovery, &instrument(), Period::D1, now, now,
        );
        let err = result.unwrap_err();
        assert_eq!(err.context.get("attempts_made").map(String::as_str), Some("2"));
    }
}
