//! Retry policy for capability calls and memory write-back
//!
//! Backoff is exponential and strictly increasing across the scheduled
//! retries. [`RetryConfig::validate`] rejects configurations where the cap
//! would flatten the schedule.

use crate::{OrchestratorError, Result};
use capability::CapabilityError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Classification of errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient errors that may succeed on retry (rate limits, timeouts, 5xx)
    Transient,

    /// Permanent errors that won't succeed on retry (4xx, invalid auth)
    Permanent,

    /// Unknown errors - treat as transient by default
    Unknown,
}

/// Retry strategy configuration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier for exponential backoff, must be > 1
    pub backoff_multiplier: f64,

    /// Whether to add random jitter to backoff delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set initial backoff delay
    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set maximum backoff delay
    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Set backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    fn base_delay_ms(&self, attempt: u32) -> u64 {
        let delay = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        if delay.is_finite() {
            delay as u64
        } else {
            u64::MAX
        }
    }

    /// Reject configurations whose backoff schedule is not strictly increasing.
    pub fn validate(&self) -> Result<()> {
        if !(self.backoff_multiplier > 1.0) {
            return Err(OrchestratorError::Config(format!(
                "backoff_multiplier must be greater than 1, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_backoff_ms == 0 {
            return Err(OrchestratorError::Config(
                "initial_backoff_ms must be greater than 0".into(),
            ));
        }

        let mut previous = 0;
        for attempt in 0..self.max_retries {
            let delay = self.base_delay_ms(attempt);
            if delay <= previous {
                return Err(OrchestratorError::Config(format!(
                    "backoff delay for retry {} does not increase ({}ms)",
                    attempt + 1,
                    delay
                )));
            }
            if delay > self.max_backoff_ms {
                return Err(OrchestratorError::Config(format!(
                    "max_backoff_ms {} is below the scheduled delay {}ms for retry {}",
                    self.max_backoff_ms,
                    delay,
                    attempt + 1
                )));
            }
            previous = delay;
        }
        Ok(())
    }

    /// Delay to wait after failed attempt `attempt` (0-based).
    ///
    /// Jitter is bounded so that a jittered delay never reaches the next
    /// un-jittered one.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay_ms(attempt).min(self.max_backoff_ms);

        let delay_ms = if self.jitter {
            let bound = 0.25_f64.min((self.backoff_multiplier - 1.0) / 2.0).max(0.0);
            let jitter_amount = (delay_ms as f64 * bound * rand::random::<f64>()) as u64;
            delay_ms.saturating_add(jitter_amount).min(self.max_backoff_ms.max(delay_ms))
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }
}

/// Classify an orchestrator error to determine if it should be retried
pub fn classify_error(error: &OrchestratorError) -> ErrorClass {
    match error {
        OrchestratorError::CapabilityTimeout { .. }
        | OrchestratorError::CapabilityUnavailable { .. }
        | OrchestratorError::Persistence(_) => ErrorClass::Transient,
        OrchestratorError::CapabilityRejected { .. }
        | OrchestratorError::Config(_)
        | OrchestratorError::PlanInvalid(_)
        | OrchestratorError::StateSealed(_)
        | OrchestratorError::ResultAlreadyRecorded(_)
        | OrchestratorError::InvalidStateTransition { .. }
        | OrchestratorError::ExecutionInFlight(_)
        | OrchestratorError::Serialization(_) => ErrorClass::Permanent,
        OrchestratorError::General(msg) => classify_message(msg),
        _ => ErrorClass::Unknown,
    }
}

/// Classify a capability error.
pub fn classify_capability_error(error: &CapabilityError) -> ErrorClass {
    match error {
        CapabilityError::Backend { status, message } => match status {
            Some(408) | Some(429) | Some(500..=599) => ErrorClass::Transient,
            Some(400..=499) => ErrorClass::Permanent,
            _ => classify_message(message),
        },
        CapabilityError::Rejected { .. }
        | CapabilityError::NotRegistered { .. }
        | CapabilityError::CredentialNotFound(_)
        | CapabilityError::Config(_) => ErrorClass::Permanent,
        e if e.is_retryable() => ErrorClass::Transient,
        CapabilityError::Failed { .. } => ErrorClass::Permanent,
        CapabilityError::InvalidResponse(msg) | CapabilityError::Serialization(msg) => {
            classify_message(msg)
        }
        _ => ErrorClass::Unknown,
    }
}

fn classify_message(msg: &str) -> ErrorClass {
    let msg_lower = msg.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| msg_lower.contains(n));

    if any(&["rate limit", "too many requests", "429"]) {
        return ErrorClass::Transient;
    }
    if any(&["timeout", "timed out", "deadline exceeded"]) {
        return ErrorClass::Transient;
    }
    if any(&[
        "503",
        "service unavailable",
        "502",
        "bad gateway",
        "500",
        "internal server error",
    ]) {
        return ErrorClass::Transient;
    }
    if any(&["connection", "network", "dns"]) {
        return ErrorClass::Transient;
    }

    if any(&["401", "unauthorized", "invalid api key", "authentication failed"]) {
        return ErrorClass::Permanent;
    }
    if any(&["403", "forbidden", "access denied"]) {
        return ErrorClass::Permanent;
    }
    if any(&["404", "not found"]) {
        return ErrorClass::Permanent;
    }
    if any(&["400", "bad request", "invalid request"]) {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

/// A memory-store write retried under a [`RetryConfig`].
#[derive(Debug, Clone, Copy)]
pub struct StoreWrite<'a> {
    /// What is written, e.g. `conversation_turns` or `state_snapshot`
    pub operation: &'static str,
    /// Conversation or execution id the write belongs to
    pub key: &'a str,
}

impl<'a> StoreWrite<'a> {
    pub fn new(operation: &'static str, key: &'a str) -> Self {
        Self { operation, key }
    }
}

/// Run a store write, retrying transient and unknown failures with backoff.
///
/// Permanent errors end the loop immediately. The write is attempted at
/// most `max_retries + 1` times and the last error is returned.
pub async fn retry_store_write<F, Fut, T>(
    config: &RetryConfig,
    write: StoreWrite<'_>,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let e = match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(
                        operation = write.operation,
                        key = write.key,
                        attempt,
                        "Store write succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        let class = classify_error(&e);
        if class == ErrorClass::Permanent || attempt >= attempts {
            warn!(
                operation = write.operation,
                key = write.key,
                attempt,
                classification = ?class,
                error = %e,
                "Store write abandoned"
            );
            return Err(e);
        }

        let delay = config.backoff_delay(attempt - 1);
        debug!(
            operation = write.operation,
            key = write.key,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %e,
            "Store write failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_store::MemoryError;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_delay_exponential() {
        let config = RetryConfig::new(3).with_initial_backoff(1000);

        assert_eq!(config.backoff_delay(0).as_millis(), 1000);
        assert_eq!(config.backoff_delay(1).as_millis(), 2000);
        assert_eq!(config.backoff_delay(2).as_millis(), 4000);
    }

    #[test]
    fn test_validate_rejects_flat_schedules() {
        assert!(RetryConfig::new(2).with_multiplier(1.0).validate().is_err());
        assert!(RetryConfig::new(2).with_initial_backoff(0).validate().is_err());

        // 1000, 2000, 4000, 8000 would be capped at 5000
        let capped = RetryConfig::new(4)
            .with_initial_backoff(1000)
            .with_max_backoff(5000);
        assert!(capped.validate().is_err());

        // 1ms * 1.1 rounds back down to 1ms
        let rounding = RetryConfig::new(3)
            .with_initial_backoff(1)
            .with_multiplier(1.1);
        assert!(rounding.validate().is_err());

        assert!(RetryConfig::new(0).validate().is_ok());
    }

    #[test]
    fn test_classify_orchestrator_errors() {
        let error = OrchestratorError::CapabilityTimeout {
            capability: "llm".into(),
            timeout_ms: 10,
        };
        assert_eq!(classify_error(&error), ErrorClass::Transient);

        let error = OrchestratorError::Persistence(MemoryError::Storage("disk busy".into()));
        assert_eq!(classify_error(&error), ErrorClass::Transient);

        let error = OrchestratorError::CapabilityRejected {
            capability: "tool".into(),
            message: "bad input".into(),
        };
        assert_eq!(classify_error(&error), ErrorClass::Permanent);

        let error = OrchestratorError::General("Rate limit exceeded (429)".to_string());
        assert_eq!(classify_error(&error), ErrorClass::Transient);

        let error = OrchestratorError::General("401 Unauthorized".to_string());
        assert_eq!(classify_error(&error), ErrorClass::Permanent);

        let error = OrchestratorError::General("Some other error".to_string());
        assert_eq!(classify_error(&error), ErrorClass::Unknown);
    }

    #[test]
    fn test_classify_capability_errors() {
        let backend = |status, message: &str| CapabilityError::Backend {
            status,
            message: message.into(),
        };
        assert_eq!(
            classify_capability_error(&backend(Some(503), "down")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_capability_error(&backend(Some(404), "no such model")),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify_capability_error(&backend(None, "connection reset")),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_capability_error(&CapabilityError::Failed {
                kind: "llm".into(),
                message: "overloaded".into(),
                retryable: true,
            }),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_capability_error(&CapabilityError::Failed {
                kind: "llm".into(),
                message: "content policy".into(),
                retryable: false,
            }),
            ErrorClass::Permanent
        );
        assert_eq!(
            classify_capability_error(&CapabilityError::CredentialNotFound("KEY".into())),
            ErrorClass::Permanent
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success_after_transient_errors() {
        let config = RetryConfig::new(3).with_initial_backoff(10);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let result = retry_store_write(&config, StoreWrite::new("conversation_turns", "conv-1"), move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(OrchestratorError::General("503 Service Unavailable".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_abort_on_permanent_error() {
        let config = RetryConfig::new(3).with_initial_backoff(10);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let result: Result<()> = retry_store_write(&config, StoreWrite::new("conversation_turns", "conv-1"), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(OrchestratorError::Config("bad".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaust_all_attempts() {
        let config = RetryConfig::new(2).with_initial_backoff(10);
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let result: Result<()> = retry_store_write(&config, StoreWrite::new("conversation_turns", "conv-1"), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(OrchestratorError::General("Timeout".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    proptest! {
        #[test]
        fn prop_valid_schedules_strictly_increase(
            max_retries in 1u32..6,
            initial in 1u64..500,
            multiplier in 1.5f64..4.0,
            jitter in any::<bool>(),
        ) {
            let config = RetryConfig::new(max_retries)
                .with_initial_backoff(initial)
                .with_multiplier(multiplier)
                .with_max_backoff(1_000_000)
                .with_jitter(jitter);
            prop_assume!(config.validate().is_ok());

            let delays: Vec<Duration> = (0..max_retries).map(|a| config.backoff_delay(a)).collect();
            for pair in delays.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
        }
    }
}
