//! Retry coordinator and backoff utilities.
//!
//! The coordinator is the single place that decides between requeueing a
//! failed job and discarding it. Retries are explicit republishes carrying
//! an incremented [`Attempt`]; the original delivery is acknowledged only
//! after the republish (or the terminal failure write) has succeeded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, error, info, warn};

use reel_queue::metrics::names;
use reel_queue::{Attempt, Broker, Delivery, QueueMessage};

use crate::error::{ErrorClass, WorkerError};
use crate::progress::ProgressReporter;

/// Backoff for a short burst of retries against a flaky dependency.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first call
    pub max_retries: u32,
    /// Doubles after each retry
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Operation name for logging
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the retries are spent.
///
/// Returns the last error together with the number of calls made.
pub async fn retry_async<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, (E, u32)>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err((e, attempt + 1)),
        }
    }
}

/// Suppresses log spam from a loop that keeps failing the same way.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > self.max_logged_failures {
            info!(
                "Recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures == self.max_logged_failures + 1 {
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
        }
        self.consecutive_failures <= self.max_logged_failures
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

/// What happens to a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Republish with this attempt value
    Requeue(Attempt),
    /// Terminal failure
    Discard,
}

/// Pure retry policy.
///
/// Validation and not-found failures are terminal at once; everything else
/// is requeued while the attempt counter is under the bound.
pub fn decide(attempt: Attempt, class: ErrorClass, max_attempts: u32) -> Decision {
    if class.is_retryable() && attempt.can_retry(max_attempts) {
        Decision::Requeue(attempt.next())
    } else {
        Decision::Discard
    }
}

/// Result of handling a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Republished; original acknowledged
    Requeued(Attempt),
    /// Job failed; original dead-lettered
    Discarded,
    /// A side effect could not be made durable; original left pending
    Deferred,
}

/// Applies [`decide`] to failed deliveries.
#[derive(Clone)]
pub struct RetryCoordinator {
    broker: Arc<dyn Broker>,
    max_attempts: u32,
    publish_retry: RetryConfig,
}

impl RetryCoordinator {
    pub fn new(broker: Arc<dyn Broker>, max_attempts: u32) -> Self {
        Self {
            broker,
            max_attempts,
            publish_retry: RetryConfig::new("retry_publish").with_max_retries(2),
        }
    }

    pub fn with_publish_retry(mut self, config: RetryConfig) -> Self {
        self.publish_retry = config;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Record the failure and either requeue or discard the delivery.
    pub async fn handle_failure(
        &self,
        delivery: &Delivery,
        message: &QueueMessage,
        reporter: &ProgressReporter,
        err: &WorkerError,
    ) -> RetryOutcome {
        let attempt = delivery.attempt(self.max_attempts);
        let class = err.class();
        let job_error = err.job_error();
        let job_type = message.job_type();

        match decide(attempt, class, self.max_attempts) {
            Decision::Requeue(next) => {
                // Back to waiting before the copy exists, so a fast consumer
                // cannot activate it and then be overwritten.
                if let Err(e) = reporter.retry(&job_error).await {
                    warn!(job_id = %message.job_id, "Failed to record retry, leaving message pending: {}", e);
                    return RetryOutcome::Deferred;
                }

                let published = retry_async(&self.publish_retry, || {
                    self.broker.publish(message, delivery.priority(), next)
                })
                .await;
                if let Err((e, calls)) = published {
                    error!(
                        job_id = %message.job_id,
                        calls = calls,
                        "Failed to republish retry, leaving message pending: {}", e
                    );
                    return RetryOutcome::Deferred;
                }

                if let Err(e) = self.broker.ack(delivery).await {
                    warn!(job_id = %message.job_id, "Failed to ack retried message {}: {}", delivery.id, e);
                }
                counter!(names::JOBS_RETRIED, "type" => job_type.as_str()).increment(1);
                info!(
                    job_id = %message.job_id,
                    job_type = %job_type,
                    attempt = next.value(),
                    max_attempts = self.max_attempts,
                    class = class.as_str(),
                    "Job requeued for retry"
                );
                RetryOutcome::Requeued(next)
            }
            Decision::Discard => {
                if let Err(e) = reporter.fail(&job_error).await {
                    warn!(job_id = %message.job_id, "Failed to record failure, leaving message pending: {}", e);
                    return RetryOutcome::Deferred;
                }
                if let Err(e) = self.broker.reject(delivery, &job_error).await {
                    warn!(job_id = %message.job_id, "Failed to reject message {}: {}", delivery.id, e);
                }
                counter!(names::JOBS_FAILED, "type" => job_type.as_str(), "class" => class.as_str()).increment(1);
                warn!(
                    job_id = %message.job_id,
                    job_type = %job_type,
                    attempt = attempt.value(),
                    class = class.as_str(),
                    "Job failed permanently: {}", job_error
                );
                RetryOutcome::Discarded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(100));

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(30), Duration::from_secs(5));
    }

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(2);

        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }

    #[tokio::test]
    async fn test_retry_async_eventual_success() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(1));
        let calls = std::sync::atomic::AtomicU32::new(0);

        let result = retry_async(&config, || {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_async_gives_up() {
        let config = RetryConfig::new("test")
            .with_base_delay(Duration::from_millis(1))
            .with_max_retries(1);
        let result: Result<(), _> = retry_async(&config, || async { Err::<(), _>("down") }).await;
        assert_eq!(result.err(), Some(("down", 2)));
    }

    #[test]
    fn test_decide_bounds_retries() {
        let max = 3;
        let mut attempt = Attempt::initial();
        let mut requeues = 0;
        while let Decision::Requeue(next) = decide(attempt, ErrorClass::Transient, max) {
            assert_eq!(next.value(), attempt.value() + 1);
            attempt = next;
            requeues += 1;
        }
        assert_eq!(requeues, max);
        assert_eq!(attempt.value(), max);
    }

    #[test]
    fn test_decide_terminal_classes() {
        assert_eq!(
            decide(Attempt::initial(), ErrorClass::NotFound, 3),
            Decision::Discard
        );
        assert_eq!(
            decide(Attempt::initial(), ErrorClass::Validation, 3),
            Decision::Discard
        );
        assert_eq!(
            decide(Attempt::initial(), ErrorClass::Encoding, 3),
            Decision::Requeue(Attempt::initial().next())
        );
        assert_eq!(decide(Attempt::initial(), ErrorClass::Transient, 0), Decision::Discard);
    }
}
