//! Exponential backoff for store writes and log throttling for loops.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff policy for one kind of operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
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

    /// Delay before retry number `attempt` (1-based).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, `should_retry` rejects the error, or
/// the retry budget is spent. Returns the last error and the number of
/// attempts made.
pub async fn retry_async<F, Fut, T, E, P>(
    config: &RetryConfig,
    should_retry: P,
    operation: F,
) -> Result<T, (E, u32)>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < config.max_retries && should_retry(&e) => {
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

/// Throttles error logs of a loop that keeps failing: the first
/// `log_limit` consecutive failures are logged, the rest are counted.
#[derive(Debug, Default)]
pub struct FailureTracker {
    log_limit: u32,
    streak: u32,
}

impl FailureTracker {
    pub fn new(log_limit: u32) -> Self {
        Self { log_limit, streak: 0 }
    }

    /// End the current failure streak.
    pub fn record_success(&mut self) {
        if self.streak > self.log_limit {
            debug!("Recovered after {} consecutive failures", self.streak);
        }
        self.streak = 0;
    }

    /// Count a failure; `true` when the caller should log it.
    pub fn record_failure(&mut self) -> bool {
        self.streak = self.streak.saturating_add(1);
        if self.streak == self.log_limit + 1 {
            warn!("{} consecutive failures, muting further reports", self.log_limit);
        }
        self.streak <= self.log_limit
    }

    pub fn failure_count(&self) -> u32 {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(100));

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(30), Duration::from_secs(5));
    }

    #[test]
    fn test_failure_tracker_mutes_long_streaks() {
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
    async fn test_retry_eventual_success() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result = retry_async(&config, |_: &&str| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("connection reset")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let config = RetryConfig::new("test").with_base_delay(Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_async(&config, |e: &&str| *e != "not owner", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("not owner") }
        })
        .await;

        assert_eq!(result.unwrap_err(), ("not owner", 1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let config = RetryConfig::new("test")
            .with_base_delay(Duration::from_millis(1))
            .with_max_retries(2);

        let result: Result<(), _> = retry_async(&config, |_: &&str| true, || async { Err("down") }).await;
        assert_eq!(result.unwrap_err().1, 3);
    }
}
