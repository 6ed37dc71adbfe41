//! Retry policy implementation

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for retrying service calls
///
/// Delays grow exponentially from `initial_interval` up to `max_interval`.
/// Retrying stops once `expiration_interval` has elapsed since the first
/// attempt; the last delay is clipped so that no sleep extends past it.
///
/// # Example
///
/// ```
/// use task_pollers::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::service()
///     .with_max_interval(Duration::from_secs(1))
///     .with_expiration_interval(Duration::from_secs(10));
///
/// // First retry after ~1ms, then ~2ms, ~4ms, ... capped at 1s
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Total time budget measured from the first attempt
    #[serde(with = "duration_millis")]
    pub expiration_interval: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0)
    ///
    /// Jitter only shortens a delay: a value of 0.2 means the delay is
    /// picked from [80%, 100%] of the computed interval.
    pub jitter: f64,

    /// Maximum number of attempts (including the first), unlimited if None
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::service()
    }
}

impl RetryPolicy {
    /// Policy used for every call to the workflow service
    ///
    /// - 1 millisecond initial interval
    /// - 4 second max interval
    /// - 60 second expiration
    /// - 2x backoff coefficient
    /// - 20% jitter
    pub fn service() -> Self {
        Self {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_secs(4),
            expiration_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            expiration_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            max_attempts: Some(1),
        }
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the total retry budget
    pub fn with_expiration_interval(mut self, interval: Duration) -> Self {
        self.expiration_interval = interval;
        self
    }

    /// Set the backoff coefficient
    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Limit the number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Delay before the next attempt
    ///
    /// `attempt` is the number of attempts already made (1-based) and
    /// `elapsed` the time since the first one started. Returns `None` when
    /// the policy is exhausted.
    pub fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if self.max_attempts.is_some_and(|max| attempt >= max) {
            return None;
        }
        if elapsed >= self.expiration_interval {
            return None;
        }

        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());
        let remaining = (self.expiration_interval - elapsed).as_secs_f64();
        let bounded = capped.min(remaining);

        let jittered = if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            bounded * (1.0 - rng.gen_range(0.0..self.jitter))
        } else {
            bounded
        };

        Some(Duration::from_secs_f64(jittered.max(0.0)))
    }
}

/// Run `operation` until it succeeds or retrying stops
///
/// Retrying stops when `is_retryable` rejects the error, when the policy is
/// exhausted, or when `cancel` fires while waiting between attempts. In all
/// of those cases the last error is returned. At least one attempt is
/// always made.
pub async fn retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !is_retryable(&error) {
            debug!(attempt, error = %error, "Non-retryable error");
            return Err(error);
        }

        let Some(delay) = policy.next_delay(attempt, started.elapsed()) else {
            warn!(attempt, error = %error, "Retry policy exhausted");
            return Err(error);
        };

        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transient error, retrying"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                debug!(attempt, "Retry cancelled");
                return Err(error);
            }
        }
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(transient={})", self.0)
        }
    }

    #[test]
    fn test_service_defaults() {
        let policy = RetryPolicy::service();
        assert_eq!(policy.initial_interval, Duration::from_millis(1));
        assert_eq!(policy.max_interval, Duration::from_secs(4));
        assert_eq!(policy.expiration_interval, Duration::from_secs(60));
        assert_eq!(policy.backoff_coefficient, 2.0);
        assert!(policy.max_attempts.is_none());
    }

    #[test]
    fn test_next_delay_doubles_until_max() {
        let policy = RetryPolicy::service()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(policy.next_delay(1, Duration::ZERO), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(2, Duration::ZERO), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(3, Duration::ZERO), Some(Duration::from_secs(4)));
        assert_eq!(policy.next_delay(4, Duration::ZERO), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(40, Duration::ZERO), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_next_delay_respects_expiration() {
        let policy = RetryPolicy::service()
            .with_initial_interval(Duration::from_secs(4))
            .with_jitter(0.0);

        // Clipped to the remaining budget
        assert_eq!(
            policy.next_delay(1, Duration::from_secs(59)),
            Some(Duration::from_secs(1))
        );
        assert_eq!(policy.next_delay(1, Duration::from_secs(60)), None);
    }

    #[test]
    fn test_jitter_never_exceeds_interval() {
        let policy = RetryPolicy::service()
            .with_initial_interval(Duration::from_secs(1))
            .with_jitter(0.5);

        for _ in 0..100 {
            let delay = policy.next_delay(1, Duration::ZERO).unwrap();
            assert!(delay <= Duration::from_secs(1));
            assert!(delay >= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.next_delay(1, Duration::ZERO), None);
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::service().with_max_attempts(10);

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let cancel = CancellationToken::new();

        let result: Result<u32, Flaky> =
            retry(&RetryPolicy::service(), &cancel, |e: &Flaky| e.0, || async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(Flaky(true))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_non_retryable() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let cancel = CancellationToken::new();

        let result: Result<(), Flaky> =
            retry(&RetryPolicy::service(), &cancel, |e: &Flaky| e.0, || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Flaky(false))
            })
            .await;

        assert!(!result.unwrap_err().0);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_is_bounded_by_expiration() {
        let policy = RetryPolicy::service();
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let result: Result<(), Flaky> = retry(&policy, &cancel, |e: &Flaky| e.0, || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(true))
        })
        .await;

        assert!(result.is_err());
        assert!(attempts.load(Ordering::SeqCst) > 1);
        assert!(started.elapsed() <= policy.expiration_interval + policy.max_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_respects_max_attempts() {
        let policy = RetryPolicy::service().with_max_attempts(4);
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let cancel = CancellationToken::new();

        let _: Result<(), Flaky> = retry(&policy, &cancel, |e: &Flaky| e.0, || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(true))
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_when_cancelled() {
        let policy = RetryPolicy::service().with_initial_interval(Duration::from_secs(1));
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), Flaky> = retry(&policy, &cancel, |e: &Flaky| e.0, || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(true))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
