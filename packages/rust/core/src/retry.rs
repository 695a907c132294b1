//! Retry with capped exponential backoff for collaborator calls.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use provdir_shared::{Result, RetryConfig};

/// How often and how patiently a failed collaborator call is retried.
///
/// Only errors classified as retryable (`TransientExternal`) are retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier.max(1),
        }
    }
}

/// Result of a retried call plus how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    /// Calls made, `1 + retries`.
    pub attempts: u32,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Call `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match op().await {
                Err(e) if e.is_retryable() && attempts <= self.max_retries => {
                    let delay = self.delay_for(attempts);
                    debug!(attempt = attempts, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                }
                result => return Attempted { result, attempts },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use provdir_shared::{PermanentKind, ProvDirError};
    use tokio::time::Instant;

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(60), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_after_three_retries() {
        let policy = RetryPolicy::default();
        let calls = Mutex::new(Vec::new());
        let start = Instant::now();

        let attempted: Attempted<()> = policy
            .run(|| {
                calls.lock().unwrap().push(start.elapsed());
                async { Err(ProvDirError::transient("contact", "503")) }
            })
            .await;

        assert_eq!(attempted.attempts, 4);
        assert!(attempted.result.unwrap_err().is_retryable());

        let calls = calls.into_inner().unwrap();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_millis(1000)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let attempted: Attempted<()> = RetryPolicy::default()
            .run(|| async {
                Err(ProvDirError::permanent(
                    "registry",
                    PermanentKind::NotFound,
                    "no such license",
                ))
            })
            .await;
        assert_eq!(attempted.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let mut remaining_failures = 2;
        let attempted = RetryPolicy::default()
            .run(|| {
                let fail = remaining_failures > 0;
                remaining_failures -= 1;
                async move {
                    if fail {
                        Err(ProvDirError::transient("contact", "reset"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(attempted.attempts, 3);
        assert_eq!(attempted.result.unwrap(), 7);
    }

    #[tokio::test]
    async fn none_policy_makes_one_call() {
        let attempted: Attempted<()> = RetryPolicy::none()
            .run(|| async { Err(ProvDirError::transient("contact", "down")) })
            .await;
        assert_eq!(attempted.attempts, 1);
    }
}
