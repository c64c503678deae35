//! Exponential backoff for rate-limited model calls.
//!
//! Only failures that report a rate limit are retried. Everything else, and the
//! last rate-limit failure once the budget is spent, goes straight back to the caller.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::RateLimitSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    /// `base_delay * 2^attempt`, attempt counted from zero.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub async fn with_backoff<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: RateLimitSignal + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    info!("✅ {} succeeded after {} retries", label, attempt);
                }
                return Ok(value);
            }
            Err(err) if err.is_rate_limited() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                warn!("⏳ {} rate limited ({}); retry {}/{} in {:?}", label, err, attempt + 1, policy.max_retries, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2));
        assert_eq!(policy.backoff(0), Duration::from_secs(2));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(32));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limits_then_succeeds() {
        let calls = Arc::new(Mutex::new(Vec::<Instant>::new()));
        let policy = RetryPolicy::new(3, Duration::from_secs(1));

        let result = with_backoff(policy, "test", || {
            let calls = calls.clone();
            async move {
                let mut calls = calls.lock();
                calls.push(Instant::now());
                if calls.len() <= 2 {
                    Err(PipelineError::RateLimited("429".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        let calls = calls.lock();
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_secs(1));
        assert!(second_gap >= Duration::from_secs(2));
        assert!(second_gap > first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn non_rate_limit_errors_propagate_immediately() {
        let mut calls = 0;
        let result: Result<(), _> = with_backoff(RetryPolicy::new(3, Duration::from_secs(1)), "test", || {
            calls += 1;
            async { Err(PipelineError::Upstream { status: 500, message: "boom".into() }) }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Upstream { status: 500, .. })));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let mut calls = 0;
        let result: Result<(), _> = with_backoff(RetryPolicy::new(2, Duration::from_millis(10)), "test", || {
            calls += 1;
            async { Err(PipelineError::RateLimited("quota".into())) }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::RateLimited(_))));
        assert_eq!(calls, 3);
    }
}
