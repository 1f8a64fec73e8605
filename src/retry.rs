// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

/// Retry utilities with exponential backoff for API calls.
///
/// The policy decides how often and how long to wait; the error decides
/// whether waiting helps at all. Rate-limit errors wait for the advertised
/// reset instead of the backoff schedule, and no wait is allowed to run past
/// the invocation deadline.
use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, clock::Clock};

/// Configuration for retry behavior with exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy
{
    /// Maximum number of attempts including the first one (default: 3).
    pub max_attempts:     u32,
    /// Initial delay between retries in milliseconds (default: 1000).
    pub initial_delay_ms: u64,
    /// Multiplier for exponential backoff (default: 2.0).
    pub backoff_factor:   f64,
    /// Upper bound for a single backoff delay in milliseconds (default:
    /// 30000).
    pub max_delay_ms:     u64,
}

impl Default for RetryPolicy
{
    fn default() -> Self
    {
        Self {
            max_attempts: 3, initial_delay_ms: 1000, backoff_factor: 2.0, max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy
{
    /// Delay applied after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32,) -> Duration
    {
        let exponent = i32::try_from(attempt.saturating_sub(1,),).unwrap_or(i32::MAX,);
        let delay = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent,);
        let capped = if delay.is_finite() { delay.min(self.max_delay_ms as f64,) } else { 0.0 };
        Duration::from_millis(capped.max(0.0,) as u64,)
    }
}

/// Executes an async operation, retrying retryable failures.
///
/// # Arguments
///
/// * `policy` - Retry configuration (max attempts, delays)
/// * `clock` - Time source used for every wait
/// * `deadline` - Optional instant no wait may extend beyond
/// * `operation_name` - Name of the operation for logging
/// * `f` - Async function to retry
///
/// # Errors
///
/// Returns non-retryable errors immediately. Retryable errors are returned
/// as [`Error::TransientFetch`] once attempts are exhausted or the next wait
/// would cross the deadline.
///
/// # Example
///
/// ```no_run
/// use contrib_ingest::{Error, RetryPolicy, SystemClock, retry_with_backoff};
///
/// # async fn example() -> Result<(), Error> {
/// let policy = RetryPolicy::default();
/// let value = retry_with_backoff(&policy, &SystemClock, None, "fetch data", || async {
///     Ok::<_, Error,>(42,)
/// },)
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_backoff<C, F, Fut, T,>(
    policy: &RetryPolicy,
    clock: &C,
    deadline: Option<DateTime<Utc,>,>,
    operation_name: &str,
    mut f: F,
) -> Result<T, Error,>
where
    C: Clock,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error,>,>,
{
    let max_attempts = policy.max_attempts.max(1,);
    let mut attempt = 1;

    loop {
        let error = match f().await {
            Ok(result,) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result,);
            }
            Err(error,) if !error.is_retryable() => return Err(error,),
            Err(error,) => error,
        };

        if attempt >= max_attempts {
            warn!("{} failed after {} attempts: {}", operation_name, max_attempts, error);
            return Err(exhausted(error,),);
        }

        let resume_at = match &error {
            Error::RateLimited {
                reset_at,
            } => *reset_at,
            _ => {
                let delay = policy.delay_after(attempt,);
                clock.now() + chrono::Duration::from_std(delay,).unwrap_or(chrono::Duration::zero(),)
            }
        };

        if let Some(deadline,) = deadline
            && resume_at > deadline
        {
            warn!(
                "{} failed on attempt {}/{}: {}. Next attempt at {} is past the deadline",
                operation_name, attempt, max_attempts, error, resume_at
            );
            return Err(exhausted(error,),);
        }

        warn!(
            "{} failed on attempt {}/{}: {}. Retrying at {}...",
            operation_name, attempt, max_attempts, error, resume_at
        );

        clock.sleep_until(resume_at,).await;
        attempt += 1;
    }
}

fn exhausted(error: Error,) -> Error
{
    match error {
        Error::RateLimited {
            reset_at,
        } => Error::transient(format!("rate limit exhausted until {reset_at}"),),
        other => other,
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::testing::FakeClock;

    fn fast_policy(max_attempts: u32,) -> RetryPolicy
    {
        RetryPolicy {
            max_attempts, initial_delay_ms: 10, backoff_factor: 2.0, max_delay_ms: 1000,
        }
    }

    #[test]
    fn retry_policy_default_values()
    {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay_ms, 1000);
        assert_eq!(policy.backoff_factor, 2.0);
        assert_eq!(policy.max_delay_ms, 30_000);
    }

    #[test]
    fn delays_grow_exponentially_up_to_cap()
    {
        let policy = RetryPolicy {
            max_attempts: 10, initial_delay_ms: 500, backoff_factor: 2.0, max_delay_ms: 3000,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(4), Duration::from_millis(3000));
        assert_eq!(policy.delay_after(40), Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn retry_succeeds_on_first_attempt()
    {
        let clock = FakeClock::at(Utc::now(),);
        let result = retry_with_backoff(&RetryPolicy::default(), &clock, None, "test", || async {
            Ok::<_, Error,>(42,)
        },)
        .await
        .expect("should succeed",);
        assert_eq!(result, 42);
        assert_eq!(clock.total_slept(), Duration::ZERO);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures()
    {
        let clock = FakeClock::at(Utc::now(),);
        let counter = Arc::new(Mutex::new(0,),);
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_policy(3,), &clock, None, "test", move || {
            let counter = counter_clone.clone();
            async move {
                let mut count = counter.lock().unwrap();
                *count += 1;
                if *count < 3 { Err(Error::transient("502 bad gateway",),) } else { Ok(42,) }
            }
        },)
        .await
        .expect("should succeed after retries",);

        assert_eq!(result, 42);
        assert_eq!(*counter.lock().unwrap(), 3);
        assert_eq!(clock.total_slept(), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn retry_fails_after_max_attempts()
    {
        let clock = FakeClock::at(Utc::now(),);
        let counter = Arc::new(Mutex::new(0,),);
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_policy(2,), &clock, None, "test", move || {
            let counter = counter_clone.clone();
            async move {
                *counter.lock().unwrap() += 1;
                Err::<i32, _,>(Error::transient("connection reset",),)
            }
        },)
        .await;

        assert!(matches!(result, Err(Error::TransientFetch { .. })));
        assert_eq!(*counter.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn auth_failures_are_not_retried()
    {
        let clock = FakeClock::at(Utc::now(),);
        let counter = Arc::new(Mutex::new(0,),);
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_policy(5,), &clock, None, "test", move || {
            let counter = counter_clone.clone();
            async move {
                *counter.lock().unwrap() += 1;
                Err::<i32, _,>(Error::fatal_auth("bad credentials",),)
            }
        },)
        .await;

        assert!(matches!(result, Err(Error::FatalAuth { .. })));
        assert_eq!(*counter.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn rate_limit_waits_for_reset_instead_of_backoff()
    {
        let start = Utc::now();
        let reset_at = start + chrono::Duration::seconds(120,);
        let clock = FakeClock::at(start,);
        let attempts = Arc::new(Mutex::new(Vec::new(),),);
        let attempts_clone = attempts.clone();
        let clock_clone = clock.clone();

        let result = retry_with_backoff(&fast_policy(3,), &clock, None, "test", move || {
            let attempts = attempts_clone.clone();
            let now = clock_clone.now();
            async move {
                let mut seen = attempts.lock().unwrap();
                seen.push(now,);
                if seen.len() == 1 {
                    Err(Error::RateLimited {
                        reset_at,
                    },)
                } else {
                    Ok(7,)
                }
            }
        },)
        .await
        .expect("should succeed after reset",);

        assert_eq!(result, 7);
        let seen = attempts.lock().unwrap();
        assert_eq!(seen.as_slice(), &[start, reset_at]);
    }

    #[tokio::test]
    async fn waits_past_deadline_fail_fast()
    {
        let start = Utc::now();
        let clock = FakeClock::at(start,);
        let deadline = start + chrono::Duration::seconds(60,);

        let result = retry_with_backoff(&fast_policy(5,), &clock, Some(deadline,), "test", || async {
            Err::<i32, _,>(Error::RateLimited {
                reset_at: start + chrono::Duration::minutes(30,),
            },)
        },)
        .await;

        assert!(matches!(result, Err(Error::TransientFetch { .. })));
        assert_eq!(clock.total_slept(), Duration::ZERO);
    }
}
