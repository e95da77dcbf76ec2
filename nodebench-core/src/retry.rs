use std::{future::Future, time::Duration};

use rand::Rng as _;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

/// Delay inserted between two attempts.
#[serde_as]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    None,
    Fixed {
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "delay_ms")]
        delay: Duration,
    },
    /// Doubles from `base` up to `max`, with up to 10% jitter on top.
    Exponential {
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "base_ms")]
        base: Duration,
        #[serde_as(as = "DurationMilliSeconds<u64>")]
        #[serde(rename = "max_ms")]
        max: Duration,
    },
}

impl Backoff {
    /// Delay to wait after the failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay } => delay,
            Self::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                let delay = base.saturating_mul(factor).min(max);
                let jitter = delay.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
                delay.saturating_add(jitter).min(max)
            }
        }
    }
}

/// Bounded retry loop shared by the connection handshake and probe calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    max_attempts: u32,
    #[serde(default)]
    backoff: Backoff,
}

impl RetryPolicy {
    /// A policy with `retries` total attempts. Zero still makes one attempt.
    #[must_use]
    pub fn retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.max(1),
            backoff: Backoff::None,
        }
    }

    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Upper bound on the time spent sleeping between attempts, jitter
    /// included.
    #[must_use]
    pub fn max_total_delay(&self) -> Duration {
        (1..self.max_attempts)
            .map(|_| match self.backoff {
                Backoff::None => Duration::ZERO,
                Backoff::Fixed { delay } => delay,
                Backoff::Exponential { max, .. } => max,
            })
            .sum()
    }

    /// Runs `op` until it succeeds or attempts are exhausted, returning the
    /// last error and the number of attempts made.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> (Result<T, E>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_while(op, |_| true).await
    }

    /// Same as [`Self::run`] but stops early when `is_retryable` rejects an
    /// error.
    pub async fn run_while<T, E, F, Fut, P>(
        &self,
        mut op: F,
        is_retryable: P,
    ) -> (Result<T, E>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return (Ok(value), attempt),
                Err(err) if attempt >= self.max_attempts || !is_retryable(&err) => {
                    return (Err(err), attempt);
                }
                Err(_) => {
                    let delay = self.backoff.delay(attempt);
                    tracing::trace!(attempt, ?delay, "attempt failed, retrying");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn zero_retries_still_attempts_once() {
        let calls = &AtomicU32::new(0);
        let (result, attempts) = RetryPolicy::retries(0)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("down")
            })
            .await;
        assert_eq!(result, Err("down"));
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let calls = &AtomicU32::new(0);
        let (result, attempts) = RetryPolicy::retries(5)
            .run(move || async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if call < 3 {
                    Err("flaky")
                } else {
                    Ok(call)
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let calls = &AtomicU32::new(0);
        let (result, attempts) = RetryPolicy::retries(3)
            .run(move || async move { Err::<(), _>(calls.fetch_add(1, Ordering::SeqCst)) })
            .await;
        assert_eq!(result, Err(2));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_early() {
        let (result, attempts) = RetryPolicy::retries(4)
            .run_while(|| async { Err::<(), _>("fatal") }, |err| *err != "fatal")
            .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_backoff_sleeps_between_attempts() {
        let started = tokio::time::Instant::now();
        let policy = RetryPolicy::retries(3).with_backoff(Backoff::Fixed {
            delay: Duration::from_millis(100),
        });
        let (_, attempts) = policy.run(|| async { Err::<(), _>(()) }).await;
        assert_eq!(attempts, 3);
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(350),
        };
        assert!(backoff.delay(1) >= Duration::from_millis(100));
        assert!(backoff.delay(1) < Duration::from_millis(111));
        assert_eq!(backoff.delay(3), Duration::from_millis(350));
        assert_eq!(backoff.delay(30), Duration::from_millis(350));
    }
}
