//! Bounded retry with exponential backoff, as an explicit state machine:
//! ATTEMPT -> SUCCESS | FAILED; FAILED -> ATTEMPT (after backoff) | EXHAUSTED.

use std::future::Future;
use std::time::Duration;

use threadwatch_common::ClassifierConfig;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total calls, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Applied to each call on its own; a timeout is a failed attempt.
    pub call_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    /// Backoff after failed attempt `attempt` (0-based): `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: String },
}

enum State<T> {
    Attempt(u32),
    Failed { attempt: u32, error: String },
    Done(RetryOutcome<T>),
}

/// Run `op` until it succeeds or the policy is exhausted. Never returns an
/// error; exhaustion is an outcome.
pub async fn run<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut state = State::Attempt(0);
    loop {
        state = match state {
            State::Attempt(attempt) => match tokio::time::timeout(policy.call_timeout, op(attempt)).await {
                Ok(Ok(value)) => State::Done(RetryOutcome::Success {
                    value,
                    attempts: attempt + 1,
                }),
                Ok(Err(e)) => State::Failed {
                    attempt,
                    error: format!("{e:#}"),
                },
                Err(_) => State::Failed {
                    attempt,
                    error: format!("timed out after {:?}", policy.call_timeout),
                },
            },
            State::Failed { attempt, error } => {
                if attempt + 1 >= policy.max_attempts {
                    State::Done(RetryOutcome::Exhausted {
                        attempts: attempt + 1,
                        last_error: error,
                    })
                } else {
                    let delay = policy.delay_for(attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %error, "Attempt failed, backing off");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    State::Attempt(attempt + 1)
                }
            }
            State::Done(outcome) => return outcome,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            call_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn delay_doubles_then_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = run(&instant(3), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    anyhow::bail!("transient")
                }
                Ok("ok")
            }
        })
        .await;

        match outcome {
            RetryOutcome::Success { value, attempts } => {
                assert_eq!(value, "ok");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = run(&instant(4), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { anyhow::bail!("down") }
        })
        .await;

        match outcome {
            RetryOutcome::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 4);
                assert!(last_error.contains("down"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn timeout_counts_as_failed_attempt() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(10),
            ..instant(2)
        };
        let outcome: RetryOutcome<()> = run(&policy, |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match outcome {
            RetryOutcome::Exhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }
}
