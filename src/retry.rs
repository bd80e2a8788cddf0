//! Bounded Retry
//!
//! Fixed-delay retry loop used by the transfer engine. Failures the caller
//! marks as known are returned on the spot; everything else is retried up to
//! `max_retries` more times.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Retry settings: `max_retries + 1` attempts at most, `delay` between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(100),
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// A known, non-retryable failure on attempt `attempts`
    Known { attempts: u32, error: E },
    /// Every attempt failed with a retryable failure
    Exhausted { attempts: u32, last: E },
    /// The deadline passed before the operation succeeded
    DeadlineExceeded { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Known { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Known { error, .. } => write!(f, "{}", error),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
            RetryError::DeadlineExceeded { attempts, last: Some(last) } => {
                write!(f, "deadline exceeded after {} attempts: {}", attempts, last)
            }
            RetryError::DeadlineExceeded { attempts, last: None } => {
                write!(f, "deadline exceeded after {} attempts", attempts)
            }
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Run `op` until it succeeds, fails with a known error, or retries run out.
    pub async fn run<T, E, F, Fut, K>(&self, op: F, is_known: K) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        K: Fn(&E) -> bool,
    {
        self.run_until(None, op, is_known).await
    }

    /// Like [`run`](Self::run), but no attempt or sleep outlives `deadline`.
    ///
    /// An attempt still in flight at the deadline is dropped. The failure of
    /// the previous attempt, if any, is kept in `DeadlineExceeded::last`.
    pub async fn run_until<T, E, F, Fut, K>(
        &self,
        deadline: Option<Instant>,
        mut op: F,
        is_known: K,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        K: Fn(&E) -> bool,
    {
        let mut last: Option<E> = None;
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let outcome = match deadline {
                Some(at) => match tokio::time::timeout_at(at, op()).await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(RetryError::DeadlineExceeded { attempts, last }),
                },
                None => op().await,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if is_known(&error) {
                return Err(RetryError::Known { attempts, error });
            }

            if attempts > self.max_retries {
                return Err(RetryError::Exhausted {
                    attempts,
                    last: error,
                });
            }

            if let Some(at) = deadline
                && Instant::now() + self.delay >= at
            {
                return Err(RetryError::DeadlineExceeded {
                    attempts,
                    last: Some(error),
                });
            }

            debug!(attempt = attempts, delay_ms = self.delay.as_millis() as u64, "Retrying");
            last = Some(error);
            tokio::time::sleep(self.delay).await;
        }
    }
}
