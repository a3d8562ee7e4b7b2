//! Bounded retry with exponential backoff.
//!
//! A retry run is a finite sequence of attempts. Each attempt sees its number
//! and the errors of the attempts before it; the run ends in a value, a fatal
//! error, or [`RetryError::Exhausted`] carrying every error observed.

use std::future::Future;
use std::time::Duration;

use crate::core::errors::RagError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Wait after the n-th failed attempt (0-based) is `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn backoff(&self, attempt: usize) -> Duration {
        let exp = attempt.min(16) as u32;
        self.base_delay.saturating_mul(1u32 << exp)
    }

    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, RagError>>,
    {
        let mut errors: Vec<String> = Vec::new();
        for number in 0..self.max_attempts {
            let attempt = Attempt {
                number,
                prior_errors: errors.clone(),
            };
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(RetryError::Fatal(err)),
                Err(err) => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}",
                        label,
                        number + 1,
                        self.max_attempts,
                        err
                    );
                    errors.push(err.to_string());
                    if number + 1 < self.max_attempts {
                        let wait = self.backoff(number);
                        tracing::debug!("{} retrying in {:?}", label, wait);
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        Err(RetryError::Exhausted {
            attempts: self.max_attempts,
            errors,
        })
    }
}

/// One step of a retry run.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub number: usize,
    pub prior_errors: Vec<String>,
}

#[derive(Debug)]
pub enum RetryError {
    /// A non-retryable error ended the run early.
    Fatal(RagError),
    Exhausted { attempts: usize, errors: Vec<String> },
}
