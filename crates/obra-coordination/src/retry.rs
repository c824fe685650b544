//! Retry Manager — backoff schedule and error classification (spec §4.11).
//!
//! Grounded on the teacher's fallback-tier idiom in `resilience.rs`
//! (`FallbackChain` tries cheaper tiers in sequence) generalized to
//! "retry the same operation with backoff", and on
//! `feedback/error_parser.rs`'s error-categorization shape, repurposed
//! into the three-way retryable/terminal split spec'd in §7.

use std::time::Duration;

use rand::Rng;

/// How an error should be handled by the Retry Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Retry with the standard backoff schedule; no feedback to inject.
    RetryableTransient,
    /// Retry, but surface accumulated context as feedback for the next
    /// attempt (e.g. validator violations).
    RetryableWithFeedback,
    /// Do not retry; the caller should escalate.
    Terminal,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_max: Duration::from_millis(250),
        }
    }
}

impl RetryConfig {
    /// `sleep = min(cap, base * multiplier^attempt) + uniform jitter`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt as i32);
        let scaled = self.base_delay.mul_f64(exp);
        let capped = scaled.min(self.max_delay);
        let jitter = if self.jitter_max.is_zero() {
            Duration::ZERO
        } else {
            let millis = rand::thread_rng().gen_range(0..=self.jitter_max.as_millis() as u64);
            Duration::from_millis(millis)
        };
        capped + jitter
    }
}

/// One recorded attempt, kept for the final error history.
#[derive(Debug, Clone)]
pub struct Attempt<E> {
    pub attempt: u32,
    pub error: E,
    pub classification: Classification,
}

#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub last_error: E,
    pub history: Vec<Attempt<E>>,
}

/// Retry `op` according to `config`, classifying each failure with
/// `classifier`. Stops immediately on a `Terminal` classification or once
/// `max_attempts` is reached.
pub async fn with_retry<T, E, Op, Fut, Classifier>(
    config: &RetryConfig,
    classifier: Classifier,
    mut op: Op,
) -> Result<T, RetryExhausted<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    Classifier: Fn(&E) -> Classification,
    E: Clone,
{
    let mut history = Vec::new();
    for attempt in 0..config.max_attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let classification = classifier(&error);
                history.push(Attempt {
                    attempt,
                    error: error.clone(),
                    classification,
                });
                if classification == Classification::Terminal {
                    return Err(RetryExhausted { last_error: error, history });
                }
                if attempt + 1 >= config.max_attempts {
                    return Err(RetryExhausted { last_error: error, history });
                }
                tokio::time::sleep(config.delay_for_attempt(attempt)).await;
            }
        }
    }
    unreachable!("loop always returns before exhausting max_attempts iterations")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let config = RetryConfig::default();
        let result: Result<u32, RetryExhausted<String>> =
            with_retry(&config, |_: &String| Classification::RetryableTransient, |_attempt| async {
                Ok(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn terminal_error_stops_immediately() {
        let config = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryExhausted<String>> = with_retry(
            &config,
            |_: &String| Classification::Terminal,
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts() {
        let mut config = RetryConfig::default();
        config.max_attempts = 3;
        config.base_delay = Duration::from_millis(1);
        config.jitter_max = Duration::ZERO;
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryExhausted<String>> = with_retry(
            &config,
            |_: &String| Classification::RetryableTransient,
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_is_capped() {
        let mut config = RetryConfig::default();
        config.jitter_max = Duration::ZERO;
        config.max_delay = Duration::from_secs(1);
        let delay = config.delay_for_attempt(10);
        assert_eq!(delay, Duration::from_secs(1));
    }
}
