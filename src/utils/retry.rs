//! Retry with exponential backoff for transient fetch failures.

use std::time::Duration;
use tokio::time::sleep;

use super::fetch::FetchError;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// `retries` extra attempts after the first one
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries + 1,
            ..Self::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powf(attempt.saturating_sub(1) as f64);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }
}

/// Transient failure classes worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientError {
    Network,
    Timeout,
    TooManyRequests,
    ServerError,
}

impl TransientError {
    /// Classify a fetch error, `None` when it is permanent
    pub fn from_fetch_error(err: &FetchError) -> Option<Self> {
        match err {
            FetchError::Network(_) => Some(TransientError::Network),
            FetchError::Timeout(_) => Some(TransientError::Timeout),
            FetchError::Status { status: 429, .. } => Some(TransientError::TooManyRequests),
            FetchError::Status { status, .. } if *status >= 500 => {
                Some(TransientError::ServerError)
            }
            _ => None,
        }
    }

    /// Minimum delay this failure class asks for
    pub fn recommended_delay(&self) -> Duration {
        match self {
            TransientError::TooManyRequests => Duration::from_secs(5),
            TransientError::ServerError => Duration::from_secs(1),
            TransientError::Timeout | TransientError::Network => Duration::ZERO,
        }
    }
}

/// Execute an async operation, retrying transient failures.
///
/// Permanent errors are returned immediately. After `max_attempts` the last
/// transient error is returned.
pub async fn with_retry<T, F, Fut>(config: RetryConfig, mut operation: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, FetchError>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    tracing::debug!("Request succeeded on attempt {}", attempts);
                }
                return Ok(result);
            }
            Err(error) => {
                let Some(transient) = TransientError::from_fetch_error(&error) else {
                    return Err(error);
                };

                if attempts >= config.max_attempts {
                    tracing::warn!("Giving up after {} attempts: {}", attempts, error);
                    return Err(error);
                }

                let delay = std::cmp::max(config.delay_for(attempts), transient.recommended_delay());
                tracing::debug!(
                    "Transient error on attempt {}: {:?}, retrying in {:?}",
                    attempts,
                    transient,
                    delay
                );
                sleep(delay).await;
            }
        }
    }
}
