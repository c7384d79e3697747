use crate::config::RetrySettings;
use crate::error::{OracleError, RetryError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry loop shared by every oracle call site.
///
/// Attempts are strictly sequential. Rate-limit statuses wait a flat cooldown,
/// transport failures wait a shorter flat delay, and anything else ends the
/// loop on the spot. No exponential growth: the ceiling alone guarantees
/// termination.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_delay: Duration,
    pub transport_delay: Duration,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            rate_limit_delay: Duration::from_millis(settings.rate_limit_delay_ms),
            transport_delay: Duration::from_millis(settings.transport_delay_ms),
            retryable_statuses: settings.retryable_statuses.clone(),
        }
    }
}

impl RetryPolicy {
    /// How long to wait before the next attempt, or `None` if `err` is fatal.
    pub fn backoff_for(&self, err: &OracleError) -> Option<Duration> {
        match err {
            OracleError::Status { status, .. } if self.retryable_statuses.contains(status) => {
                Some(self.rate_limit_delay)
            }
            OracleError::Transport(_) => Some(self.transport_delay),
            _ => None,
        }
    }

    /// Run `op` until it succeeds, fails fatally, or the attempt ceiling is hit.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OracleError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let Some(delay) = self.backoff_for(&err) else {
                return Err(RetryError::Fatal {
                    attempt,
                    source: err,
                });
            };

            warn!(
                call = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "oracle call failed, retrying"
            );
            last_error = Some(err);

            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }

        Err(RetryError::Exhausted {
            attempts: max_attempts,
            last: last_error
                .unwrap_or_else(|| OracleError::Transport("no attempt was made".to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn rate_limited() -> OracleError {
        OracleError::Status {
            status: 429,
            body: "slow down".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_stops_at_ceiling() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = Instant::now();

        let result: Result<(), _> = policy
            .run("test", |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(rate_limited()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert_eq!(last.status(), Some(429));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        // Four flat cooldowns between five attempts
        assert_eq!(started.elapsed(), Duration::from_millis(4 * 5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_status_is_fatal_immediately() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = policy
            .run("test", |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(OracleError::Status {
                        status: 401,
                        body: "unauthorized".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Fatal { attempt: 1, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_then_success() {
        let policy = RetryPolicy::default();
        let started = Instant::now();

        let result = policy
            .run("test", |attempt| async move {
                if attempt < 3 {
                    Err(OracleError::Transport("connection reset".to_string()))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(2 * 2_000));
    }

    #[test]
    fn test_backoff_classification() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(&rate_limited()), Some(Duration::from_secs(5)));
        assert_eq!(
            policy.backoff_for(&OracleError::Transport("timeout".to_string())),
            Some(Duration::from_secs(2))
        );
        assert_eq!(policy.backoff_for(&OracleError::EmptyResponse), None);
        assert_eq!(policy.backoff_for(&OracleError::MissingCredential), None);
        assert_eq!(
            policy.backoff_for(&OracleError::Status {
                status: 503,
                body: String::new()
            }),
            None
        );
    }

    #[test]
    fn test_zero_attempts_is_clamped() {
        let policy = RetryPolicy::from(&RetrySettings {
            max_attempts: 0,
            ..RetrySettings::default()
        });
        assert_eq!(policy.max_attempts, 1);
    }
}
