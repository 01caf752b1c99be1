use crate::config::FetchConfig;
use crate::error::DownloadError;
use std::future::Future;
use tracing::warn;

/// Runs `op` until it succeeds, fails permanently, or `max_retries` extra
/// attempts are spent. The delay doubles after each retryable failure.
pub async fn with_retry<T, F, Fut>(config: &FetchConfig, url: &str, mut op: F) -> Result<T, DownloadError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DownloadError>>,
{
    let mut delay = config.retry_backoff;
    let mut attempt = 0u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                warn!(
                    url,
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config(max_retries: u32) -> FetchConfig {
        FetchConfig {
            max_retries,
            retry_backoff: Duration::from_millis(1),
            ..FetchConfig::default()
        }
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&config(2), "http://x", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DownloadError::Timeout {
                url: "http://x".into(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&config(5), "http://x", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DownloadError::Status {
                url: "http://x".into(),
                status: 404,
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
