//! Generic optimistic-concurrency retry helper (§6.4): every CAS-style
//! write — transaction finalize, delivery-ledger update, dedup-marker
//! write — retries write-conflicts under the same back-off schedule.

use std::future::Future;
use std::time::Duration;

use pos_shared::{AppError, ErrorCode};

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    /// §6.4: initial 10ms, factor 2, cap 1s, max 5 attempts.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            factor: 2,
            cap: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

/// Run `f` up to `config.max_attempts` times, sleeping with exponential
/// back-off between attempts, as long as it fails with
/// `ErrorCode::ConcurrentModification`. Any other error, or exhaustion of
/// the attempt budget, is returned to the caller.
pub async fn with_optimistic_retry<F, Fut, T>(config: RetryConfig, mut f: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.code == ErrorCode::ConcurrentModification && attempt < config.max_attempts => {
                tokio::time::sleep(delay).await;
                delay = (delay * config.factor).min(config.cap);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig { initial_delay: Duration::from_millis(1), ..Default::default() };
        let result = with_optimistic_retry(config, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(AppError::concurrent_modification("cart-1"))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let config = RetryConfig { initial_delay: Duration::from_millis(1), max_attempts: 3, ..Default::default() };
        let result: Result<(), AppError> =
            with_optimistic_retry(config, || async { Err(AppError::concurrent_modification("cart-1")) }).await;
        assert!(result.is_err());
    }
}
