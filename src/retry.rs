//! Shared bounded exponential backoff: base delay, doubling factor, a
//! cap, and a fixed attempt count. Used by the trainer's historical fetch
//! and the thinker/trader's live price and balance reads; order placement
//! is deliberately never wrapped in this, since it is not automatically
//! retried.

use std::time::Duration;

use tracing::warn;

pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Base 3.5s, factor 2, cap 30s, 3 attempts.
    pub fn trainer_fetch() -> Self {
        Self { base: Duration::from_millis(3500), factor: 2, cap: Duration::from_secs(30), attempts: 3 }
    }

    /// Base 2s, factor 2, cap 30s, 2 attempts. Market-data and balance
    /// reads use bounded exponential backoff.
    pub fn market_data() -> Self {
        Self { base: Duration::from_secs(2), factor: 2, cap: Duration::from_secs(30), attempts: 2 }
    }

    pub async fn run<T, F, Fut>(&self, mut f: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let mut delay = self.base;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    warn!(attempt, error = %e, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    delay = (delay * self.factor).min(self.cap);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { base: Duration::from_millis(1), factor: 2, cap: Duration::from_millis(10), attempts: 3 };
        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(anyhow::anyhow!("transient"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempt_cap() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { base: Duration::from_millis(1), factor: 2, cap: Duration::from_millis(10), attempts: 3 };
        let result: anyhow::Result<()> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("always fails")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
