//! Rate-limit friendly networking helpers.
//!
//! Only rate-limit rejections are retried. Anything else goes straight back to
//! the caller so a broken query fails fast instead of sleeping through retries.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_with_backoff(op, self.max_retries, self.base_delay).await
    }
}

/// `base * 2^attempt`: base, 2*base, 4*base, ...
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

/// Call `op`, retrying up to `max_retries` extra times while it fails with a
/// rate-limit error. Exhausting the retries returns the last rate-limit error.
pub async fn retry_with_backoff<T, F, Fut>(
    mut op: F,
    max_retries: u32,
    base_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_rate_limited() && attempt < max_retries => {
                let delay = backoff_delay(base_delay, attempt);
                log::warn!(
                    "rate limited (429), retrying in {}ms (attempt {}/{})",
                    delay.as_millis(),
                    attempt + 1,
                    max_retries + 1
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Send a request, turning 429 into a retryable error and other non-success
/// statuses into `Error::Http`.
pub async fn send_with_backoff(
    rb: reqwest::RequestBuilder,
    label: &str,
    policy: RetryPolicy,
) -> Result<reqwest::Response> {
    policy
        .run(|| {
            let attempt = rb.try_clone();
            async move {
                let rb = attempt
                    .ok_or_else(|| Error::Other(anyhow::anyhow!("{label}: request is not cloneable")))?;
                let res = rb.send().await?;
                let status = res.status();
                if status.is_success() {
                    Ok(res)
                } else {
                    log::debug!("[net] {label} answered {status}");
                    Err(Error::from_status(status.as_u16(), label))
                }
            }
        })
        .await
}
