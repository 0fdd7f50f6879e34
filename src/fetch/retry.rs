//! Exponential backoff on rate limiting.
//!
//! The delay before retry `n` is:
//! ```text
//! delay = min(base_delay * 2^(n-1), max_delay) + random_jitter(0..250ms)
//! ```
//! Only HTTP 429 is retried. Timeouts and transport errors go straight back to
//! the caller, and after the last retry the 429 response itself is returned.

use super::{FetchRequest, FetchResponse, Fetcher};
use crate::error::FetchError;
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

const TOO_MANY_REQUESTS: u16 = 429;

pub struct RetryFetcher<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RetryFetcher<T>
where
    T: Fetcher,
{
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryFetcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetcher")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Fetcher for RetryFetcher<T>
where
    T: Fetcher,
{
    #[instrument(level = "debug", skip_all, fields(url = %req.url))]
    async fn get(&self, req: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let response = self.inner.get(req).await?;
            if response.status != TOO_MANY_REQUESTS {
                return Ok(response);
            }

            attempt += 1;
            if attempt > self.max_retries {
                error!(
                    attempt,
                    max = self.max_retries,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    "rate limited; retries exhausted"
                );
                return Ok(response);
            }

            let delay = self.backoff(attempt);
            warn!(attempt, max = self.max_retries, ?delay, "rate limited; backing off");
            sleep(delay).await;
        }
    }
}
