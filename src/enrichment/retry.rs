//! Randomised pacing and retrying page fetches

use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::Politeness;
use crate::error::FetchError;
use crate::traits::{FetchRequest, FetchedPage, PageFetcher};

/// Draws politeness delays from a uniform range.
///
/// Seeded pacers produce the same delay sequence on every run.
pub struct Pacer {
    rng: fastrand::Rng,
    min: Duration,
    max: Duration,
}

impl Pacer {
    pub fn new(seed: Option<u64>, min: Duration, max: Duration) -> Self {
        let rng = seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed);
        Self {
            rng,
            min,
            max: max.max(min),
        }
    }

    pub fn from_politeness(politeness: &Politeness, seed: Option<u64>) -> Self {
        Self::new(seed, politeness.delay_min, politeness.delay_max)
    }

    pub fn next_delay(&mut self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        Duration::from_millis(self.rng.u64(min..=max))
    }

    pub async fn pause(&mut self) {
        let delay = self.next_delay();
        sleep(delay).await;
    }
}

/// Fetch `url`, retrying retryable failures up to `politeness.retries` times
/// with a pacing delay before each retry.
pub async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    url: &str,
    politeness: &Politeness,
    pacer: &mut Pacer,
) -> Result<FetchedPage, FetchError> {
    let request = FetchRequest::new(url, politeness.timeout);
    let mut attempt = 0;

    loop {
        let result = match timeout(politeness.timeout, fetcher.fetch(&request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
        };

        match result {
            Ok(page) => return Ok(page),
            Err(e) if e.is_retryable() && attempt < politeness.retries => {
                attempt += 1;
                warn!("Retrying {} ({}/{}): {}", url, attempt, politeness.retries, e);
                pacer.pause().await;
            }
            Err(e) => {
                debug!("Giving up on {} after {} attempts: {}", url, attempt + 1, e);
                return Err(e);
            }
        }
    }
}
