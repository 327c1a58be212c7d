//! Rate limiting for web crawling

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use rand::Rng;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Randomized pause between successive fetches of one site.
///
/// The first call returns immediately; every later call waits until a
/// delay drawn uniformly from `[min, max]` has passed since the previous
/// request.
#[derive(Clone)]
pub struct PolitenessDelay {
    inner: Arc<Mutex<PolitenessInner>>,
}

struct PolitenessInner {
    last_request: Option<Instant>,
    min: Duration,
    max: Duration,
}

impl PolitenessDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            inner: Arc::new(Mutex::new(PolitenessInner {
                last_request: None,
                min,
                max,
            })),
        }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// Raise both bounds to at least `floor` (robots.txt `Crawl-delay`)
    pub async fn raise_floor(&self, floor: Duration) {
        let mut inner = self.inner.lock().await;
        inner.min = inner.min.max(floor);
        inner.max = inner.max.max(floor);
    }

    /// Wait until the next request is allowed
    pub async fn wait(&self) {
        let mut inner = self.inner.lock().await;

        if let Some(last) = inner.last_request {
            let delay = if inner.max > inner.min {
                rand::rng().random_range(inner.min..=inner.max)
            } else {
                inner.min
            };
            let elapsed = last.elapsed();
            if elapsed < delay {
                let wait_time = delay - elapsed;
                trace!("Politeness delay: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        inner.last_request = Some(Instant::now());
    }
}

/// Process-wide cap on requests across all concurrently crawled sites
pub struct GlobalRateLimiter {
    limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl GlobalRateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(nonzero!(1u32));
        let quota = Quota::per_second(rps);
        let limiter = RateLimiter::direct(quota);

        Self { limiter }
    }

    /// Wait until a request is allowed
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_first_request_is_not_delayed() {
        let delay = PolitenessDelay::from_millis(500, 1000);

        let start = Instant::now();
        delay.wait().await;
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_politeness_delay_bounds() {
        let delay = PolitenessDelay::from_millis(100, 150);

        delay.wait().await;
        let start = Instant::now();
        delay.wait().await;
        delay.wait().await;
        let elapsed = start.elapsed();

        // Two delays of at least 100ms each
        assert!(elapsed >= Duration::from_millis(190));
    }

    #[tokio::test]
    async fn test_raise_floor() {
        let delay = PolitenessDelay::from_millis(0, 0);
        delay.raise_floor(Duration::from_millis(100)).await;

        delay.wait().await;
        let start = Instant::now();
        delay.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_global_rate_limiter() {
        let limiter = GlobalRateLimiter::new(100);

        // Should be able to make many requests quickly
        for _ in 0..10 {
            limiter.wait().await;
        }
    }
}
