//! Per-upstream request throttling.
//!
//! Wraps any [`Fetcher`] so that consecutive requests to the same host are
//! spaced by at least a configured delay. Callers running concurrently each
//! reserve the next free slot under the lock and then sleep outside it, so a
//! pool of workers never fires two requests at the same upstream inside the
//! delay window.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use railtime_core::throttle::{ThrottledFetcher, ThrottleConfig};
//!
//! # use railtime_core::traits::Fetcher;
//! # use railtime_core::models::FetchResponse;
//! # #[derive(Clone)] struct MyFetcher;
//! # impl Fetcher for MyFetcher {
//! #     async fn fetch(&self, _: &str, _: &[(&str, &str)]) -> Result<FetchResponse, railtime_core::error::AppError> { todo!() }
//! # }
//! let config = ThrottleConfig::new(Duration::from_millis(500))
//!     .with_jitter(Duration::from_millis(200));
//! let fetcher = ThrottledFetcher::new(MyFetcher, config);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::error::AppError;
use crate::models::FetchResponse;
use crate::traits::Fetcher;

/// Configuration for the throttled fetcher.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same upstream.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,
}

impl ThrottleConfig {
    /// Create a new config with the given per-upstream delay and no jitter.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Effective delay for a single wait (delay + random jitter).
    fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(jitter_ms)
    }
}

impl Default for ThrottleConfig {
    /// 500ms between requests to one upstream, no jitter.
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

/// A [`Fetcher`] wrapper that enforces a minimum per-upstream delay.
#[derive(Clone)]
pub struct ThrottledFetcher<F> {
    inner: F,
    config: ThrottleConfig,
    /// Start time of the most recently reserved request per upstream.
    next_slot: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<F: Fetcher> ThrottledFetcher<F> {
    pub fn new(inner: F, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            next_slot: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Extract the upstream key from a URL (scheme://host:port).
    fn upstream_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    /// Reserve the next request slot for `upstream` and sleep until it arrives.
    async fn wait_for_slot(&self, upstream: &str) {
        let now = Instant::now();
        let slot = {
            let mut map = self.next_slot.lock().await;
            let slot = match map.get(upstream) {
                Some(&last) => std::cmp::max(now, last + self.config.effective_delay()),
                None => now,
            };
            map.insert(upstream.to_string(), slot);
            slot
        };

        if slot > now {
            tracing::debug!(
                upstream = %upstream,
                sleep_ms = %(slot - now).as_millis(),
                "Throttling request"
            );
            tokio::time::sleep_until(slot).await;
        }
    }
}

impl<F: Fetcher> Fetcher for ThrottledFetcher<F> {
    async fn fetch(&self, url: &str, params: &[(&str, &str)]) -> Result<FetchResponse, AppError> {
        if let Some(upstream) = Self::upstream_key(url) {
            self.wait_for_slot(&upstream).await;
        }
        self.inner.fetch(url, params).await
    }
}

// Jitter from a xorshift seeded by the clock; avoids pulling in `rand`.
fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockFetcher;

    #[test]
    fn upstream_key_extracts_correctly() {
        assert_eq!(
            ThrottledFetcher::<MockFetcher>::upstream_key("https://example.com/path?q=1"),
            Some("https://example.com:443".to_string())
        );
        assert_eq!(
            ThrottledFetcher::<MockFetcher>::upstream_key("http://example.com:8080/page"),
            Some("http://example.com:8080".to_string())
        );
    }

    #[test]
    fn upstream_key_returns_none_for_invalid_url() {
        assert_eq!(
            ThrottledFetcher::<MockFetcher>::upstream_key("not-a-url"),
            None
        );
    }

    #[test]
    fn effective_delay_with_jitter_is_bounded() {
        let config =
            ThrottleConfig::new(Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = config.effective_delay();
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_enforces_delay_on_same_upstream() {
        let fetcher = ThrottledFetcher::new(
            MockFetcher::new("<html>ok</html>"),
            ThrottleConfig::new(Duration::from_millis(100)),
        );

        let start = Instant::now();
        fetcher.fetch("http://example.com/a", &[]).await.unwrap();
        fetcher.fetch("http://example.com/b", &[]).await.unwrap();

        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "second request should wait, elapsed: {:?}",
            start.elapsed()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_are_spaced_out() {
        let fetcher = ThrottledFetcher::new(
            MockFetcher::new("<html>ok</html>"),
            ThrottleConfig::new(Duration::from_millis(60)),
        );

        let start = Instant::now();
        let (a, b, c) = tokio::join!(
            fetcher.fetch("http://example.com/1", &[]),
            fetcher.fetch("http://example.com/2", &[]),
            fetcher.fetch("http://example.com/3", &[]),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(120) && elapsed < Duration::from_millis(180),
            "three requests need exactly two gaps, elapsed: {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_does_not_delay_different_upstreams() {
        let fetcher = ThrottledFetcher::new(
            MockFetcher::new("<html>ok</html>"),
            ThrottleConfig::new(Duration::from_millis(200)),
        );

        let start = Instant::now();
        fetcher.fetch("http://example.com/", &[]).await.unwrap();
        fetcher.fetch("http://other.com/", &[]).await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn throttle_passes_through_errors() {
        let fetcher = ThrottledFetcher::new(
            MockFetcher::with_error(AppError::Parse("fail".into())),
            ThrottleConfig::new(Duration::ZERO),
        );

        let err = fetcher.fetch("http://example.com", &[]).await.unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }
}
