//! Per-client rate limiting.
//!
//! Two backends share the [`RateLimiter`] trait:
//! - [`SlidingWindowLimiter`]: exact sliding window over request timestamps
//! - [`GovernorLimiter`]: GCRA keyed limiter from the `governor` crate
//!
//! Clients are keyed by peer address, then the first `X-Forwarded-For`
//! entry, then `"unknown"`.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{RateLimitBackend, RateLimitConfig};
use crate::models::AppState;
use crate::types::AppError;

pub const UNKNOWN_CLIENT: &str = "unknown";

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record a request for `client_key` if it is within its allowance.
    /// Returns false, recording nothing, when the client is over the limit.
    async fn check_and_record(&self, client_key: &str) -> bool;

    /// Drop state for clients with no recent requests
    async fn sweep(&self);

    fn window(&self) -> Duration;
}

/// Exact sliding window: at most `max_requests` accepted in any `window`
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    clients: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests as usize,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub async fn tracked_clients(&self) -> usize {
        self.clients.lock().await.len()
    }

    fn prune(entries: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = entries.front() {
            if now.duration_since(*oldest) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn check_and_record(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;
        let entries = clients.entry(client_key.to_string()).or_default();

        Self::prune(entries, now, self.window);
        if entries.len() >= self.max_requests {
            return false;
        }
        entries.push_back(now);
        true
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;
        let before = clients.len();
        clients.retain(|_, entries| {
            Self::prune(entries, now, self.window);
            !entries.is_empty()
        });
        let removed = before - clients.len();
        if removed > 0 {
            debug!(removed, remaining = clients.len(), "Swept idle rate limit entries");
        }
    }

    fn window(&self) -> Duration {
        self.window
    }
}

/// `governor` keyed limiter allowing a burst of `max_requests` that refills
/// evenly over `window`
pub struct GovernorLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    window: Duration,
}

impl GovernorLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(max_requests).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);

        Self {
            limiter: governor::RateLimiter::keyed(quota),
            window,
        }
    }
}

#[async_trait]
impl RateLimiter for GovernorLimiter {
    async fn check_and_record(&self, client_key: &str) -> bool {
        self.limiter.check_key(&client_key.to_string()).is_ok()
    }

    async fn sweep(&self) {
        self.limiter.retain_recent();
    }

    fn window(&self) -> Duration {
        self.window
    }
}

pub fn build_rate_limiter(config: &RateLimitConfig) -> Arc<dyn RateLimiter> {
    let window = Duration::from_secs(config.window_secs);
    match config.backend {
        RateLimitBackend::SlidingWindow => {
            Arc::new(SlidingWindowLimiter::new(config.requests, window))
        }
        RateLimitBackend::Governor => Arc::new(GovernorLimiter::new(config.requests, window)),
    }
}

/// Periodically sweep idle clients so the table does not grow without bound
pub fn spawn_sweeper(limiter: Arc<dyn RateLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            limiter.sweep().await;
        }
    })
}

/// Client identity used as the rate limit key
pub fn client_key(req: &Request) -> String {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

pub async fn rate_limiter_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let key = client_key(&req);

    if !state.rate_limiter.check_and_record(&key).await {
        warn!(client = %key, "Rate limit exceeded");
        return AppError::RateLimited {
            window_secs: state.rate_limiter.window().as_secs(),
        }
        .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_allows_then_blocks() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(limiter.check_and_record("10.0.0.1").await);
        }
        assert!(!limiter.check_and_record("10.0.0.1").await);

        // Other clients are independent
        assert!(limiter.check_and_record("10.0.0.2").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_frees_slots_as_time_passes() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.check_and_record("c").await);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.check_and_record("c").await);
        assert!(!limiter.check_and_record("c").await);

        // The first request leaves the window, the second has not
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(limiter.check_and_record("c").await);
        assert!(!limiter.check_and_record("c").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_requests_are_not_recorded() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_secs(10));

        assert!(limiter.check_and_record("c").await);
        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert!(!limiter.check_and_record("c").await);
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter.check_and_record("c").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_idle_clients() {
        let limiter = SlidingWindowLimiter::new(5, Duration::from_secs(60));
        limiter.check_and_record("old").await;
        tokio::time::advance(Duration::from_secs(45)).await;
        limiter.check_and_record("recent").await;
        assert_eq!(limiter.tracked_clients().await, 2);

        tokio::time::advance(Duration::from_secs(20)).await;
        limiter.sweep().await;
        assert_eq!(limiter.tracked_clients().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_never_exceed_limit() {
        let limiter = Arc::new(SlidingWindowLimiter::new(20, Duration::from_secs(60)));

        let checks = (0..50).map(|_| {
            let limiter = limiter.clone();
            async move { limiter.check_and_record("burst").await }
        });
        let accepted = futures::future::join_all(checks)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        assert_eq!(accepted, 20);
    }

    #[tokio::test]
    async fn test_governor_burst_then_block() {
        let limiter = GovernorLimiter::new(3, Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check_and_record("k").await);
        }
        assert!(!limiter.check_and_record("k").await);
        assert!(limiter.check_and_record("other").await);
        limiter.sweep().await;
    }

    #[test]
    fn test_build_rate_limiter_uses_configured_window() {
        let mut config = RateLimitConfig {
            requests: 20,
            window_secs: 60,
            sweep_interval_secs: 300,
            backend: RateLimitBackend::SlidingWindow,
        };
        assert_eq!(build_rate_limiter(&config).window(), Duration::from_secs(60));

        config.backend = RateLimitBackend::Governor;
        config.window_secs = 10;
        assert_eq!(build_rate_limiter(&config).window(), Duration::from_secs(10));
    }

    #[test]
    fn test_client_key_sources() {
        let mut req = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&req), UNKNOWN_CLIENT);

        req.headers_mut()
            .insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_key(&req), "203.0.113.7");

        let addr: SocketAddr = "192.0.2.1:4000".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(client_key(&req), "192.0.2.1");
    }
}
