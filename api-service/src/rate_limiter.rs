use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::HeaderMap;
use common_rpc::{Interceptor, Next, RpcError, RpcRequest, RpcResponse, RpcResult};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::metrics::ApiMetrics;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("rate limit exceeded")]
pub struct RateLimited;

/// Continuous-refill token bucket.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(burst: f64, now: Instant) -> Self {
        Self {
            tokens: burst,
            last_refill: now,
        }
    }

    fn refill(&mut self, rate: f64, burst: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed > Duration::ZERO {
            self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(burst);
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, rate: f64, burst: f64, now: Instant) -> bool {
        self.refill(rate, burst, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// One token bucket per client identifier, created lazily on first use.
///
/// The whole registry sits behind a single mutex, so creation is exactly-once
/// per identifier and bucket updates are serialized.
#[derive(Debug)]
pub struct ClientRateLimiter {
    rate: f64,
    burst: f64,
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl ClientRateLimiter {
    /// `rate` is tokens per second, `burst` the bucket capacity.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst: f64::from(burst),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }

    pub fn allow(&self, client: &str) -> bool {
        self.allow_at(client, Instant::now())
    }

    pub fn allow_at(&self, client: &str, now: Instant) -> bool {
        let mut buckets = self.lock();
        let (rate, burst) = (self.rate, self.burst);
        match buckets.get_mut(client) {
            Some(bucket) => bucket.try_take(rate, burst, now),
            None => {
                let mut bucket = TokenBucket::full(burst, now);
                let allowed = bucket.try_take(rate, burst, now);
                buckets.insert(client.to_string(), bucket);
                allowed
            }
        }
    }

    /// Like [`allow_at`](Self::allow_at) but reports a rejection as an error.
    pub fn check_at(&self, client: &str, now: Instant) -> Result<(), RateLimited> {
        if self.allow_at(client, now) {
            Ok(())
        } else {
            Err(RateLimited)
        }
    }

    /// Drop buckets that have refilled to capacity. A fresh bucket would behave
    /// identically, so removal never changes an admission decision.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let mut buckets = self.lock();
        let before = buckets.len();
        let (rate, burst) = (self.rate, self.burst);
        buckets.retain(|_, bucket| {
            bucket.refill(rate, burst, now);
            bucket.tokens < burst
        });
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolve the caller identity used as the limiter key.
///
/// Precedence: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer
/// host. Forwarded headers are only trustworthy behind a reverse proxy that
/// overwrites them.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(first) = header(FORWARDED_FOR_HEADER)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = header(REAL_IP_HEADER) {
        return real_ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Applies the limiter to procedures ending in `suffix` and passes everything
/// else through untouched.
pub struct LoginRateLimitInterceptor {
    limiter: Arc<ClientRateLimiter>,
    suffix: String,
    metrics: Option<Arc<ApiMetrics>>,
}

impl LoginRateLimitInterceptor {
    pub const LOGIN_SUFFIX: &'static str = "/LoginUser";

    pub fn new(limiter: Arc<ClientRateLimiter>) -> Self {
        Self::for_suffix(limiter, Self::LOGIN_SUFFIX)
    }

    pub fn for_suffix(limiter: Arc<ClientRateLimiter>, suffix: impl Into<String>) -> Self {
        Self {
            limiter,
            suffix: suffix.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ApiMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[async_trait]
impl Interceptor for LoginRateLimitInterceptor {
    async fn intercept(&self, request: RpcRequest, next: Next<'_>) -> RpcResult<RpcResponse> {
        if !request.procedure().ends_with(&self.suffix) {
            return next.run(request).await;
        }

        let client = client_identity(request.headers(), request.peer());
        let decision = self.limiter.check_at(&client, Instant::now());

        if let Some(metrics) = &self.metrics {
            metrics.set_limiter_clients(self.limiter.len());
        }

        if let Err(err) = decision {
            debug!(%client, procedure = %request.procedure(), "login rate limited");
            if let Some(metrics) = &self.metrics {
                metrics.rate_limited();
            }
            return Err(RpcError::resource_exhausted(err.to_string()).with_source(err));
        }

        next.run(request).await
    }
}

/// Periodically evict idle buckets so the registry stays bounded.
pub fn spawn_sweeper(
    limiter: Arc<ClientRateLimiter>,
    period: Duration,
    metrics: Option<Arc<ApiMetrics>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep_idle(Instant::now());
            let remaining = limiter.len();
            if removed > 0 {
                debug!(removed, remaining, "swept idle rate limiter buckets");
            }
            if remaining > 100_000 {
                warn!(remaining, "rate limiter is tracking a large number of clients");
            }
            if let Some(metrics) = &metrics {
                metrics.set_limiter_clients(remaining);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use common_rpc::{unary_fn, Code, InterceptorChain};

    #[test]
    fn burst_then_reject_then_refill_one() {
        let limiter = ClientRateLimiter::new(2.0, 3);
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.allow_at("10.0.0.1", start));
        }
        assert!(!limiter.allow_at("10.0.0.1", start));

        let later = start + Duration::from_millis(500);
        assert!(limiter.allow_at("10.0.0.1", later));
        assert!(!limiter.allow_at("10.0.0.1", later));
    }

    #[test]
    fn refill_is_capped_at_burst() {
        let limiter = ClientRateLimiter::new(5.0, 2);
        let start = Instant::now();
        assert!(limiter.allow_at("a", start));
        assert!(limiter.allow_at("a", start));

        let much_later = start + Duration::from_secs(3600);
        assert!(limiter.allow_at("a", much_later));
        assert!(limiter.allow_at("a", much_later));
        assert!(!limiter.allow_at("a", much_later));
    }

    #[test]
    fn clients_have_independent_buckets() {
        let limiter = ClientRateLimiter::new(1.0, 1);
        let now = Instant::now();
        assert!(limiter.allow_at("a", now));
        assert!(!limiter.allow_at("a", now));
        assert!(limiter.allow_at("b", now));
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn concurrent_first_use_creates_one_bucket() {
        let burst = 10;
        let limiter = ClientRateLimiter::new(0.001, burst);
        let now = Instant::now();
        let granted = std::sync::atomic::AtomicU32::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..5 {
                        if limiter.allow_at("203.0.113.9", now) {
                            granted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(granted.into_inner(), burst);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn sweep_removes_only_refilled_buckets() {
        let limiter = ClientRateLimiter::new(1.0, 2);
        let start = Instant::now();
        limiter.allow_at("idle", start);
        limiter.allow_at("busy", start + Duration::from_secs(5));
        limiter.allow_at("busy", start + Duration::from_secs(5));

        let removed = limiter.sweep_idle(start + Duration::from_secs(5));
        assert_eq!(removed, 1);
        assert_eq!(limiter.len(), 1);
        assert!(!limiter.is_empty());
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn identity_prefers_forwarded_for_first_entry() {
        let peer: SocketAddr = "192.0.2.1:5000".parse().unwrap();
        let h = headers(&[
            ("x-forwarded-for", " 198.51.100.7 , 10.0.0.1"),
            ("x-real-ip", "203.0.113.5"),
        ]);
        assert_eq!(client_identity(&h, Some(peer)), "198.51.100.7");
    }

    #[test]
    fn identity_falls_back_through_real_ip_peer_and_unknown() {
        let peer: SocketAddr = "192.0.2.1:5000".parse().unwrap();

        let h = headers(&[("x-forwarded-for", " , 10.0.0.1"), ("x-real-ip", " 203.0.113.5 ")]);
        assert_eq!(client_identity(&h, Some(peer)), "203.0.113.5");

        assert_eq!(client_identity(&HeaderMap::new(), Some(peer)), "192.0.2.1");
        assert_eq!(client_identity(&HeaderMap::new(), None), UNKNOWN_CLIENT);
    }

    #[tokio::test]
    async fn interceptor_limits_only_login() {
        let limiter = Arc::new(ClientRateLimiter::new(0.001, 1));
        let chain = InterceptorChain::new().with(LoginRateLimitInterceptor::new(limiter.clone()));
        let handler = unary_fn(|_req: RpcRequest| async { RpcResponse::json(&serde_json::json!({})) });

        let login = || {
            RpcRequest::new("/rpc.user.v1.UserService/LoginUser", "{}")
                .with_headers(headers(&[("x-real-ip", "203.0.113.5")]))
        };

        assert!(chain.dispatch(login(), &handler).await.is_ok());
        let err = chain.dispatch(login(), &handler).await.unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted);
        assert_eq!(err.message(), Some("rate limit exceeded"));

        let other = RpcRequest::new("/rpc.user.v1.UserService/RegisterUser", "{}")
            .with_headers(headers(&[("x-real-ip", "203.0.113.5")]));
        assert!(chain.dispatch(other, &handler).await.is_ok());
        assert_eq!(limiter.len(), 1);
    }
}
