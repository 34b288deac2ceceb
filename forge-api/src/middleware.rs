//! API middleware: bearer auth, sliding-window rate limiting, CORS
//!
//! Ordering (outermost first): CORS → rate limit → auth → routes. The rate
//! limiter is a per-IP sliding window over a concurrent map; bookkeeping is
//! O(1) per check with an opportunistic sweep on roughly 1% of calls.

use crate::error::ApiError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Paths that skip bearer auth (liveness and the progress stream).
const AUTH_EXEMPT: &[&str] = &["/api/health", "/api/progress"];

/// Sweep stale buckets once per this many checks.
const SWEEP_INTERVAL: u64 = 128;

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Sliding-window limiter state, shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    max_requests: u32,
    window: Duration,
    buckets: Arc<DashMap<IpAddr, VecDeque<Instant>>>,
    checks: Arc<AtomicU64>,
}

/// Outcome of one admission check.
pub enum RateDecision {
    /// Admitted; how many requests remain in the window.
    Allow { remaining: u32 },
    /// Refused; how long until the oldest request leaves the window.
    Deny { retry_after_ms: u64 },
}

impl RateLimitState {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            buckets: Arc::new(DashMap::new()),
            checks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Admit or refuse one request from `ip`.
    pub fn check(&self, ip: IpAddr) -> RateDecision {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(ip).or_default();

        // Expire entries that left the window.
        while let Some(oldest) = bucket.front() {
            if now.duration_since(*oldest) >= self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        let decision = if (bucket.len() as u32) < self.max_requests {
            bucket.push_back(now);
            RateDecision::Allow {
                remaining: self.max_requests - bucket.len() as u32,
            }
        } else {
            let oldest = *bucket.front().expect("full bucket has a front");
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            RateDecision::Deny {
                retry_after_ms: retry_after.as_millis().max(1) as u64,
            }
        };
        drop(bucket);

        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            self.sweep(now);
        }
        decision
    }

    /// Drop buckets whose newest entry left the window.
    fn sweep(&self, now: Instant) {
        self.buckets.retain(|_, bucket| {
            bucket
                .back()
                .map(|newest| now.duration_since(*newest) < self.window)
                .unwrap_or(false)
        });
    }

    pub fn tracked_ips(&self) -> usize {
        self.buckets.len()
    }
}

impl std::fmt::Debug for RateLimitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitState")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("tracked_ips", &self.tracked_ips())
            .finish()
    }
}

/// Client IP: connection info when available, else `X-Forwarded-For`,
/// else loopback (the case in router unit tests).
fn client_ip(request: &Request) -> IpAddr {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip();
    }
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|list| list.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
    {
        return forwarded;
    }
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Rate limiting middleware. `X-RateLimit-Remaining` is always set; refusals
/// are 429 with `retryAfterMs` in the body.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    match state.check(ip) {
        RateDecision::Allow { remaining } => {
            let mut response = next.run(request).await;
            response.headers_mut().insert(
                "x-ratelimit-remaining",
                HeaderValue::from_str(&remaining.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("0")),
            );
            response
        }
        RateDecision::Deny { retry_after_ms } => {
            tracing::debug!(%ip, retry_after_ms, "Rate limited");
            let mut response = ApiError::rate_limited(retry_after_ms).into_response();
            response
                .headers_mut()
                .insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            response
        }
    }
}

// ============================================================================
// BEARER AUTH
// ============================================================================

/// Auth middleware state: the configured token, if any.
#[derive(Clone)]
pub struct AuthState {
    pub token: Option<Arc<String>>,
}

impl AuthState {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.map(Arc::new),
        }
    }
}

/// Bearer-token middleware. With no token configured everything passes.
/// With one configured, every route outside the exempt list must present
/// `Authorization: Bearer <token>`.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = &state.token else {
        return Ok(next.run(request).await);
    };
    let path = request.uri().path();
    if AUTH_EXEMPT.contains(&path) {
        return Ok(next.run(request).await);
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected.as_str() => Ok(next.run(request).await),
        _ => Err(ApiError::unauthorized()),
    }
}

// ============================================================================
// CORS
// ============================================================================

/// Minimal CORS layer: preflights answer 204, every response carries the
/// allow headers.
pub async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&mut response);
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(&mut response);
    response
}

fn apply_cors_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("authorization, content-type"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_window_admits_up_to_max() {
        let state = RateLimitState::new(2, Duration::from_secs(60));
        assert!(matches!(state.check(ip(1)), RateDecision::Allow { remaining: 1 }));
        assert!(matches!(state.check(ip(1)), RateDecision::Allow { remaining: 0 }));
        match state.check(ip(1)) {
            RateDecision::Deny { retry_after_ms } => assert!(retry_after_ms > 0),
            RateDecision::Allow { .. } => panic!("third request must be denied"),
        }
    }

    #[test]
    fn test_windows_are_per_ip() {
        let state = RateLimitState::new(1, Duration::from_secs(60));
        assert!(matches!(state.check(ip(1)), RateDecision::Allow { .. }));
        assert!(matches!(state.check(ip(2)), RateDecision::Allow { .. }));
        assert!(matches!(state.check(ip(1)), RateDecision::Deny { .. }));
    }

    #[test]
    fn test_window_slides() {
        let state = RateLimitState::new(1, Duration::from_millis(30));
        assert!(matches!(state.check(ip(1)), RateDecision::Allow { .. }));
        assert!(matches!(state.check(ip(1)), RateDecision::Deny { .. }));
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(state.check(ip(1)), RateDecision::Allow { .. }));
    }

    #[test]
    fn test_sweep_drops_stale_buckets() {
        let state = RateLimitState::new(5, Duration::from_millis(10));
        state.check(ip(1));
        state.check(ip(2));
        std::thread::sleep(Duration::from_millis(30));
        state.sweep(Instant::now());
        assert_eq!(state.tracked_ips(), 0);
    }
}
