//! Keyed rate limiting middleware using governor.
//!
//! One token bucket per client identity (forwarded-for hop or peer IP),
//! kept in a bounded map: when the map reaches capacity, stale identities
//! are evicted on the read path before the next key is admitted.

use std::net::SocketAddr;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    DefaultKeyedRateLimiter, Quota, RateLimiter,
    clock::{Clock, DefaultClock},
};
use serde::Serialize;

use crate::AppState;

/// Upper bound on tracked client identities.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// Per-client token-bucket limiter with a bounded key map.
pub struct GatewayRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
    max_tracked: usize,
}

impl std::fmt::Debug for GatewayRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRateLimiter")
            .field("tracked_clients", &self.limiter.len())
            .field("max_tracked", &self.max_tracked)
            .finish()
    }
}

impl GatewayRateLimiter {
    /// Create a limiter allowing `per_minute` sustained requests with the
    /// given burst per client.
    pub fn new(per_minute: u32, burst: u32) -> Self {
        Self::with_max_tracked(per_minute, burst, MAX_TRACKED_CLIENTS)
    }

    fn with_max_tracked(per_minute: u32, burst: u32, max_tracked: usize) -> Self {
        let quota = Quota::per_minute(std::num::NonZeroU32::new(per_minute).unwrap())
            .allow_burst(std::num::NonZeroU32::new(burst).unwrap());

        Self {
            limiter: RateLimiter::keyed(quota),
            max_tracked,
        }
    }

    /// Admits or rejects one request for `key`. Returns the seconds to
    /// wait on rejection. At capacity, stale keys are evicted first.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        if self.limiter.len() >= self.max_tracked {
            self.limiter.retain_recent();
        }

        self.limiter.check_key(&key.to_string()).map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            wait.as_secs().max(1)
        })
    }
}

/// Rate limit error response.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitError {
    pub success: bool,
    pub error: String,
    pub message: String,
    pub retry_after_secs: u64,
}

impl RateLimitError {
    fn new(retry_after_secs: u64) -> Self {
        Self {
            success: false,
            error: "rate_limit_exceeded".to_string(),
            message: "Rate limit exceeded. Please try again later.".to_string(),
            retry_after_secs,
        }
    }
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_secs;
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(self)).into_response();
        response
            .headers_mut()
            .insert("Retry-After", retry_after.to_string().parse().unwrap());
        response
    }
}

/// Client identity for limiting: the first `X-Forwarded-For` hop when
/// present (deployments behind a proxy), else the peer address.
fn client_key(headers: &HeaderMap, peer: Option<&SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

/// Per-client rate limiting middleware. Runs before authentication so a
/// flooding client never reaches the account store.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, RateLimitError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(req.headers(), peer.as_ref());

    match state.rate_limiter.check(&key) {
        Ok(()) => Ok(next.run(req).await),
        Err(retry_after_secs) => {
            tracing::warn!(client = %key, "Rate limit exceeded");
            Err(RateLimitError::new(retry_after_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_burst_exhaustion_rejects_with_wait() {
        let limiter = GatewayRateLimiter::new(60, 2);
        assert!(limiter.check("client-a").is_ok());
        assert!(limiter.check("client-a").is_ok());

        let wait = limiter.check("client-a").unwrap_err();
        assert!(wait >= 1);
    }

    #[test]
    fn test_clients_are_limited_independently() {
        let limiter = GatewayRateLimiter::new(60, 1);
        assert!(limiter.check("client-a").is_ok());
        assert!(limiter.check("client-a").is_err());
        // A different identity still has its full budget
        assert!(limiter.check("client-b").is_ok());
    }

    #[test]
    fn test_at_capacity_new_clients_still_admitted() {
        let limiter = GatewayRateLimiter::with_max_tracked(60, 1, 2);
        assert!(limiter.check("one").is_ok());
        assert!(limiter.check("two").is_ok());
        // Map is at capacity; eviction runs and the next key is served
        assert!(limiter.check("three").is_ok());
    }

    #[test]
    fn test_client_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_key(&headers, Some(&peer)), "203.0.113.7");
    }

    #[test]
    fn test_client_key_falls_back_to_peer_then_unknown() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.4:443".parse().unwrap();
        assert_eq!(client_key(&headers, Some(&peer)), "192.0.2.4");
        assert_eq!(client_key(&headers, None), "unknown");
    }

    #[test]
    fn test_client_key_ignores_empty_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("  "));
        assert_eq!(client_key(&headers, None), "unknown");
    }
}
