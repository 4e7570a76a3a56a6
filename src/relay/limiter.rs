//! Per-client, per-route fixed-window rate limiting.
//!
//! Each `(client, route)` pair owns a bucket counting requests since the
//! bucket's window opened. Quotas come from the [`QuotaTable`]; when a window
//! expires the bucket starts over.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
};

use crate::{
    config::QuotaTable,
    error::RelayError,
    relay::{routes::API_PREFIX, state::AppState},
};

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub client: String,
    pub route: String,
}

#[derive(Debug)]
struct Bucket {
    count: u32,
    window_start: Instant,
}

/// Outcome of a quota check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed { limit: u32, remaining: u32 },
    Rejected { limit: u32, retry_after: Duration },
}

#[derive(Debug)]
pub struct FixedWindowLimiter {
    window: Duration,
    quotas: QuotaTable,
    buckets: Mutex<HashMap<BucketKey, Bucket>>,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration, quotas: QuotaTable) -> Self {
        Self {
            window,
            quotas,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, client: &str, method: &Method, path: &str) -> Decision {
        self.check_at(client, method, path, Instant::now())
    }

    /// Counts one request against its bucket and decides whether it may pass.
    ///
    /// The increment and the comparison happen under the same lock, so
    /// concurrent callers never jointly exceed the quota.
    pub fn check_at(&self, client: &str, method: &Method, path: &str, now: Instant) -> Decision {
        let route = canonical_route(path);
        let limit = self.quotas.limit_for(method, route);
        let key = BucketKey {
            client: client.to_string(),
            route: format!("{method} {route}"),
        };

        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry(key).or_insert(Bucket {
            count: 0,
            window_start: now,
        });

        if now.saturating_duration_since(bucket.window_start) >= self.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        if bucket.count >= limit {
            let elapsed = now.saturating_duration_since(bucket.window_start);
            return Decision::Rejected {
                limit,
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        bucket.count += 1;
        Decision::Allowed {
            limit,
            remaining: limit - bucket.count,
        }
    }

    /// Drops buckets whose window has rolled over. Returns how many were evicted.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.window_start) < self.window);
        before - buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `/api/gemini` and `/gemini` are the same route.
pub fn canonical_route(path: &str) -> &str {
    match path.strip_prefix(API_PREFIX) {
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Identifies a client by address and user agent.
///
/// Behind a platform proxy the address is the first `X-Forwarded-For` hop.
pub fn client_identity(req: &Request, behind_proxy: bool) -> String {
    let forwarded = behind_proxy
        .then(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
        .flatten();

    let addr = forwarded
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let agent = req
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    format!("{addr}|{agent}")
}

/// Rate-limit middleware. Must be installed with `route_layer` so the matched
/// route is known.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| req.uri().path().to_string(), |p| p.as_str().to_string());
    let client = client_identity(&req, state.config.behind_proxy);

    match state.limiter.check(&client, req.method(), &path) {
        Decision::Rejected { limit, retry_after } => {
            tracing::debug!(%client, %path, limit, ?retry_after, "rate limit exceeded");
            Err(RelayError::RateLimited { retry_after })
        }
        Decision::Allowed { limit, remaining } => {
            let mut response = next.run(req).await;
            let headers = response.headers_mut();
            headers.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(RATELIMIT_REMAINING, HeaderValue::from(remaining));
            Ok(response)
        }
    }
}
