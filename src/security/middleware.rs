//! Throttles clients and reports their quota in response headers.

use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use super::rate_limit::{RateDecision, RateLimiter};
use crate::{
    Request, Response, StatusCode,
    context::Context,
    middleware::{Middleware, Next},
};

/// Fallback identity when a request carries no usable client address.
const UNKNOWN_CLIENT: &str = "unknown";

/// Outer middleware applying a shared [`RateLimiter`] to every request.
///
/// # Behavior
///
/// - The client identity is the first of `CF-Connecting-IP`, the leftmost
///   `X-Forwarded-For` entry, or the peer IP. Requests with none of these share
///   the `"unknown"` bucket.
/// - Every response carries `X-RateLimit-Limit`, `X-RateLimit-Remaining`, and
///   `X-RateLimit-Reset` (an ISO-8601 UTC timestamp).
/// - A throttled request is answered with `429 Too Many Requests`, a JSON error
///   body, and `Retry-After`; the rest of the chain is **not** called.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use scrobble_edge::middleware::from_middleware;
/// use scrobble_edge::security::{RateLimitMiddleware, RateLimiter};
///
/// let limiter = Arc::new(RateLimiter::default());
/// let layer = from_middleware(Arc::new(RateLimitMiddleware::new(limiter)));
/// ```
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    identity_headers: Vec<String>,
}

impl RateLimitMiddleware {
    /// Creates the middleware with the default identity headers
    /// (`CF-Connecting-IP`, then `X-Forwarded-For`).
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            identity_headers: vec!["CF-Connecting-IP".to_string(), "X-Forwarded-For".to_string()],
        }
    }

    /// Replaces the headers consulted for the client identity, in priority order.
    ///
    /// Comma-separated header values contribute their leftmost entry.
    #[must_use]
    pub fn identity_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identity_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    fn client_identity(&self, request: &Request) -> String {
        self.identity_headers
            .iter()
            .filter_map(|name| request.headers().get(name))
            .filter_map(|value| value.split(',').next())
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_owned)
            .or_else(|| request.peer_addr().map(|addr| addr.ip().to_string()))
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_owned())
    }
}

fn apply_headers(response: &mut Response, limit: u32, decision: &RateDecision) {
    response.set_header("X-RateLimit-Limit", limit.to_string());
    response.set_header("X-RateLimit-Remaining", decision.remaining.to_string());
    response.set_header(
        "X-RateLimit-Reset",
        decision.reset_time.to_rfc3339_opts(SecondsFormat::Millis, true),
    );
}

/// Whole seconds until `reset`, rounded up so a client honouring it lands in
/// the next window. Never less than 1.
fn retry_after_secs(reset: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let ms = (reset - now).num_milliseconds();
    ((ms + 999) / 1000).max(1)
}

impl Middleware for RateLimitMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let identity = self.client_identity(ctx.request());
        let decision = self.limiter.check(&identity);
        let limit = self.limiter.max_requests();

        Box::pin(async move {
            if !decision.allowed {
                let retry_after = retry_after_secs(decision.reset_time, Utc::now());
                warn!(client = %identity, path = %ctx.request().path(), "rate limit exceeded");

                let mut response = Response::new(StatusCode::TOO_MANY_REQUESTS)
                    .header("Content-Type", "application/json")
                    .header("Retry-After", retry_after.to_string())
                    .body(r#"{"error":"Too many requests"}"#);
                apply_headers(&mut response, limit, &decision);
                return response;
            }

            let mut response = next.run(ctx).await;
            apply_headers(&mut response, limit, &decision);
            response
        })
    }
}
