//! Request throttling.
//!
//! - [`RateLimiter`] — fixed-window counter per client identity.
//! - [`RateLimitMiddleware`] — wires a shared limiter in front of every route
//!   and reports the client's quota in `X-RateLimit-*` headers.

pub mod middleware;
pub mod rate_limit;

pub use middleware::RateLimitMiddleware;
pub use rate_limit::{RateDecision, RateLimiter, RateWindow};
