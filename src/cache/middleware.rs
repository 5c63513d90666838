//! Read-through response caching as a route middleware.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::{CacheCategory, CacheKey, CacheStore};
use crate::background::Deferred;
use crate::context::Context;
use crate::http::{Method, Response, StatusCode};
use crate::middleware::{Middleware, Next};

/// Response header reporting whether the cache served the request.
pub const X_CACHE: &str = "X-Cache";

/// Serves `GET` requests from a [`CacheStore`] and fills it on a miss.
///
/// Per request:
///
/// 1. The key is derived from the request origin, path, and query.
/// 2. On a hit the stored response is returned with `X-Cache: HIT` and the
///    downstream handler is never invoked.
/// 3. On a miss the handler runs. A `200 OK` response is returned with
///    `X-Cache: MISS` while an untagged copy is written to the store through the
///    [`Deferred`] scheduler, so the write never delays the client. Any other
///    status, including other 2xx codes, is returned untouched and never stored.
///
/// Other methods pass straight through.
///
/// One instance is bound per route; its [`CacheCategory`] picks the TTL.
pub struct CacheMiddleware {
    store: CacheStore,
    category: CacheCategory,
    deferred: Arc<dyn Deferred>,
}

impl CacheMiddleware {
    pub fn new(store: CacheStore, category: CacheCategory, deferred: Arc<dyn Deferred>) -> Self {
        Self {
            store,
            category,
            deferred,
        }
    }

    pub fn category(&self) -> CacheCategory {
        self.category
    }
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let store = self.store.clone();
        let category = self.category;
        let deferred = Arc::clone(&self.deferred);

        Box::pin(async move {
            if ctx.request().method() != &Method::Get {
                return next.run(ctx).await;
            }

            let key = CacheKey::for_request(ctx.request());
            if let Some(entry) = store.get(&key).await {
                let mut response = entry.into_response();
                response.set_header(X_CACHE, "HIT");
                return response;
            }

            let mut response = next.run(ctx).await;
            if response.status() == StatusCode::OK {
                let copy = response.clone();
                deferred.defer(Box::pin(async move {
                    store.set(key, &copy, category).await;
                }));
                response.set_header(X_CACHE, "MISS");
            }
            response
        })
    }
}
