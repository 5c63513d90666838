//! Best-effort read/write access to a pluggable response store.
//!
//! [`CacheBackend`] is the collaborator contract (`lookup`/`put`/`delete`, all
//! asynchronous and fallible). [`CacheStore`] wraps a backend and turns every
//! backend error into a logged miss or a dropped write, so nothing the store does
//! can change the response a client receives.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{CacheCategory, CacheKey};
use crate::http::{Headers, Response, StatusCode};

/// Errors a backend may report. None of them reach clients.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("entry is not cacheable: {reason}")]
    Uncacheable { reason: &'static str },
}

/// Boxed future returned by [`CacheBackend`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// A stored response: status, headers (including the stamped `Cache-Control`),
/// body, and the instant it was written.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    stored_at: Instant,
}

impl CachedEntry {
    /// Captures `response` as stored right now.
    pub fn from_response(response: Response) -> Self {
        let (status, headers, body) = response.into_parts();
        Self {
            status,
            headers,
            body,
            stored_at: Instant::now(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn stored_at(&self) -> Instant {
        self.stored_at
    }

    /// The `max-age` directive of the stored `Cache-Control` header.
    pub fn max_age(&self) -> Option<Duration> {
        self.headers
            .get_all("cache-control")
            .flat_map(|value| value.split(','))
            .find_map(|directive| {
                let (name, secs) = directive.trim().split_once('=')?;
                if name.trim().eq_ignore_ascii_case("max-age") {
                    secs.trim().trim_matches('"').parse().ok()
                } else {
                    None
                }
            })
            .map(Duration::from_secs)
    }

    /// `true` while the entry is younger than its `max-age`.
    pub fn is_fresh(&self) -> bool {
        self.max_age()
            .is_some_and(|max_age| self.stored_at.elapsed() < max_age)
    }

    /// Rebuilds a client-facing response from the stored parts.
    pub fn into_response(self) -> Response {
        Response::from_parts(self.status, self.headers, self.body)
    }
}

/// The storage collaborator behind [`CacheStore`].
///
/// Implementations may enforce expiry themselves (an HTTP-native edge cache
/// honours `max-age`) or check timestamps explicitly (see
/// [`MemoryBackend`](super::MemoryBackend)). A lookup miss is `Ok(None)`, not an error.
pub trait CacheBackend: Send + Sync {
    fn lookup<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<CachedEntry>>;

    fn put(&self, key: CacheKey, entry: CachedEntry) -> StoreFuture<'_, ()>;

    /// Removes the entry for `key`, reporting whether one existed.
    fn delete<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, bool>;
}

/// Best-effort cache over a [`CacheBackend`].
///
/// Cloning is cheap; clones share the backend.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Looks up `key`. Backend failures are logged and reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<CachedEntry> {
        match self.backend.lookup(key).await {
            Ok(Some(entry)) => {
                debug!(key = %key, "cache hit");
                Some(entry)
            }
            Ok(None) => {
                debug!(key = %key, "cache miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache lookup failed; treating as miss");
                None
            }
        }
    }

    /// Stores a copy of `response` under `key`, stamped with
    /// `Cache-Control: public, max-age=<ttl>` for `category`.
    ///
    /// `response` itself is never modified. Backend failures are logged and dropped.
    pub async fn set(&self, key: CacheKey, response: &Response, category: CacheCategory) {
        let mut copy = response.clone();
        copy.set_header("Cache-Control", category.cache_control());
        let entry = CachedEntry::from_response(copy);

        debug!(key = %key, category = %category, "writing cache entry");
        if let Err(e) = self.backend.put(key, entry).await {
            warn!(category = %category, error = %e, "cache write failed; response served uncached");
        }
    }

    /// Removes any entry for `key`. Returns `false` on a miss or a backend failure.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        match self.backend.delete(key).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key = %key, error = %e, "cache delete failed");
                false
            }
        }
    }
}
