//! Response caching: keys, TTL policy, storage and the caching middleware.
//!
//! The cache is short-TTL, read-through, and best-effort: it fronts upstream
//! metadata calls and serves anything no older than its category's TTL, but a
//! failing store only ever costs a cache miss.
//!
//! - [`CacheKey`] — canonical `origin + path + sorted query` identity.
//! - [`CacheCategory`] — closed set of TTL buckets.
//! - [`CacheStore`] — best-effort wrapper over a [`CacheBackend`].
//! - [`MemoryBackend`] — bounded in-process backend.
//! - [`CacheMiddleware`] — per-route hit/miss interception (`X-Cache`).

pub mod key;
pub mod memory;
pub mod middleware;
pub mod policy;
pub mod store;

pub use key::{CacheKey, ParamValue};
pub use memory::MemoryBackend;
pub use middleware::{CacheMiddleware, X_CACHE};
pub use policy::CacheCategory;
pub use store::{CacheBackend, CacheStore, CachedEntry, StoreError, StoreFuture};
