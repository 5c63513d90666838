//! End-to-end pipeline tests: router layers, per-route caching, and throttling
//! exercised together through `Router::route`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::TimeDelta;

use scrobble_edge::background::BackgroundTasks;
use scrobble_edge::cache::{
    CacheBackend, CacheCategory, CacheKey, CacheMiddleware, CacheStore, CachedEntry, MemoryBackend,
    StoreFuture,
};
use scrobble_edge::context::Context;
use scrobble_edge::middleware::{LoggerMiddleware, MiddlewareHandler, from_middleware};
use scrobble_edge::security::{RateLimitMiddleware, RateLimiter};
use scrobble_edge::{Request, Response, Router, StatusCode};

#[derive(Default)]
struct CountingBackend {
    inner: MemoryBackend,
    puts: AtomicUsize,
}

impl CacheBackend for CountingBackend {
    fn lookup<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<CachedEntry>> {
        self.inner.lookup(key)
    }

    fn put(&self, key: CacheKey, entry: CachedEntry) -> StoreFuture<'_, ()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, entry)
    }

    fn delete<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, bool> {
        self.inner.delete(key)
    }
}

struct Edge {
    router: Router,
    backend: Arc<CountingBackend>,
    tasks: BackgroundTasks,
    upstream_calls: Arc<AtomicUsize>,
}

impl Edge {
    fn new(max_requests: u32) -> Self {
        let backend = Arc::new(CountingBackend::default());
        let store = CacheStore::new(backend.clone());
        let tasks = BackgroundTasks::new();
        let upstream_calls = Arc::new(AtomicUsize::new(0));
        let limiter = Arc::new(RateLimiter::new(max_requests, TimeDelta::minutes(1)));

        let cached = |category: CacheCategory| -> Vec<MiddlewareHandler> {
            let cache = CacheMiddleware::new(store.clone(), category, Arc::new(tasks.clone()));
            vec![from_middleware(Arc::new(cache))]
        };

        let mut router = Router::new();
        router
            .layer(from_middleware(Arc::new(RateLimitMiddleware::new(limiter))))
            .layer(from_middleware(Arc::new(LoggerMiddleware)));

        let calls = Arc::clone(&upstream_calls);
        router.get_with("/api/lastfm/track-info", cached(CacheCategory::TrackInfo), move |ctx: Context| {
            calls.fetch_add(1, Ordering::SeqCst);
            let artist = ctx.request().query_param("artist").unwrap_or_default().to_owned();
            async move {
                if artist.is_empty() {
                    return Response::new(StatusCode::BAD_REQUEST).body(r#"{"error":"missing artist"}"#);
                }
                Response::json(&serde_json::json!({ "artist": artist }))
            }
        });

        let calls = Arc::clone(&upstream_calls);
        router.get_with("/api/lastfm/cover-art/:mbid", cached(CacheCategory::CoverArt), move |ctx: Context| {
            calls.fetch_add(1, Ordering::SeqCst);
            let mbid = ctx.params().get("mbid").unwrap_or_default().to_owned();
            async move { Response::json(&serde_json::json!({ "mbid": mbid })) }
        });

        Self {
            router,
            backend,
            tasks,
            upstream_calls,
        }
    }

    async fn get(&self, target: &str, client: &str) -> Response {
        let raw = format!("GET {target} HTTP/1.1\r\nHost: edge.example\r\nCF-Connecting-IP: {client}\r\n\r\n");
        let (request, _) = Request::parse(raw.as_bytes()).unwrap();
        self.router.route(request).await
    }

    fn upstream_calls(&self) -> usize {
        self.upstream_calls.load(Ordering::SeqCst)
    }

    fn puts(&self) -> usize {
        self.backend.puts.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn miss_then_hit_through_router() {
    let edge = Edge::new(100);

    let first = edge.get("/api/lastfm/track-info?artist=Cher&track=Believe", "198.51.100.1").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers().get("x-cache"), Some("MISS"));
    assert!(first.headers().get("cache-control").is_none());
    assert_eq!(edge.tasks.drain().await, 1);
    assert_eq!(edge.puts(), 1);

    // Same parameters in a different order map to the same key.
    let second = edge.get("/api/lastfm/track-info?track=Believe&artist=Cher", "198.51.100.1").await;
    assert_eq!(second.headers().get("x-cache"), Some("HIT"));
    assert_eq!(second.headers().get("cache-control"), Some("public, max-age=86400"));
    assert_eq!(second.body_ref(), first.body_ref());
    assert_eq!(edge.upstream_calls(), 1);
    assert_eq!(edge.tasks.drain().await, 0);
    assert_eq!(edge.puts(), 1);
}

#[tokio::test]
async fn path_parameters_key_separately() {
    let edge = Edge::new(100);

    edge.get("/api/lastfm/cover-art/abc", "198.51.100.1").await;
    edge.get("/api/lastfm/cover-art/def", "198.51.100.1").await;
    edge.tasks.drain().await;

    let hit = edge.get("/api/lastfm/cover-art/abc", "198.51.100.1").await;
    assert_eq!(hit.headers().get("x-cache"), Some("HIT"));
    assert_eq!(hit.headers().get("cache-control"), Some("public, max-age=2592000"));
    assert_eq!(edge.upstream_calls(), 2);
    assert_eq!(edge.puts(), 2);
}

#[tokio::test]
async fn non_ok_responses_are_never_cached() {
    let edge = Edge::new(100);

    for _ in 0..2 {
        let res = edge.get("/api/lastfm/track-info", "198.51.100.1").await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(res.headers().get("x-cache").is_none());
    }
    assert_eq!(edge.tasks.drain().await, 0);
    assert_eq!(edge.puts(), 0);
    assert_eq!(edge.upstream_calls(), 2);
}

#[tokio::test]
async fn unknown_route_is_404_and_still_throttled() {
    let edge = Edge::new(100);

    let res = edge.get("/api/lastfm/nope", "198.51.100.1").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(res.headers().get("x-cache").is_none());
    assert_eq!(res.headers().get("x-ratelimit-remaining"), Some("99"));
    assert_eq!(edge.puts(), 0);
}

#[tokio::test]
async fn throttled_client_gets_429_before_cache() {
    let edge = Edge::new(2);
    let target = "/api/lastfm/track-info?artist=Cher";

    edge.get(target, "203.0.113.5").await;
    edge.tasks.drain().await;
    let hit = edge.get(target, "203.0.113.5").await;
    assert_eq!(hit.headers().get("x-cache"), Some("HIT"));
    assert_eq!(hit.headers().get("x-ratelimit-remaining"), Some("0"));

    let blocked = edge.get(target, "203.0.113.5").await;
    assert_eq!(blocked.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(blocked.headers().get("x-cache").is_none());
    assert_eq!(blocked.headers().get("x-ratelimit-limit"), Some("2"));
    assert_eq!(blocked.body_ref().as_ref(), br#"{"error":"Too many requests"}"#);

    let other = edge.get(target, "203.0.113.6").await;
    assert_eq!(other.status(), StatusCode::OK);
    assert_eq!(other.headers().get("x-cache"), Some("HIT"));
    assert_eq!(edge.upstream_calls(), 1);
}
