//! Method and path dispatch with global and per-route middleware.
//!
//! [`Router`] dispatches requests by method and path. Two pattern styles are
//! supported:
//!
//! | Pattern                              | Example match                        | Captured params     |
//! |--------------------------------------|--------------------------------------|---------------------|
//! | `/api/lastfm/track-info`             | `/api/lastfm/track-info`             | *(none)*            |
//! | `/api/lastfm/user-tracks/:username`  | `/api/lastfm/user-tracks/rj`         | `username → "rj"`   |
//!
//! Trailing slashes are normalized on both patterns and incoming paths.
//!
//! Middleware is attached at two levels. Layers added with [`Router::layer`] wrap
//! every request, including ones that match no route, which is where rate
//! limiting belongs. Middleware passed to [`Router::get_with`] wraps only that
//! route, which is how a cache category gets bound to an endpoint.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::middleware::{MiddlewareHandler, Next};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that processes a [`Context`] and returns a
/// [`Response`].
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait automatically via the blanket impl
/// below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

/// Erases a concrete handler into a shareable [`Handler`].
pub fn into_handler(handler: impl IntoHandler) -> Handler {
    Arc::new(move |ctx| handler.call(ctx))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `:name`
    Capture(String),
}

/// A route path compiled to segments. Empty segments are ignored, so trailing
/// and doubled slashes never affect matching.
#[derive(Debug, Clone)]
struct Pattern {
    segments: Vec<Segment>,
}

fn segments_of(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

impl Pattern {
    fn parse(pattern: &str) -> Self {
        let segments = segments_of(pattern)
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Capture(name.to_owned()),
                None => Segment::Literal(s.to_owned()),
            })
            .collect();
        Self { segments }
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = PathParams::new();
        let mut actual = segments_of(path);

        for expected in &self.segments {
            let value = actual.next()?;
            match expected {
                Segment::Literal(literal) if literal != value => return None,
                Segment::Literal(_) => {}
                Segment::Capture(name) => params.insert(name.clone(), value.to_owned()),
            }
        }
        // Longer paths than the pattern do not match.
        actual.next().is_none().then_some(params)
    }
}

// A registered route: method + pattern, its own middleware, and the endpoint.
struct Route {
    method: Method,
    pattern: Pattern,
    middlewares: Vec<MiddlewareHandler>,
    handler: Handler,
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> Option<PathParams> {
        if &self.method == method {
            self.pattern.matches(path)
        } else {
            None
        }
    }
}

/// HTTP request router with global and per-route middleware.
///
/// Routes are evaluated in registration order; the first route whose method and
/// pattern both match is used. Unmatched requests still pass through the global
/// layers and end at a `404 Not Found` endpoint.
///
/// # Examples
///
/// ```rust,no_run
/// use scrobble_edge::{Router, Response, StatusCode, context::Context};
///
/// let mut router = Router::new();
/// router.get("/ping", |_ctx: Context| async { Response::new(StatusCode::OK) });
/// router.get("/api/lastfm/user-tracks/:username", |ctx: Context| async move {
///     let user = ctx.params().get("username").unwrap_or("unknown").to_owned();
///     Response::new(StatusCode::OK).body(user)
/// });
/// ```
pub struct Router {
    routes: Vec<Route>,
    layers: Vec<MiddlewareHandler>,
    not_found: Handler,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Create a new, empty `Router` with no routes and no layers.
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            layers: Vec::new(),
            not_found: into_handler(|_ctx: Context| async {
                Response::new(StatusCode::NOT_FOUND)
                    .header("Content-Type", "application/json")
                    .body(r#"{"error":"Not found"}"#)
            }),
        }
    }

    /// Adds a middleware that wraps every request, outermost first.
    pub fn layer(&mut self, middleware: MiddlewareHandler) -> &mut Self {
        self.layers.push(middleware);
        self
    }

    /// Register a handler for `GET` requests matching `path`.
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) -> &mut Self {
        self.add(Method::Get, path, Vec::new(), handler)
    }

    /// Register a `GET` handler wrapped in route-specific middleware.
    pub fn get_with(
        &mut self,
        path: &str,
        middlewares: Vec<MiddlewareHandler>,
        handler: impl IntoHandler,
    ) -> &mut Self {
        self.add(Method::Get, path, middlewares, handler)
    }

    /// Register a handler for an arbitrary method, with route-specific middleware.
    pub fn add(
        &mut self,
        method: Method,
        path: &str,
        middlewares: Vec<MiddlewareHandler>,
        handler: impl IntoHandler,
    ) -> &mut Self {
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            middlewares,
            handler: into_handler(handler),
        });
        self
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Run `request` through the global layers, the matched route's middleware,
    /// and finally its handler.
    pub async fn route(&self, request: Request) -> Response {
        let matched = self
            .routes
            .iter()
            .find_map(|route| route.matches(request.method(), request.path()).map(|p| (route, p)));

        let (chain, endpoint, params) = match matched {
            Some((route, params)) => {
                let mut chain = self.layers.clone();
                chain.extend(route.middlewares.iter().cloned());
                (chain, Arc::clone(&route.handler), params)
            }
            None => (self.layers.clone(), Arc::clone(&self.not_found), PathParams::new()),
        };

        let ctx = Context::with_params(request, params);
        Next::new(chain, endpoint).run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{Middleware, from_middleware};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    struct Stamp(Arc<AtomicUsize>);

    impl Middleware for Stamp {
        fn handle(
            &self,
            ctx: Context,
            next: Next,
        ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                let mut res = next.run(ctx).await;
                res.add_header("X-Stamped", "1");
                res
            })
        }
    }

    // ── Pattern ───────────────────────────────────────────────────────────────

    #[test]
    fn trailing_slash_is_insignificant() {
        let pat = Pattern::parse("/api/lastfm/track-info/");
        assert!(pat.matches("/api/lastfm/track-info").is_some());
        assert!(pat.matches("/api/lastfm/track-info/").is_some());
    }

    #[test]
    fn captures_compile_to_named_segments() {
        let pat = Pattern::parse("/api/lastfm/cover-art/:mbid");
        assert_eq!(pat.segments.len(), 4);
        assert_eq!(pat.segments[3], Segment::Capture("mbid".into()));
    }

    #[test]
    fn root_matches_only_root() {
        let pat = Pattern::parse("/");
        assert!(pat.matches("/").is_some());
        assert!(pat.matches("/api").is_none());
    }

    #[test]
    fn pattern_param_extracts_value() {
        let pat = Pattern::parse("/api/lastfm/user-tracks/:username");
        let params = pat.matches("/api/lastfm/user-tracks/rj/").unwrap();
        assert_eq!(params.get("username"), Some("rj"));
    }

    #[test]
    fn pattern_param_wrong_segment_count() {
        let pat = Pattern::parse("/api/lastfm/mb-release/:mbid");
        assert!(pat.matches("/api/lastfm/mb-release").is_none());
        assert!(pat.matches("/api/lastfm/mb-release/x/y").is_none());
    }

    #[test]
    fn pattern_static_segment_mismatch() {
        let pat = Pattern::parse("/api/lastfm/mb-release/:mbid");
        assert!(pat.matches("/api/lastfm/cover-art/x").is_none());
    }

    // ── Router ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn router_empty_returns_404() {
        let router = Router::new();
        assert!(router.is_empty());
        let res = router.route(make_request("GET", "/")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn router_get_does_not_match_post() {
        let mut router = Router::new();
        router.get("/hello", |_ctx: Context| async { Response::new(StatusCode::OK) });
        assert_eq!(router.len(), 1);

        let get = router.route(make_request("GET", "/hello")).await;
        let post = router.route(make_request("POST", "/hello")).await;
        assert_eq!(get.status(), StatusCode::OK);
        assert_eq!(post.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn router_first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/path", |_ctx: Context| async { Response::new(StatusCode::OK) });
        router.get("/path", |_ctx: Context| async { Response::new(StatusCode::ACCEPTED) });
        let res = router.route(make_request("GET", "/path")).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn router_parameterized_route_receives_params() {
        let mut router = Router::new();
        router.get("/api/lastfm/user-tracks/:username", |ctx: Context| async move {
            let user = ctx.params().get("username").unwrap_or("").to_owned();
            Response::new(StatusCode::OK).body(user)
        });
        let res = router
            .route(make_request("GET", "/api/lastfm/user-tracks/rj"))
            .await;
        assert_eq!(res.body_ref().as_ref(), b"rj");
    }

    #[tokio::test]
    async fn global_layers_wrap_unmatched_requests() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router.layer(from_middleware(Arc::new(Stamp(Arc::clone(&hits)))));

        let res = router.route(make_request("GET", "/nowhere")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.headers().get("x-stamped"), Some("1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn route_middleware_applies_only_to_its_route() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router.get_with(
            "/cached",
            vec![from_middleware(Arc::new(Stamp(Arc::clone(&hits))))],
            |_ctx: Context| async { Response::new(StatusCode::OK) },
        );
        router.get("/plain", |_ctx: Context| async { Response::new(StatusCode::OK) });

        let plain = router.route(make_request("GET", "/plain")).await;
        assert!(!plain.headers().contains("x-stamped"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let cached = router.route(make_request("GET", "/cached")).await;
        assert!(cached.headers().contains("x-stamped"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
