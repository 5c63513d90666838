//! Edge layer in front of Last.fm, MusicBrainz, and Cover Art Archive lookups.
//!
//! The upstream handlers here return canned JSON; a real deployment would call
//! the upstream APIs from them. Everything in front of the handlers (rate
//! limiting, caching, access logging, background writes) is the production path.
//!
//! ```text
//! RUST_LOG=scrobble_edge=debug cargo run --example lastfm_proxy
//! curl -i 'http://127.0.0.1:8787/api/lastfm/track-info?artist=Cher&track=Believe'
//! ```
//!
//! Set `SCROBBLE_EDGE_CONFIG` to a JSON file to override the defaults.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scrobble_edge::background::{BackgroundTasks, spawn_periodic};
use scrobble_edge::cache::{CacheCategory, CacheMiddleware, CacheStore, MemoryBackend};
use scrobble_edge::config::EdgeConfig;
use scrobble_edge::context::Context;
use scrobble_edge::middleware::{LoggerMiddleware, MiddlewareHandler, from_middleware};
use scrobble_edge::security::RateLimitMiddleware;
use scrobble_edge::{Request, Response, Router, Server, StatusCode};

const CONFIG_ENV: &str = "SCROBBLE_EDGE_CONFIG";

fn load_config() -> Result<EdgeConfig, Box<dyn std::error::Error>> {
    let config = match std::env::var(CONFIG_ENV) {
        Ok(path) => EdgeConfig::from_file(path)?,
        Err(_) => EdgeConfig::default(),
    };
    Ok(config.apply_env_overrides()?)
}

fn missing(param: &str) -> Response {
    let body = json!({ "error": format!("missing query parameter: {param}") });
    Response::new(StatusCode::BAD_REQUEST)
        .header("Content-Type", "application/json")
        .body(body.to_string())
}

async fn user_tracks(ctx: Context) -> Response {
    let username = ctx.params().get("username").unwrap_or_default();
    let limit = ctx.request().query_param("limit").unwrap_or("50");
    Response::json(&json!({
        "user": username,
        "limit": limit,
        "tracks": [],
    }))
}

async fn track_info(ctx: Context) -> Response {
    let request = ctx.request();
    let (Some(artist), Some(track)) = (request.query_param("artist"), request.query_param("track")) else {
        return missing("artist and track");
    };
    Response::json(&json!({ "track": { "artist": artist, "name": track } }))
}

async fn mb_releases(ctx: Context) -> Response {
    let Some(query) = ctx.request().query_param("query") else {
        return missing("query");
    };
    Response::json(&json!({ "query": query, "releases": [] }))
}

async fn mb_release(ctx: Context) -> Response {
    let mbid = ctx.params().get("mbid").unwrap_or_default();
    Response::json(&json!({ "id": mbid, "media": [] }))
}

async fn cover_art(ctx: Context) -> Response {
    let mbid = ctx.params().get("mbid").unwrap_or_default();
    Response::json(&json!({
        "release": format!("https://musicbrainz.org/release/{mbid}"),
        "images": [],
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scrobble_edge=info,lastfm_proxy=info")),
        )
        .init();

    let config = load_config()?;

    let memory = Arc::new(MemoryBackend::with_capacity(config.cache.memory_capacity));
    let store = CacheStore::new(memory.clone());
    let limiter = Arc::new(config.rate_limit.build());
    let tasks = BackgroundTasks::new();

    let cached = |category: CacheCategory| -> Vec<MiddlewareHandler> {
        let cache = CacheMiddleware::new(store.clone(), category, Arc::new(tasks.clone()));
        vec![from_middleware(Arc::new(cache))]
    };

    let mut router = Router::new();
    router
        .layer(from_middleware(Arc::new(RateLimitMiddleware::new(Arc::clone(&limiter)))))
        .layer(from_middleware(Arc::new(LoggerMiddleware)));
    router
        .get_with("/api/lastfm/user-tracks/:username", cached(CacheCategory::UserTracks), user_tracks)
        .get_with("/api/lastfm/track-info", cached(CacheCategory::TrackInfo), track_info)
        .get_with("/api/lastfm/mb-releases", cached(CacheCategory::Musicbrainz), mb_releases)
        .get_with("/api/lastfm/mb-release/:mbid", cached(CacheCategory::Musicbrainz), mb_release)
        .get_with("/api/lastfm/cover-art/:mbid", cached(CacheCategory::CoverArt), cover_art);
    let router = Arc::new(router);

    let sweeper = {
        let limiter = Arc::clone(&limiter);
        let memory = Arc::clone(&memory);
        spawn_periodic("sweep", config.rate_limit.cleanup_interval(), move || {
            let windows = limiter.cleanup();
            let entries = memory.purge_expired();
            if windows > 0 || entries > 0 {
                info!(windows, entries, "expired state swept");
            }
        })
    };

    let server = Server::bind(&config.bind_addr).await?;
    info!(address = %server.local_addr(), routes = router.len(), "edge proxy ready");

    server
        .run_until(
            move |req: Request| {
                let router = Arc::clone(&router);
                async move { router.route(req).await }
            },
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
            },
        )
        .await?;

    sweeper.abort();
    let flushed = tasks.drain().await;
    info!(flushed, "pending cache writes flushed, exiting");
    Ok(())
}
