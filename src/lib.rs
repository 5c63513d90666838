//! # scrobble-edge
//!
//! Edge caching and rate limiting for music metadata APIs, built on a small
//! async HTTP/1.1 server.
//!
//! Requests flow through a [`Router`]: global layers (rate limiting, access
//! logging) run first, then per-route [`cache::CacheMiddleware`] instances
//! that serve cached `200` responses or record fresh ones in the background.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use scrobble_edge::background::BackgroundTasks;
//! use scrobble_edge::cache::{CacheCategory, CacheMiddleware, CacheStore, MemoryBackend};
//! use scrobble_edge::context::Context;
//! use scrobble_edge::middleware::from_middleware;
//! use scrobble_edge::{Response, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = CacheStore::new(Arc::new(MemoryBackend::new()));
//!     let tasks = BackgroundTasks::new();
//!     let cache = CacheMiddleware::new(store, CacheCategory::TrackInfo, Arc::new(tasks.clone()));
//!
//!     let mut router = Router::new();
//!     router.get_with("/track-info", vec![from_middleware(Arc::new(cache))], |_ctx: Context| async {
//!         Response::new(StatusCode::OK).body("{}")
//!     });
//!
//!     let router = Arc::new(router);
//!     let server = Server::bind("127.0.0.1:8787").await?;
//!     server
//!         .run(move |req| {
//!             let router = Arc::clone(&router);
//!             async move { router.route(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
