//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler function.
//! Supports HTTP/1.1 persistent connections (keep-alive) and stops accepting
//! when a shutdown future resolves.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The edge HTTP server.
///
/// Binds to a TCP address and dispatches incoming HTTP/1.1 requests to a
/// handler function.
///
/// # Examples
///
/// ```rust,no_run
/// use scrobble_edge::server::Server;
/// use scrobble_edge::http::{Request, Response, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = Server::bind("127.0.0.1:8787").await?;
///     server
///         .run_until(
///             |req: Request| async move {
///                 let origin = req.origin();
///                 Response::new(StatusCode::OK).body(origin)
///             },
///             async {
///                 let _ = tokio::signal::ctrl_c().await;
///             },
///         )
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler receives a [`Request`] and must return a [`Future`] that
    /// resolves to a [`Response`]. The handler is wrapped in an [`Arc`] and
    /// shared across all spawned Tokio tasks, so it must be `Send + Sync + 'static`.
    ///
    /// Runs until the process is terminated. See [`Server::run_until`] for a
    /// graceful variant.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the TCP listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        self.run_until(handler, std::future::pending::<()>()).await
    }

    /// Like [`Server::run`], but stops accepting new connections once `shutdown`
    /// resolves. Connections already accepted finish their current request on
    /// their own tasks.
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "scrobble-edge listening");

        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                _ = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown requested, no longer accepting");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let handler = Arc::clone(&handler);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, handler).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Outcome of waiting for the next request on a connection.
enum Frame {
    Request(Request),
    /// The peer closed the connection between requests.
    Closed,
    /// The buffered bytes can never become a valid request; answer and close.
    Rejected(Response),
}

/// One accepted TCP connection and its unread bytes.
struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    buf: BytesMut,
}

impl Connection {
    fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
        }
    }

    /// Returns the next complete request, reading only when the buffer does not
    /// already hold one. Pipelined requests are served from the buffer in order.
    async fn next_frame(&mut self) -> std::io::Result<Frame> {
        loop {
            if !self.buf.is_empty() {
                match Request::parse(&self.buf) {
                    Ok((mut request, body_offset)) => {
                        let frame_len = body_offset + request.content_length().unwrap_or(0);
                        if self.buf.len() >= frame_len {
                            self.buf.advance(frame_len);
                            request.set_peer_addr(self.peer_addr);
                            return Ok(Frame::Request(request));
                        }
                    }
                    Err(RequestError::Incomplete) => {}
                    Err(e) => {
                        warn!(peer = %self.peer_addr, error = %e, "bad request, sending 400");
                        return Ok(Frame::Rejected(
                            Response::new(StatusCode::BAD_REQUEST).body(format!("Bad Request: {e}")),
                        ));
                    }
                }
            }

            if self.buf.len() > MAX_REQUEST_SIZE {
                warn!(peer = %self.peer_addr, buffered = self.buf.len(), "request too large, sending 413");
                return Ok(Frame::Rejected(
                    Response::new(StatusCode::PAYLOAD_TOO_LARGE).body("Request entity too large"),
                ));
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Ok(Frame::Closed);
            }
        }
    }

    async fn send(&mut self, response: Response) -> std::io::Result<()> {
        self.stream.write_all(&response.into_bytes()).await?;
        self.stream.flush().await
    }
}

/// Serves requests on one connection until the peer closes it, a request asks
/// for `Connection: close`, or the input cannot be parsed.
async fn handle_connection<H, F>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
) -> std::io::Result<()>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut conn = Connection::new(stream, peer_addr);

    loop {
        let request = match conn.next_frame().await? {
            Frame::Request(request) => request,
            Frame::Closed => {
                debug!(peer = %peer_addr, "connection closed by peer");
                return Ok(());
            }
            Frame::Rejected(response) => return conn.send(response.keep_alive(false)).await,
        };

        let keep_alive = request.is_keep_alive();
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await.keep_alive(keep_alive);
        conn.send(response).await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "client asked to close");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn spawn_echo_path() -> (SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(server.run_until(
            |req: Request| async move {
                let peer = req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_default();
                Response::new(StatusCode::OK).body(format!("{} {}", req.path(), peer))
            },
            async move {
                let _ = stopped.await;
            },
        ));
        (addr, stop)
    }

    async fn read_all(stream: &mut TcpStream) -> String {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn pipelined_requests_are_answered_in_order() {
        let (addr, _stop) = spawn_echo_path().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /one HTTP/1.1\r\nHost: a\r\n\r\nGET /two HTTP/1.1\r\nHost: a\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let text = read_all(&mut stream).await;
        let one = text.find("/one 127.0.0.1").unwrap();
        let two = text.find("/two 127.0.0.1").unwrap();
        assert!(one < two);
        assert!(text.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn malformed_request_gets_400_and_close() {
        let (addr, _stop) = spawn_echo_path().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"NOT A REQUEST\r\n\r\n").await.unwrap();

        let text = read_all(&mut stream).await;
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(server.run_until(
            |_req: Request| async { Response::new(StatusCode::NO_CONTENT) },
            async move {
                let _ = stopped.await;
            },
        ));

        stop.send(()).unwrap();
        running.await.unwrap().unwrap();
    }
}
