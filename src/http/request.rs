//! Inbound request parsing on top of [`httparse`].

use std::net::SocketAddr;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use super::{Headers, Method};

/// Why a buffer could not (yet) be turned into a [`Request`].
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("malformed request: {0}")]
    Parse(#[from] httparse::Error),

    #[error("request line has no {field}")]
    MissingField { field: &'static str },
}

/// Upper bound on header fields accepted per request.
const MAX_HEADERS: usize = 64;

/// A parsed inbound request.
///
/// Query parameters are percent-decoded and kept in arrival order, including
/// repeated names, so the cache layer can fold `?tag=a&tag=b` into one
/// multi-valued parameter.
///
/// # Examples
///
/// ```
/// use scrobble_edge::http::request::Request;
///
/// let raw = b"GET /api/lastfm/track-info?artist=Queen&track=Bohemian+Rhapsody HTTP/1.1\r\nHost: edge.local\r\n\r\n";
/// let (request, _) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/api/lastfm/track-info");
/// assert_eq!(request.query_param("track"), Some("Bohemian Rhapsody"));
/// assert_eq!(request.origin(), "http://edge.local");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    params: Vec<(String, String)>,
    /// Minor version, `0` or `1`.
    version: u8,
    headers: Headers,
    body: Bytes,
    peer_addr: Option<SocketAddr>,
}

impl Request {
    /// Parses the request at the start of `buf`.
    ///
    /// On success also returns where the body starts in `buf`. The body holds at
    /// most `Content-Length` bytes of what is already buffered; callers wait for
    /// `offset + content_length` bytes before treating the request as complete.
    ///
    /// # Errors
    ///
    /// [`RequestError::Incomplete`] while the header block is still arriving, and
    /// [`RequestError::Parse`] or [`RequestError::MissingField`] when it can never
    /// become valid.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut slots);
        let httparse::Status::Complete(body_offset) = parsed.parse(buf)? else {
            return Err(RequestError::Incomplete);
        };

        let method = match parsed.method {
            Some(token) => match token.parse::<Method>() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };
        let target = parsed.path.ok_or(RequestError::MissingField { field: "path" })?;
        let version = parsed.version.ok_or(RequestError::MissingField { field: "version" })?;

        // Non-UTF-8 header values are dropped rather than failing the request.
        let mut headers = Headers::with_capacity(parsed.headers.len());
        for field in parsed.headers.iter() {
            if let Ok(value) = std::str::from_utf8(field.value) {
                headers.insert(field.name, value);
            }
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (target.to_owned(), None),
        };
        let params = query.as_deref().map(decode_query).unwrap_or_default();

        // Anything past the declared length belongs to the next pipelined request.
        let declared = declared_length(&headers).unwrap_or(0);
        let body_end = body_offset.saturating_add(declared).min(buf.len());
        let body = Bytes::copy_from_slice(&buf[body_offset..body_end]);

        let request = Self {
            method,
            path,
            query,
            params,
            version,
            headers,
            body,
            peer_addr: None,
        };
        Ok((request, body_offset))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path component, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The query string as received, without the leading `?`.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// First decoded value for `key`.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_pairs().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Every decoded `(key, value)` pair in arrival order.
    pub fn query_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// `scheme://host` the client addressed.
    ///
    /// The scheme honours `X-Forwarded-Proto` from a TLS-terminating front and
    /// defaults to `http`. The host comes from `Host` and defaults to `localhost`.
    pub fn origin(&self) -> String {
        let header = |name| {
            self.headers
                .get(name)
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };
        let scheme = header("x-forwarded-proto").unwrap_or("http");
        let host = header("host").unwrap_or("localhost");
        format!("{scheme}://{host}")
    }

    /// Socket address of the client, set by the server on dispatch.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn set_peer_addr(&mut self, addr: SocketAddr) {
        self.peer_addr = Some(addr);
    }

    /// Whether the client expects the connection to stay open.
    ///
    /// An explicit `Connection` header decides; otherwise HTTP/1.1 stays open
    /// and HTTP/1.0 closes.
    pub fn is_keep_alive(&self) -> bool {
        self.headers
            .get("connection")
            .map_or(self.version == 1, |value| value.trim().eq_ignore_ascii_case("keep-alive"))
    }

    pub fn content_length(&self) -> Option<usize> {
        declared_length(&self.headers)
    }
}

fn declared_length(headers: &Headers) -> Option<usize> {
    headers.get("content-length")?.trim().parse().ok()
}

/// Splits `a=1&b=2` into decoded pairs, keeping repeats and order.
///
/// `+` is a space, as in `application/x-www-form-urlencoded`. Empty segments are
/// skipped and a segment without `=` has an empty value.
fn decode_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
