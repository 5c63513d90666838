//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! serializing them to a byte buffer for transmission over TCP.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// The body is a reference-counted [`Bytes`] buffer, so [`Clone`] yields an
/// independent copy without duplicating the payload. The cache layer relies on
/// this: the copy handed to the store never shares header state with the
/// response delivered to the client.
///
/// # Examples
///
/// ```
/// use scrobble_edge::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
        }
    }

    /// Creates a `200 OK` response with a JSON body and matching `Content-Type`.
    pub fn json(body: &serde_json::Value) -> Self {
        Self::new(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(body.to_string())
    }

    /// Reassembles a response from its parts.
    pub fn from_parts(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            keep_alive: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Replaces any existing values of a header in-place.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response body.
    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    /// Splits the response into status, headers, and body.
    pub fn into_parts(self) -> (StatusCode, Headers, Bytes) {
        (self.status, self.headers, self.body)
    }

    /// Serializes the response in HTTP/1.1 wire format.
    ///
    /// Framing headers are always rewritten: `Connection` follows
    /// [`keep_alive`](Self::keep_alive) and `Content-Length` matches the body, even
    /// when a replayed cache entry carries values from its original exchange. A
    /// non-empty body without a `Content-Type` is labelled as UTF-8 text.
    pub fn into_bytes(mut self) -> BytesMut {
        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.insert("Content-Type", "text/plain; charset=utf-8");
        }
        self.headers
            .set("Connection", if self.keep_alive { "keep-alive" } else { "close" });
        self.headers.remove("content-length");
        self.headers.insert("Content-Length", self.body.len().to_string());

        let mut buf = BytesMut::with_capacity(64 + self.headers.len() * 48 + self.body.len());
        buf.put_slice(b"HTTP/1.1 ");
        buf.put_slice(self.status.as_u16().to_string().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.status.canonical_reason().unwrap_or_default().as_bytes());
        buf.put_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);
        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::OK).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn json_sets_content_type() {
        let r = Response::json(&serde_json::json!({ "track": "Hoppípolla" }));
        assert_eq!(r.headers().get("content-type"), Some("application/json"));
        assert_eq!(r.status(), StatusCode::OK);
    }

    #[test]
    fn clone_is_independent() {
        let original = Response::new(StatusCode::OK).body("payload");
        let mut copy = original.clone();
        copy.set_header("Cache-Control", "public, max-age=10");

        assert!(!original.headers().contains("cache-control"));
        assert_eq!(copy.body_ref(), original.body_ref());
    }

    #[test]
    fn stale_framing_headers_are_rewritten() {
        let r = Response::new(StatusCode::OK)
            .header("Content-Length", "999")
            .header("Connection", "close")
            .body("abc");
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Content-Length: 999"));
        assert!(s.contains("Content-Length: 3\r\n"));
        assert!(s.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn no_body_no_content_type() {
        let r = Response::new(StatusCode::NO_CONTENT);
        let s = to_string(r.into_bytes());
        assert!(!s.contains("Content-Type"));
        assert!(s.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn unnamed_status_keeps_empty_reason() {
        let status = StatusCode::from_u16(522).unwrap();
        let s = to_string(Response::new(status).into_bytes());
        assert!(s.starts_with("HTTP/1.1 522 \r\n"));
    }

    #[test]
    fn too_many_requests_status_line() {
        let r = Response::new(StatusCode::TOO_MANY_REQUESTS).keep_alive(false);
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 429 Too Many Requests\r\n"));
        assert!(s.contains("Connection: close\r\n"));
    }
}
