//! Incoming HTTP request type.

use std::net::SocketAddr;

use bytes::Bytes;
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

/// An incoming HTTP request with its body fully read.
///
/// Servers build one per request; tests can build them directly:
///
/// ```rust
/// use waypost::Request;
///
/// let req = Request::new(http::Method::POST, "/users?notify=1")
///     .with_header("content-type", "application/json")
///     .with_body(r#"{"name":"ada"}"#);
/// assert_eq!(req.header("Content-Type"), Some("application/json"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: http::Method,
    pub(crate) target: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl Request {
    /// `target` is the raw request target: path plus optional query.
    pub fn new(method: http::Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: None,
        }
    }

    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes, remote_addr: SocketAddr) -> Self {
        let target = parts
            .uri
            .path_and_query()
            .map_or_else(|| parts.uri.path().to_owned(), |pq| pq.as_str().to_owned());
        Self {
            method: parts.method,
            target,
            headers: parts.headers,
            body,
            remote_addr: Some(remote_addr),
        }
    }

    /// Appends a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn method(&self) -> &http::Method { &self.method }
    pub fn target(&self) -> &str { &self.target }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }

    /// Peer address of the connection, when the request came off a socket.
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
