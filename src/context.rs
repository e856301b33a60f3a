//! Per-request context.
//!
//! One [`Context`] is created for every matched request and handed, as a
//! cheap `Arc` clone, to each hook and to the handler in turn. The request
//! side is immutable; the response side ([`ResponseState`]) sits behind a
//! mutex so every step of the pipeline sees the mutations of the steps before
//! it.
//!
//! Never hold the guard returned by [`Context::response`] across an `.await`.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::Bytes;
use http::StatusCode;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use crate::method::Method;
use crate::request::Request;
use crate::response::{Response, append_header};

/// Resolves the client address of a request, e.g. from proxy headers.
pub type ClientAddressResolver = Arc<dyn Fn(&Request) -> Option<IpAddr> + Send + Sync>;

/// Where a request is in its lifecycle. Only ever moves forward.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum Phase {
    BeforeHandler = 0,
    Handler = 1,
    AfterHandler = 2,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::BeforeHandler,
            1 => Self::Handler,
            _ => Self::AfterHandler,
        }
    }
}

// ── ResponseState ────────────────────────────────────────────────────────────

/// The response being accumulated for one request.
///
/// Nothing counts as a response until [`send`](ResponseState::send) (or one
/// of its typed variants) is called, or the handler returns one. Status and
/// headers set beforehand are kept and go out with whatever is sent.
#[derive(Debug)]
pub struct ResponseState {
    status: StatusCode,
    status_text: Option<String>,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            status_text: None,
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

impl ResponseState {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status; any custom status text is cleared.
    pub fn set_status(&mut self, status: StatusCode) -> &mut Self {
        self.status = status;
        self.status_text = None;
        self
    }

    /// Custom status text if set, otherwise the canonical reason phrase.
    pub fn status_text(&self) -> &str {
        match &self.status_text {
            Some(text) => text,
            None => self.status.canonical_reason().unwrap_or(""),
        }
    }

    pub fn set_status_text(&mut self, text: impl Into<String>) -> &mut Self {
        self.status_text = Some(text.into());
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Sets a header, replacing earlier values. Invalid input is logged and skipped.
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = name, "dropping invalid header"),
        }
        self
    }

    /// Adds a header value, keeping earlier ones.
    pub fn append_header(&mut self, name: &str, value: &str) -> &mut Self {
        append_header(&mut self.headers, name, value);
        self
    }

    /// Adds a `Set-Cookie` header with an already-serialized cookie.
    pub fn set_cookie(&mut self, cookie: &str) -> &mut Self {
        match HeaderValue::try_from(cookie) {
            Ok(value) => {
                self.headers.append(SET_COOKIE, value);
            }
            Err(_) => warn!("dropping invalid set-cookie value"),
        }
        self
    }

    /// Produces the response body. Calling it again replaces the body.
    pub fn send(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    /// [`send`](Self::send) with `text/plain; charset=utf-8`.
    pub fn text(&mut self, body: impl Into<String>) -> &mut Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        self.send(body.into())
    }

    /// [`send`](Self::send) with `application/json`.
    pub fn json(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.send(body)
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Whether a response has been produced.
    pub fn is_sent(&self) -> bool {
        self.body.is_some()
    }

    /// Back to a fresh `200 OK` with no headers and nothing sent.
    ///
    /// Keeps the header map's allocation.
    pub fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.status_text = None;
        self.headers.clear();
        self.body = None;
    }

    /// Takes over a response returned by a handler. Headers already set here
    /// stay; the response's own headers are appended.
    pub(crate) fn adopt(&mut self, response: Response) {
        self.status = response.status;
        self.status_text = response.status_text;
        for (name, value) in &response.headers {
            self.headers.append(name.clone(), value.clone());
        }
        self.body = Some(response.body);
    }

    /// The produced response, if any. Leaves the state empty but not reset.
    pub(crate) fn take_response(&mut self) -> Option<Response> {
        let body = self.body.take()?;
        Some(Response {
            status: self.status,
            status_text: self.status_text.take(),
            headers: std::mem::take(&mut self.headers),
            body,
        })
    }
}

// ── Context ──────────────────────────────────────────────────────────────────

/// Everything a hook or handler can see about the current request.
///
/// ```rust,no_run
/// use waypost::Context;
///
/// async fn show_user(ctx: Context) {
///     let id = ctx.param("id").unwrap_or("unknown").to_owned();
///     let verbose = ctx.query("verbose").is_some();
///     ctx.response()
///         .set_header("x-user", &id)
///         .json(format!(r#"{{"id":"{id}","verbose":{verbose}}}"#));
/// }
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    request: Request,
    method: Method,
    path: String,
    params: Arc<HashMap<String, String>>,
    query: Arc<HashMap<String, String>>,
    phase: AtomicU8,
    response: Mutex<ResponseState>,
    client_address: Option<ClientAddressResolver>,
}

impl Context {
    pub(crate) fn new(
        request: Request,
        method: Method,
        path: String,
        params: Arc<HashMap<String, String>>,
        query: Arc<HashMap<String, String>>,
        state: ResponseState,
        client_address: Option<ClientAddressResolver>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                request,
                method,
                path,
                params,
                query,
                phase: AtomicU8::new(Phase::BeforeHandler as u8),
                response: Mutex::new(state),
                client_address,
            }),
        }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn method(&self) -> Method {
        self.inner.method
    }

    /// Request pathname, without the query string.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Value bound to a `:name` segment of the matched route.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.inner.params
    }

    /// Decoded query-string value.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.inner.query.get(key).map(String::as_str)
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.inner.query
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.inner.phase.load(Ordering::Acquire))
    }

    /// Locks the response state.
    pub fn response(&self) -> MutexGuard<'_, ResponseState> {
        self.inner.response.lock()
    }

    /// Client address, via the configured resolver or the connection's peer.
    pub fn client_address(&self) -> Option<IpAddr> {
        match &self.inner.client_address {
            Some(resolve) => resolve(&self.inner.request),
            None => self.inner.request.remote_addr().map(|addr| addr.ip()),
        }
    }

    pub(crate) fn enter(&self, phase: Phase) {
        let previous = self.inner.phase.swap(phase as u8, Ordering::AcqRel);
        debug_assert!(previous <= phase as u8, "phase moved backwards");
    }

    pub(crate) fn take_state(&self) -> ResponseState {
        std::mem::take(&mut *self.inner.response.lock())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.inner.method)
            .field("path", &self.inner.path)
            .field("params", &self.inner.params)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Resolver for deployments behind a reverse proxy: the first
/// `X-Forwarded-For` entry, else the connection's peer address.
///
/// ```rust,no_run
/// use waypost::{Router, forwarded_for};
///
/// let app = Router::new().client_address(forwarded_for);
/// ```
pub fn forwarded_for(req: &Request) -> Option<IpAddr> {
    req.header("x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| req.remote_addr().map(|addr| addr.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(request: Request) -> Context {
        Context::new(
            request,
            Method::Get,
            "/x".to_owned(),
            Arc::default(),
            Arc::default(),
            ResponseState::default(),
            None,
        )
    }

    #[test]
    fn response_state_defaults() {
        let state = ResponseState::default();
        assert_eq!(state.status(), StatusCode::OK);
        assert_eq!(state.status_text(), "OK");
        assert!(!state.is_sent());
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = ResponseState::default();
        state
            .set_status(StatusCode::CREATED)
            .set_status_text("Brand New")
            .set_cookie("a=1")
            .send("body");
        state.reset();
        assert_eq!(state.status(), StatusCode::OK);
        assert_eq!(state.status_text(), "OK");
        assert!(state.headers().is_empty());
        assert!(state.body().is_none());
    }

    #[test]
    fn adopt_keeps_earlier_headers() {
        let mut state = ResponseState::default();
        state.set_cookie("session=1");
        state.adopt(Response::builder().status(StatusCode::ACCEPTED).cookie("theme=dark").text("ok"));

        let response = state.take_response().unwrap();
        assert_eq!(response.status_code(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 2);
        assert_eq!(response.body().as_ref(), b"ok");
    }

    #[test]
    fn nothing_sent_means_no_response() {
        let mut state = ResponseState::default();
        state.set_status(StatusCode::NO_CONTENT);
        assert!(state.take_response().is_none());
    }

    #[test]
    fn phase_only_moves_forward() {
        let ctx = context(Request::new(http::Method::GET, "/x"));
        assert_eq!(ctx.phase(), Phase::BeforeHandler);
        ctx.enter(Phase::Handler);
        ctx.enter(Phase::AfterHandler);
        assert_eq!(ctx.phase(), Phase::AfterHandler);
        assert!(Phase::BeforeHandler < Phase::Handler);
    }

    #[test]
    fn clones_share_response_state() {
        let ctx = context(Request::new(http::Method::GET, "/x"));
        let other = ctx.clone();
        other.response().set_status(StatusCode::ACCEPTED);
        assert_eq!(ctx.response().status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn client_address_defaults_to_peer() {
        let peer = "10.0.0.7:5000".parse().unwrap();
        let ctx = context(Request::new(http::Method::GET, "/x").with_remote_addr(peer));
        assert_eq!(ctx.client_address(), Some(peer.ip()));
    }

    #[test]
    fn forwarded_for_prefers_proxy_header() {
        let peer = "10.0.0.7:5000".parse().unwrap();
        let req = Request::new(http::Method::GET, "/x")
            .with_remote_addr(peer)
            .with_header("x-forwarded-for", "203.0.113.9, 10.0.0.1");
        assert_eq!(forwarded_for(&req), Some("203.0.113.9".parse().unwrap()));

        let bare = Request::new(http::Method::GET, "/x").with_remote_addr(peer);
        assert_eq!(forwarded_for(&bare), Some(peer.ip()));
    }
}
