//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Build a [`Response`] in a handler and return it, or mutate the context's
//! [`ResponseState`](crate::ResponseState) and let the dispatcher assemble one.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use http::StatusCode;
use http_body_util::Full;
use tracing::warn;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream  (binary / file download)
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    fn as_static(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK)
///
/// ```rust
/// use waypost::Response;
/// use http::StatusCode;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status, status text or headers)
///
/// ```rust
/// use waypost::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .cookie("session=abc; HttpOnly")
///     .cookie("theme=dark")
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder()
///     .bytes(ContentType::Xml, b"<ok/>".to_vec());
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) status_text: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Response {
    /// `200 OK` with `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` with `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// `404 Not Found` with an empty body.
    pub fn not_found() -> Self {
        Self::status(StatusCode::NOT_FOUND)
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder {
            headers: HeaderMap::new(),
            status: StatusCode::OK,
            status_text: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Custom status text if one was set, otherwise the canonical reason
    /// phrase (`"OK"`, `"Not Found"`, ...).
    pub fn status_text(&self) -> &str {
        match &self.status_text {
            Some(text) => text,
            None => self.status.canonical_reason().unwrap_or(""),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Converts into the `http` representation the server hands to hyper.
    ///
    /// A custom status text travels as a [`hyper::ext::ReasonPhrase`]
    /// extension, which HTTP/1 connections write on the status line.
    pub fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body));
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;

        if let Some(text) = self.status_text {
            match hyper::ext::ReasonPhrase::try_from(text) {
                Ok(reason) => {
                    res.extensions_mut().insert(reason);
                }
                Err(_) => warn!(status = %self.status, "dropping invalid status text"),
            }
        }
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
    status_text: Option<String>,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    /// Appends a header. Repeated names are kept, not replaced.
    ///
    /// Invalid names or values are logged and skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        append_header(&mut self.headers, name, value);
        self
    }

    /// Appends a `Set-Cookie` header with an already-serialized cookie.
    pub fn cookie(mut self, cookie: &str) -> Self {
        match HeaderValue::from_str(cookie) {
            Ok(value) => {
                self.headers.append(SET_COOKIE, value);
            }
            Err(_) => warn!("dropping invalid set-cookie value"),
        }
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(ContentType::Json, body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text, Bytes::from(body.into()))
    }

    /// Terminate with a typed body. Use this for XML, HTML, binary, SSE, etc.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type, body.into())
    }

    /// Terminate with no body (e.g. `204 No Content`, `301 Moved Permanently`).
    pub fn no_body(self) -> Response {
        Response {
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            body: Bytes::new(),
        }
    }

    fn finish(mut self, content_type: ContentType, body: Bytes) -> Response {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_static()));
        Response {
            status: self.status,
            status_text: self.status_text,
            headers: self.headers,
            body,
        }
    }
}

pub(crate) fn append_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => {
            headers.append(name, value);
        }
        _ => warn!(header = name, "dropping invalid header"),
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
///
/// # Example: typed `Json<T>` wrapper with serde
///
/// ```rust,ignore
/// use waypost::{IntoResponse, Response};
/// use http::StatusCode;
/// use serde::Serialize;
///
/// struct Json<T: Serialize>(T);
///
/// impl<T: Serialize> IntoResponse for Json<T> {
///     fn into_response(self) -> Response {
///         match serde_json::to_vec(&self.0) {
///             Ok(bytes) => Response::json(bytes),
///             Err(_)    => Response::status(StatusCode::INTERNAL_SERVER_ERROR),
///         }
///     }
/// }
/// ```
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a [`StatusCode`] directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_defaults_to_canonical_reason() {
        assert_eq!(Response::text("hi").status_text(), "OK");
        assert_eq!(Response::not_found().status_text(), "Not Found");

        let custom = Response::builder().status_text("All Good").no_body();
        assert_eq!(custom.status_code(), StatusCode::OK);
        assert_eq!(custom.status_text(), "All Good");
    }

    #[test]
    fn cookies_are_multi_valued() {
        let res = Response::builder().cookie("a=1").cookie("b=2").no_body();
        let cookies: Vec<_> = res.headers().get_all(SET_COOKIE).iter().collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
    }

    #[test]
    fn invalid_headers_are_skipped() {
        let res = Response::builder()
            .header("bad header", "x")
            .header("x-ok", "yes")
            .no_body();
        assert_eq!(res.headers().len(), 1);
        assert_eq!(res.headers()["x-ok"], "yes");
    }

    #[test]
    fn typed_bodies_set_content_type() {
        let res = Response::json(b"{}".to_vec());
        assert_eq!(res.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(res.body().as_ref(), b"{}");
    }

    #[test]
    fn into_http_carries_status_and_headers() {
        let res = Response::builder()
            .status(StatusCode::CREATED)
            .status_text("Made It")
            .header("location", "/users/1")
            .text("done")
            .into_http();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.headers()["location"], "/users/1");
        assert!(res.extensions().get::<hyper::ext::ReasonPhrase>().is_some());
    }
}
