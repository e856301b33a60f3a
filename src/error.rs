//! Error types.
//!
//! Three families, three lifetimes:
//!
//! - [`RouteError`]: raised while the route table is compiled. Fatal to
//!   startup; routing ambiguity is never resolved silently.
//! - [`Abort`]: per-request control flow raised by hooks and handlers.
//!   Either a ready-made response ([`Abort::ShortCircuit`]) or a
//!   [`HandlerFault`]. Always contained to one request.
//! - [`Error`]: infrastructure failures surfaced by [`Server::serve`](crate::Server::serve).

use std::fmt;

use http::StatusCode;

use crate::method::Method;
use crate::response::Response;

/// Route table compilation failure.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouteError {
    /// The exact `(method, pattern)` pair is already registered.
    #[error("Route {method} {pattern} already exists")]
    Duplicate { method: Method, pattern: String },

    /// A static segment would alias a parameter of the same name at the same
    /// tree position, e.g. `/user/:id/info` vs `/user/id/anyway`.
    #[error("Route {pattern} already exists with parameter :{parameter}")]
    ParameterConflict { pattern: String, parameter: String },

    /// The pattern itself is malformed (e.g. an unnamed `:` parameter).
    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    /// Routes cannot be added once the tree has been optimized.
    #[error("cannot add route {method} {pattern}: the route tree is already optimized")]
    AlreadyOptimized { method: Method, pattern: String },

    /// Hooks attach to the final node shapes, so the tree must be optimized first.
    #[error("cannot add hook for `{pattern}` before the route tree is optimized")]
    HooksBeforeOptimize { pattern: String },

    /// Re-optimizing would invalidate hooks that are already attached.
    #[error("cannot optimize the route tree after hooks have been attached")]
    OptimizeAfterHooks,
}

/// Infrastructure error returned by [`Server::serve`](crate::Server::serve).
///
/// Application-level errors (404, 422, etc.) are expressed as HTTP
/// [`Response`] values, not as `Error`s.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bind address `{addr}`: {source}")]
    Address {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("route table: {0}")]
    Route(#[from] RouteError),
}

// ── Per-request control flow ─────────────────────────────────────────────────

/// An unexpected failure inside a hook or handler.
///
/// Translated into a response carrying [`status`](HandlerFault::status)
/// (500 unless declared otherwise) and the message as body, and reported to
/// the application's error callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFault {
    status: Option<StatusCode>,
    message: String,
}

impl HandlerFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    /// Declares the status code this fault should be answered with.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// The declared status, or `500 Internal Server Error`.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn into_response(self) -> Response {
        Response::builder().status(self.status()).text(self.message)
    }
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status())
    }
}

/// Why a hook or handler stopped the pipeline.
///
/// Hooks and handlers return `Result<_, Abort>`; `?` works on any
/// `std::error::Error`, which becomes a 500 [`HandlerFault`].
///
/// `Abort` must not implement `std::error::Error`; the blanket `From` impl
/// below overlaps with it otherwise.
#[derive(Debug)]
pub enum Abort {
    /// Stop now and send this response. Not treated as a failure.
    ShortCircuit(Response),
    /// Stop now; report and translate the fault into a response.
    Fault(HandlerFault),
}

impl Abort {
    /// Shorthand for `Abort::ShortCircuit(response)`.
    pub fn respond(response: Response) -> Self {
        Self::ShortCircuit(response)
    }
}

impl From<HandlerFault> for Abort {
    fn from(fault: HandlerFault) -> Self {
        Self::Fault(fault)
    }
}

impl<E> From<E> for Abort
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::Fault(HandlerFault::new(err.to_string()))
    }
}
