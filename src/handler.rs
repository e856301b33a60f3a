//! Handler trait and type erasure.
//!
//! # How async handlers and hooks are stored
//!
//! The route tree holds handlers and hooks of *different* concrete types in
//! one structure, so they are erased behind a common trait object:
//!
//! ```text
//! async fn show(ctx: Context) -> Response { … }     ← user writes this
//!        ↓ router.get("/users/:id", show)
//! show.into_boxed_handler()                          ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(show))                          ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(ctx)  at request time                 ← one vtable dispatch
//!        ↓
//! Box::pin(async { show(ctx).await.into_outcome() }) ← BoxFuture
//! ```
//!
//! Hooks use exactly the same shape as handlers. Both receive a cheap clone
//! of the request [`Context`]; mutations made through it are visible to every
//! later step of the pipeline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::StatusCode;

use crate::context::Context;
use crate::error::Abort;
use crate::response::{IntoResponse, Response};

// ── Outcome ──────────────────────────────────────────────────────────────────

/// What one hook or handler invocation produced.
///
/// `Ok(Some(_))` is a response value, `Ok(None)` means "ran for side effects
/// only", `Err(_)` stops the pipeline.
pub type Outcome = Result<Option<Response>, Abort>;

/// Conversion of a hook or handler return value into an [`Outcome`].
///
/// ```rust
/// use waypost::{Abort, Context, Response};
/// use http::StatusCode;
///
/// // side effects only
/// async fn audit(_ctx: Context) {}
///
/// // a response value
/// async fn hello(_ctx: Context) -> &'static str { "hello" }
///
/// // fallible: `?` converts any std error into a 500 fault
/// async fn guarded(ctx: Context) -> Result<(), Abort> {
///     if ctx.request().header("authorization").is_none() {
///         return Err(Abort::respond(Response::status(StatusCode::UNAUTHORIZED)));
///     }
///     Ok(())
/// }
/// ```
pub trait IntoOutcome {
    fn into_outcome(self) -> Outcome;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Outcome { Ok(None) }
}

impl IntoOutcome for Response {
    fn into_outcome(self) -> Outcome { Ok(Some(self)) }
}

impl IntoOutcome for Option<Response> {
    fn into_outcome(self) -> Outcome { Ok(self) }
}

impl IntoOutcome for &'static str {
    fn into_outcome(self) -> Outcome { Ok(Some(self.into_response())) }
}

impl IntoOutcome for String {
    fn into_outcome(self) -> Outcome { Ok(Some(self.into_response())) }
}

impl IntoOutcome for StatusCode {
    fn into_outcome(self) -> Outcome { Ok(Some(self.into_response())) }
}

impl<T, E> IntoOutcome for Result<T, E>
where
    T: IntoOutcome,
    E: Into<Abort>,
{
    fn into_outcome(self) -> Outcome {
        match self {
            Ok(value) => value.into_outcome(),
            Err(abort) => Err(abort.into()),
        }
    }
}

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future resolving to an [`Outcome`].
///
/// `Send + 'static` let tokio move the future across threads.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Outcome> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture;
}

/// A type-erased handler or hook shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler and hook.
///
/// You never implement this yourself. It is automatically satisfied for any
/// function with the signature:
///
/// ```text
/// async fn name(ctx: Context) -> impl IntoOutcome
/// ```
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype bridging a concrete `F` to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture {
        let fut = (self.0)(ctx);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerFault;

    #[test]
    fn unit_is_side_effect_only() {
        assert!(matches!(().into_outcome(), Ok(None)));
    }

    #[test]
    fn results_flatten() {
        let ok: Result<&'static str, Abort> = Ok("hi");
        let res = ok.into_outcome().unwrap().unwrap();
        assert_eq!(res.body().as_ref(), b"hi");

        let err: Result<(), HandlerFault> = Err(HandlerFault::new("nope"));
        assert!(matches!(err.into_outcome(), Err(Abort::Fault(_))));

        let io: Result<(), std::io::Error> = Err(std::io::Error::other("io"));
        assert!(matches!(io.into_outcome(), Err(Abort::Fault(_))));
    }
}
