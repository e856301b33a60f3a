//! # waypost
//!
//! A minimal HTTP routing engine: a radix route tree, an ordered
//! before/after hook pipeline, and a hyper server to run them on.
//!
//! ## The pieces
//!
//! - [`RouteTree`]: static, `:param` and `*` segments. Single-child static
//!   chains are merged by [`optimize`](RouteTree::optimize); lookup is
//!   iterative and never recurses.
//! - Hooks: middleware attached straight onto endpoints by pattern
//!   ([`middleware::pattern_matches`]), so dispatch never scans a list.
//! - [`Context`]: one per request, shared by every hook and the handler;
//!   it carries params, query and the response being built.
//! - [`App`]: runs before-hooks, handler, after-hooks, with short-circuit
//!   ([`Abort::ShortCircuit`]) and fault ([`HandlerFault`]) handling.
//! - [`Server`]: hyper, HTTP/1.1 and HTTP/2, graceful shutdown.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use waypost::{Abort, Context, Response, Router, Server};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), waypost::Error> {
//!     let app = Router::new()
//!         .before("/admin/*", require_token)
//!         .get("/users/:id", get_user)
//!         .post("/users", create_user)
//!         .get("/admin/stats", |_ctx: Context| async { "42 users" });
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! async fn require_token(ctx: Context) -> Result<(), Abort> {
//!     match ctx.request().header("authorization") {
//!         Some(_) => Ok(()),
//!         None => Err(Abort::respond(Response::status(StatusCode::UNAUTHORIZED))),
//!     }
//! }
//!
//! async fn get_user(ctx: Context) -> Response {
//!     let id = ctx.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! async fn create_user(ctx: Context) {
//!     if ctx.request().body().is_empty() {
//!         ctx.response().set_status(StatusCode::BAD_REQUEST).text("empty body");
//!         return;
//!     }
//!     ctx.response()
//!         .set_status(StatusCode::CREATED)
//!         .set_header("location", "/users/99")
//!         .json(r#"{"id":"99"}"#);
//! }
//! ```

mod context;
mod dispatch;
mod error;
mod handler;
mod lookup;
mod method;
mod request;
mod response;
mod router;
mod server;
mod tree;

pub mod middleware;
pub mod path;

pub use context::{ClientAddressResolver, Context, Phase, ResponseState, forwarded_for};
pub use dispatch::{App, ContextCache, ErrorCallback, NotFoundCallback};
pub use error::{Abort, Error, HandlerFault, RouteError};
pub use handler::{Handler, IntoOutcome, Outcome};
pub use lookup::{Params, RouteMatch};
pub use method::Method;
pub use middleware::HookPhase;
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use tree::{CompiledRouteTree, Endpoint, NodeKind, RouteTree};
