//! Minimal waypost example: JSON endpoints behind a couple of hooks.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42?fields=name
//!   curl -i -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl -i http://localhost:3000/admin/stats
//!   curl -i -H 'authorization: Bearer t' http://localhost:3000/admin/stats
//!   curl -i http://localhost:3000/static/css/site.css

use std::time::Duration;

use http::StatusCode;
use tracing::info;
use waypost::{Abort, Context, HandlerFault, Response, Router, Server, forwarded_for};

#[tokio::main]
async fn main() -> Result<(), waypost::Error> {
    tracing_subscriber::fmt::init();

    let app = Router::new()
        .around("*", access_log)
        .before("/admin/*", require_token)
        .get("/users/:id", get_user)
        .post("/users", create_user)
        .delete("/users/:id", delete_user)
        .get("/admin/stats", |_ctx: Context| async { Response::json(r#"{"users":42}"#) })
        .get("/static/*", |ctx: Context| async move { format!("would serve {}", ctx.path()) })
        .on_error(|fault, ctx| info!(path = ctx.path(), "fault: {fault}"))
        .client_address(forwarded_for);

    Server::bind("0.0.0.0:3000")
        .timeout(Duration::from_secs(10))
        .cache_contexts(64)
        .serve(app)
        .await
}

// Runs before and after every handler; the second call sees the final status.
async fn access_log(ctx: Context) {
    let status = ctx.response().status();
    info!(phase = ?ctx.phase(), path = ctx.path(), client = ?ctx.client_address(), %status, "request");
}

async fn require_token(ctx: Context) -> Result<(), Abort> {
    if ctx.request().header("authorization").is_none() {
        let denied = Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header("www-authenticate", "Bearer")
            .text("missing token");
        return Err(Abort::respond(denied));
    }
    Ok(())
}

// GET /users/:id
async fn get_user(ctx: Context) -> Result<Response, Abort> {
    let id: u64 = ctx
        .param("id")
        .unwrap_or_default()
        .parse()
        .map_err(|_| HandlerFault::new("id must be numeric").with_status(StatusCode::BAD_REQUEST))?;
    let fields = ctx.query("fields").unwrap_or("all");
    Ok(Response::json(format!(r#"{{"id":{id},"fields":"{fields}"}}"#)))
}

// POST /users
async fn create_user(ctx: Context) {
    if ctx.request().body().is_empty() {
        ctx.response().set_status(StatusCode::BAD_REQUEST).text("empty body");
        return;
    }
    ctx.response()
        .set_status(StatusCode::CREATED)
        .set_header("location", "/users/99")
        .json(r#"{"id":99}"#);
}

// DELETE /users/:id → 204 No Content
async fn delete_user(_ctx: Context) -> StatusCode {
    StatusCode::NO_CONTENT
}
