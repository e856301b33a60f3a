//! Route and hook registration.
//!
//! [`Router`] only records what you register. [`Router::build`] replays it in
//! the one order the route tree accepts: every route, then `optimize`, then
//! every hook in registration order, then freeze. Callers never have to
//! think about tree stages.

use std::sync::Arc;

use tracing::debug;

use crate::context::{ClientAddressResolver, Context};
use crate::dispatch::{App, ErrorCallback, NotFoundCallback};
use crate::error::{HandlerFault, RouteError};
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::middleware::HookPhase;
use crate::request::Request;
use crate::tree::RouteTree;

struct PendingRoute {
    method: Method,
    pattern: String,
    handler: BoxedHandler,
}

struct PendingHook {
    phase: HookPhase,
    method: Method,
    pattern: String,
    hook: BoxedHandler,
}

/// The application builder.
///
/// Every call returns `self`, so registrations chain:
///
/// ```rust,no_run
/// use waypost::{Context, Router};
///
/// # async fn list(_: Context) {}
/// # async fn show(_: Context) {}
/// # async fn audit(_: Context) {}
/// let app = Router::new()
///     .get("/users", list)
///     .get("/users/:id", show)
///     .after("/users/*", audit)
///     .build()?;
/// # Ok::<(), waypost::RouteError>(())
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<PendingRoute>,
    hooks: Vec<PendingHook>,
    not_found: Option<NotFoundCallback>,
    on_error: Option<ErrorCallback>,
    client_address: Option<ClientAddressResolver>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` + `pattern`.
    ///
    /// Patterns are `/`-separated: plain text matches itself, `:name`
    /// captures one segment, `*` matches the rest of the path (or, in the
    /// middle of a pattern, one or more segments). Empty segments and a
    /// trailing `/` are ignored.
    pub fn on(mut self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        self.routes.push(PendingRoute {
            method,
            pattern: pattern.to_owned(),
            handler: handler.into_boxed_handler(),
        });
        self
    }

    pub fn get(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Get, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Post, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Put, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Delete, pattern, handler)
    }

    pub fn patch(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Patch, pattern, handler)
    }

    pub fn head(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Head, pattern, handler)
    }

    pub fn options(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::Options, pattern, handler)
    }

    /// Registers `handler` for every method.
    pub fn all(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::All, pattern, handler)
    }

    // ── Hooks ────────────────────────────────────────────────────────────────

    /// Registers a hook.
    ///
    /// `pattern` is matched against registered route patterns, not request
    /// paths: `*` alone covers every route, `/admin/*` every route under
    /// `/admin`. See [`pattern_matches`](crate::middleware::pattern_matches).
    ///
    /// Hooks on the same endpoint run in registration order, whether they
    /// were registered before or after the route itself.
    pub fn hook(mut self, phase: HookPhase, method: Method, pattern: &str, hook: impl Handler) -> Self {
        self.hooks.push(PendingHook {
            phase,
            method,
            pattern: pattern.to_owned(),
            hook: hook.into_boxed_handler(),
        });
        self
    }

    /// Runs `hook` before the handler of every matching route.
    pub fn before(self, pattern: &str, hook: impl Handler) -> Self {
        self.hook(HookPhase::Before, Method::All, pattern, hook)
    }

    /// Runs `hook` after the handler of every matching route.
    pub fn after(self, pattern: &str, hook: impl Handler) -> Self {
        self.hook(HookPhase::After, Method::All, pattern, hook)
    }

    /// Runs `hook` both before and after the handler.
    pub fn around(self, pattern: &str, hook: impl Handler) -> Self {
        self.hook(HookPhase::BeforeAndAfter, Method::All, pattern, hook)
    }

    // ── Callbacks ────────────────────────────────────────────────────────────

    /// Observes requests no route matched. The response is always an empty 404.
    pub fn on_not_found(mut self, callback: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.not_found = Some(Arc::new(callback));
        self
    }

    /// Observes every [`HandlerFault`] before it becomes a response.
    pub fn on_error(mut self, callback: impl Fn(&HandlerFault, &Context) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Overrides how [`Context::client_address`] is derived. The default is
    /// the connection's peer IP; [`forwarded_for`](crate::forwarded_for)
    /// reads proxy headers instead.
    pub fn client_address(
        mut self,
        resolver: impl Fn(&Request) -> Option<std::net::IpAddr> + Send + Sync + 'static,
    ) -> Self {
        self.client_address = Some(Arc::new(resolver));
        self
    }

    /// Compiles the registrations into an [`App`].
    ///
    /// # Errors
    ///
    /// The first [`RouteError`] hit while inserting routes, e.g. a duplicate
    /// route or a static segment clashing with a sibling parameter.
    pub fn build(self) -> Result<App, RouteError> {
        let mut tree = RouteTree::new();
        for route in self.routes {
            tree.add_route(route.method, &route.pattern, route.handler)?;
        }
        tree.optimize()?;

        let hooks = self.hooks.len();
        for hook in self.hooks {
            tree.add_hook(hook.phase, hook.method, &hook.pattern, hook.hook)?;
        }

        let tree = tree.freeze();
        debug!(routes = tree.endpoints().len(), hooks, "router compiled");
        Ok(App::new(tree, self.not_found, self.on_error, self.client_address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop(_: Context) {}

    #[test]
    fn duplicate_routes_fail_the_build() {
        let err = Router::new()
            .get("/users/:id", noop)
            .get("/users/:id/", noop)
            .build()
            .err();
        assert_eq!(
            err,
            Some(RouteError::Duplicate { method: Method::Get, pattern: "/users/:id".to_owned() })
        );
    }

    #[test]
    fn parameter_conflicts_fail_the_build() {
        let err = Router::new()
            .get("/users/:id", noop)
            .get("/users/id", noop)
            .build()
            .err();
        assert!(matches!(err, Some(RouteError::ParameterConflict { .. })));
    }

    #[test]
    fn hooks_may_be_registered_before_routes() {
        let app = Router::new()
            .before("*", noop)
            .get("/late", noop)
            .build()
            .unwrap();
        assert_eq!(app.routes(), [(Method::Get, "/late")]);
    }

    #[test]
    fn same_pattern_different_methods() {
        let app = Router::new()
            .get("/items", noop)
            .post("/items", noop)
            .delete("/items", noop)
            .build()
            .unwrap();
        assert_eq!(app.routes().len(), 3);
    }
}
