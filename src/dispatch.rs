//! Request dispatch.
//!
//! For one request:
//!
//! ```text
//! find_route ──miss──▶ 404 (+ not-found callback)
//!     │
//!     ▼
//! BeforeHandler: before-hooks, one at a time ──Abort──▶ response
//!     ▼
//! Handler: the route handler ──────────────────Abort──▶ response
//!     ▼
//! AfterHandler: after-hooks, one at a time ────Abort──▶ response
//!     ▼
//! last after-hook response │ context response │ 404
//! ```
//!
//! Every hook and handler is awaited to completion before the next one
//! starts. Faults are contained to the request: reported to the error
//! callback, answered with their status (500 by default) and message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::context::{ClientAddressResolver, Context, Phase, ResponseState};
use crate::error::{Abort, HandlerFault};
use crate::handler::BoxedHandler;
use crate::method::Method;
use crate::path;
use crate::request::Request;
use crate::response::Response;
use crate::tree::{CompiledRouteTree, Endpoint};

/// Called with every request that matched no route.
pub type NotFoundCallback = Arc<dyn Fn(&Request) + Send + Sync>;

/// Called with every [`HandlerFault`] before it is turned into a response.
pub type ErrorCallback = Arc<dyn Fn(&HandlerFault, &Context) + Send + Sync>;

/// A compiled application: the read-only route tree plus callbacks.
///
/// Built by [`Router::build`](crate::Router::build). Share it behind an
/// `Arc`; dispatching only needs `&self`.
pub struct App {
    tree: CompiledRouteTree<BoxedHandler>,
    not_found: Option<NotFoundCallback>,
    on_error: Option<ErrorCallback>,
    client_address: Option<ClientAddressResolver>,
}

/// Everything lookup produced for one `(method, target)`.
#[derive(Clone)]
struct Resolved {
    endpoint: Arc<Endpoint<BoxedHandler>>,
    method: Method,
    path: String,
    params: Arc<HashMap<String, String>>,
    query: Arc<HashMap<String, String>>,
}

impl App {
    pub(crate) fn new(
        tree: CompiledRouteTree<BoxedHandler>,
        not_found: Option<NotFoundCallback>,
        on_error: Option<ErrorCallback>,
        client_address: Option<ClientAddressResolver>,
    ) -> Self {
        Self { tree, not_found, on_error, client_address }
    }

    /// Registered `(method, pattern)` pairs.
    pub fn routes(&self) -> Vec<(Method, &str)> {
        self.tree
            .endpoints()
            .into_iter()
            .map(|e| (e.method(), e.pattern()))
            .collect()
    }

    /// Routes `request` and runs its hook pipeline.
    pub async fn dispatch(&self, request: Request) -> Response {
        match self.resolve(&request) {
            Some(route) => self.run(&route, request, ResponseState::default()).await.0,
            None => self.not_found(&request),
        }
    }

    /// [`dispatch`](Self::dispatch) raced against `limit`.
    ///
    /// On expiry the pipeline future is dropped (its eventual result is never
    /// sent) and `408 Request Timeout` is returned instead.
    pub async fn dispatch_with_timeout(&self, request: Request, limit: Duration) -> Response {
        match tokio::time::timeout(limit, self.dispatch(request)).await {
            Ok(response) => response,
            Err(_) => {
                warn!(?limit, "request timed out");
                timeout_response()
            }
        }
    }

    /// [`dispatch`](Self::dispatch) through a per-connection [`ContextCache`].
    ///
    /// A hit skips lookup and query parsing and reuses the slot's response
    /// buffer, which is reset first.
    pub async fn dispatch_cached(&self, cache: &Mutex<ContextCache>, request: Request) -> Response {
        let hit = Method::from_http(request.method())
            .and_then(|method| cache.lock().checkout(method, request.target()));

        let mut slot = match hit {
            Some(slot) => slot,
            None => match self.resolve(&request) {
                Some(route) => Slot {
                    target: request.target().to_owned(),
                    route,
                    state: ResponseState::default(),
                },
                None => return self.not_found(&request),
            },
        };

        slot.state.reset();
        let state = std::mem::take(&mut slot.state);
        let (response, state) = self.run(&slot.route, request, state).await;
        slot.state = state;
        cache.lock().checkin(slot);
        response
    }

    fn resolve(&self, request: &Request) -> Option<Resolved> {
        let method = Method::from_http(request.method())?;
        let (pathname, query) = path::split_target(request.target());
        let found = self.tree.find_route(method, pathname)?;

        Some(Resolved {
            endpoint: Arc::clone(found.endpoint()),
            method,
            path: pathname.to_owned(),
            params: Arc::new(found.params().to_map()),
            query: Arc::new(query.map(path::parse_query).unwrap_or_default()),
        })
    }

    fn not_found(&self, request: &Request) -> Response {
        debug!(method = %request.method(), target = request.target(), "no route");
        if let Some(callback) = &self.not_found {
            callback(request);
        }
        Response::not_found()
    }

    async fn run(&self, route: &Resolved, request: Request, state: ResponseState) -> (Response, ResponseState) {
        let ctx = Context::new(
            request,
            route.method,
            route.path.clone(),
            Arc::clone(&route.params),
            Arc::clone(&route.query),
            state,
            self.client_address.clone(),
        );
        let response = self.pipeline(&route.endpoint, &ctx).await;
        (response, ctx.take_state())
    }

    async fn pipeline(&self, endpoint: &Endpoint<BoxedHandler>, ctx: &Context) -> Response {
        ctx.enter(Phase::BeforeHandler);
        for hook in &endpoint.before_hooks {
            if let Err(abort) = hook.call(ctx.clone()).await {
                return self.aborted(abort, ctx);
            }
        }

        ctx.enter(Phase::Handler);
        match endpoint.handler.call(ctx.clone()).await {
            Ok(Some(response)) => {
                let mut state = ctx.response();
                if !state.is_sent() {
                    state.adopt(response);
                }
            }
            Ok(None) => {}
            Err(abort) => return self.aborted(abort, ctx),
        }

        ctx.enter(Phase::AfterHandler);
        let mut overridden = None;
        for hook in &endpoint.after_hooks {
            match hook.call(ctx.clone()).await {
                Ok(Some(response)) => overridden = Some(response),
                Ok(None) => {}
                Err(abort) => return self.aborted(abort, ctx),
            }
        }

        overridden
            .or_else(|| ctx.response().take_response())
            .unwrap_or_else(Response::not_found)
    }

    fn aborted(&self, abort: Abort, ctx: &Context) -> Response {
        match abort {
            Abort::ShortCircuit(response) => response,
            Abort::Fault(fault) => {
                warn!(
                    method = %ctx.method(),
                    path = ctx.path(),
                    phase = ?ctx.phase(),
                    status = %fault.status(),
                    "handler fault: {}", fault.message()
                );
                if let Some(callback) = &self.on_error {
                    callback(&fault, ctx);
                }
                fault.into_response()
            }
        }
    }
}

pub(crate) fn timeout_response() -> Response {
    Response::builder()
        .status(StatusCode::REQUEST_TIMEOUT)
        .text("Request timeout")
}

// ── ContextCache ─────────────────────────────────────────────────────────────

/// Opt-in per-connection cache of resolved routes and response buffers,
/// keyed by `(method, target)`.
///
/// A slot is checked out for the whole request and checked back in after it,
/// so concurrent requests on one connection never share one. Its response
/// state is always reset before reuse. At capacity, new keys are simply not
/// cached.
pub struct ContextCache {
    slots: HashMap<String, Vec<Slot>>,
    len: usize,
    capacity: usize,
}

struct Slot {
    target: String,
    route: Resolved,
    state: ResponseState,
}

impl ContextCache {
    pub fn new(capacity: usize) -> Self {
        Self { slots: HashMap::new(), len: 0, capacity }
    }

    /// Number of idle slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn checkout(&mut self, method: Method, target: &str) -> Option<Slot> {
        let slots = self.slots.get_mut(target)?;
        let index = slots.iter().position(|slot| slot.route.method == method)?;
        let slot = slots.swap_remove(index);
        if slots.is_empty() {
            self.slots.remove(target);
        }
        self.len -= 1;
        Some(slot)
    }

    fn checkin(&mut self, slot: Slot) {
        if self.len >= self.capacity {
            return;
        }
        self.len += 1;
        self.slots.entry(slot.target.clone()).or_default().push(slot);
    }
}
