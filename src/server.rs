//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or Ctrl-C the server:
//! 1. Immediately stops `listener.accept()`, so no new connections are made.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`], which lets `main` exit cleanly.
//!
//! [`Server::serve_with_shutdown`] takes any future as the signal instead.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::dispatch::{self, App, ContextCache};
use crate::error::Error;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;

enum Bind {
    Addr(String),
    Listener(TcpListener),
}

/// The HTTP server.
pub struct Server {
    bind: Bind,
    timeout: Option<Duration>,
    cache_capacity: Option<usize>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. The address is validated there.
    ///
    /// ```rust,no_run
    /// use std::time::Duration;
    /// use waypost::Server;
    ///
    /// let server = Server::bind("0.0.0.0:3000").timeout(Duration::from_secs(10));
    /// ```
    pub fn bind(addr: &str) -> Self {
        Self::with(Bind::Addr(addr.to_owned()))
    }

    /// Serves on an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self::with(Bind::Listener(listener))
    }

    fn with(bind: Bind) -> Self {
        Self { bind, timeout: None, cache_capacity: None }
    }

    /// Answers `408 Request timeout` when the pipeline takes longer than
    /// `limit`. Off by default.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Reuses resolved routes and response buffers for repeated
    /// `(method, target)` pairs on one connection, up to `capacity` entries
    /// per connection. Off by default.
    pub fn cache_contexts(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    ///
    /// # Errors
    ///
    /// [`Error::Route`] if `router` does not compile, [`Error::Address`] for
    /// a malformed bind address, [`Error::Io`] if binding fails.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        self.serve_with_shutdown(router, shutdown_signal()).await
    }

    /// Like [`serve`](Self::serve), but stops accepting once `shutdown`
    /// resolves.
    pub async fn serve_with_shutdown(
        self,
        router: Router,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let app = Arc::new(router.build()?);

        let listener = match self.bind {
            Bind::Listener(listener) => listener,
            Bind::Addr(addr) => {
                let parsed: SocketAddr = addr
                    .parse()
                    .map_err(|source| Error::Address { addr, source })?;
                TcpListener::bind(parsed).await?
            }
        };

        info!(addr = %listener.local_addr()?, routes = app.routes().len(), "waypost listening");

        let timeout = self.timeout;
        let cache_capacity = self.cache_capacity;
        let mut tasks = tokio::task::JoinSet::new();

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let cache = cache_capacity.map(|capacity| Arc::new(Mutex::new(ContextCache::new(capacity))));
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection.
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            let cache = cache.clone();
                            async move { handle(app, cache, timeout, req, remote_addr).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("waypost stopped");
        Ok(())
    }
}

// ── Request handling ─────────────────────────────────────────────────────────

/// Reads the body, dispatches, converts back to hyper. Never errors; every
/// failure becomes a response.
async fn handle(
    app: Arc<App>,
    cache: Option<Arc<Mutex<ContextCache>>>,
    timeout: Option<Duration>,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_http());
        }
    };
    let request = Request::from_parts(parts, body, remote_addr);

    let work = async {
        match &cache {
            Some(cache) => app.dispatch_cached(cache, request).await,
            None => app.dispatch(request).await,
        }
    };

    let response = match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(response) => response,
            Err(_) => {
                warn!(peer = %remote_addr, ?limit, "request timed out");
                dispatch::timeout_response()
            }
        },
        None => work.await,
    };

    Ok(response.into_http())
}

// ── Shutdown signal ──────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. A handler that fails to install
/// is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
