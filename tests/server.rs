use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use waypost::{Abort, Context, Response, Router, Server};

async fn start(router: Router, server: impl FnOnce(Server) -> Server) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();

    let server = server(Server::from_listener(listener));
    tokio::spawn(async move {
        server
            .serve_with_shutdown(router, async {
                let _ = stopped.await;
            })
            .await
            .unwrap();
    });
    (addr, stop)
}

async fn raw(addr: SocketAddr, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
}

fn app(seen: Arc<Mutex<Vec<String>>>) -> Router {
    let before = seen.clone();
    let after = seen.clone();
    Router::new()
        .before("/test/*", move |ctx: Context| {
            let seen = before.clone();
            async move { seen.lock().push(format!("before {}", ctx.path())) }
        })
        .after("/test/*", move |ctx: Context| {
            let seen = after.clone();
            async move { seen.lock().push(format!("after {}", ctx.path())) }
        })
        .before("/private/*", |_ctx: Context| async {
            Err::<(), _>(Abort::respond(
                Response::builder().status(StatusCode::UNAUTHORIZED).text("denied"),
            ))
        })
        .get("/test/a", |_ctx: Context| async { "a" })
        .get("/test/a/b", |_ctx: Context| async { "a/b" })
        .get("/other", |_ctx: Context| async { "other" })
        .get("/private/data", |_ctx: Context| async { "secret" })
        .get("/echo/:word", |ctx: Context| async move {
            format!("{} {}", ctx.param("word").unwrap_or(""), ctx.query("n").unwrap_or(""))
        })
        .post("/upload", |ctx: Context| async move {
            ctx.response()
                .set_status(StatusCode::CREATED)
                .text(format!("{} bytes", ctx.request().body().len()));
        })
        .get("/slow", |_ctx: Context| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "late"
        })
}

#[tokio::test]
async fn serves_routes_and_scopes_hooks() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (addr, stop) = start(app(seen.clone()), |s| s).await;

    let res = raw(addr, &get("/test/a")).await;
    assert!(res.starts_with("HTTP/1.1 200"), "{res}");
    assert!(res.ends_with("a"), "{res}");

    let res = raw(addr, &get("/test/a/b")).await;
    assert!(res.ends_with("a/b"), "{res}");

    let res = raw(addr, &get("/other")).await;
    assert!(res.ends_with("other"), "{res}");

    assert_eq!(
        *seen.lock(),
        ["before /test/a", "after /test/a", "before /test/a/b", "after /test/a/b"]
    );
    let _ = stop.send(());
}

#[tokio::test]
async fn params_query_and_bodies() {
    let (addr, stop) = start(app(Arc::default()), |s| s).await;

    let res = raw(addr, &get("/echo/hello?n=w%20orld")).await;
    assert!(res.ends_with("hello w orld"), "{res}");

    let res = raw(
        addr,
        "POST /upload HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\ncontent-length: 5\r\n\r\nhello",
    )
    .await;
    assert!(res.starts_with("HTTP/1.1 201"), "{res}");
    assert!(res.ends_with("5 bytes"), "{res}");
    let _ = stop.send(());
}

#[tokio::test]
async fn short_circuits_and_misses() {
    let (addr, stop) = start(app(Arc::default()), |s| s).await;

    let res = raw(addr, &get("/private/data")).await;
    assert!(res.starts_with("HTTP/1.1 401"), "{res}");
    assert!(res.ends_with("denied"), "{res}");

    let res = raw(addr, &get("/missing")).await;
    assert!(res.starts_with("HTTP/1.1 404"), "{res}");
    let _ = stop.send(());
}

#[tokio::test]
async fn slow_requests_time_out() {
    let (addr, stop) = start(app(Arc::default()), |s| {
        s.timeout(Duration::from_millis(50)).cache_contexts(16)
    })
    .await;

    let res = raw(addr, &get("/slow")).await;
    assert!(res.starts_with("HTTP/1.1 408"), "{res}");
    assert!(res.ends_with("Request timeout"), "{res}");

    let res = raw(addr, &get("/test/a")).await;
    assert!(res.starts_with("HTTP/1.1 200"), "{res}");
    let _ = stop.send(());
}

#[tokio::test]
async fn broken_routers_fail_to_start() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let router = Router::new()
        .get("/dup", |_ctx: Context| async {})
        .get("/dup", |_ctx: Context| async {});
    let err = Server::from_listener(listener)
        .serve_with_shutdown(router, std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, waypost::Error::Route(_)));

    let err = Server::bind("not an address")
        .serve_with_shutdown(Router::new(), std::future::pending())
        .await
        .unwrap_err();
    assert!(matches!(err, waypost::Error::Address { .. }));
}
