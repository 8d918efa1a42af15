//! The HTTP server: accept admission, one task per connection, graceful shutdown.
//!
//! The server keeps a fixed number of `accept()` calls pending on the
//! listener; each completed accept is replaced right away. This bounds how
//! many sockets are taken off the backlog at once, not how many connections
//! are alive.
//!
//! On shutdown the server stops accepting, cancels connections waiting for
//! their next request and waits for the ones still serving a request.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ferrule_http::connection::{HttpConnection, ResponseWriter};
use ferrule_http::handler::Handler;
use ferrule_http::handoff::HandOff;
use ferrule_http::protocol::HttpError;
use ferrule_http::protocol::body::ReqBody;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::error::{ServerError, WebError};
use crate::request::Request;
use crate::router::{Router, RouterBuilder};
use crate::settings::Settings;

pub struct ServerBuilder {
    router: Option<RouterBuilder>,
    settings: Settings,
    address: Option<String>,
    hand_off: Option<Arc<dyn HandOff>>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("router", &self.router)
            .field("settings", &self.settings)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl ServerBuilder {
    fn new() -> Self {
        Self { router: None, settings: Settings::new(), address: None, hand_off: None }
    }

    pub fn router(mut self, router: RouterBuilder) -> Self {
        self.router = Some(router);
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Overrides the `bind address` setting.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Receives WebSocket upgrades and event streams.
    pub fn hand_off<H: HandOff + 'static>(mut self, hand_off: H) -> Self {
        self.hand_off = Some(Arc::new(hand_off));
        self
    }

    /// Validates the settings and builds the router tree.
    pub fn build(self) -> Result<Server, ServerError> {
        let router = self.router.ok_or(ServerError::MissingRouter)?;
        let router = router.build_with(self.settings.router_options()?)?;

        Ok(Server {
            router,
            trust_proxy: self.settings.trust_proxy()?,
            keep_alive_timeout: self.settings.keep_alive_timeout()?,
            admission_limit: self.settings.admission_limit()?,
            address: self.address.unwrap_or_else(|| self.settings.bind_address().to_string()),
            hand_off: self.hand_off,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnectionConfig {
    keep_alive_timeout: Duration,
}

pub struct Server {
    router: Router,
    trust_proxy: bool,
    keep_alive_timeout: Duration,
    admission_limit: usize,
    address: String,
    hand_off: Option<Arc<dyn HandOff>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("trust_proxy", &self.trust_proxy)
            .field("keep_alive_timeout", &self.keep_alive_timeout)
            .field("admission_limit", &self.admission_limit)
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Installs a console subscriber unless one is set, then serves until Ctrl-C.
    pub async fn start(self) -> Result<(), ServerError> {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            debug!("global tracing subscriber already set");
        }

        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(cause = %e, "can't listen for ctrl-c, serving until the process ends");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Binds the configured address and serves until `signal` completes.
    pub async fn run_until<F>(self, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = match TcpListener::bind(&self.address).await {
            Ok(listener) => listener,
            Err(source) => return Err(ServerError::Bind { address: self.address, source }),
        };
        self.serve(listener, signal).await
    }

    /// Serves connections from `listener` until `signal` completes.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let local_addr = listener.local_addr().ok();
        info!(address = ?local_addr, admission_limit = self.admission_limit, "start listening");

        let listener = Arc::new(listener);
        let config = ConnectionConfig { keep_alive_timeout: self.keep_alive_timeout };
        let hand_off = self.hand_off.clone();
        let admission_limit = self.admission_limit;
        let server = Arc::new(self);

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let mut pending = (0..admission_limit).map(|_| accept(Arc::clone(&listener))).collect::<FuturesUnordered<_>>();

        tokio::pin!(signal);
        loop {
            select! {
                () = &mut signal => break,
                Some(accepted) = pending.next() => {
                    pending.push(accept(Arc::clone(&listener)));

                    let (tcp_stream, remote_addr) = match accepted {
                        Ok(stream_and_addr) => stream_and_addr,
                        Err(e) => {
                            warn!(cause = %e, "failed to accept");
                            continue;
                        }
                    };

                    let server = Arc::clone(&server);
                    let shutdown = shutdown.clone();
                    let hand_off = hand_off.clone();
                    tracker.spawn(serve_connection(tcp_stream, remote_addr, server, config, shutdown, hand_off));
                }
            }
        }

        drop(pending);
        info!(connections = tracker.len(), "stop accepting, waiting for connections to finish");
        shutdown.cancel();
        tracker.close();
        tracker.wait().await;
        info!("server stopped");
        Ok(())
    }
}

async fn accept(listener: Arc<TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    listener.accept().await
}

async fn serve_connection(
    tcp_stream: TcpStream,
    remote_addr: SocketAddr,
    server: Arc<Server>,
    config: ConnectionConfig,
    shutdown: CancellationToken,
    hand_off: Option<Arc<dyn HandOff>>,
) {
    if let Err(e) = tcp_stream.set_nodelay(true) {
        debug!(cause = %e, "can't set TCP_NODELAY");
    }

    let (reader, writer) = tcp_stream.into_split();
    let mut connection = HttpConnection::new(reader, writer)
        .with_remote_addr(remote_addr)
        .with_keep_alive_timeout(config.keep_alive_timeout)
        .with_shutdown(shutdown);
    if let Some(hand_off) = hand_off {
        connection = connection.with_hand_off(hand_off);
    }

    match connection.process(server).await {
        Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
        Err(HttpError::ReadTimeout { seconds }) => debug!(%remote_addr, seconds, "idle connection timed out"),
        Err(e) => warn!(%remote_addr, cause = %e, "connection closed with error"),
    }
}

#[async_trait]
impl Handler for Server {
    type Error = WebError;

    async fn call(&self, req: http::Request<ReqBody>, res: &mut ResponseWriter) -> Result<(), Self::Error> {
        let mut request = Request::from_http(req, self.trust_proxy)?;
        self.router.dispatch(&mut request, res).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::response::ResponseExt;
    use crate::router::get;
    use crate::settings::{ADMISSION_LIMIT, TRUST_PROXY};
    use futures::FutureExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
    use tokio::sync::oneshot;

    fn app() -> RouterBuilder {
        let v1 = Router::builder().route(
            "/users/:id",
            get(handler_fn(|req, res| {
                async move {
                    let reply = format!("{} {} {}", req.base_url(), req.param("id").unwrap_or_default(), req.ip().unwrap_or("-"));
                    res.text(reply).await
                }
                .boxed()
            })),
        );
        Router::builder().route("/", get(handler_fn(|_req, res| async move { res.text("home".into()).await }.boxed()))).mount("/api/v1", v1)
    }

    async fn exchange(server: Server, raw_request: &str) -> String {
        let (mut client, socket) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(socket);
        let connection = HttpConnection::new(reader, writer).with_remote_addr("10.0.0.1:4000".parse().unwrap());
        let task = tokio::spawn(connection.process(Arc::new(server)));

        client.write_all(raw_request.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        task.await.unwrap().unwrap();
        output
    }

    #[test]
    fn build_requires_router() {
        assert!(matches!(Server::builder().build(), Err(ServerError::MissingRouter)));
    }

    #[test]
    fn build_rejects_invalid_settings() {
        let settings = Settings::new().with(ADMISSION_LIMIT, "many");
        let result = Server::builder().router(app()).settings(settings).build();
        assert!(matches!(result, Err(ServerError::Settings { .. })));
    }

    #[tokio::test]
    async fn missing_route_keeps_connection_open() {
        let server = Server::builder().router(app()).build().unwrap();
        let output = exchange(
            server,
            "GET /nowhere HTTP/1.1\r\nHost: localhost\r\n\r\nGET / HTTP/1.1\r\nHost: localhost\r\n\r\n",
        )
        .await;

        let (not_found, home) = output.split_once("HTTP/1.1 200 OK").unwrap();
        assert!(not_found.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(not_found.contains("content-type: application/json\r\n"));
        assert!(not_found.ends_with(r#"{"status":404,"title":"Not Found","detail":"cannot GET /nowhere"}"#));
        assert!(home.ends_with("\r\n\r\nhome"));
    }

    #[tokio::test]
    async fn sub_router_gets_base_url_and_client_ip() {
        let settings = Settings::new().with(TRUST_PROXY, "true");
        let server = Server::builder().router(app()).settings(settings).build().unwrap();
        let raw_request = concat!(
            "GET /api/v1/users/42 HTTP/1.1\r\n",
            "Host: localhost\r\n",
            "X-Forwarded-For: 203.0.113.7\r\n",
            "Connection: close\r\n",
            "\r\n",
        );
        let output = exchange(server, raw_request).await;

        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(output.ends_with("\r\n\r\n/api/v1 42 203.0.113.7"));
    }

    #[tokio::test]
    async fn serves_over_tcp_until_signalled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let settings = Settings::new().with(ADMISSION_LIMIT, "2");
        let server = Server::builder().router(app()).settings(settings).build().unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve(listener, async move {
            let _ = stopped.await;
        }));

        for _ in 0..3 {
            let mut stream = TcpStream::connect(address).await.unwrap();
            stream.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();
            let mut output = String::new();
            stream.read_to_string(&mut output).await.unwrap();
            assert!(output.starts_with("HTTP/1.0 200 OK\r\n"));
            assert!(output.ends_with("home"));
        }

        // an idle keep-alive connection must not hold up shutdown
        let _idle = TcpStream::connect(address).await.unwrap();
        stop.send(()).unwrap();
        serving.await.unwrap().unwrap();
    }
}
