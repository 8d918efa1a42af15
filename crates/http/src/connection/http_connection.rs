use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use http::{Method, Request, StatusCode, Version};
use tokio::io::AsyncRead;
use tokio::select;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::RequestDecoder;
use crate::connection::message_writer::{BoxWriter, MessageWriter};
use crate::connection::response_writer::ResponseWriter;
use crate::handler::Handler;
use crate::handoff::{HandOff, UpgradeKind, Upgraded};
use crate::protocol::body::ReqBody;
use crate::protocol::{HttpError, Message, ParseError, PayloadSize, RequestHeader, SendError};

const READ_BUFFER_SIZE: usize = 8 * 1024;
const WRITE_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// The peer address of a connection, stored in each request's extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// What the connection does after a response completed.
#[derive(Debug)]
enum Next {
    KeepAlive,
    Close,
    HandOff(UpgradeKind, Option<Request<()>>),
}

/// Runs the request loop of a single connection.
///
/// Requests on one connection are handled strictly one after another:
/// wait for a request head (bounded by the keep-alive timeout), dispatch it
/// to the [`Handler`], end the response, drain the request body, then keep
/// the connection, close it, or hand the socket off.
///
/// Protocol errors close the connection without a response.
pub struct HttpConnection<R> {
    framed_read: FramedRead<R, RequestDecoder>,
    writer: Option<MessageWriter>,
    remote_addr: Option<SocketAddr>,
    keep_alive_timeout: Duration,
    shutdown: CancellationToken,
    hand_off: Option<Arc<dyn HandOff>>,
}

impl<R> std::fmt::Debug for HttpConnection<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("remote_addr", &self.remote_addr)
            .field("keep_alive_timeout", &self.keep_alive_timeout)
            .finish_non_exhaustive()
    }
}

impl<R> HttpConnection<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    pub fn new<W>(reader: R, writer: W) -> Self
    where
        W: tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxWriter = Box::new(writer);
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), READ_BUFFER_SIZE),
            writer: Some(MessageWriter::with_capacity(writer, WRITE_BUFFER_SIZE)),
            remote_addr: None,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            shutdown: CancellationToken::new(),
            hand_off: None,
        }
    }

    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    /// Bounds every wait for the next request head.
    #[must_use]
    pub fn with_keep_alive_timeout(mut self, keep_alive_timeout: Duration) -> Self {
        self.keep_alive_timeout = keep_alive_timeout;
        self
    }

    /// Cancelling `shutdown` closes the connection while it waits for a request.
    /// A request already being handled runs to completion.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    #[must_use]
    pub fn with_hand_off(mut self, hand_off: Arc<dyn HandOff>) -> Self {
        self.hand_off = Some(hand_off);
        self
    }

    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        loop {
            let next_message = select! {
                biased;
                () = self.shutdown.cancelled() => {
                    debug!(remote_addr = ?self.remote_addr, "shutting down, closing idle connection");
                    return Ok(());
                }
                next_message = timeout(self.keep_alive_timeout, self.framed_read.next()) => next_message,
            };

            let Ok(next_message) = next_message else {
                return Err(HttpError::ReadTimeout { seconds: self.keep_alive_timeout.as_secs() });
            };

            match next_message {
                Some(Ok(Message::Header((header, payload_size)))) => match self.do_process(header, payload_size, handler.as_ref()).await? {
                    Next::KeepAlive => {}
                    Next::Close => {
                        debug!(remote_addr = ?self.remote_addr, "response requires close, connection shutdown");
                        return Ok(());
                    }
                    Next::HandOff(kind, head) => {
                        self.hand_off(kind, head);
                        return Ok(());
                    }
                },

                Some(Ok(Message::Payload(_))) => {
                    error!("receive payload while expecting a request header");
                    return Err(ParseError::invalid_body("need header while receive body").into());
                }

                Some(Err(e)) => {
                    warn!(remote_addr = ?self.remote_addr, cause = %e, "can't parse request, closing connection");
                    return Err(e.into());
                }

                None => {
                    debug!(remote_addr = ?self.remote_addr, "peer closed the connection");
                    return Ok(());
                }
            }
        }
    }

    async fn do_process<H>(&mut self, header: RequestHeader, payload_size: PayloadSize, handler: &H) -> Result<Next, HttpError>
    where
        H: Handler + ?Sized,
    {
        let Some(mut writer) = self.writer.take() else {
            return Err(SendError::io(std::io::Error::other("response writer already taken")).into());
        };

        // HTTP/1.0 clients don't know the interim response
        if header.expects_continue() && header.version() == Version::HTTP_11 && !payload_size.is_empty() {
            writer.write_raw(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
            info!("receive expect request header, sent continue response");
        }

        let keep_alive = header.is_keep_alive();
        let upgrade_head = header.is_websocket_upgrade().then(|| copy_head(&header));
        let mut response = ResponseWriter::new(writer, header.version(), header.method() == Method::HEAD).with_keep_alive(keep_alive);

        let (req_body, mut body_sender) = ReqBody::channel(&mut self.framed_read, payload_size);
        let (head, target) = header.into_parts();
        let mut request = head.map(|()| req_body);
        request.extensions_mut().insert(target);
        if let Some(remote_addr) = self.remote_addr {
            request.extensions_mut().insert(RemoteAddr(remote_addr));
        }

        // the handler may wait on body data, so the body sender is driven
        // alongside it until the handler is done
        let handler_result = {
            let dispatch = handler.call(request, &mut response);
            let body_future = body_sender.start();
            tokio::pin!(dispatch);
            tokio::pin!(body_future);

            let mut body_done = false;
            loop {
                select! {
                    biased;
                    result = &mut dispatch => break result,
                    result = &mut body_future, if !body_done => {
                        body_done = true;
                        if let Err(e) = result {
                            warn!(cause = %e, "request body stream failed");
                        }
                    }
                }
            }
        };

        if let Err(e) = handler_result {
            let e: Box<dyn Error + Send + Sync> = e.into();
            error!(cause = %e, "handler failed");
            if !response.reset(StatusCode::INTERNAL_SERVER_ERROR) {
                response.force_close();
            }
        }

        response.end().await?;

        let body_drained = match body_sender.skip_data().await {
            Ok(()) => true,
            Err(e) => {
                warn!(cause = %e, "can't drain request body");
                false
            }
        };

        let next = if let Some(head) = upgrade_head
            && response.status() == StatusCode::SWITCHING_PROTOCOLS
        {
            Next::HandOff(UpgradeKind::WebSocket, Some(head))
        } else if response.is_event_stream() && response.headers_sent() && response.status().is_success() {
            Next::HandOff(UpgradeKind::EventStream, None)
        } else if keep_alive && body_drained && !response.will_close() {
            Next::KeepAlive
        } else {
            Next::Close
        };

        self.writer = Some(response.into_writer());
        Ok(next)
    }

    fn hand_off(self, kind: UpgradeKind, head: Option<Request<()>>) {
        let Some(hand_off) = self.hand_off else {
            debug!(?kind, "no hand-off configured, closing connection");
            return;
        };
        let Some(writer) = self.writer else {
            error!(?kind, "response writer missing, can't hand off connection");
            return;
        };

        let parts = self.framed_read.into_parts();
        info!(?kind, remote_addr = ?self.remote_addr, "handing off connection");
        hand_off.hand_off(Upgraded { kind, head, reader: Box::new(parts.io), writer: writer.into_inner(), read_buf: parts.read_buf });
    }
}

fn copy_head(header: &RequestHeader) -> Request<()> {
    let mut head = Request::new(());
    *head.method_mut() = header.method().clone();
    *head.uri_mut() = header.uri().clone();
    *head.version_mut() = header.version();
    *head.headers_mut() = header.headers().clone();
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::make_handler;
    use bytes::Bytes;
    use futures::FutureExt;
    use http::HeaderValue;
    use http::header::CONTENT_TYPE;
    use indoc::indoc;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

    type TestResult = Result<(), Box<dyn Error + Send + Sync>>;

    fn echo_handler() -> impl Handler<Error: Send> {
        make_handler(|req: Request<ReqBody>, res: &mut ResponseWriter| {
            async move {
                let path = req.uri().path().to_string();
                let body = req.into_body().bytes().await?;
                res.insert_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
                res.write(format!("{path}:")).await?;
                res.write(body).await?;
                res.end().await?;
                TestResult::Ok(())
            }
            .boxed()
        })
    }

    fn spawn_connection<H: Handler<Error: Send> + 'static>(handler: H) -> (DuplexStream, tokio::task::JoinHandle<Result<(), HttpError>>) {
        let (client, server) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let connection = HttpConnection::new(reader, writer).with_keep_alive_timeout(Duration::from_secs(2));
        let task = tokio::spawn(connection.process(Arc::new(handler)));
        (client, task)
    }

    async fn read_to_end(mut client: DuplexStream) -> String {
        let mut raw = String::new();
        client.read_to_string(&mut raw).await.unwrap();
        raw
    }

    #[tokio::test]
    async fn http_10_closes_after_response() {
        let (mut client, task) = spawn_connection(echo_handler());
        client.write_all(b"GET /old HTTP/1.0\r\nHost: a\r\n\r\n").await.unwrap();

        let raw = read_to_end(client).await;
        assert!(raw.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(raw.ends_with("/old:"));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn http_11_keeps_connection_open_for_pipelined_requests() {
        let (mut client, task) = spawn_connection(echo_handler());
        let requests = indoc! {"
            POST /first HTTP/1.1\r
            Content-Length: 5\r
            \r
            helloGET /second HTTP/1.1\r
            Connection: close\r
            \r
        "};
        client.write_all(requests.as_bytes()).await.unwrap();

        let raw = read_to_end(client).await;
        assert_eq!(raw.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(raw.contains("7\r\n/first:\r\n5\r\nhello\r\n0\r\n\r\n"));
        assert!(raw.contains("8\r\n/second:\r\n0\r\n\r\n"));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn unread_body_is_drained_before_next_request() {
        let handler = make_handler(|_req: Request<ReqBody>, res: &mut ResponseWriter| async move { res.send("ignored").await }.boxed());
        let (mut client, task) = spawn_connection(handler);
        client
            .write_all(b"POST /a HTTP/1.1\r\nContent-Length: 4\r\n\r\nbodyGET /b HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();

        let raw = read_to_end(client).await;
        assert_eq!(raw.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn handler_error_becomes_500() {
        let handler = make_handler(|_req: Request<ReqBody>, _res: &mut ResponseWriter| {
            async move { Err::<(), _>(std::io::Error::other("boom")) }.boxed()
        });
        let (mut client, _task) = spawn_connection(handler);
        client.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();

        let raw = read_to_end(client).await;
        assert!(raw.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(raw.contains("content-length: 0\r\n"));
    }

    #[tokio::test]
    async fn malformed_request_closes_without_response() {
        let (mut client, task) = spawn_connection(echo_handler());
        client.write_all(b"GET /only-two-tokens\r\n\r\n").await.unwrap();

        let raw = read_to_end(client).await;
        assert!(raw.is_empty());
        assert!(matches!(task.await.unwrap(), Err(HttpError::RequestError { .. })));
    }

    #[tokio::test]
    async fn expect_continue_gets_interim_response() {
        let (mut client, _task) = spawn_connection(echo_handler());
        client
            .write_all(b"PUT /up HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
            .await
            .unwrap();

        let raw = read_to_end(client).await;
        assert!(raw.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
        assert!(raw.ends_with("2\r\nok\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn http_10_request_gets_no_interim_response() {
        let (mut client, _task) = spawn_connection(echo_handler());
        client.write_all(b"PUT /up HTTP/1.0\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nok").await.unwrap();

        let raw = read_to_end(client).await;
        assert!(raw.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(!raw.contains("100 Continue"));
        assert!(raw.ends_with("/up:ok"));
    }

    #[tokio::test]
    async fn head_response_is_followed_directly_by_next_response() {
        let (mut client, task) = spawn_connection(echo_handler());
        client.write_all(b"HEAD / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\nConnection: close\r\n\r\n").await.unwrap();

        let raw = read_to_end(client).await;
        let (head_response, rest) = raw.split_once("\r\n\r\n").unwrap();
        assert!(head_response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head_response.contains("transfer-encoding: chunked"));
        assert!(rest.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(rest.ends_with("\r\n\r\n2\r\n/:\r\n0\r\n\r\n"));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn http_10_keep_alive_serves_next_request() {
        let handler = make_handler(|req: Request<ReqBody>, res: &mut ResponseWriter| {
            async move {
                let path = req.uri().path().to_string();
                res.send(path).await
            }
            .boxed()
        });
        let (mut client, task) = spawn_connection(handler);
        client
            .write_all(b"GET /a HTTP/1.0\r\nConnection: keep-alive\r\n\r\nGET /b HTTP/1.0\r\n\r\n")
            .await
            .unwrap();

        let raw = read_to_end(client).await;
        let (first, second) = raw.split_once("/a").unwrap();
        assert!(first.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(first.contains("connection: keep-alive\r\n"));
        assert!(second.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(!second.contains("keep-alive"));
        assert!(second.ends_with("/b"));
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn idle_connection_times_out() {
        let (client, server) = duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let connection = HttpConnection::new(reader, writer).with_keep_alive_timeout(Duration::from_millis(20));
        let result = connection.process(Arc::new(echo_handler())).await;
        assert!(matches!(result, Err(HttpError::ReadTimeout { .. })));
        drop(client);
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connection() {
        let (client, server) = duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let shutdown = CancellationToken::new();
        let connection = HttpConnection::new(reader, writer).with_shutdown(shutdown.clone());
        shutdown.cancel();
        assert!(connection.process(Arc::new(echo_handler())).await.is_ok());
        drop(client);
    }

    #[tokio::test]
    async fn websocket_upgrade_is_handed_off() {
        let handed_off = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&handed_off);
        let hand_off = move |upgraded: Upgraded| {
            let path = upgraded.head.as_ref().map(|head| head.uri().path().to_string());
            *sink.lock().unwrap() = Some((upgraded.kind, path, upgraded.read_buf.freeze()));
        };

        let handler = make_handler(|_req: Request<ReqBody>, res: &mut ResponseWriter| {
            async move {
                res.set_status(StatusCode::SWITCHING_PROTOCOLS);
                res.insert_header(http::header::UPGRADE, HeaderValue::from_static("websocket"));
                res.end().await
            }
            .boxed()
        });

        let (mut client, server) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let connection = HttpConnection::new(reader, writer).with_hand_off(Arc::new(hand_off));
        client
            .write_all(b"GET /chat HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n\x81\x00")
            .await
            .unwrap();

        connection.process(Arc::new(handler)).await.unwrap();

        let (kind, path, read_buf) = handed_off.lock().unwrap().take().unwrap();
        assert_eq!(kind, UpgradeKind::WebSocket);
        assert_eq!(path.as_deref(), Some("/chat"));
        assert_eq!(read_buf, Bytes::from_static(b"\x81\x00"));
    }
}
