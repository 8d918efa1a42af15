//! The HTTP/1.1 layer of ferrule.
//!
//! This crate owns everything between the socket and the application: it
//! decodes requests off a byte stream, streams request bodies, serializes
//! responses and runs the keep-alive loop of a connection. Routing and
//! middleware live in `ferrule-web`, which plugs in through [`handler::Handler`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use http::HeaderValue;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//! use ferrule_http::connection::HttpConnection;
//! use ferrule_http::handler::make_handler;
//!
//! #[tokio::main]
//! async fn main() {
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(|req, res| {
//!         async move {
//!             info!(path = req.uri().path(), "receive request");
//!             res.insert_header(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
//!             res.send("Hello World!\r\n").await
//!         }
//!         .boxed()
//!     }));
//!
//!     loop {
//!         let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = Arc::clone(&handler);
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             let connection = HttpConnection::new(reader, writer).with_remote_addr(remote_addr);
//!             if let Err(e) = connection.process(handler).await {
//!                 error!(cause = %e, "connection closed with error");
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`codec`]: request decoding and response encoding
//! - [`protocol`]: request heads, payload framing, body streams and errors
//! - [`connection`]: the per-connection loop and [`connection::ResponseWriter`]
//! - [`handler`]: the application seam
//! - [`handoff`]: giving a socket to WebSocket or event-stream code
//!
//! # Limitations
//!
//! - HTTP/1.0 and HTTP/1.1 only, no TLS
//! - Maximum header size: 8KB, maximum number of headers: 64
//! - Request bodies must be `Content-Length` delimited

pub mod codec;
pub mod connection;
pub mod handler;
pub mod handoff;
pub mod protocol;

mod date;
mod utils;
pub(crate) use utils::ensure;
