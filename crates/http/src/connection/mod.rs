//! Per-connection request loop and the response writer handlers use.
//!
//! - [`HttpConnection`]: reads requests, dispatches them, applies keep-alive
//!   and hands upgraded sockets off
//! - [`ResponseWriter`]: status, headers and body of one response, written
//!   straight to the socket
//! - [`MessageWriter`]: the buffered, encoding write half shared by
//!   consecutive responses on a connection

mod http_connection;
mod message_writer;
mod response_writer;

pub use http_connection::HttpConnection;
pub use http_connection::RemoteAddr;
pub use message_writer::BoxWriter;
pub use message_writer::MessageWriter;
pub use response_writer::ResponseWriter;
