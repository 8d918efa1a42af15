//! Wire codec: bytes ↔ HTTP messages.
//!
//! - Request side: [`RequestDecoder`] turns the read buffer into a request
//!   head followed by payload items, never reading past the declared body
//!   length so a pipelined request stays in the buffer.
//! - Response side: [`ResponseEncoder`] writes a status line and header
//!   block followed by payload items framed as length-delimited, chunked or
//!   close-delimited.
//!
//! Both are `tokio_util::codec` implementations and are driven by
//! [`crate::connection::HttpConnection`] and [`crate::connection::ResponseWriter`].

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
