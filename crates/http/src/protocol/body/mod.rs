//! Request body streaming.
//!
//! The body is bridged from the connection's decoded payload stream to the
//! handler through a pair of channels:
//!
//! - [`ReqBody`]: the consumer side, an `http_body::Body` handed to the handler
//! - `BodySender`: the producer side, driven by the connection while the
//!   handler runs, reading payload items only when the consumer asks
//!
//! The sender never reads past the declared `Content-Length`, so bytes of a
//! pipelined follow-up request stay in the read buffer. Whatever the handler
//! leaves unread is drained by the connection once the response is done.

mod body_channel;

pub use body_channel::ReqBody;
pub(crate) use body_channel::BodySender;
