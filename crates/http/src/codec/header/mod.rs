//! Request header decoding and response header encoding.
//!
//! - [`HeaderDecoder`]: request line + header block → [`crate::protocol::RequestHeader`]
//! - [`HeaderEncoder`]: [`crate::protocol::ResponseHead`] → status line + header block

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
