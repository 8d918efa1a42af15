//! Payload framing for request and response bodies.
//!
//! ## Decoders
//! - [`LengthDecoder`]: `Content-Length` delimited request bodies
//! - [`PayloadDecoder`]: selects the strategy from the parsed [`crate::protocol::PayloadSize`]
//!
//! ## Encoders
//! - [`ChunkedEncoder`]: `Transfer-Encoding: chunked` response bodies
//! - [`LengthEncoder`]: `Content-Length` delimited response bodies
//! - [`PayloadEncoder`]: selects the strategy for a response

mod chunked_encoder;
mod length_decoder;
mod length_encoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
