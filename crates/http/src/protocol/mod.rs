//! Core HTTP protocol types.
//!
//! - **Message Handling** ([`Message`], [`PayloadItem`], [`PayloadSize`]): the
//!   units the codec produces and consumes
//! - **Request Processing**: [`RequestHeader`] and its parsed [`RequestTarget`]
//! - **Response Processing**: [`ResponseHead`]
//! - **Body Streaming** ([`body`]): [`body::ReqBody`], the length-bounded request body stream
//! - **Error Handling**: [`HttpError`], [`ParseError`], [`SendError`]

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod target;
pub use target::QueryParams;
pub use target::RequestTarget;
pub use target::decode as percent_decode;

mod response;
pub use response::ResponseHead;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
