//! HTTP response head type.

use http::Response;

/// The head portion of a response: status, version and headers, with an
/// empty body placeholder. Built by [`crate::connection::ResponseWriter`]
/// when the headers are flushed.
pub type ResponseHead = Response<()>;
