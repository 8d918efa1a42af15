//! HTTP request header handling.
//!
//! [`RequestHeader`] wraps `http::Request<()>` together with the parsed
//! request target (decoded path and ordered query parameters).

use http::{HeaderMap, Method, Request, Uri, Version, header};

use crate::protocol::{ParseError, QueryParams, RequestTarget};

/// Represents an HTTP request header.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
    target: RequestTarget,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    /// Builds a header, parsing the request target of `inner`.
    ///
    /// # Errors
    ///
    /// Returns `ParseError::InvalidQuery` when a query entry has no `=`.
    pub fn new(inner: Request<()>) -> Result<Self, ParseError> {
        let target = match inner.uri().path_and_query() {
            Some(path_and_query) => RequestTarget::parse(path_and_query.as_str())?,
            None => RequestTarget::parse("/")?,
        };
        Ok(Self { inner, target })
    }

    /// Splits the header into the inner request and its parsed target.
    pub fn into_parts(self) -> (Request<()>, RequestTarget) {
        (self.inner, self.target)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn target(&self) -> &RequestTarget {
        &self.target
    }

    /// The percent-decoded request path
    pub fn path(&self) -> &str {
        self.target.path()
    }

    pub fn query(&self) -> &QueryParams {
        self.target.query()
    }

    /// Determines if this request may carry a body based on its HTTP method.
    ///
    /// Returns false for GET, HEAD, DELETE, OPTIONS and CONNECT.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Whether the client asked to keep the connection open.
    ///
    /// An explicit `Connection` token wins; otherwise HTTP/1.1 defaults to
    /// keep-alive and HTTP/1.0 to close.
    pub fn is_keep_alive(&self) -> bool {
        if has_connection_token(self.headers(), "close") {
            return false;
        }
        if has_connection_token(self.headers(), "keep-alive") {
            return true;
        }
        self.version() == Version::HTTP_11
    }

    /// `Connection: upgrade` together with `Upgrade: websocket`
    pub fn is_websocket_upgrade(&self) -> bool {
        has_connection_token(self.headers(), "upgrade")
            && self
                .headers()
                .get(header::UPGRADE)
                .and_then(|value| value.to_str().ok())
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("websocket"))
    }

    /// `Expect: 100-continue`
    pub fn expects_continue(&self) -> bool {
        self.headers()
            .get(header::EXPECT)
            .is_some_and(|value| value.as_bytes().len() >= 4 && value.as_bytes()[..4].eq_ignore_ascii_case(b"100-"))
    }
}

fn has_connection_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| item.trim().eq_ignore_ascii_case(token))
}
