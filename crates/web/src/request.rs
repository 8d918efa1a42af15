//! The request as seen by middleware and handlers.
//!
//! - [`Request`]: head, parsed target, route parameters, body stream and
//!   per-request state
//! - [`PathParams`]: parameters captured by the matched route
//! - [`RequestBody`]: the slot body decoders fill in

use std::net::SocketAddr;

use bytes::Bytes;
use ferrule_http::connection::RemoteAddr;
use ferrule_http::protocol::body::ReqBody;
use ferrule_http::protocol::{QueryParams, RequestTarget};
use http::{Extensions, HeaderMap, HeaderName, Method, Uri, Version, header};
use serde::de::DeserializeOwned;

use crate::error::WebError;
use crate::negotiation;

/// Route parameters in capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    entries: Vec<(String, String)>,
}

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn push(&mut self, name: String, value: String) {
        self.entries.push((name, value));
    }
}

/// A decoded request body, filled in by body-decoding middleware.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    None,
    Text(String),
    Bytes(Bytes),
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    target: RequestTarget,
    params: PathParams,
    base_url: String,
    remote_addr: Option<SocketAddr>,
    ips: Vec<String>,
    body: Option<ReqBody>,
    decoded_body: RequestBody,
    locals: Extensions,
}

impl Request {
    /// Builds a request from what the connection decoded.
    ///
    /// With `trust_proxy`, the client address list comes from
    /// `X-Forwarded-For`; otherwise it is the direct peer.
    pub fn from_http(request: http::Request<ReqBody>, trust_proxy: bool) -> Result<Self, WebError> {
        let (mut parts, body) = request.into_parts();

        let target = match parts.extensions.remove::<RequestTarget>() {
            Some(target) => target,
            None => {
                let path_and_query = parts.uri.path_and_query().map_or("/", |path_and_query| path_and_query.as_str());
                RequestTarget::parse(path_and_query)?
            }
        };

        let remote_addr = parts.extensions.remove::<RemoteAddr>().map(|RemoteAddr(addr)| addr);
        let ips = client_ips(&parts.headers, remote_addr, trust_proxy);

        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            target,
            params: PathParams::default(),
            base_url: String::new(),
            remote_addr,
            ips,
            body: Some(body),
            decoded_body: RequestBody::None,
            locals: parts.extensions,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The first value of `name`, if it is valid UTF-8
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        let name = HeaderName::from_bytes(name.as_ref().as_bytes()).ok()?;
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// The percent-decoded path
    pub fn path(&self) -> &str {
        self.target.path()
    }

    /// The path as received, used for routing
    pub fn raw_path(&self) -> &str {
        self.target.raw_path()
    }

    /// Path plus raw query, as received
    pub fn original_url(&self) -> String {
        self.target.original()
    }

    pub fn query(&self) -> &QueryParams {
        self.target.query()
    }

    /// Deserializes the raw query string into `T`.
    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T, WebError> {
        let raw_query = self.target.raw_query().unwrap_or_default();
        serde_urlencoded::from_str(raw_query).map_err(|e| WebError::bad_request(format!("invalid query string: {e}")).with_source(e))
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Mount path of the router whose route matched, empty at the root.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Client addresses, closest to the client first.
    pub fn ips(&self) -> &[String] {
        &self.ips
    }

    pub fn ip(&self) -> Option<&str> {
        self.ips.first().map(String::as_str)
    }

    /// The body stream, unless something already took it.
    pub fn body_mut(&mut self) -> Option<&mut ReqBody> {
        self.body.as_mut()
    }

    pub fn take_body(&mut self) -> Option<ReqBody> {
        self.body.take()
    }

    /// Reads the whole body stream.
    ///
    /// Fails once the stream was taken by an earlier reader.
    pub async fn read_body(&mut self) -> Result<Bytes, WebError> {
        let body = self.body.take().ok_or_else(|| WebError::internal("request body was already consumed"))?;
        Ok(body.bytes().await?)
    }

    pub fn decoded_body(&self) -> &RequestBody {
        &self.decoded_body
    }

    pub fn set_decoded_body(&mut self, body: RequestBody) {
        self.decoded_body = body;
    }

    /// Typed per-request state shared between middleware and handlers.
    pub fn locals(&self) -> &Extensions {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Extensions {
        &mut self.locals
    }

    /// Candidates acceptable under the `Accept` header, most preferred first.
    pub fn accepts<'a>(&'a self, candidates: &[&'a str]) -> Vec<&'a str> {
        negotiation::preferred_media_types(self.accept_header(), candidates)
    }

    /// The most preferred acceptable candidate.
    pub fn accepts_one<'a>(&'a self, candidates: &[&'a str]) -> Option<&'a str> {
        negotiation::preferred_media_type(self.accept_header(), candidates)
    }

    fn accept_header(&self) -> Option<&str> {
        self.headers.get(header::ACCEPT).and_then(|value| value.to_str().ok())
    }

    pub(crate) fn set_base_url(&mut self, base_url: &str) {
        base_url.clone_into(&mut self.base_url);
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }
}

fn client_ips(headers: &HeaderMap, remote_addr: Option<SocketAddr>, trust_proxy: bool) -> Vec<String> {
    if trust_proxy {
        let forwarded = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        if !forwarded.is_empty() {
            return forwarded;
        }
    }
    remote_addr.map(|addr| addr.ip().to_string()).into_iter().collect()
}
