//! HTTP request header decoder.
//!
//! Parses the request line and header block with `httparse`, builds a
//! [`RequestHeader`] (which parses the request target and query) and
//! decides how the body is framed.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header size: 8KB
//! - Only HTTP/1.0 and HTTP/1.1
//! - Only the nine standard methods
//! - Request bodies must be `Content-Length` delimited; chunked request
//!   bodies are rejected

use std::mem::MaybeUninit;

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Method, Request};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;

use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of headers allowed in a request
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decoder for HTTP request headers.
///
/// Produces the parsed [`RequestHeader`] together with the [`PayloadSize`]
/// describing the body that follows.
#[derive(Debug, Clone, Copy)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // "GET / HTTP/1.1\r\n\r\n" is the shortest complete request
        if src.len() < 14 {
            return Ok(None);
        }

        let mut req = httparse::Request::new(&mut []);
        // SAFETY: an array of `MaybeUninit` needs no initialization
        let mut headers: [MaybeUninit<httparse::Header>; MAX_HEADER_NUM] = unsafe { MaybeUninit::uninit().assume_init() };

        let parsed_result = req.parse_with_uninit_headers(src, &mut headers).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            Error::HeaderName | Error::HeaderValue => ParseError::invalid_header(e.to_string()),
            e => ParseError::invalid_request_line(e.to_string()),
        });

        match parsed_result? {
            Status::Complete(body_offset) => {
                trace!(header_size = body_offset, "parsed request header");
                ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

                let header_count = req.headers.len();

                let mut header_index: [HeaderIndex; MAX_HEADER_NUM] = EMPTY_HEADER_INDEX_ARRAY;
                HeaderIndex::record(src, req.headers, &mut header_index);

                let version = match req.version {
                    Some(0) => http::Version::HTTP_10,
                    Some(1) => http::Version::HTTP_11,
                    _ => return Err(ParseError::InvalidVersion(req.version)),
                };

                let method = parse_method(req.method.ok_or(ParseError::InvalidMethod)?)?;

                let mut header_builder =
                    Request::builder().method(method).uri(req.path.ok_or(ParseError::InvalidUri)?).version(version);

                let headers = header_builder.headers_mut().ok_or(ParseError::InvalidUri)?;
                headers.reserve(header_count);

                let header_bytes = src.split_to(body_offset).freeze();
                for index in &header_index[..header_count] {
                    let name = HeaderName::from_bytes(&header_bytes[index.name.0..index.name.1])
                        .map_err(|e| ParseError::invalid_header(e.to_string()))?;
                    let value = HeaderValue::from_maybe_shared(header_bytes.slice(index.value.0..index.value.1))
                        .map_err(|e| ParseError::invalid_header(e.to_string()))?;

                    headers.append(name, value);
                }

                let request = header_builder.body(()).map_err(|_| ParseError::InvalidUri)?;
                let header = RequestHeader::new(request)?;
                let payload_size = parse_payload(&header)?;

                Ok(Some((header, payload_size)))
            }
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                Ok(None)
            }
        }
    }
}

fn parse_method(method: &str) -> Result<Method, ParseError> {
    match method {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "DELETE" => Ok(Method::DELETE),
        "HEAD" => Ok(Method::HEAD),
        "OPTIONS" => Ok(Method::OPTIONS),
        "CONNECT" => Ok(Method::CONNECT),
        "PATCH" => Ok(Method::PATCH),
        "TRACE" => Ok(Method::TRACE),
        _ => Err(ParseError::InvalidMethod),
    }
}

/// Byte ranges of a header's name and value within the header buffer.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

const EMPTY_HEADER_INDEX: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

const EMPTY_HEADER_INDEX_ARRAY: [HeaderIndex; MAX_HEADER_NUM] = [EMPTY_HEADER_INDEX; MAX_HEADER_NUM];

impl HeaderIndex {
    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, indices) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            let name_end = name_start + header.name.len();
            indices.name = (name_start, name_end);
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            let value_end = value_start + header.value.len();
            indices.value = (value_start, value_end);
        }
    }
}

/// Decides the body framing from `Content-Length` / `Transfer-Encoding`.
///
/// Chunked request bodies are not decoded: any `Transfer-Encoding` on a
/// body-bearing request is rejected, as is a request carrying both headers.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    if !header.need_body() {
        return Ok(PayloadSize::new_empty());
    }

    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (None, None) => Ok(PayloadSize::new_empty()),

        (Some(te_value), None) => {
            Err(ParseError::unsupported_transfer_encoding(String::from_utf8_lossy(te_value.as_bytes())))
        }

        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_| ParseError::invalid_content_length("value can't to_str"))?;

            let length =
                cl_str.trim().parse::<u64>().map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;

            Ok(PayloadSize::new_length(length))
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer_encoding and content_length both present in headers")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, Version};
    use indoc::indoc;

    #[test]
    fn test_bytes_mut_lens() {
        let str = indoc! {r##"
        POST /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        Content-Length: 3

        123"##};

        let mut bytes = BytesMut::from(str);
        let (_header, payload_size) = HeaderDecoder.decode(&mut bytes).unwrap().unwrap();

        assert_eq!(payload_size, PayloadSize::Length(3));
        assert_eq!(&bytes[..], &b"123"[..]);
    }

    #[test]
    fn from_curl() {
        let str = indoc! {r##"
        GET /index.html?name=ferrule HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let mut buf = BytesMut::from(str);

        let (header, payload_size) = HeaderDecoder.decode(&mut buf).unwrap().unwrap();

        assert!(payload_size.is_empty());

        assert_eq!(header.method(), &Method::GET);
        assert_eq!(header.version(), Version::HTTP_11);
        assert_eq!(header.uri().path(), "/index.html");
        assert_eq!(header.query().get("name"), Some("ferrule"));

        assert_eq!(header.headers().len(), 3);
        assert_eq!(header.headers().get(http::header::ACCEPT), Some(&HeaderValue::from_static("*/*")));
        assert_eq!(header.headers().get("host"), Some(&HeaderValue::from_static("127.0.0.1:8080")));
    }

    #[test]
    fn partial_header_waits_for_more() {
        let mut buf = BytesMut::from("GET /index.html HTTP/1.1\r\nHost: 127.0.0.1\r\n");
        assert!(HeaderDecoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn request_line_needs_three_tokens() {
        let mut buf = BytesMut::from("GET /index.html\r\nHost: 127.0.0.1\r\n\r\n");
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::InvalidRequestLine { .. })));
    }

    #[test]
    fn malformed_header_line_is_rejected() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nthis is not a header\r\n\r\n");
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::InvalidHeader { .. })));
    }

    #[test]
    fn unknown_method_is_rejected() {
        let mut buf = BytesMut::from("BREW /pot HTTP/1.1\r\nHost: tea\r\n\r\n");
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::InvalidMethod)));
    }

    #[test]
    fn http_10_is_accepted() {
        let mut buf = BytesMut::from("GET / HTTP/1.0\r\nHost: a\r\n\r\n");
        let (header, _) = HeaderDecoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(header.version(), Version::HTTP_10);
    }

    #[test]
    fn chunked_request_body_is_rejected() {
        let str = indoc! {r##"
        POST /upload HTTP/1.1
        Host: 127.0.0.1:8080
        Transfer-Encoding: chunked

        "##};
        let mut buf = BytesMut::from(str);
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::UnsupportedTransferEncoding { .. })));
    }

    #[test]
    fn both_length_headers_are_rejected() {
        let str = indoc! {r##"
        POST /upload HTTP/1.1
        Content-Length: 4
        Transfer-Encoding: chunked

        "##};
        let mut buf = BytesMut::from(str);
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::InvalidContentLength { .. })));
    }

    #[test]
    fn query_entry_without_equals_is_a_protocol_error() {
        let mut buf = BytesMut::from("GET /search?debug HTTP/1.1\r\nHost: a\r\n\r\n");
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::InvalidQuery { .. })));
    }

    #[test]
    fn too_large_header_is_rejected() {
        let mut raw = String::from("GET / HTTP/1.1\r\nX-Filler: ");
        raw.push_str(&"a".repeat(MAX_HEADER_BYTES));
        let mut buf = BytesMut::from(raw.as_str());
        assert!(matches!(HeaderDecoder.decode(&mut buf), Err(ParseError::TooLargeHeader { .. })));
    }
}
