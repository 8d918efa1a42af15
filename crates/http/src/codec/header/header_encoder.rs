//! HTTP response header encoder.
//!
//! Writes the status line and header block. The framing headers are set from
//! the [`PayloadSize`]: `Content-Length` for length-delimited and empty
//! bodies, `Transfer-Encoding: chunked` for chunked bodies, and
//! `Connection: close` for close-delimited HTTP/1.0 bodies. A `Date` header
//! is added unless the response already carries one.

use crate::date::DateService;
use crate::protocol::{PayloadSize, ResponseHead, SendError};

use bytes::{BufMut, BytesMut};

use http::{HeaderValue, StatusCode, Version, header};
use std::io;
use std::io::{ErrorKind, Write};
use tokio_util::codec::Encoder;
use tracing::error;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 4 * 1024;

const CHUNKED: HeaderValue = HeaderValue::from_static("chunked");
const CLOSE: HeaderValue = HeaderValue::from_static("close");
const ZERO_VALUE: HeaderValue = HeaderValue::from_static("0");

/// Encoder for HTTP response heads.
#[derive(Debug, Clone, Copy)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;

        let version = match head.version() {
            Version::HTTP_11 => "HTTP/1.1",
            Version::HTTP_10 => "HTTP/1.0",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported).into());
            }
        };

        dst.reserve(INIT_HEADER_SIZE);
        let status = head.status();
        write!(FastWrite(dst), "{} {} {}\r\n", version, status.as_str(), status.canonical_reason().unwrap_or("Unknown"))?;

        let headers = head.headers_mut();
        match payload_size {
            PayloadSize::Length(n) => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                headers.remove(header::CONTENT_LENGTH);
                headers.insert(header::TRANSFER_ENCODING, CHUNKED);
            }
            PayloadSize::UntilClose => {
                headers.remove(header::CONTENT_LENGTH);
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONNECTION, CLOSE);
            }
            PayloadSize::Empty => {
                headers.remove(header::TRANSFER_ENCODING);
                if !bodiless_status(status) {
                    headers.insert(header::CONTENT_LENGTH, ZERO_VALUE);
                }
            }
        }

        if !headers.contains_key(header::DATE) {
            headers.insert(header::DATE, DateService::get_global_instance().http_date());
        }

        for (header_name, header_value) in head.headers() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// 1xx, 204 and 304 responses never carry a body or a `Content-Length`
fn bodiless_status(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

/// `io::Write` over a `BytesMut` that has already reserved room.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Response;

    fn encode(head: ResponseHead, payload_size: PayloadSize) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode((head, payload_size), &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn writes_status_line_and_length() {
        let head = Response::builder().status(StatusCode::OK).header("x-trace", "abc").body(()).unwrap();
        let raw = encode(head, PayloadSize::Length(5));

        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("x-trace: abc\r\n"));
        assert!(raw.contains("content-length: 5\r\n"));
        assert!(raw.contains("date: "));
        assert!(raw.ends_with("\r\n\r\n"));
    }

    #[test]
    fn keeps_explicit_date() {
        let head = Response::builder().header(header::DATE, "Sun, 06 Nov 1994 08:49:37 GMT").body(()).unwrap();
        let raw = encode(head, PayloadSize::Empty);
        assert!(raw.contains("date: Sun, 06 Nov 1994 08:49:37 GMT\r\n"));
        assert_eq!(raw.matches("date: ").count(), 1);
        assert!(raw.contains("content-length: 0\r\n"));
    }

    #[test]
    fn chunked_replaces_content_length() {
        let head = Response::builder().status(StatusCode::NOT_FOUND).body(()).unwrap();
        let raw = encode(head, PayloadSize::Chunked);
        assert!(raw.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(raw.contains("transfer-encoding: chunked\r\n"));
        assert!(!raw.contains("content-length"));
    }

    #[test]
    fn http_10_close_delimited() {
        let head = Response::builder().version(Version::HTTP_10).body(()).unwrap();
        let raw = encode(head, PayloadSize::UntilClose);
        assert!(raw.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(raw.contains("connection: close\r\n"));
    }

    #[test]
    fn no_content_has_no_length() {
        let head = Response::builder().status(StatusCode::NO_CONTENT).body(()).unwrap();
        let raw = encode(head, PayloadSize::Empty);
        assert!(!raw.contains("content-length"));
    }
}
