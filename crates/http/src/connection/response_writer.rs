//! The response half of a request/response exchange.
//!
//! A [`ResponseWriter`] moves through three states: open, headers sent,
//! ended. Status and headers are mutable only while open; the first body
//! write (or an explicit [`ResponseWriter::send_headers`]) emits the status
//! line and header block, and [`ResponseWriter::end`] emits the end-of-message
//! marker exactly once.
//!
//! Framing is decided when the headers go out:
//!
//! - a `Content-Length` header makes the body length-delimited, and writes
//!   beyond the declared length are refused
//! - otherwise HTTP/1.1 responses use chunked transfer encoding
//! - HTTP/1.0 responses of unknown length, and event streams, are
//!   delimited by closing the connection
//! - a response ended without any body is sent with `Content-Length: 0`

use crate::connection::message_writer::MessageWriter;
use crate::protocol::{Message, PayloadItem, PayloadSize, ResponseHead, SendError};
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode, Version};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseState {
    Open,
    HeadersSent,
    Ended,
}

#[derive(Debug)]
pub struct ResponseWriter {
    version: Version,
    status: StatusCode,
    headers: HeaderMap,
    state: ResponseState,
    payload_size: PayloadSize,
    written: u64,
    head_request: bool,
    keep_alive: bool,
    force_close: bool,
    writer: MessageWriter,
}

impl ResponseWriter {
    /// Creates a response that answers a request of the given `version`.
    ///
    /// For a `HEAD` request the body is framed as usual but never written.
    pub fn new(writer: MessageWriter, version: Version, head_request: bool) -> Self {
        Self {
            version,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            state: ResponseState::Open,
            payload_size: PayloadSize::Empty,
            written: 0,
            head_request,
            keep_alive: false,
            force_close: false,
            writer,
        }
    }

    /// Records that the client asked for a persistent connection.
    ///
    /// HTTP/1.0 responses then echo `Connection: keep-alive`.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn headers_sent(&self) -> bool {
        self.state != ResponseState::Open
    }

    #[inline]
    pub fn is_ended(&self) -> bool {
        self.state == ResponseState::Ended
    }

    /// Whether the connection must be closed once this response is done.
    pub fn will_close(&self) -> bool {
        self.force_close
            || self.payload_size.is_until_close()
            || self
                .headers
                .get_all(CONNECTION)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .flat_map(|value| value.split(','))
                .any(|token| token.trim().eq_ignore_ascii_case("close"))
    }

    /// Marks the connection to be closed after this response.
    pub fn force_close(&mut self) {
        self.force_close = true;
    }

    /// Whether this response is a `text/event-stream`.
    pub fn is_event_stream(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim_start().to_ascii_lowercase().starts_with("text/event-stream"))
    }

    /// Sets the status; returns `false` once headers are sent.
    pub fn set_status(&mut self, status: StatusCode) -> bool {
        if self.headers_sent() {
            debug!(status = status.as_u16(), "status change after headers were sent, ignored");
            return false;
        }
        self.status = status;
        true
    }

    /// Replaces all values of `name`; returns `false` once headers are sent.
    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) -> bool {
        if self.headers_sent() {
            debug!(header = %name, "header change after headers were sent, ignored");
            return false;
        }
        self.headers.insert(name, value);
        true
    }

    /// Adds a value to `name`, keeping existing ones.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> bool {
        if self.headers_sent() {
            debug!(header = %name, "header change after headers were sent, ignored");
            return false;
        }
        self.headers.append(name, value);
        true
    }

    pub fn remove_header(&mut self, name: &HeaderName) -> bool {
        if self.headers_sent() {
            debug!(header = %name, "header change after headers were sent, ignored");
            return false;
        }
        self.headers.remove(name);
        true
    }

    /// Drops every header and resets the status, as long as nothing was sent.
    pub fn reset(&mut self, status: StatusCode) -> bool {
        if self.headers_sent() {
            return false;
        }
        self.headers.clear();
        self.status = status;
        true
    }

    /// Writes the status line and header block if they have not gone out yet.
    pub async fn send_headers(&mut self) -> Result<(), SendError> {
        if self.headers_sent() {
            return Ok(());
        }
        let payload_size = self.streaming_payload_size()?;
        self.write_head(payload_size)?;
        self.writer.flush().await
    }

    /// Writes a piece of the body, sending the headers first when needed.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> Result<(), SendError> {
        if self.is_ended() {
            return Err(SendError::AlreadyEnded);
        }
        if !self.headers_sent() {
            let payload_size = self.streaming_payload_size()?;
            self.write_head(payload_size)?;
        }

        let data = data.into();
        if data.is_empty() {
            return self.writer.flush().await;
        }
        if self.head_request {
            self.written += data.len() as u64;
            return self.writer.flush().await;
        }

        let len = data.len() as u64;
        self.writer.write(Message::Payload(PayloadItem::Chunk(data)))?;
        self.written += len;
        self.writer.flush().await
    }

    /// Sends `data` as the whole body and ends the response.
    ///
    /// Sets `Content-Length` when nothing was sent yet and no length was given.
    pub async fn send(&mut self, data: impl Into<Bytes>) -> Result<(), SendError> {
        let data = data.into();
        if !self.headers_sent() && !self.headers.contains_key(CONTENT_LENGTH) {
            self.headers.insert(CONTENT_LENGTH, HeaderValue::from(data.len()));
        }
        self.write(data).await?;
        self.end().await
    }

    /// Finishes the response: headers if still pending, then the end-of-message marker.
    ///
    /// Calling `end` on an ended response does nothing.
    pub async fn end(&mut self) -> Result<(), SendError> {
        if self.is_ended() {
            return Ok(());
        }

        if !self.headers_sent() {
            let payload_size = match self.declared_length()? {
                Some(length) => PayloadSize::new_length(length),
                None => PayloadSize::Empty,
            };
            self.write_head(payload_size)?;
        }

        self.writer.write(Message::Payload(PayloadItem::Eof))?;
        self.state = ResponseState::Ended;

        if let PayloadSize::Length(declared) = self.payload_size
            && self.written < declared
            && !self.head_request
        {
            warn!(declared, written = self.written, "response body shorter than its content-length, closing connection");
            self.force_close = true;
        }

        self.writer.flush().await
    }

    pub(crate) fn into_writer(self) -> MessageWriter {
        self.writer
    }

    fn declared_length(&self) -> Result<Option<u64>, SendError> {
        let Some(value) = self.headers.get(CONTENT_LENGTH) else {
            return Ok(None);
        };
        value
            .to_str()
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Some)
            .ok_or_else(|| SendError::invalid_body("content-length header is not a number"))
    }

    fn streaming_payload_size(&self) -> Result<PayloadSize, SendError> {
        if let Some(length) = self.declared_length()? {
            return Ok(PayloadSize::new_length(length));
        }
        if self.is_event_stream() || self.version == Version::HTTP_10 {
            return Ok(PayloadSize::UntilClose);
        }
        Ok(PayloadSize::Chunked)
    }

    fn write_head(&mut self, payload_size: PayloadSize) -> Result<(), SendError> {
        let payload_size = if bodiless(self.status) { PayloadSize::Empty } else { payload_size };

        let mut head: ResponseHead = Response::new(());
        *head.status_mut() = self.status;
        *head.version_mut() = self.version;
        *head.headers_mut() = self.headers.clone();
        if self.keep_alive
            && self.version == Version::HTTP_10
            && !payload_size.is_until_close()
            && !head.headers().contains_key(CONNECTION)
        {
            head.headers_mut().insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        }

        if self.head_request {
            self.writer.write_head_only(head, payload_size)?;
        } else {
            self.writer.write(Message::Header((head, payload_size)))?;
        }
        self.payload_size = payload_size;
        self.state = ResponseState::HeadersSent;
        Ok(())
    }
}

fn bodiless(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}
