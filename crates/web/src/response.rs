//! Convenience writers on top of [`ResponseWriter`].

use async_trait::async_trait;
use ferrule_http::connection::ResponseWriter;
use http::{HeaderValue, header};
use mime::Mime;
use serde::Serialize;
use tracing::warn;

use crate::error::WebError;

#[async_trait]
pub trait ResponseExt {
    /// Sets `Content-Type`; false once headers are on the wire.
    fn content_type(&mut self, mime: &Mime) -> bool;

    /// Serializes `value` and sends it as `application/json`.
    async fn json<T: Serialize + Sync + ?Sized>(&mut self, value: &T) -> Result<(), WebError>;

    /// Sends `body` as `text/plain; charset=utf-8`.
    async fn text(&mut self, body: String) -> Result<(), WebError>;

    /// Sends `body` as `text/html; charset=utf-8`.
    async fn html(&mut self, body: String) -> Result<(), WebError>;

    /// Replaces whatever was prepared with the JSON rendering of `err`.
    ///
    /// Once headers are sent there is nothing left to replace, so the
    /// connection is marked to close instead.
    async fn send_error(&mut self, err: &WebError) -> Result<(), WebError>;
}

#[async_trait]
impl ResponseExt for ResponseWriter {
    fn content_type(&mut self, mime: &Mime) -> bool {
        match HeaderValue::from_str(mime.as_ref()) {
            Ok(value) => self.insert_header(header::CONTENT_TYPE, value),
            Err(_) => false,
        }
    }

    async fn json<T: Serialize + Sync + ?Sized>(&mut self, value: &T) -> Result<(), WebError> {
        let body = serde_json::to_vec(value).map_err(|e| WebError::internal("failed to serialize response").with_source(e))?;
        self.content_type(&mime::APPLICATION_JSON);
        Ok(self.send(body).await?)
    }

    async fn text(&mut self, body: String) -> Result<(), WebError> {
        self.content_type(&mime::TEXT_PLAIN_UTF_8);
        Ok(self.send(body).await?)
    }

    async fn html(&mut self, body: String) -> Result<(), WebError> {
        self.content_type(&mime::TEXT_HTML_UTF_8);
        Ok(self.send(body).await?)
    }

    async fn send_error(&mut self, err: &WebError) -> Result<(), WebError> {
        if !self.reset(err.status()) {
            warn!(status = err.status().as_u16(), error = %err, "headers already sent, closing connection");
            self.force_close();
            return Ok(());
        }
        self.json(&err.body()).await
    }
}
