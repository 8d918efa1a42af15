use crate::codec::ResponseEncoder;
use crate::protocol::{Message, PayloadSize, ResponseHead, SendError};
use bytes::BytesMut;
use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Encoder;

/// The write half of a connection, type-erased so a [`crate::connection::ResponseWriter`]
/// does not carry the socket type.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Encodes response messages into a buffer and flushes it to the socket.
pub struct MessageWriter {
    writer: BoxWriter,
    buffer: BytesMut,
    encoder: ResponseEncoder,
}

impl fmt::Debug for MessageWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageWriter").field("buffered", &self.buffer.len()).field("encoder", &self.encoder).finish_non_exhaustive()
    }
}

impl MessageWriter {
    pub fn with_capacity(writer: BoxWriter, buffer_size: usize) -> Self {
        Self { writer, buffer: BytesMut::with_capacity(buffer_size), encoder: ResponseEncoder::new() }
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut BoxWriter {
        &mut self.writer
    }

    pub fn into_inner(self) -> BoxWriter {
        self.writer
    }

    #[inline]
    pub fn write(&mut self, item: Message<(ResponseHead, PayloadSize)>) -> Result<(), SendError> {
        self.encoder.encode(item, &mut self.buffer)
    }

    #[inline]
    pub fn write_head_only(&mut self, head: ResponseHead, payload_size: PayloadSize) -> Result<(), SendError> {
        self.encoder.encode_head_only(head, payload_size, &mut self.buffer)
    }

    /// Writes raw bytes that bypass the encoder, such as an interim `100 Continue`.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        self.flush().await?;
        self.writer.write_all(bytes).await?;
        Ok(self.writer.flush().await?)
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<(), SendError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.writer.write_all(self.buffer.as_ref()).await?;
        self.buffer.clear();
        Ok(self.writer.flush().await?)
    }
}
