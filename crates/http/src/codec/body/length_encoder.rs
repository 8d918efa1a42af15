use crate::protocol::{PayloadItem, SendError};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

/// Writes a body of a declared length and refuses to go past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    declared: u64,
    remaining: u64,
}

impl LengthEncoder {
    pub fn new(length: u64) -> Self {
        Self { declared: length, remaining: length }
    }
}

impl Encoder<PayloadItem> for LengthEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            PayloadItem::Chunk(bytes) => {
                let len = bytes.len() as u64;
                if len > self.remaining {
                    return Err(SendError::LengthExceeded { declared: self.declared, attempted: self.declared - self.remaining + len });
                }
                dst.put_slice(&bytes);
                self.remaining -= len;
                Ok(())
            }
            PayloadItem::Eof => Ok(()),
        }
    }
}
