//! Passing a connection on to a protocol that is not request/response.
//!
//! After a WebSocket upgrade, or once an event stream started, the
//! connection loop stops reading requests and gives the socket halves to a
//! [`HandOff`] collaborator. From then on the collaborator owns the socket;
//! the connection loop never closes it.

use bytes::BytesMut;
use http::Request;
use std::fmt;
use tokio::io::AsyncRead;

use crate::connection::BoxWriter;

/// The read half of a connection with the socket type erased.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeKind {
    /// `Connection: upgrade` + `Upgrade: websocket`, answered with `101 Switching Protocols`
    WebSocket,
    /// A `text/event-stream` response whose headers were sent
    EventStream,
}

/// A connection taken over from the HTTP loop.
pub struct Upgraded {
    pub kind: UpgradeKind,
    /// The upgrade request head; `None` for event streams
    pub head: Option<Request<()>>,
    pub reader: BoxReader,
    pub writer: BoxWriter,
    /// Bytes already read off the socket but not consumed by the HTTP decoder
    pub read_buf: BytesMut,
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded")
            .field("kind", &self.kind)
            .field("head", &self.head)
            .field("read_buf", &self.read_buf.len())
            .finish_non_exhaustive()
    }
}

/// Receives connections that leave the HTTP loop.
///
/// Called on the connection task; implementations that need to keep the
/// socket alive spawn their own task.
pub trait HandOff: Send + Sync {
    fn hand_off(&self, upgraded: Upgraded);
}

impl<F> HandOff for F
where
    F: Fn(Upgraded) + Send + Sync,
{
    fn hand_off(&self, upgraded: Upgraded) {
        (self)(upgraded);
    }
}
