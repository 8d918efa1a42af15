use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt, channel::mpsc};
use http_body::{Body, Frame, SizeHint};
use http_body_util::BodyExt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, error};

type PayloadStreamItem = Result<Message<(RequestHeader, PayloadSize)>, ParseError>;

pub(crate) enum BodyRequestSignal {
    RequestData,
    Enough,
}

/// Producer half: reads payload items from the connection on demand.
pub(crate) struct BodySender<'conn, S> {
    payload_stream: &'conn mut S,
    signal_receiver: mpsc::Receiver<BodyRequestSignal>,
    data_sender: mpsc::Sender<Result<PayloadItem, ParseError>>,
    eof: bool,
}

impl<'conn, S> BodySender<'conn, S>
where
    S: Stream<Item = PayloadStreamItem> + Unpin,
{
    fn new(
        payload_stream: &'conn mut S,
        signal_receiver: mpsc::Receiver<BodyRequestSignal>,
        data_sender: mpsc::Sender<Result<PayloadItem, ParseError>>,
    ) -> Self {
        Self { payload_stream, signal_receiver, data_sender, eof: false }
    }

    /// Serves read requests from the [`ReqBody`] until it is closed, dropped
    /// or the payload reaches EOF, then drains the remainder.
    pub(crate) async fn start(&mut self) -> Result<(), ParseError> {
        if self.eof {
            return Ok(());
        }

        while let Some(signal) = self.signal_receiver.next().await {
            match signal {
                BodyRequestSignal::RequestData => match self.read_data().await {
                    Ok(payload_item) => {
                        self.eof = payload_item.is_eof();
                        if let Err(e) = self.data_sender.send(Ok(payload_item)).await {
                            debug!("request body receiver went away, {}", e);
                            break;
                        }

                        if self.eof {
                            return Ok(());
                        }
                    }

                    Err(e) => {
                        error!("failed to read data from body stream, {}", e);
                        let reason = e.to_string();
                        if let Err(send_error) = self.data_sender.send(Err(e)).await {
                            debug!("failed to send body error through channel, {}", send_error);
                        }
                        return Err(ParseError::invalid_body(reason));
                    }
                },

                BodyRequestSignal::Enough => {
                    break;
                }
            }
        }

        self.skip_data().await
    }

    async fn read_data(&mut self) -> Result<PayloadItem, ParseError> {
        match self.payload_stream.next().await {
            Some(Ok(Message::Payload(payload_item))) => Ok(payload_item),
            Some(Ok(Message::Header(_))) => {
                error!("should not receive header in BodySender");
                Err(ParseError::invalid_body("should not receive header in BodySender"))
            }
            Some(Err(e)) => Err(e),
            None => Err(ParseError::invalid_body("connection closed before the request body was complete")),
        }
    }

    /// Reads and drops whatever is left of the body, leaving the stream at
    /// the start of the next request.
    pub(crate) async fn skip_data(&mut self) -> Result<(), ParseError> {
        let mut size: usize = 0;
        while !self.eof {
            match self.read_data().await? {
                PayloadItem::Eof => self.eof = true,
                PayloadItem::Chunk(bytes) => size += bytes.len(),
            }
        }
        if size > 0 {
            debug!(size, "skipped unread request body");
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }
}

/// The request body stream handed to handlers.
///
/// Bounded by the declared `Content-Length`. Reading is lazy: nothing is read
/// off the socket until the body is polled. Call [`ReqBody::close`] once the
/// application is done with it; the connection discards anything left.
#[derive(Debug)]
pub struct ReqBody {
    signal_sender: mpsc::Sender<BodyRequestSignal>,
    data_receiver: mpsc::Receiver<Result<PayloadItem, ParseError>>,
    payload_size: PayloadSize,
    in_flight: bool,
    end: bool,
}

impl ReqBody {
    pub(crate) fn channel<S>(payload_stream: &mut S, payload_size: PayloadSize) -> (ReqBody, BodySender<'_, S>)
    where
        S: Stream<Item = PayloadStreamItem> + Unpin,
    {
        let (signal_sender, signal_receiver) = mpsc::channel(8);
        let (data_sender, data_receiver) = mpsc::channel(8);

        let body = ReqBody { signal_sender, data_receiver, payload_size, in_flight: false, end: payload_size.is_empty() };
        (body, BodySender::new(payload_stream, signal_receiver, data_sender))
    }

    /// A body with no content that is not bound to a connection.
    pub fn empty() -> ReqBody {
        let (signal_sender, _) = mpsc::channel(1);
        let (_, data_receiver) = mpsc::channel(1);
        ReqBody { signal_sender, data_receiver, payload_size: PayloadSize::Empty, in_flight: false, end: true }
    }

    /// The declared length of the body, `None` when unknown
    pub fn content_length(&self) -> Option<u64> {
        match self.payload_size {
            PayloadSize::Length(length) => Some(length),
            PayloadSize::Empty => Some(0),
            PayloadSize::Chunked | PayloadSize::UntilClose => None,
        }
    }

    /// Stops reading; further polls yield end of stream.
    pub fn close(&mut self) {
        if self.end {
            return;
        }
        self.end = true;
        if let Err(e) = self.signal_sender.try_send(BodyRequestSignal::Enough) {
            debug!("body sender already finished, {}", e);
        }
        self.signal_sender.close_channel();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.end
    }

    /// Reads the remaining body into a single buffer.
    pub async fn bytes(self) -> Result<Bytes, ParseError> {
        Ok(self.collect().await?.to_bytes())
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        if this.end {
            return Poll::Ready(None);
        }

        if !this.in_flight {
            match Pin::new(&mut this.signal_sender).poll_ready(cx) {
                Poll::Ready(Ok(())) => {
                    if let Err(e) = Pin::new(&mut this.signal_sender).start_send(BodyRequestSignal::RequestData) {
                        error!("failed to send request_more through channel, {}", e);
                        return Poll::Ready(Some(Err(ParseError::invalid_body("failed to send signal when receive body data"))));
                    }
                    this.in_flight = true;
                }
                Poll::Ready(Err(e)) => {
                    error!("failed to prepare request_more through channel, {}", e);
                    return Poll::Ready(Some(Err(ParseError::invalid_body("failed to send signal when receive body data"))));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        match this.data_receiver.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(PayloadItem::Chunk(bytes)))) => {
                this.in_flight = false;
                Poll::Ready(Some(Ok(Frame::data(bytes))))
            }
            Poll::Ready(Some(Ok(PayloadItem::Eof))) => {
                this.in_flight = false;
                this.end = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(e))) => {
                this.in_flight = false;
                this.end = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.in_flight = false;
                this.end = true;
                Poll::Ready(Some(Err(ParseError::invalid_body("body stream should not receive None when receive data"))))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.end
    }

    fn size_hint(&self) -> SizeHint {
        self.payload_size.into()
    }
}

impl From<PayloadSize> for SizeHint {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => SizeHint::with_exact(length),
            PayloadSize::Chunked | PayloadSize::UntilClose => SizeHint::new(),
            PayloadSize::Empty => SizeHint::with_exact(0),
        }
    }
}
