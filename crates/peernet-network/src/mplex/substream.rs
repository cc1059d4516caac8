use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use super::header::{Frame, PacketType};
use super::muxer::Muxer;

/// One logical duplex channel carried by a [`Muxer`].
///
/// Reads drain a bounded queue of inbound messages. A substream whose
/// queue overflows is reset; its reader gets the queued messages and then
/// `ConnectionReset`. Writes are staged in memory and each flush sends the
/// staged bytes as one message frame.
pub struct Substream {
    id: u64,
    name: String,
    initiator: bool,
    muxer: Arc<Muxer>,
    inbound: mpsc::Receiver<Bytes>,
    reset: Arc<AtomicBool>,
    current: Bytes,
    eof: bool,
    stage: BytesMut,
    pending: Option<BoxFuture<'static, io::Result<()>>>,
    write_closed: bool,
}

impl Substream {
    pub(crate) fn new(
        muxer: Arc<Muxer>,
        id: u64,
        name: String,
        initiator: bool,
        inbound: mpsc::Receiver<Bytes>,
        reset: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            name,
            initiator,
            muxer,
            inbound,
            reset,
            current: Bytes::new(),
            eof: false,
            stage: BytesMut::new(),
            pending: None,
            write_closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if this side opened the substream.
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// True once either side reset the substream.
    pub fn is_reset(&self) -> bool {
        self.reset.load(Ordering::Acquire)
    }

    fn message_type(&self) -> PacketType {
        if self.initiator {
            PacketType::MessageInitiator
        } else {
            PacketType::MessageReceiver
        }
    }

    fn close_type(&self) -> PacketType {
        if self.initiator {
            PacketType::CloseInitiator
        } else {
            PacketType::CloseReceiver
        }
    }

    fn send(&self, frame: Frame) -> BoxFuture<'static, io::Result<()>> {
        let muxer = Arc::clone(&self.muxer);
        Box::pin(async move { muxer.send_frame(frame).await.map_err(io::Error::from) })
    }

    /// Drive the in-flight frame, then turn staged bytes into the next one.
    fn poll_send_staged(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            if let Some(pending) = self.pending.as_mut() {
                let result = ready!(pending.as_mut().poll(cx));
                self.pending = None;
                result?;
            }
            if self.stage.is_empty() {
                return Poll::Ready(Ok(()));
            }
            let payload = self.stage.split().freeze();
            let frame = Frame::new(self.id, self.message_type(), payload);
            self.pending = Some(self.send(frame));
        }
    }
}

impl AsyncRead for Substream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.current.is_empty() {
                let n = this.current.len().min(buf.remaining());
                buf.put_slice(&this.current[..n]);
                this.current.advance(n);
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                if this.is_reset() {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "substream reset",
                    )));
                }
                return Poll::Ready(Ok(()));
            }
            match ready!(this.inbound.poll_recv(cx)) {
                Some(message) => this.current = message,
                None => this.eof = true,
            }
        }
    }
}

impl AsyncWrite for Substream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if this.is_reset() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "substream reset",
            )));
        }
        if this.write_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "substream closed for writing",
            )));
        }
        let max = this.muxer.config().max_message_size.max(1);
        if this.stage.len() >= max {
            ready!(this.poll_send_staged(cx))?;
        }
        let n = buf.len().min(max - this.stage.len());
        this.stage.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_send_staged(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_send_staged(cx))?;
        if !this.write_closed {
            this.write_closed = true;
            let close = Frame::new(this.id, this.close_type(), Bytes::new());
            this.pending = Some(this.send(close));
            return this.poll_send_staged(cx);
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for Substream {
    fn drop(&mut self) {
        self.muxer.forget(self.id);
        if self.write_closed || self.is_reset() || self.muxer.is_disposed() {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let close = self.send(Frame::new(self.id, self.close_type(), Bytes::new()));
            let id = self.id;
            handle.spawn(async move {
                if let Err(e) = close.await {
                    tracing::trace!(stream_id = id, error = %e, "close frame not sent");
                }
            });
        }
    }
}

impl std::fmt::Debug for Substream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Substream")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("initiator", &self.initiator)
            .finish_non_exhaustive()
    }
}
