use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, Bytes};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::BoxIo;

pin_project! {
    /// A socket handed over after a `101 Switching Protocols` or `CONNECT`
    /// response.
    ///
    /// The client no longer owns it. Bytes the server sent after the response
    /// head are replayed first on read. Request bytes still waiting in the
    /// write buffer are flushed before anything written through this handle.
    pub struct Upgraded {
        read_prefix: Bytes,
        write_prefix: Bytes,
        #[pin]
        io: BoxIo,
    }
}

impl Upgraded {
    pub(crate) fn new(io: BoxIo, read_prefix: Bytes, write_prefix: Bytes) -> Self {
        Self {
            read_prefix,
            write_prefix,
            io,
        }
    }

    /// Bytes received past the response head that have not been read yet.
    pub fn read_prefix(&self) -> &[u8] {
        &self.read_prefix
    }

    /// Split into the unread prefix and the raw socket.
    ///
    /// Any unflushed request bytes are lost.
    pub fn into_parts(self) -> (Bytes, BoxIo) {
        (self.read_prefix, self.io)
    }
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded")
            .field("read_prefix", &self.read_prefix.len())
            .field("write_prefix", &self.write_prefix.len())
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Upgraded {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if !this.read_prefix.is_empty() {
            let n = this.read_prefix.len().min(buf.remaining());
            buf.put_slice(&this.read_prefix[..n]);
            this.read_prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        this.io.poll_read(cx, buf)
    }
}

impl AsyncWrite for Upgraded {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut this = self.project();
        while !this.write_prefix.is_empty() {
            let n = ready!(this.io.as_mut().poll_write(cx, &this.write_prefix[..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.write_prefix.advance(n);
        }
        this.io.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        while !this.write_prefix.is_empty() {
            let n = ready!(this.io.as_mut().poll_write(cx, &this.write_prefix[..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            this.write_prefix.advance(n);
        }
        this.io.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().io.poll_shutdown(cx)
    }
}
