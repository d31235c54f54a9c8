use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Reader adapter that reports the fraction of `total_size` read so far.
///
/// Every read that yields bytes invokes `on_progress` with
/// `bytes_read / total_size`. There is no buffering, so a read may return
/// fewer bytes than requested just like the wrapped reader. `total_size`
/// must be non-zero; callers handle empty downloads without this adapter.
pub struct ProgressReader<R, F> {
    inner: R,
    total_size: u64,
    bytes_read: u64,
    on_progress: F,
}

impl<R, F> ProgressReader<R, F>
where
    F: FnMut(f64),
{
    pub fn new(inner: R, total_size: u64, on_progress: F) -> Self {
        Self {
            inner,
            total_size,
            bytes_read: 0,
            on_progress,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Unclamped; may exceed 1.0 if the server sends more than it announced.
    pub fn fraction(&self) -> f64 {
        self.bytes_read as f64 / self.total_size as f64
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R, F> AsyncRead for ProgressReader<R, F>
where
    R: AsyncRead + Unpin,
    F: FnMut(f64) + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        let n = buf.filled().len() - before;
        if n > 0 {
            let this = &mut *self;
            this.bytes_read += n as u64;
            let fraction = this.fraction();
            (this.on_progress)(fraction);
        }
        Poll::Ready(Ok(()))
    }
}
