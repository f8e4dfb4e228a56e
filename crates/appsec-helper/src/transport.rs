//! Byte transport under the broker.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

/// Size of the scratch buffer used when discarding bytes.
const DISCARD_CHUNK: usize = 4096;

/// A bidirectional byte stream with deadline-bounded reads.
///
/// Reads return how many bytes were filled. A short count means the peer
/// closed the stream or the deadline passed; it is never an error on its own.
#[async_trait]
pub trait Transport: Send {
    /// Fills `buf` until it is full, the stream ends or `deadline` passes.
    async fn recv(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> io::Result<usize>;

    /// Writes all of `buf`, returning the number of bytes written.
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Reads and drops `len` bytes, returning how many were consumed.
    async fn discard(&mut self, len: usize, deadline: Option<Instant>) -> io::Result<usize> {
        let mut scratch = [0u8; DISCARD_CHUNK];
        let mut consumed = 0;
        while consumed < len {
            let want = (len - consumed).min(DISCARD_CHUNK);
            let n = self.recv(&mut scratch[..want], deadline).await?;
            consumed += n;
            if n < want {
                break;
            }
        }
        Ok(consumed)
    }
}

/// [`Transport`] over any tokio stream: Unix sockets in production, duplex
/// pipes in tests.
#[derive(Debug)]
pub struct StreamTransport<S> {
    inner: S,
}

impl<S> StreamTransport<S> {
    #[must_use]
    pub const fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.inner.read(&mut buf[filled..]);
            let n = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, read).await {
                    Ok(result) => result?,
                    Err(_) => break,
                },
                None => read.await?,
            };
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_all(buf).await?;
        self.inner.flush().await?;
        Ok(buf.len())
    }
}
