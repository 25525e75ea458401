//! Encrypted frame reader and writer
//!
//! A frame is `len || nonce || ciphertext`. The writer seals each message
//! under a fresh random nonce and writes the whole frame with one call; the
//! reader consumes exactly one frame and only returns plaintext whose tag
//! verified.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use crypto_session::{NONCE_SIZE, SessionKeys};
use shared_protocol::{FRAME_HEADER_SIZE, FrameHeader};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::with_deadline;
use crate::{ChannelConfig, ChannelError, ChannelResult};

/// Encrypts messages onto a byte stream
pub struct SecureFrameWriter<W> {
    inner: W,
    keys: Arc<SessionKeys>,
    max_message_len: usize,
    io_timeout: Option<Duration>,
    frames_written: u64,
}

impl<W> SecureFrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W, keys: Arc<SessionKeys>, config: &ChannelConfig) -> Self {
        Self {
            inner,
            keys,
            max_message_len: config.max_message_len,
            io_timeout: config.io_timeout,
            frames_written: 0,
        }
    }

    /// Seal `plaintext` into one frame and write it
    ///
    /// Returns the plaintext length. A transport error here leaves the
    /// stream in an unknown state; the connection must be closed.
    pub async fn write_message(&mut self, plaintext: &[u8]) -> ChannelResult<usize> {
        let header = FrameHeader::for_plaintext(plaintext.len(), self.max_message_len)?;
        let sealed = self.keys.seal(plaintext)?;

        let mut frame = BytesMut::with_capacity(header.wire_len());
        header.encode(&mut frame);
        frame.put_slice(&sealed.nonce);
        frame.put_slice(&sealed.ciphertext);

        let inner = &mut self.inner;
        with_deadline(self.io_timeout, "write", async move {
            inner.write_all(&frame).await.map_err(ChannelError::write)?;
            inner.flush().await.map_err(ChannelError::write)
        })
        .await?;

        self.frames_written += 1;
        trace!("Wrote frame of {} bytes", header.wire_len());

        Ok(plaintext.len())
    }

    /// Shut down the write side of the stream
    pub async fn shutdown(&mut self) -> ChannelResult<()> {
        self.inner.shutdown().await.map_err(ChannelError::write)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Decrypts messages from a byte stream
pub struct SecureFrameReader<R> {
    inner: R,
    keys: Arc<SessionKeys>,
    max_message_len: usize,
    io_timeout: Option<Duration>,
}

impl<R> SecureFrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, keys: Arc<SessionKeys>, config: &ChannelConfig) -> Self {
        Self {
            inner,
            keys,
            max_message_len: config.max_message_len,
            io_timeout: config.io_timeout,
        }
    }

    /// Read and authenticate one frame
    ///
    /// `capacity` bounds the plaintext the caller is prepared to accept. A
    /// larger frame is consumed and discarded, and the call fails with
    /// [`ChannelError::BufferTooSmall`]. End of stream before the first byte
    /// of a frame yields [`ChannelError::Closed`].
    ///
    /// A timeout may interrupt a frame halfway; the reader is unusable after
    /// any error other than `BufferTooSmall` or `Authentication`.
    pub async fn read_message(&mut self, capacity: usize) -> ChannelResult<Vec<u8>> {
        let deadline = self.io_timeout;
        with_deadline(deadline, "read", self.read_frame(capacity)).await
    }

    /// Read one frame into `buf`, returning the plaintext length
    pub async fn read_into(&mut self, buf: &mut [u8]) -> ChannelResult<usize> {
        let plaintext = self.read_message(buf.len()).await?;
        buf[..plaintext.len()].copy_from_slice(&plaintext);
        Ok(plaintext.len())
    }

    async fn read_frame(&mut self, capacity: usize) -> ChannelResult<Vec<u8>> {
        let header = self.read_header().await?;

        let mut nonce = [0u8; NONCE_SIZE];
        self.inner
            .read_exact(&mut nonce)
            .await
            .map_err(ChannelError::read)?;

        let mut ciphertext = vec![0u8; header.ciphertext_len()];
        self.inner
            .read_exact(&mut ciphertext)
            .await
            .map_err(ChannelError::read)?;

        if header.plaintext_len() > capacity {
            debug!(
                "Discarding {} byte message, capacity is {}",
                header.plaintext_len(),
                capacity
            );
            return Err(ChannelError::BufferTooSmall {
                needed: header.plaintext_len(),
                capacity,
            });
        }

        let plaintext = self.keys.open(&nonce, &ciphertext)?;
        trace!("Read frame of {} bytes", header.wire_len());

        Ok(plaintext)
    }

    async fn read_header(&mut self) -> ChannelResult<FrameHeader> {
        let mut prefix = [0u8; FRAME_HEADER_SIZE];
        let mut filled = 0;

        while filled < FRAME_HEADER_SIZE {
            let n = self
                .inner
                .read(&mut prefix[filled..])
                .await
                .map_err(ChannelError::read)?;

            if n == 0 {
                if filled == 0 {
                    return Err(ChannelError::Closed);
                }
                return Err(ChannelError::read(std::io::ErrorKind::UnexpectedEof.into()));
            }
            filled += n;
        }

        Ok(FrameHeader::decode(prefix, self.max_message_len)?)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
