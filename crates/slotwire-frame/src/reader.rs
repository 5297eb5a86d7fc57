use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};

use crate::codec::{decode_frame, frame_len, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Partial reads are buffered until a whole frame is available.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at end of input, even if
    /// part of a frame is still buffered; check [`FrameReader::buffered`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, &self.config)? {
                return Ok(frame);
            }
            self.fill()?;
        }
    }

    /// Read every complete frame currently buffered, as raw bytes.
    ///
    /// Blocks until at least one frame is available. The result can be handed
    /// to a session's `recv` in one call.
    pub fn read_batch(&mut self) -> Result<Bytes> {
        loop {
            let mut end = 0;
            while let Some(len) = frame_len(&self.buf[end..], &self.config)? {
                end += len;
            }
            if end > 0 {
                return Ok(self.buf.split_to(end).freeze());
            }
            self.fill()?;
        }
    }

    /// Append one read's worth of bytes to the buffer.
    fn fill(&mut self) -> Result<()> {
        let start = self.buf.len();
        self.buf.resize(start + READ_CHUNK_SIZE, 0);
        let read = loop {
            match self.inner.read(&mut self.buf[start..]) {
                Ok(n) => break Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => break Err(FrameError::Io(err)),
            }
        };
        let read = read.inspect_err(|_| self.buf.truncate(start))?;
        self.buf.truncate(start + read);

        if read == 0 {
            return Err(FrameError::ConnectionClosed);
        }
        Ok(())
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Applies to frames not yet decoded.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
