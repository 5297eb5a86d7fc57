use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Writes frames to any `Write` stream, flushing after each write.
///
/// A session sink usually hands over whole batches with
/// [`FrameWriter::write_raw`]; [`FrameWriter::write_frame`] encodes one frame
/// first.
pub struct FrameWriter<T> {
    inner: T,
    scratch: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            scratch: BytesMut::new(),
            config,
        }
    }

    /// Encode and write one frame (blocking). Nothing is written if the
    /// payload exceeds the configured limit.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.scratch.clear();
        encode_frame(frame, &self.config, &mut self.scratch)?;
        let encoded = self.scratch.split().freeze();
        self.write_raw(&encoded)
    }

    /// Write already-encoded frame bytes.
    ///
    /// Retries on `Interrupted` and `WouldBlock`, so a non-blocking stream
    /// spins until the bytes are accepted.
    pub fn write_raw(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            match self.inner.write(bytes) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => bytes = &bytes[n..],
                Err(err) if retryable(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if retryable(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
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

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

fn retryable(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
}
