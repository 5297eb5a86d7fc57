use slotwire_encoding::CodecError;

/// Errors that can occur during frame encoding/decoding.
///
/// All of these mean the byte stream is malformed; callers should treat the
/// session that produced them as unusable.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header starts with the wrong protocol magic.
    #[error("invalid frame magic (expected {expected:#04x}, found {found:#x})")]
    InvalidMagic { expected: u8, found: u64 },

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The buffer ends in the middle of a frame.
    #[error("truncated frame ({remaining} trailing bytes)")]
    Truncated { remaining: usize },

    /// A header field or a control payload could not be decoded.
    #[error("malformed frame: {0}")]
    Malformed(#[from] CodecError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
