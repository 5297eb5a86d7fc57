use bytes::{Buf, Bytes, BytesMut};
use slotwire_encoding::{varint, CodecError};

use crate::error::{FrameError, Result};
use crate::flags;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame routing header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Registered method slot.
    pub method: u64,
    /// Request or stream id within the method.
    pub id: u64,
    /// Message class, see [`crate::flags`].
    pub bitfield: u64,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub method: u64,
    pub id: u64,
    pub bitfield: u64,
    /// Present iff [`flags::carries_payload`] holds for `bitfield`.
    pub payload: Option<Bytes>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(method: u64, id: u64, bitfield: u64, payload: Option<Bytes>) -> Self {
        Self {
            method,
            id,
            bitfield,
            payload,
        }
    }

    pub fn header(&self) -> Header {
        Header {
            method: self.method,
            id: self.id,
            bitfield: self.bitfield,
        }
    }

    /// The payload, or an empty buffer for control frames.
    pub fn payload_or_empty(&self) -> Bytes {
        self.payload.clone().unwrap_or_default()
    }

    /// The total wire size of this frame under `config`.
    pub fn wire_size(&self, config: &FrameConfig) -> usize {
        let magic = config.magic.map_or(0, |m| varint::uint_len(m as u64));
        let header = varint::uint_len(self.method)
            + varint::uint_len(self.id)
            + varint::uint_len(self.bitfield);
        let payload = if flags::carries_payload(self.bitfield) {
            varint::buffer_len(self.payload.as_deref().unwrap_or_default())
        } else {
            0
        };
        magic + header + payload
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Optional protocol magic written before every header.
    pub magic: Option<u8>,
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            magic: None,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Encode a frame into the wire format.
///
/// Wire format (every field a compact unsigned integer):
/// ```text
/// ┌─────────┬────────┬────┬──────────┬─────────────────────────────┐
/// │ [magic] │ method │ id │ bitfield │ [payload len + payload]     │
/// └─────────┴────────┴────┴──────────┴─────────────────────────────┘
/// ```
/// The payload is only written for classes that carry one; a missing payload
/// on such a class is written as zero bytes.
pub fn encode_frame(frame: &Frame, config: &FrameConfig, dst: &mut BytesMut) -> Result<()> {
    let payload = frame.payload.as_deref().unwrap_or_default();
    if payload.len() > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: config.max_payload_size,
        });
    }

    dst.reserve(frame.wire_size(config));
    if let Some(magic) = config.magic {
        varint::put_uint(dst, magic as u64);
    }
    varint::put_uint(dst, frame.method);
    varint::put_uint(dst, frame.id);
    varint::put_uint(dst, frame.bitfield);
    if flags::carries_payload(frame.bitfield) {
        varint::put_buffer(dst, payload);
    }
    Ok(())
}

/// Length of the next frame in `src`, or `None` if it is not complete yet.
pub fn frame_len(src: &[u8], config: &FrameConfig) -> Result<Option<usize>> {
    match parse_header(src, config) {
        Ok(Some((_, header_len, payload_len))) => {
            let total = header_len + payload_len;
            if src.len() < total {
                return Ok(None);
            }
            Ok(Some(total))
        }
        Ok(None) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Frame>> {
    let Some((header, header_len, payload_len)) = parse_header(src, config)? else {
        return Ok(None); // Need more data
    };

    let total = header_len + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(header_len);
    let payload = if flags::carries_payload(header.bitfield) {
        Some(src.split_to(payload_len).freeze())
    } else {
        None
    };

    Ok(Some(Frame {
        method: header.method,
        id: header.id,
        bitfield: header.bitfield,
        payload,
    }))
}

/// Decode a buffer that must hold zero or more complete frames back to back.
pub fn decode_all(src: &[u8], config: &FrameConfig) -> Result<Vec<Frame>> {
    let mut buf = BytesMut::from(src);
    let mut frames = Vec::new();
    while !buf.is_empty() {
        match decode_frame(&mut buf, config)? {
            Some(frame) => frames.push(frame),
            None => {
                return Err(FrameError::Truncated {
                    remaining: buf.len(),
                })
            }
        }
    }
    Ok(frames)
}

/// Parse the header at the front of `src` without consuming it.
///
/// Returns the header, its encoded length (including the payload length
/// prefix), and the payload length.
fn parse_header(src: &[u8], config: &FrameConfig) -> Result<Option<(Header, usize, usize)>> {
    let mut cursor = src;
    match read_header(&mut cursor, config) {
        Ok((header, payload_len)) => {
            if payload_len > config.max_payload_size {
                return Err(FrameError::PayloadTooLarge {
                    size: payload_len,
                    max: config.max_payload_size,
                });
            }
            Ok(Some((header, src.len() - cursor.len(), payload_len)))
        }
        Err(FrameError::Malformed(CodecError::UnexpectedEnd { .. })) => Ok(None),
        Err(err) => Err(err),
    }
}

fn read_header(cursor: &mut &[u8], config: &FrameConfig) -> Result<(Header, usize)> {
    if let Some(expected) = config.magic {
        let found = varint::get_uint(cursor)?;
        if found != expected as u64 {
            return Err(FrameError::InvalidMagic { expected, found });
        }
    }

    let header = Header {
        method: varint::get_uint(cursor)?,
        id: varint::get_uint(cursor)?,
        bitfield: varint::get_uint(cursor)?,
    };
    let payload_len = if flags::carries_payload(header.bitfield) {
        varint::get_len(cursor)?
    } else {
        0
    };
    Ok((header, payload_len))
}
