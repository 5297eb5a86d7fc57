//! Compact integer and length-prefixed primitives.
//!
//! Unsigned integers use a one-byte fast path:
//!
//! ```text
//! 0x00..=0xfc   value itself (1 byte)
//! 0xfd          u16 little-endian follows (3 bytes)
//! 0xfe          u32 little-endian follows (5 bytes)
//! 0xff          u64 little-endian follows (9 bytes)
//! ```
//!
//! Signed integers are zig-zag mapped onto the unsigned form. Strings and
//! byte buffers are a compact length followed by the raw bytes.

use bytes::{Buf, BufMut, Bytes};

use crate::error::{CodecError, Result};

const U16_MARKER: u8 = 0xfd;
const U32_MARKER: u8 = 0xfe;
const U64_MARKER: u8 = 0xff;

/// Encoded size of an unsigned integer.
pub fn uint_len(n: u64) -> usize {
    if n < U16_MARKER as u64 {
        1
    } else if n <= u16::MAX as u64 {
        3
    } else if n <= u32::MAX as u64 {
        5
    } else {
        9
    }
}

/// Append an unsigned integer.
pub fn put_uint(dst: &mut impl BufMut, n: u64) {
    if n < U16_MARKER as u64 {
        dst.put_u8(n as u8);
    } else if n <= u16::MAX as u64 {
        dst.put_u8(U16_MARKER);
        dst.put_u16_le(n as u16);
    } else if n <= u32::MAX as u64 {
        dst.put_u8(U32_MARKER);
        dst.put_u32_le(n as u32);
    } else {
        dst.put_u8(U64_MARKER);
        dst.put_u64_le(n);
    }
}

/// Read an unsigned integer.
pub fn get_uint(src: &mut impl Buf) -> Result<u64> {
    ensure(src, 1)?;
    match src.get_u8() {
        U16_MARKER => {
            ensure(src, 2)?;
            Ok(src.get_u16_le() as u64)
        }
        U32_MARKER => {
            ensure(src, 4)?;
            Ok(src.get_u32_le() as u64)
        }
        U64_MARKER => {
            ensure(src, 8)?;
            Ok(src.get_u64_le())
        }
        small => Ok(small as u64),
    }
}

/// Read an unsigned integer and check that it fits a `usize` length.
pub fn get_len(src: &mut impl Buf) -> Result<usize> {
    let n = get_uint(src)?;
    usize::try_from(n).map_err(|_| CodecError::LengthOverflow(n))
}

fn zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn unzigzag(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

pub fn int_len(n: i64) -> usize {
    uint_len(zigzag(n))
}

pub fn put_int(dst: &mut impl BufMut, n: i64) {
    put_uint(dst, zigzag(n));
}

pub fn get_int(src: &mut impl Buf) -> Result<i64> {
    get_uint(src).map(unzigzag)
}

/// Encoded size of a length-prefixed byte buffer.
pub fn buffer_len(data: &[u8]) -> usize {
    uint_len(data.len() as u64) + data.len()
}

pub fn put_buffer(dst: &mut impl BufMut, data: &[u8]) {
    put_uint(dst, data.len() as u64);
    dst.put_slice(data);
}

/// Read a length-prefixed byte buffer without copying.
pub fn get_buffer(src: &mut Bytes) -> Result<Bytes> {
    let len = get_len(src)?;
    ensure(src, len)?;
    Ok(src.split_to(len))
}

pub fn string_len(s: &str) -> usize {
    buffer_len(s.as_bytes())
}

pub fn put_string(dst: &mut impl BufMut, s: &str) {
    put_buffer(dst, s.as_bytes());
}

pub fn get_string(src: &mut Bytes) -> Result<String> {
    let raw = get_buffer(src)?;
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Fail with `UnexpectedEnd` unless `needed` bytes remain.
pub fn ensure(src: &impl Buf, needed: usize) -> Result<()> {
    if src.remaining() < needed {
        return Err(CodecError::UnexpectedEnd {
            needed,
            remaining: src.remaining(),
        });
    }
    Ok(())
}
