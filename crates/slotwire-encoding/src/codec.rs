//! Typed payload codecs.
//!
//! A [`Codec`] knows how large an item will be on the wire, how to append it
//! to a buffer, and how to read it back from the front of a buffer. Every
//! built-in encoding is self-delimiting, so several items can be written
//! back to back and decoded in order.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Result;
use crate::varint;

/// Size prediction, encoding and decoding for one item type.
pub trait Codec: Send + Sync + 'static {
    /// The decoded item.
    type Item: Send + 'static;

    /// Number of bytes `encode` will append for `item`.
    fn encoded_len(&self, item: &Self::Item) -> usize;

    /// Append `item` to `dst`.
    fn encode(&self, item: &Self::Item, dst: &mut BytesMut);

    /// Read one item from the front of `src`, advancing it.
    fn decode(&self, src: &mut Bytes) -> Result<Self::Item>;

    /// Encode `item` into a standalone buffer sized up front.
    fn to_bytes(&self, item: &Self::Item) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.encoded_len(item));
        self.encode(item, &mut dst);
        dst.freeze()
    }
}

impl<C: Codec> Codec for Arc<C> {
    type Item = C::Item;

    fn encoded_len(&self, item: &C::Item) -> usize {
        (**self).encoded_len(item)
    }

    fn encode(&self, item: &C::Item, dst: &mut BytesMut) {
        (**self).encode(item, dst)
    }

    fn decode(&self, src: &mut Bytes) -> Result<C::Item> {
        (**self).decode(src)
    }
}

/// Opaque length-prefixed bytes. The default codec for untyped methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct Raw;

impl Codec for Raw {
    type Item = Bytes;

    fn encoded_len(&self, item: &Bytes) -> usize {
        varint::buffer_len(item)
    }

    fn encode(&self, item: &Bytes, dst: &mut BytesMut) {
        varint::put_buffer(dst, item);
    }

    fn decode(&self, src: &mut Bytes) -> Result<Bytes> {
        varint::get_buffer(src)
    }
}

/// Length-prefixed UTF-8 string.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8;

impl Codec for Utf8 {
    type Item = String;

    fn encoded_len(&self, item: &String) -> usize {
        varint::string_len(item)
    }

    fn encode(&self, item: &String, dst: &mut BytesMut) {
        varint::put_string(dst, item);
    }

    fn decode(&self, src: &mut Bytes) -> Result<String> {
        varint::get_string(src)
    }
}

/// Compact unsigned integer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uint;

impl Codec for Uint {
    type Item = u64;

    fn encoded_len(&self, item: &u64) -> usize {
        varint::uint_len(*item)
    }

    fn encode(&self, item: &u64, dst: &mut BytesMut) {
        varint::put_uint(dst, *item);
    }

    fn decode(&self, src: &mut Bytes) -> Result<u64> {
        varint::get_uint(src)
    }
}

/// Zig-zag encoded signed integer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Int;

impl Codec for Int {
    type Item = i64;

    fn encoded_len(&self, item: &i64) -> usize {
        varint::int_len(*item)
    }

    fn encode(&self, item: &i64, dst: &mut BytesMut) {
        varint::put_int(dst, *item);
    }

    fn decode(&self, src: &mut Bytes) -> Result<i64> {
        varint::get_int(src)
    }
}

/// Single byte, `0` or `1`. Any non-zero byte decodes as `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bool;

impl Codec for Bool {
    type Item = bool;

    fn encoded_len(&self, _item: &bool) -> usize {
        1
    }

    fn encode(&self, item: &bool, dst: &mut BytesMut) {
        dst.put_u8(u8::from(*item));
    }

    fn decode(&self, src: &mut Bytes) -> Result<bool> {
        varint::ensure(src, 1)?;
        Ok(src.get_u8() != 0)
    }
}

/// IEEE-754 double, little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float64;

impl Codec for Float64 {
    type Item = f64;

    fn encoded_len(&self, _item: &f64) -> usize {
        8
    }

    fn encode(&self, item: &f64, dst: &mut BytesMut) {
        dst.put_f64_le(*item);
    }

    fn decode(&self, src: &mut Bytes) -> Result<f64> {
        varint::ensure(src, 8)?;
        Ok(src.get_f64_le())
    }
}

/// Ordered sequence: compact item count followed by each item.
///
/// Stream `DATA` payloads use this layout: the writer joins items it encoded
/// earlier with [`Array::join`], the reader decodes them with `Array`.
#[derive(Clone, Copy, Default)]
pub struct Array<C>(pub C);

impl<C> Array<C> {
    /// Array payload built from items already encoded with the item codec.
    pub fn join(encoded: &[Bytes]) -> Bytes {
        let len = varint::uint_len(encoded.len() as u64) + encoded.iter().map(Bytes::len).sum::<usize>();
        let mut dst = BytesMut::with_capacity(len);
        varint::put_uint(&mut dst, encoded.len() as u64);
        for item in encoded {
            dst.extend_from_slice(item);
        }
        dst.freeze()
    }
}

impl<C> fmt::Debug for Array<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Array(..)")
    }
}

impl<C: Codec> Codec for Array<C> {
    type Item = Vec<C::Item>;

    fn encoded_len(&self, items: &Vec<C::Item>) -> usize {
        varint::uint_len(items.len() as u64)
            + items
                .iter()
                .map(|item| self.0.encoded_len(item))
                .sum::<usize>()
    }

    fn encode(&self, items: &Vec<C::Item>, dst: &mut BytesMut) {
        varint::put_uint(dst, items.len() as u64);
        for item in items {
            self.0.encode(item, dst);
        }
    }

    fn decode(&self, src: &mut Bytes) -> Result<Vec<C::Item>> {
        let count = varint::get_len(src)?;
        // Each item takes at least one byte; cap the reservation accordingly.
        let mut items = Vec::with_capacity(count.min(src.remaining()));
        for _ in 0..count {
            items.push(self.0.decode(src)?);
        }
        Ok(items)
    }
}
