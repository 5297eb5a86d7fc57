//! Compact binary codecs for slotwire payloads.
//!
//! - [`varint`]: compact integers and length-prefixed primitives
//! - [`codec`]: the [`Codec`] trait and built-in item codecs
//! - [`value`]: a self-describing [`Value`] for untyped payloads

pub mod codec;
pub mod error;
pub mod value;
pub mod varint;

pub use codec::{Array, Bool, Codec, Float64, Int, Raw, Uint, Utf8};
pub use error::{CodecError, Result};
pub use value::{Value, ValueCodec};
