//! Self-describing values for untyped payloads.
//!
//! Each value starts with a compact tag:
//!
//! | tag | variant     | body                                    |
//! |-----|-------------|-----------------------------------------|
//! | 0   | `Null`      | none                                    |
//! | 1   | `Undefined` | none                                    |
//! | 2   | `Bool`      | one byte                                |
//! | 3   | `String`    | length-prefixed UTF-8                   |
//! | 4   | `Bytes`     | length-prefixed bytes                   |
//! | 5   | `Uint`      | compact unsigned integer                |
//! | 6   | `Int`       | zig-zag signed integer                  |
//! | 7   | `Float`     | f64 little-endian                       |
//! | 8   | `Array`     | count, then values                      |
//! | 9   | `Map`       | count, then (string key, value) pairs   |

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{Bool, Codec, Float64};
use crate::error::{CodecError, Result};
use crate::varint;

const TAG_NULL: u64 = 0;
const TAG_UNDEFINED: u64 = 1;
const TAG_BOOL: u64 = 2;
const TAG_STRING: u64 = 3;
const TAG_BYTES: u64 = 4;
const TAG_UINT: u64 = 5;
const TAG_INT: u64 = 6;
const TAG_FLOAT: u64 = 7;
const TAG_ARRAY: u64 = 8;
const TAG_MAP: u64 = 9;

/// Maximum nesting of arrays and maps accepted by the decoder.
pub const MAX_DEPTH: usize = 128;

/// A dynamically typed payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    String(String),
    Bytes(Bytes),
    /// Non-negative integer.
    Uint(u64),
    /// Negative integer.
    Int(i64),
    Float(f64),
    Array(Vec<Value>),
    /// String-keyed mapping in insertion order.
    Map(Vec<(String, Value)>),
}

impl Value {
    fn tag(&self) -> u64 {
        match self {
            Value::Null => TAG_NULL,
            Value::Undefined => TAG_UNDEFINED,
            Value::Bool(_) => TAG_BOOL,
            Value::String(_) => TAG_STRING,
            Value::Bytes(_) => TAG_BYTES,
            Value::Uint(_) => TAG_UINT,
            Value::Int(_) => TAG_INT,
            Value::Float(_) => TAG_FLOAT,
            Value::Array(_) => TAG_ARRAY,
            Value::Map(_) => TAG_MAP,
        }
    }

    /// Look up a key in a `Map` value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Convert to JSON. `Undefined` becomes `null`, bytes become an array of
    /// numbers, non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Undefined => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
            Value::Uint(n) => serde_json::Value::from(*n),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Uint(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        if n >= 0 {
            Value::Uint(n as u64)
        } else {
            Value::Int(n)
        }
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Codec for [`Value`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueCodec;

impl ValueCodec {
    fn decode_at(&self, src: &mut Bytes, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(CodecError::TooDeep(MAX_DEPTH));
        }
        let tag = varint::get_uint(src)?;
        let value = match tag {
            TAG_NULL => Value::Null,
            TAG_UNDEFINED => Value::Undefined,
            TAG_BOOL => Value::Bool(Bool.decode(src)?),
            TAG_STRING => Value::String(varint::get_string(src)?),
            TAG_BYTES => Value::Bytes(varint::get_buffer(src)?),
            TAG_UINT => Value::Uint(varint::get_uint(src)?),
            TAG_INT => Value::Int(varint::get_int(src)?),
            TAG_FLOAT => Value::Float(Float64.decode(src)?),
            TAG_ARRAY => {
                let count = varint::get_len(src)?;
                let mut items = Vec::with_capacity(count.min(src.remaining()));
                for _ in 0..count {
                    items.push(self.decode_at(src, depth + 1)?);
                }
                Value::Array(items)
            }
            TAG_MAP => {
                let count = varint::get_len(src)?;
                let mut entries = Vec::with_capacity(count.min(src.remaining()));
                for _ in 0..count {
                    let key = varint::get_string(src)?;
                    entries.push((key, self.decode_at(src, depth + 1)?));
                }
                Value::Map(entries)
            }
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(value)
    }
}

impl Codec for ValueCodec {
    type Item = Value;

    fn encoded_len(&self, value: &Value) -> usize {
        let body = match value {
            Value::Null | Value::Undefined => 0,
            Value::Bool(_) => 1,
            Value::String(s) => varint::string_len(s),
            Value::Bytes(b) => varint::buffer_len(b),
            Value::Uint(n) => varint::uint_len(*n),
            Value::Int(n) => varint::int_len(*n),
            Value::Float(_) => 8,
            Value::Array(items) => {
                varint::uint_len(items.len() as u64)
                    + items.iter().map(|v| self.encoded_len(v)).sum::<usize>()
            }
            Value::Map(entries) => {
                varint::uint_len(entries.len() as u64)
                    + entries
                        .iter()
                        .map(|(k, v)| varint::string_len(k) + self.encoded_len(v))
                        .sum::<usize>()
            }
        };
        varint::uint_len(value.tag()) + body
    }

    fn encode(&self, value: &Value, dst: &mut BytesMut) {
        varint::put_uint(dst, value.tag());
        match value {
            Value::Null | Value::Undefined => {}
            Value::Bool(b) => Bool.encode(b, dst),
            Value::String(s) => varint::put_string(dst, s),
            Value::Bytes(b) => varint::put_buffer(dst, b),
            Value::Uint(n) => varint::put_uint(dst, *n),
            Value::Int(n) => varint::put_int(dst, *n),
            Value::Float(f) => Float64.encode(f, dst),
            Value::Array(items) => {
                varint::put_uint(dst, items.len() as u64);
                for item in items {
                    self.encode(item, dst);
                }
            }
            Value::Map(entries) => {
                varint::put_uint(dst, entries.len() as u64);
                for (key, item) in entries {
                    varint::put_string(dst, key);
                    self.encode(item, dst);
                }
            }
        }
    }

    fn decode(&self, src: &mut Bytes) -> Result<Value> {
        self.decode_at(src, 0)
    }
}
