use bytes::{Buf, Bytes, BytesMut};
use slotwire_encoding::{varint, CodecError};

const HAS_MESSAGE: u64 = 1;
const HAS_STACK: u64 = 2;
const HAS_CODE: u64 = 4;

/// Error payload carried by `ERROR` frames and `CLOSE|HAS_ERROR` frames.
///
/// ```text
/// flags:u8 | errno:uint | [message:string] | [stack:string] | [code:string]
/// ```
/// Empty strings are treated as absent and never written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorMessage {
    pub errno: u64,
    pub message: Option<String>,
    pub stack: Option<String>,
    pub code: Option<String>,
}

impl ErrorMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn flags(&self) -> u64 {
        let mut flags = 0;
        if present(&self.message).is_some() {
            flags |= HAS_MESSAGE;
        }
        if present(&self.stack).is_some() {
            flags |= HAS_STACK;
        }
        if present(&self.code).is_some() {
            flags |= HAS_CODE;
        }
        flags
    }

    pub fn encoded_len(&self) -> usize {
        let strings: usize = [&self.message, &self.stack, &self.code]
            .into_iter()
            .filter_map(present)
            .map(varint::string_len)
            .sum();
        varint::uint_len(self.flags()) + varint::uint_len(self.errno) + strings
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        varint::put_uint(dst, self.flags());
        varint::put_uint(dst, self.errno);
        for text in [&self.message, &self.stack, &self.code]
            .into_iter()
            .filter_map(present)
        {
            varint::put_string(dst, text);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut dst);
        dst.freeze()
    }

    pub fn decode(src: &mut Bytes) -> Result<Self, CodecError> {
        let flags = varint::get_uint(src)?;
        let errno = varint::get_uint(src)?;
        let mut read = |bit: u64| -> Result<Option<String>, CodecError> {
            if flags & bit == 0 {
                return Ok(None);
            }
            varint::get_string(src).map(Some)
        };
        let message = read(HAS_MESSAGE)?;
        let stack = read(HAS_STACK)?;
        let code = read(HAS_CODE)?;
        Ok(Self {
            errno,
            message,
            stack,
            code,
        })
    }

    /// Decode a complete payload, ignoring trailing bytes.
    pub fn from_payload(payload: &Bytes) -> Result<Self, CodecError> {
        let mut src = payload.clone();
        let decoded = Self::decode(&mut src)?;
        if src.has_remaining() {
            tracing::trace!(trailing = src.remaining(), "error message has trailing bytes");
        }
        Ok(decoded)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|text| !text.is_empty())
}
