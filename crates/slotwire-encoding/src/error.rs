/// Errors that can occur while decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The input ended before the value was complete.
    #[error("unexpected end of input (needed {needed} bytes, {remaining} remaining)")]
    UnexpectedEnd { needed: usize, remaining: usize },

    /// A string field did not contain valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A self-describing value carried a tag outside the known set.
    #[error("unknown value tag {0}")]
    UnknownTag(u64),

    /// A decoded length cannot be represented on this platform.
    #[error("length {0} does not fit in memory")]
    LengthOverflow(u64),

    /// A self-describing value nests deeper than the decoder allows.
    #[error("value nesting exceeds {0} levels")]
    TooDeep(usize),
}

pub type Result<T> = std::result::Result<T, CodecError>;
