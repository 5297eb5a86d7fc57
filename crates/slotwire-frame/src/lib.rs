//! Frame codec for the slotwire protocol.
//!
//! Every message on the wire is a small header followed by an optional
//! payload, all built from compact unsigned integers:
//! - an optional one-byte protocol magic
//! - the method slot, the request/stream id and the message bitfield
//! - a length-prefixed payload, present only for classes that carry one
//!
//! Frames carry no outer length, so a buffer holding several frames is
//! simply their concatenation.

pub mod codec;
pub mod error;
pub mod error_message;
pub mod flags;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_all, decode_frame, encode_frame, frame_len, Frame, FrameConfig, Header,
    DEFAULT_MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use error_message::ErrorMessage;
pub use reader::FrameReader;
pub use writer::FrameWriter;
