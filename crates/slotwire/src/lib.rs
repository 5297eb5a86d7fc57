//! Minimal binary RPC over any byte transport.
//!
//! slotwire multiplexes request/response calls, one-way sends and
//! flow-controlled bidirectional streams over a single ordered byte channel.
//! The library never touches the transport itself: a session hands encoded
//! frames to a sink and is fed received bytes through `recv`.
//!
//! # Crate Structure
//!
//! - [`encoding`]: compact varints, typed codecs and the self-describing `Value`
//! - [`frame`]: frame header codec, error messages, blocking reader/writer
//! - [`session`]: sessions, methods, requests and streams
//!
//! ```no_run
//! use slotwire::{pair, MethodOptions, Utf8};
//!
//! # async fn demo() -> slotwire::Result<()> {
//! let (client, server) = pair();
//! server.register(1, MethodOptions::new(Utf8, Utf8).on_request_fn(|name: String| {
//!     Ok(format!("hello {name}"))
//! }))?;
//! let greet = client.register(1, MethodOptions::new(Utf8, Utf8))?;
//! assert_eq!(greet.request(&"world".to_string()).await?, "hello world");
//! # Ok(())
//! # }
//! ```

/// Re-export encoding types.
pub mod encoding {
    pub use slotwire_encoding::*;
}

/// Re-export frame types.
pub mod frame {
    pub use slotwire_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use slotwire_session::*;
}

pub use slotwire_encoding::{Array, Bool, Codec, CodecError, Float64, Int, Raw, Uint, Utf8, Value, ValueCodec};
pub use slotwire_frame::{ErrorMessage, Frame, FrameConfig, FrameError, FrameReader, FrameWriter};
pub use slotwire_session::{
    pair, pair_with_config, ApplicationError, Method, MethodOptions, ProtocolError, Request, Responder,
    ResponseFuture, Result, RpcError, Scope, Session, SessionConfig, Stream, UsageError, WeakSession,
};
