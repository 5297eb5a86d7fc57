//! Request/response and stream multiplexing over a single byte transport.
//!
//! A [`Session`] turns method calls into frames for a caller-supplied sink
//! and dispatches frames handed to [`Session::recv`]. Each registered
//! [`Method`] can issue requests and one-way sends, answer incoming
//! [`Request`]s, and open flow-controlled [`Stream`]s.
//!
//! The engine has no background thread: all work happens inside the calls
//! that trigger it, and the sink and handlers always run with the session
//! unlocked.

pub mod config;
pub mod error;
pub mod method;
pub mod request;
pub mod session;
pub mod stream;
mod table;

pub use config::{SessionConfig, DEFAULT_HIGH_WATER_MARK};
pub use error::{ApplicationError, ProtocolError, Result, RpcError, Scope, UsageError};
pub use method::{Method, MethodOptions, ResponseFuture};
pub use request::{Request, Responder};
pub use session::{pair, pair_with_config, Session, WeakSession};
pub use stream::Stream;
