use std::fmt;

use slotwire_encoding::CodecError;
use slotwire_frame::{ErrorMessage, FrameError};

/// Malformed or unexpected input. Raised synchronously from `recv`.
///
/// The session that raised it should be treated as unusable; whether to
/// destroy it is left to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The byte stream could not be split into frames.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A frame payload could not be decoded.
    #[error("malformed payload: {0}")]
    Malformed(#[from] CodecError),

    /// No method is registered under this id.
    #[error("unknown method {0}")]
    UnknownMethod(u64),

    /// A response arrived for a request id that is not pending.
    #[error("unknown request {id} on method {method}")]
    UnknownRequest { method: u64, id: u64 },

    /// A request arrived for a method registered without a request handler.
    #[error("method {0} has no request handler")]
    NoRequestHandler(u64),

    /// A stream was opened on a method registered without a stream handler.
    #[error("method {0} has no stream handler")]
    NoStreamHandler(u64),
}

/// Error raised by a request or stream handler and carried over the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationError {
    pub errno: u64,
    pub code: Option<String>,
    pub message: Option<String>,
    pub stack: Option<String>,
}

impl ApplicationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_errno(mut self, errno: u64) -> Self {
        self.errno = errno;
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message.as_deref().unwrap_or("remote error"))?;
        if let Some(code) = &self.code {
            write!(f, " ({code})")?;
        }
        if self.errno != 0 {
            write!(f, " [errno {}]", self.errno)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApplicationError {}

impl From<ErrorMessage> for ApplicationError {
    fn from(msg: ErrorMessage) -> Self {
        Self {
            errno: msg.errno,
            code: msg.code,
            message: msg.message,
            stack: msg.stack,
        }
    }
}

impl From<&ApplicationError> for ErrorMessage {
    fn from(err: &ApplicationError) -> Self {
        Self {
            errno: err.errno,
            message: err.message.clone(),
            stack: err.stack.clone(),
            code: err.code.clone(),
        }
    }
}

/// What a destroyed-handle error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Session,
    Method,
    Stream,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Session => "session",
            Self::Method => "method",
            Self::Stream => "stream",
        })
    }
}

/// Local API misuse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("method {0} is already registered")]
    DuplicateMethod(u64),

    #[error("request was already answered")]
    AlreadyResponded,

    #[error("write after end")]
    WriteAfterEnd,

    /// The session, method or stream has been destroyed. Terminal.
    #[error("{0} destroyed")]
    Destroyed(Scope),

    /// A stream item did not have the type its handle reads.
    #[error("stream item has an unexpected type")]
    ItemType,
}

/// Any error surfaced by the session API.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("application error: {0}")]
    Application(#[from] ApplicationError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The peer closed the stream before ending it.
    #[error("stream closed by peer")]
    RemoteClosed,
}

impl RpcError {
    /// True for the terminal error left behind by `destroy()`.
    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Usage(UsageError::Destroyed(_)))
    }

    pub(crate) fn destroyed(scope: Scope) -> Self {
        Self::Usage(UsageError::Destroyed(scope))
    }
}

impl From<FrameError> for RpcError {
    fn from(err: FrameError) -> Self {
        Self::Protocol(ProtocolError::Frame(err))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
