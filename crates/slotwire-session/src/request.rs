use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use slotwire_encoding::{Codec, CodecError};
use slotwire_frame::flags::{ERROR, RESPONSE};
use slotwire_frame::ErrorMessage;
use tracing::debug;

use crate::error::{ApplicationError, Result, UsageError};
use crate::session::Session;

/// Decodes an inbound request and prepares the handler call.
pub(crate) trait RequestDispatch: Send + Sync {
    fn prepare(
        &self,
        session: &Session,
        method: u64,
        id: u64,
        one_way: bool,
        payload: Bytes,
    ) -> std::result::Result<Box<dyn FnOnce() + Send>, CodecError>;
}

pub(crate) type RequestHandler<Req, Res> = Arc<dyn Fn(Request<Req, Res>) + Send + Sync>;

pub(crate) struct TypedRequests<Req: Codec, Res: Codec> {
    pub decoder: Arc<Req>,
    pub encoder: Arc<Res>,
    pub handler: RequestHandler<Req, Res>,
}

impl<Req: Codec, Res: Codec> RequestDispatch for TypedRequests<Req, Res> {
    fn prepare(
        &self,
        session: &Session,
        method: u64,
        id: u64,
        one_way: bool,
        mut payload: Bytes,
    ) -> std::result::Result<Box<dyn FnOnce() + Send>, CodecError> {
        let data = self.decoder.decode(&mut payload)?;
        let request = Request {
            data,
            responder: Responder {
                session: session.clone(),
                method,
                id,
                one_way,
                encoder: Arc::clone(&self.encoder),
                replied: false,
            },
        };
        let handler = Arc::clone(&self.handler);
        Ok(Box::new(move || handler(request)))
    }
}

/// An inbound call, handed to the method's request handler.
///
/// Answer exactly once with [`Request::respond`] or [`Request::error`]. The
/// request may be moved into a task and answered later. Dropping it without
/// an answer replies with an error. Replies to one-way sends are discarded.
pub struct Request<Req: Codec, Res: Codec> {
    /// The decoded request payload.
    pub data: Req::Item,
    responder: Responder<Res>,
}

impl<Req: Codec, Res: Codec> Request<Req, Res> {
    pub fn method(&self) -> u64 {
        self.responder.method
    }

    /// Request id; 0 for one-way sends.
    pub fn id(&self) -> u64 {
        self.responder.id
    }

    pub fn is_one_way(&self) -> bool {
        self.responder.one_way
    }

    pub fn respond(&mut self, item: &Res::Item) -> Result<()> {
        self.responder.respond(item)
    }

    pub fn error(&mut self, err: ApplicationError) -> Result<()> {
        self.responder.error(err)
    }

    pub fn reply(&mut self, result: std::result::Result<Res::Item, ApplicationError>) -> Result<()> {
        self.responder.reply(result)
    }

    /// Split into the payload and the reply half.
    pub fn into_parts(self) -> (Req::Item, Responder<Res>) {
        (self.data, self.responder)
    }
}

impl<Req: Codec, Res: Codec> fmt::Debug for Request<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.responder.method)
            .field("id", &self.responder.id)
            .field("one_way", &self.responder.one_way)
            .finish_non_exhaustive()
    }
}

/// The reply half of a [`Request`].
pub struct Responder<Res: Codec> {
    session: Session,
    method: u64,
    id: u64,
    one_way: bool,
    encoder: Arc<Res>,
    replied: bool,
}

impl<Res: Codec> Responder<Res> {
    pub fn respond(&mut self, item: &Res::Item) -> Result<()> {
        self.claim()?;
        if self.one_way {
            return Ok(());
        }
        let payload = self.encoder.to_bytes(item);
        self.session.answer(self.method, self.id, RESPONSE, payload)
    }

    pub fn error(&mut self, err: ApplicationError) -> Result<()> {
        self.claim()?;
        if self.one_way {
            debug!(method = self.method, error = %err, "one-way handler failed");
            return Ok(());
        }
        let payload = ErrorMessage::from(&err).to_bytes();
        self.session.answer(self.method, self.id, ERROR, payload)
    }

    pub fn reply(&mut self, result: std::result::Result<Res::Item, ApplicationError>) -> Result<()> {
        match result {
            Ok(item) => self.respond(&item),
            Err(err) => self.error(err),
        }
    }

    pub fn is_answered(&self) -> bool {
        self.replied
    }

    fn claim(&mut self) -> Result<()> {
        if self.replied {
            return Err(UsageError::AlreadyResponded.into());
        }
        self.replied = true;
        Ok(())
    }
}

impl<Res: Codec> Drop for Responder<Res> {
    fn drop(&mut self) {
        if self.replied || self.one_way {
            return;
        }
        let payload = ErrorMessage::new("request dropped without a response").to_bytes();
        if let Err(err) = self.session.answer(self.method, self.id, ERROR, payload) {
            debug!(method = self.method, id = self.id, error = %err, "unanswered request not reported");
        }
    }
}

impl<Res: Codec> fmt::Debug for Responder<Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("method", &self.method)
            .field("id", &self.id)
            .field("replied", &self.replied)
            .finish_non_exhaustive()
    }
}
