use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use slotwire_encoding::{Codec, Raw};
use tokio::sync::oneshot;

use crate::error::{ApplicationError, ProtocolError, Result, RpcError, Scope};
use crate::request::{Request, RequestDispatch, RequestHandler, TypedRequests};
use crate::session::{Outbox, Session};
use crate::stream::{Acceptor, ItemDecoder, Stream, StreamAccept, StreamHandler, Streams};

/// Codecs, flags and handlers for a method being registered.
///
/// `Req` encodes request payloads, `Res` response payloads. Both default to
/// [`Raw`] bytes.
pub struct MethodOptions<Req: Codec = Raw, Res: Codec = Raw> {
    request_codec: Req,
    response_codec: Res,
    dedup: bool,
    on_request: Option<RequestHandler<Req, Res>>,
    on_stream: Option<StreamHandler<Req, Res>>,
}

impl Default for MethodOptions<Raw, Raw> {
    fn default() -> Self {
        Self::new(Raw, Raw)
    }
}

impl<Req: Codec, Res: Codec> MethodOptions<Req, Res> {
    pub fn new(request_codec: Req, response_codec: Res) -> Self {
        Self {
            request_codec,
            response_codec,
            dedup: false,
            on_request: None,
            on_stream: None,
        }
    }

    /// Drop stream batches identical to the previous batch on the same stream.
    pub fn dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    /// Handle requests and one-way sends.
    pub fn on_request<F>(mut self, handler: F) -> Self
    where
        F: Fn(Request<Req, Res>) + Send + Sync + 'static,
    {
        self.on_request = Some(Arc::new(handler));
        self
    }

    /// Handle requests with a plain function answered synchronously.
    pub fn on_request_fn<F>(self, handler: F) -> Self
    where
        F: Fn(Req::Item) -> std::result::Result<Res::Item, ApplicationError> + Send + Sync + 'static,
    {
        self.on_request(move |request: Request<Req, Res>| {
            let (data, mut responder) = request.into_parts();
            if let Err(err) = responder.reply(handler(data)) {
                tracing::debug!(error = %err, "reply not sent");
            }
        })
    }

    /// Accept streams opened by the peer.
    ///
    /// The handle writes `Req` items and reads `Res` items.
    pub fn on_stream<F>(mut self, handler: F) -> Self
    where
        F: Fn(Stream<Req, Res>) + Send + Sync + 'static,
    {
        self.on_stream = Some(Arc::new(handler));
        self
    }

    pub(crate) fn build(self, id: u64, high_water_mark: usize) -> (MethodState, Arc<Req>, Arc<Res>) {
        let request_codec = Arc::new(self.request_codec);
        let response_codec = Arc::new(self.response_codec);

        let requests = self.on_request.map(|handler| {
            Arc::new(TypedRequests {
                decoder: Arc::clone(&request_codec),
                encoder: Arc::clone(&response_codec),
                handler,
            }) as Arc<dyn RequestDispatch>
        });
        let acceptor = self.on_stream.map(|handler| {
            Arc::new(Acceptor {
                writer: Arc::clone(&request_codec),
                handler,
            }) as Arc<dyn StreamAccept>
        });
        let streams = Streams::new(
            id,
            self.dedup,
            high_water_mark,
            Arc::new(ItemDecoder(Arc::clone(&request_codec))),
            Arc::new(ItemDecoder(Arc::clone(&response_codec))),
            acceptor,
        );

        let state = MethodState {
            destroyed: false,
            requests,
            streams,
        };
        (state, request_codec, response_codec)
    }
}

impl<Req: Codec, Res: Codec> fmt::Debug for MethodOptions<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodOptions")
            .field("dedup", &self.dedup)
            .field("on_request", &self.on_request.is_some())
            .field("on_stream", &self.on_stream.is_some())
            .finish_non_exhaustive()
    }
}

/// Session-side state of a registered method.
pub(crate) struct MethodState {
    pub destroyed: bool,
    pub requests: Option<Arc<dyn RequestDispatch>>,
    pub streams: Streams,
}

impl MethodState {
    pub fn destroy(&mut self, scope: Scope, out: &mut Outbox) {
        self.destroyed = true;
        self.streams.teardown(scope, out);
    }

    pub fn on_request(
        &mut self,
        session: &Session,
        method: u64,
        id: u64,
        one_way: bool,
        payload: Bytes,
        out: &mut Outbox,
    ) -> std::result::Result<(), ProtocolError> {
        let dispatch = self
            .requests
            .as_ref()
            .ok_or(ProtocolError::NoRequestHandler(method))?;
        let call = dispatch.prepare(session, method, id, one_way, payload)?;
        out.call(call);
        Ok(())
    }
}

/// Handle to a registered method. Cheap to clone.
pub struct Method<Req: Codec = Raw, Res: Codec = Raw> {
    session: Session,
    id: u64,
    request_codec: Arc<Req>,
    response_codec: Arc<Res>,
}

impl<Req: Codec, Res: Codec> Method<Req, Res> {
    pub(crate) fn new(session: Session, id: u64, request_codec: Arc<Req>, response_codec: Arc<Res>) -> Self {
        Self {
            session,
            id,
            request_codec,
            response_codec,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Send a request. The returned future resolves with the decoded response.
    pub fn request(&self, item: &Req::Item) -> ResponseFuture<Res> {
        let payload = self.request_codec.to_bytes(item);
        let codec = Arc::clone(&self.response_codec);
        match self.session.start_request(self.id, payload) {
            Ok(rx) => ResponseFuture::waiting(codec, rx),
            Err(err) => ResponseFuture::failed(codec, err),
        }
    }

    /// Fire-and-forget. Never answered.
    pub fn send(&self, item: &Req::Item) -> Result<()> {
        let payload = self.request_codec.to_bytes(item);
        self.session.send_one_way(self.id, payload)
    }

    /// Create a stream as initiator. Nothing is sent until it is first used.
    ///
    /// The handle writes `Res` items and reads `Req` items.
    pub fn create_request_stream(&self) -> Result<Stream<Res, Req>> {
        let id = self.session.create_stream(self.id)?;
        Ok(Stream::new(
            self.session.clone(),
            self.id,
            id,
            Arc::clone(&self.response_codec),
        ))
    }

    /// Destroy the method: reject its pending requests and abort its streams.
    pub fn destroy(&self) {
        self.session.destroy_method(self.id);
    }

    pub fn is_destroyed(&self) -> bool {
        self.session.method_destroyed(self.id)
    }

    /// Streams of this method still holding a slot.
    pub fn active_streams(&self) -> usize {
        self.session
            .with_streams(self.id, |streams, _| streams.len())
            .unwrap_or(0)
    }
}

impl<Req: Codec, Res: Codec> Clone for Method<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            id: self.id,
            request_codec: Arc::clone(&self.request_codec),
            response_codec: Arc::clone(&self.response_codec),
        }
    }
}

impl<Req: Codec, Res: Codec> fmt::Debug for Method<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method").field("id", &self.id).finish_non_exhaustive()
    }
}

pub(crate) type Completion = std::result::Result<Bytes, RpcError>;

/// Pending response to [`Method::request`].
pub struct ResponseFuture<C: Codec> {
    codec: Arc<C>,
    state: ResponseState,
}

enum ResponseState {
    Waiting(oneshot::Receiver<Completion>),
    Failed(Option<RpcError>),
}

impl<C: Codec> ResponseFuture<C> {
    fn waiting(codec: Arc<C>, rx: oneshot::Receiver<Completion>) -> Self {
        Self {
            codec,
            state: ResponseState::Waiting(rx),
        }
    }

    fn failed(codec: Arc<C>, err: RpcError) -> Self {
        Self {
            codec,
            state: ResponseState::Failed(Some(err)),
        }
    }
}

impl<C: Codec> Future for ResponseFuture<C> {
    type Output = Result<C::Item>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ResponseState::Failed(err) => {
                Poll::Ready(Err(err.take().unwrap_or(RpcError::destroyed(Scope::Session))))
            }
            ResponseState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(Ok(mut payload))) => {
                    Poll::Ready(this.codec.decode(&mut payload).map_err(RpcError::from))
                }
                Poll::Ready(Ok(Err(err))) => Poll::Ready(Err(err)),
                Poll::Ready(Err(_)) => Poll::Ready(Err(RpcError::destroyed(Scope::Session))),
            },
        }
    }
}

impl<C: Codec> fmt::Debug for ResponseFuture<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            ResponseState::Waiting(_) => "waiting",
            ResponseState::Failed(_) => "failed",
        };
        f.debug_struct("ResponseFuture").field("state", &state).finish()
    }
}
