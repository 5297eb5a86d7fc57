use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::task::Waker;

use bytes::{Bytes, BytesMut};
use slotwire_encoding::Codec;
use slotwire_frame::flags::{self, ERROR, REQUEST, SEND};
use slotwire_frame::{decode_frame, encode_frame, ErrorMessage, Frame, FrameConfig, FrameError};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::error::{ApplicationError, ProtocolError, Result, RpcError, Scope, UsageError};
use crate::method::{Completion, Method, MethodOptions, MethodState};
use crate::stream::Streams;
use crate::table::SlotTable;

type Sink = Box<dyn Fn(Bytes) + Send + Sync>;

/// Work deferred until the session lock is released.
pub(crate) enum Effect {
    Send(Bytes),
    Call(Box<dyn FnOnce() + Send>),
    Wake(Waker),
}

/// Outgoing frames and deferred callbacks produced under the lock.
pub(crate) struct Outbox {
    config: FrameConfig,
    corked: bool,
    corked_frames: Vec<Bytes>,
    effects: Vec<Effect>,
}

impl Outbox {
    fn new(config: FrameConfig) -> Self {
        Self {
            config,
            corked: false,
            corked_frames: Vec::new(),
            effects: Vec::new(),
        }
    }

    /// Encode a frame and queue it for the sink, or for `uncork` while corked.
    pub fn send(&mut self, frame: Frame) -> std::result::Result<(), FrameError> {
        let mut buf = BytesMut::with_capacity(frame.wire_size(&self.config));
        encode_frame(&frame, &self.config, &mut buf)?;
        trace!(
            method = frame.method,
            id = frame.id,
            bitfield = %flags::describe(frame.bitfield),
            corked = self.corked,
            "frame out"
        );
        if self.corked {
            self.corked_frames.push(buf.freeze());
        } else {
            self.effects.push(Effect::Send(buf.freeze()));
        }
        Ok(())
    }

    pub fn call(&mut self, f: Box<dyn FnOnce() + Send>) {
        self.effects.push(Effect::Call(f));
    }

    pub fn wake(&mut self, waker: Option<Waker>) {
        if let Some(waker) = waker {
            self.effects.push(Effect::Wake(waker));
        }
    }

    fn complete(&mut self, tx: oneshot::Sender<Completion>, result: Completion) {
        self.call(Box::new(move || {
            // The caller may have dropped the future.
            let _ = tx.send(result);
        }));
    }

    fn uncork(&mut self) {
        self.corked = false;
        let frames = std::mem::take(&mut self.corked_frames);
        if frames.is_empty() {
            return;
        }
        let mut batch = BytesMut::with_capacity(frames.iter().map(Bytes::len).sum());
        for frame in &frames {
            batch.extend_from_slice(frame);
        }
        trace!(frames = frames.len(), bytes = batch.len(), "uncorked");
        self.effects.push(Effect::Send(batch.freeze()));
    }
}

struct PendingRequest {
    method: u64,
    tx: Option<oneshot::Sender<Completion>>,
}

pub(crate) struct SessionState {
    methods: Vec<Option<MethodState>>,
    requests: SlotTable<PendingRequest>,
    out: Outbox,
    destroyed: bool,
}

fn lookup(methods: &mut [Option<MethodState>], id: u64) -> Option<&mut MethodState> {
    methods.get_mut(usize::try_from(id).ok()?)?.as_mut()
}

impl SessionState {
    fn dispatch(&mut self, session: &Session, frame: Frame) -> std::result::Result<(), ProtocolError> {
        if self.destroyed {
            return Ok(());
        }
        trace!(
            method = frame.method,
            id = frame.id,
            bitfield = %flags::describe(frame.bitfield),
            "frame in"
        );

        if flags::is_request_class(frame.bitfield) {
            self.on_request(session, frame)
        } else {
            self.on_response(frame)
        }
    }

    fn on_request(&mut self, session: &Session, frame: Frame) -> std::result::Result<(), ProtocolError> {
        let Self { methods, out, .. } = self;
        let method = lookup(methods, frame.method).ok_or(ProtocolError::UnknownMethod(frame.method))?;
        if method.destroyed {
            debug!(method = frame.method, id = frame.id, "frame for destroyed method dropped");
            return Ok(());
        }

        if flags::stream_message(frame.bitfield) != 0 {
            return method.streams.on_frame(session, frame, out);
        }
        let one_way = frame.bitfield & REQUEST == 0;
        let payload = frame.payload_or_empty();
        method.on_request(session, frame.method, frame.id, one_way, payload, out)
    }

    fn on_response(&mut self, frame: Frame) -> std::result::Result<(), ProtocolError> {
        let Self {
            methods,
            requests,
            out,
            ..
        } = self;
        let method = lookup(methods, frame.method).ok_or(ProtocolError::UnknownMethod(frame.method))?;
        let unknown = ProtocolError::UnknownRequest {
            method: frame.method,
            id: frame.id,
        };
        if requests.get(frame.id).is_none_or(|pending| pending.method != frame.method) {
            return Err(unknown);
        }
        let Some(pending) = requests.remove(frame.id) else {
            return Err(unknown);
        };

        let Some(tx) = pending.tx else {
            debug!(method = frame.method, id = frame.id, "answer to rejected request dropped");
            return Ok(());
        };
        if method.destroyed {
            return Ok(());
        }

        let payload = frame.payload_or_empty();
        if frame.bitfield & ERROR == 0 {
            out.complete(tx, Ok(payload));
            return Ok(());
        }
        match ErrorMessage::from_payload(&payload) {
            Ok(msg) => {
                out.complete(tx, Err(ApplicationError::from(msg).into()));
                Ok(())
            }
            Err(err) => {
                out.complete(tx, Err(err.clone().into()));
                Err(err.into())
            }
        }
    }

    fn check_method(&mut self, id: u64) -> Result<&mut MethodState> {
        if self.destroyed {
            return Err(RpcError::destroyed(Scope::Session));
        }
        match lookup(&mut self.methods, id) {
            Some(method) if !method.destroyed => Ok(method),
            _ => Err(RpcError::destroyed(Scope::Method)),
        }
    }
}

struct Inner {
    state: Mutex<SessionState>,
    sink: Sink,
    config: SessionConfig,
}

/// One end of a connection.
///
/// Frames produced by the session go to the sink passed at construction;
/// bytes received from the transport are fed to [`Session::recv`]. `Session`
/// is a cheap handle: clones share the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create a session with default configuration.
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        Self::with_config(sink, SessionConfig::default())
    }

    pub fn with_config<F>(sink: F, config: SessionConfig) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        let state = SessionState {
            methods: Vec::new(),
            requests: SlotTable::default(),
            out: Outbox::new(config.frame.clone()),
            destroyed: false,
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                sink: Box::new(sink),
                config,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Register a method under `id`.
    pub fn register<Req: Codec, Res: Codec>(
        &self,
        id: u64,
        options: MethodOptions<Req, Res>,
    ) -> Result<Method<Req, Res>> {
        let index = usize::try_from(id).map_err(|_| UsageError::DuplicateMethod(id))?;
        let (method, request_codec, response_codec) =
            options.build(id, self.inner.config.stream_high_water_mark);

        // Handlers may own session handles; never drop them under the lock.
        let mut method = Some(method);
        let registered = self.update(|state| {
            if state.destroyed {
                return Err(RpcError::destroyed(Scope::Session));
            }
            if state.methods.get(index).is_some_and(Option::is_some) {
                return Err(UsageError::DuplicateMethod(id).into());
            }
            if state.methods.len() <= index {
                state.methods.resize_with(index + 1, || None);
            }
            state.methods[index] = method.take();
            debug!(method = id, "method registered");
            Ok(())
        });
        drop(method);
        registered?;

        Ok(Method::new(self.clone(), id, request_codec, response_codec))
    }

    /// Feed received bytes: zero or more complete frames back to back.
    ///
    /// Frames are dispatched in order. Any error is fatal for the session.
    pub fn recv(&self, data: &[u8]) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        let config = &self.inner.config.frame;
        let mut buf = BytesMut::from(data);
        while !buf.is_empty() {
            let Some(frame) = decode_frame(&mut buf, config)? else {
                return Err(FrameError::Truncated {
                    remaining: buf.len(),
                }
                .into());
            };
            self.update(|state| state.dispatch(self, frame))?;
        }
        Ok(())
    }

    /// Buffer outgoing frames until [`Session::uncork`].
    pub fn cork(&self) {
        self.update(|state| state.out.corked = true);
    }

    /// Deliver every buffered frame to the sink in one call.
    pub fn uncork(&self) {
        self.update(|state| state.out.uncork());
    }

    pub fn is_corked(&self) -> bool {
        self.lock().out.corked
    }

    /// Reject every pending request and destroy every method. Idempotent.
    pub fn destroy(&self) {
        self.update(|state| {
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            debug!(pending = state.requests.len(), "session destroyed");

            let SessionState {
                methods,
                requests,
                out,
                ..
            } = state;
            for (_, pending) in requests.iter_mut() {
                if let Some(tx) = pending.tx.take() {
                    out.complete(tx, Err(RpcError::destroyed(Scope::Session)));
                }
            }
            *requests = SlotTable::default();
            out.corked = false;
            out.corked_frames.clear();
            for method in methods.iter_mut().flatten() {
                method.destroy(Scope::Session, out);
            }
        });
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// Requests sent and not yet answered, including rejected ones whose
    /// answer has not arrived.
    pub fn pending_requests(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn start_request(&self, method: u64, payload: Bytes) -> Result<oneshot::Receiver<Completion>> {
        self.update(|state| {
            state.check_method(method)?;
            let (tx, rx) = oneshot::channel();
            let id = state.requests.insert(PendingRequest {
                method,
                tx: Some(tx),
            });
            let frame = Frame::new(method, id, REQUEST, Some(payload));
            if let Err(err) = state.out.send(frame) {
                state.requests.remove(id);
                return Err(err.into());
            }
            Ok(rx)
        })
    }

    pub(crate) fn send_one_way(&self, method: u64, payload: Bytes) -> Result<()> {
        self.update(|state| {
            state.check_method(method)?;
            state.out.send(Frame::new(method, 0, SEND, Some(payload)))?;
            Ok(())
        })
    }

    /// Send a `RESPONSE` or `ERROR` for an inbound request.
    pub(crate) fn answer(&self, method: u64, id: u64, bitfield: u64, payload: Bytes) -> Result<()> {
        self.update(|state| {
            state.check_method(method)?;
            state.out.send(Frame::new(method, id, bitfield, Some(payload)))?;
            Ok(())
        })
    }

    pub(crate) fn create_stream(&self, method: u64) -> Result<u64> {
        self.update(|state| Ok(state.check_method(method)?.streams.create()))
    }

    pub(crate) fn destroy_method(&self, id: u64) {
        self.update(|state| {
            let SessionState {
                methods,
                requests,
                out,
                ..
            } = state;
            let Some(method) = lookup(methods, id) else {
                return;
            };
            if method.destroyed {
                return;
            }
            method.destroy(Scope::Method, out);
            // Ids stay reserved until the peer's answer arrives.
            for (_, pending) in requests.iter_mut().filter(|(_, p)| p.method == id) {
                if let Some(tx) = pending.tx.take() {
                    out.complete(tx, Err(RpcError::destroyed(Scope::Method)));
                }
            }
            debug!(method = id, "method destroyed");
        });
    }

    pub(crate) fn method_destroyed(&self, id: u64) -> bool {
        let mut state = self.lock();
        state.destroyed || lookup(&mut state.methods, id).is_none_or(|method| method.destroyed)
    }

    pub(crate) fn with_streams<T>(
        &self,
        method: u64,
        f: impl FnOnce(&mut Streams, &mut Outbox) -> T,
    ) -> Option<T> {
        self.update(|state| {
            let SessionState { methods, out, .. } = state;
            lookup(methods, method).map(|m| f(&mut m.streams, out))
        })
    }

    /// Run `f` under the lock, then perform the effects it queued.
    ///
    /// The sink, handlers and wakers only ever run after the lock is
    /// released, so they may call back into the session.
    pub(crate) fn update<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let (result, effects) = {
            let mut state = self.lock();
            let result = f(&mut state);
            (result, std::mem::take(&mut state.out.effects))
        };
        for effect in effects {
            match effect {
                Effect::Send(bytes) => (self.inner.sink)(bytes),
                Effect::Call(f) => f(),
                Effect::Wake(waker) => waker.wake(),
            }
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Session")
            .field("methods", &state.methods.iter().flatten().count())
            .field("pending_requests", &state.requests.len())
            .field("corked", &state.out.corked)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

/// Non-owning reference to a [`Session`].
#[derive(Clone, Debug)]
pub struct WeakSession {
    inner: Weak<Inner>,
}

impl WeakSession {
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

/// Two sessions wired sink-to-recv in memory.
pub fn pair() -> (Session, Session) {
    pair_with_config(SessionConfig::default())
}

pub fn pair_with_config(config: SessionConfig) -> (Session, Session) {
    let to_right: Arc<OnceLock<WeakSession>> = Arc::default();
    let to_left: Arc<OnceLock<WeakSession>> = Arc::default();

    let left = Session::with_config(deliver(Arc::clone(&to_right)), config.clone());
    let right = Session::with_config(deliver(Arc::clone(&to_left)), config);

    let _ = to_right.set(right.downgrade());
    let _ = to_left.set(left.downgrade());
    (left, right)
}

fn deliver(peer: Arc<OnceLock<WeakSession>>) -> impl Fn(Bytes) + Send + Sync + 'static {
    move |bytes: Bytes| match peer.get().and_then(WeakSession::upgrade) {
        Some(session) => {
            if let Err(err) = session.recv(&bytes) {
                warn!(error = %err, "in-memory peer rejected frames");
            }
        }
        None => warn!(bytes = bytes.len(), "in-memory peer is gone; frames dropped"),
    }
}

#[cfg(test)]
mod tests {
    use futures_util::FutureExt;
    use slotwire_encoding::{Uint, Utf8};
    use slotwire_frame::decode_all;
    use slotwire_frame::flags::{DATA, OPEN, RESPONSE};

    use super::*;

    fn recording() -> (Session, Arc<Mutex<Vec<Bytes>>>) {
        let calls: Arc<Mutex<Vec<Bytes>>> = Arc::default();
        let sink = Arc::clone(&calls);
        let session = Session::new(move |bytes| sink.lock().unwrap().push(bytes));
        (session, calls)
    }

    fn frames(calls: &Mutex<Vec<Bytes>>) -> Vec<Frame> {
        calls
            .lock()
            .unwrap()
            .iter()
            .flat_map(|call| decode_all(call, &FrameConfig::default()).unwrap())
            .collect()
    }

    fn encode(frames: &[Frame]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &FrameConfig::default(), &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn duplicate_registration_fails() {
        let (session, _) = recording();
        session.register(3, MethodOptions::default()).unwrap();
        let err = session.register(3, MethodOptions::default()).unwrap_err();
        assert!(matches!(err, RpcError::Usage(UsageError::DuplicateMethod(3))));

        // Holes below the highest id stay free.
        session.register(1, MethodOptions::default()).unwrap();
    }

    #[test]
    fn request_ids_start_at_one_and_are_reused() {
        let (session, calls) = recording();
        let method = session.register(0, MethodOptions::new(Utf8, Utf8)).unwrap();

        let first = method.request(&"a".to_string());
        let _second = method.request(&"b".to_string());
        let sent = frames(&calls);
        assert_eq!(sent[0].id, 1);
        assert_eq!(sent[1].id, 2);
        assert_eq!(sent[0].bitfield, REQUEST);

        let reply = Frame::new(0, 1, RESPONSE, Some(Utf8.to_bytes(&"ok".to_string())));
        session.recv(&encode(&[reply])).unwrap();
        drop(first);

        let _third = method.request(&"c".to_string());
        assert_eq!(frames(&calls)[2].id, 1);
        assert_eq!(session.pending_requests(), 2);
    }

    #[test]
    fn one_way_send_uses_id_zero() {
        let (session, calls) = recording();
        let method = session.register(2, MethodOptions::new(Uint, Uint)).unwrap();
        method.send(&7).unwrap();

        let sent = frames(&calls);
        assert_eq!(sent.len(), 1);
        assert_eq!((sent[0].method, sent[0].id, sent[0].bitfield), (2, 0, SEND));
        assert_eq!(session.pending_requests(), 0);
    }

    #[test]
    fn cork_batches_into_one_sink_call() {
        let (session, calls) = recording();
        let method = session.register(0, MethodOptions::default()).unwrap();

        session.cork();
        assert!(session.is_corked());
        for n in 0..3u8 {
            method.send(&Bytes::from(vec![n])).unwrap();
        }
        assert!(calls.lock().unwrap().is_empty());

        session.uncork();
        assert_eq!(calls.lock().unwrap().len(), 1);
        let sent = frames(&calls);
        let payloads: Vec<_> = sent.iter().map(|f| f.payload_or_empty()).collect();
        assert_eq!(payloads.len(), 3);
        for (n, payload) in payloads.iter().enumerate() {
            assert_eq!(payload.as_ref(), &[1, n as u8]);
        }
    }

    #[test]
    fn uncork_without_frames_makes_no_call() {
        let (session, calls) = recording();
        session.cork();
        session.uncork();
        assert!(calls.lock().unwrap().is_empty());
        assert!(!session.is_corked());
    }

    #[test]
    fn unknown_method_is_fatal() {
        let (session, _) = recording();
        let err = session
            .recv(&encode(&[Frame::new(9, 0, SEND, Some(Bytes::new()))]))
            .unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ProtocolError::UnknownMethod(9))));
    }

    #[test]
    fn unknown_request_is_fatal() {
        let (session, _) = recording();
        session.register(0, MethodOptions::default()).unwrap();
        let err = session
            .recv(&encode(&[Frame::new(0, 4, RESPONSE, Some(Bytes::new()))]))
            .unwrap_err();
        assert!(matches!(
            err,
            RpcError::Protocol(ProtocolError::UnknownRequest { method: 0, id: 4 })
        ));
    }

    #[test]
    fn missing_handlers_are_fatal() {
        let (session, _) = recording();
        session.register(0, MethodOptions::default()).unwrap();

        let request = Frame::new(0, 1, REQUEST, Some(Bytes::new()));
        let err = session.recv(&encode(&[request])).unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ProtocolError::NoRequestHandler(0))));

        let open = Frame::new(0, 1, SEND | OPEN | flags::IS_INITIATOR, None);
        let err = session.recv(&encode(&[open])).unwrap_err();
        assert!(matches!(err, RpcError::Protocol(ProtocolError::NoStreamHandler(0))));
    }

    #[test]
    fn trailing_partial_frame_is_fatal() {
        let (session, _) = recording();
        session.register(0, MethodOptions::default()).unwrap();
        let err = session.recv(&[0, 1, REQUEST as u8, 5, b'x']).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Protocol(ProtocolError::Frame(FrameError::Truncated { .. }))
        ));
    }

    #[test]
    fn frames_for_unknown_streams_are_dropped() {
        let (session, calls) = recording();
        session
            .register(0, MethodOptions::default().on_stream(|_stream| {}))
            .unwrap();
        let data = Frame::new(0, 42, SEND | DATA, Some(Bytes::from_static(&[0])));
        session.recv(&encode(&[data])).unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn magic_byte_is_written_and_checked() {
        let calls: Arc<Mutex<Vec<Bytes>>> = Arc::default();
        let sink = Arc::clone(&calls);
        let config = SessionConfig::default().with_magic(0x5a);
        let session = Session::with_config(move |bytes| sink.lock().unwrap().push(bytes), config);
        let method = session.register(1, MethodOptions::default()).unwrap();
        method.send(&Bytes::from_static(b"hi")).unwrap();
        assert_eq!(calls.lock().unwrap()[0][0], 0x5a);

        let err = session.recv(&[0x5b, 1, 0, 1, 0]).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Protocol(ProtocolError::Frame(FrameError::InvalidMagic { .. }))
        ));
    }

    #[test]
    fn oversized_request_is_refused_locally() {
        let calls: Arc<Mutex<Vec<Bytes>>> = Arc::default();
        let sink = Arc::clone(&calls);
        let config = SessionConfig::default().with_max_payload_size(8);
        let session = Session::with_config(move |bytes| sink.lock().unwrap().push(bytes), config);
        let method = session.register(0, MethodOptions::default()).unwrap();

        let err = method.send(&Bytes::from(vec![0; 16])).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Protocol(ProtocolError::Frame(FrameError::PayloadTooLarge { .. }))
        ));
        let refused = method.request(&Bytes::from(vec![0; 16])).now_or_never();
        assert!(matches!(refused, Some(Err(RpcError::Protocol(_)))));
        assert_eq!(session.pending_requests(), 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn destroy_is_terminal() {
        let (session, calls) = recording();
        let method = session.register(0, MethodOptions::default()).unwrap();
        session.destroy();
        session.destroy();

        assert!(session.is_destroyed());
        assert!(method.is_destroyed());
        assert!(method.send(&Bytes::new()).unwrap_err().is_destroyed());
        assert!(session
            .register(1, MethodOptions::default())
            .unwrap_err()
            .is_destroyed());
        session.recv(&[0xff]).unwrap();
        assert!(calls.lock().unwrap().is_empty());
    }
}
