//! Stream multiplexer.
//!
//! Each stream is a pair of slots, one per side, addressed by the receiving
//! side's local id. Only `OPEN|IS_INITIATOR` (and a `CLOSE|IS_INITIATOR` sent
//! before the handshake finished) carry the initiator's id instead.
//!
//! ```text
//! initiator                          responder
//!   OPEN|IS_INITIATOR (id=local)  ->   allocate slot, remote=id
//!                                 <-   OPEN (id=remote, payload=local)
//!                                 <-   RESUME
//!   RESUME                        ->
//!   DATA / END / PAUSE / RESUME  <->
//! ```
//!
//! Both sides start with the remote reader paused. Writes made while paused
//! collect in one pending batch which is flushed by the next `RESUME`.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::future::poll_fn;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use bytes::{Bytes, BytesMut};
use slotwire_encoding::{varint, Array, Codec, CodecError};
use slotwire_frame::flags::{CLOSE, DATA, END, HAS_ERROR, IS_INITIATOR, OPEN, PAUSE, RESUME, SEND};
use slotwire_frame::{flags, ErrorMessage, Frame, FrameError};
use tracing::{debug, trace};

use crate::error::{ApplicationError, ProtocolError, Result, RpcError, Scope, UsageError};
use crate::session::{Outbox, Session};
use crate::table::SlotTable;

pub(crate) type Item = Box<dyn Any + Send>;

/// Decodes a `DATA` payload into the items a slot queues for its reader.
pub(crate) trait BatchDecode: Send + Sync {
    fn decode_batch(&self, payload: Bytes) -> std::result::Result<Vec<Item>, CodecError>;
}

pub(crate) struct ItemDecoder<C>(pub Arc<C>);

impl<C: Codec> BatchDecode for ItemDecoder<C> {
    fn decode_batch(&self, mut payload: Bytes) -> std::result::Result<Vec<Item>, CodecError> {
        let items = Array(Arc::clone(&self.0)).decode(&mut payload)?;
        Ok(items.into_iter().map(|item| Box::new(item) as Item).collect())
    }
}

/// Builds the typed responder handle and hands it to the stream handler.
pub(crate) trait StreamAccept: Send + Sync {
    fn accept(&self, session: &Session, method: u64, id: u64) -> Box<dyn FnOnce() + Send>;
}

pub(crate) type StreamHandler<W, R> = Arc<dyn Fn(Stream<W, R>) + Send + Sync>;

pub(crate) struct Acceptor<W: Codec, R: Codec> {
    pub writer: Arc<W>,
    pub handler: StreamHandler<W, R>,
}

impl<W: Codec, R: Codec> StreamAccept for Acceptor<W, R> {
    fn accept(&self, session: &Session, method: u64, id: u64) -> Box<dyn FnOnce() + Send> {
        let stream = Stream::new(session.clone(), method, id, Arc::clone(&self.writer));
        let handler = Arc::clone(&self.handler);
        Box::new(move || handler(stream))
    }
}

/// Why a slot stopped.
#[derive(Debug, Clone)]
enum Closure {
    /// Both directions sent `END`.
    Finished,
    /// Destroyed through the local handle.
    Local,
    /// The peer sent `CLOSE`, possibly with an error.
    Remote(Option<ApplicationError>),
    /// An inbound batch could not be decoded.
    Failed(CodecError),
    /// The owning method or session was destroyed.
    Destroyed(Scope),
}

impl Closure {
    fn error(&self) -> Option<RpcError> {
        match self {
            Self::Finished => None,
            Self::Local => Some(RpcError::destroyed(Scope::Stream)),
            Self::Remote(Some(err)) => Some(RpcError::Application(err.clone())),
            Self::Remote(None) => Some(RpcError::RemoteClosed),
            Self::Failed(err) => Some(RpcError::Codec(err.clone())),
            Self::Destroyed(scope) => Some(RpcError::destroyed(*scope)),
        }
    }
}

#[derive(Debug, Clone)]
enum Phase {
    /// Initiator slot that has not sent `OPEN` yet.
    Idle,
    /// `OPEN|IS_INITIATOR` sent, waiting for the peer's id.
    Opening,
    Open,
    Closed(Closure),
}

fn live(slots: &mut SlotTable<StreamSlot>, id: u64) -> Option<&mut StreamSlot> {
    slots.get_mut(id).filter(|slot| !slot.is_closed())
}

pub(crate) struct StreamSlot {
    initiator: bool,
    remote_id: Option<u64>,
    phase: Phase,
    remote_paused: bool,
    local_paused: bool,
    pending: Vec<Bytes>,
    end_requested: bool,
    end_sent: bool,
    remote_ended: bool,
    last_batch: Option<Bytes>,
    inbound: VecDeque<Item>,
    error_reported: bool,
    awaiting_open_reply: bool,
    handle_alive: bool,
    read_waker: Option<Waker>,
    drain_waker: Option<Waker>,
    open_waker: Option<Waker>,
}

impl StreamSlot {
    fn new(initiator: bool, remote_id: Option<u64>, phase: Phase) -> Self {
        Self {
            initiator,
            remote_id,
            phase,
            remote_paused: true,
            local_paused: false,
            pending: Vec::new(),
            end_requested: false,
            end_sent: false,
            remote_ended: false,
            last_batch: None,
            inbound: VecDeque::new(),
            error_reported: false,
            awaiting_open_reply: false,
            handle_alive: true,
            read_waker: None,
            drain_waker: None,
            open_waker: None,
        }
    }

    fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closed(_))
    }

    fn close(&mut self, closure: Closure, out: &mut Outbox) {
        self.phase = Phase::Closed(closure);
        self.pending.clear();
        out.wake(self.read_waker.take());
        out.wake(self.drain_waker.take());
        out.wake(self.open_waker.take());
    }
}

/// Frames addressed to one method's streams.
struct Wire<'a> {
    method: u64,
    out: &'a mut Outbox,
}

impl Wire<'_> {
    fn send(&mut self, to: u64, bits: u64, payload: Option<Bytes>) -> std::result::Result<(), FrameError> {
        self.out.send(Frame::new(self.method, to, SEND | bits, payload))
    }

    fn control(&mut self, to: u64, bits: u64) -> std::result::Result<(), FrameError> {
        self.send(to, bits, None)
    }

    /// Lazily announce an initiator slot.
    fn open(&mut self, id: u64, slot: &mut StreamSlot) -> std::result::Result<(), FrameError> {
        if matches!(slot.phase, Phase::Idle) {
            self.control(id, OPEN | IS_INITIATOR)?;
            slot.phase = Phase::Opening;
            debug!(method = self.method, stream = id, "stream opening");
        }
        Ok(())
    }

    /// Send the pending batch and a deferred `END` as far as the slot allows.
    fn flush(&mut self, slot: &mut StreamSlot, dedup: bool) -> std::result::Result<(), FrameError> {
        let Some(remote) = slot.remote_id else {
            return Ok(());
        };

        if !slot.pending.is_empty() && !slot.remote_paused {
            let batch = Array::<()>::join(&std::mem::take(&mut slot.pending));

            if dedup && slot.last_batch.as_ref() == Some(&batch) {
                trace!(method = self.method, stream = remote, "duplicate batch dropped");
            } else {
                if dedup {
                    slot.last_batch = Some(batch.clone());
                }
                self.send(remote, DATA, Some(batch))?;
            }
        }

        if slot.pending.is_empty() {
            self.out.wake(slot.drain_waker.take());
            if slot.end_requested && !slot.end_sent {
                self.control(remote, END)?;
                slot.end_sent = true;
            }
        }

        if slot.end_sent && slot.remote_ended && !slot.is_closed() {
            trace!(method = self.method, stream = remote, "stream finished");
            slot.close(Closure::Finished, self.out);
        }
        Ok(())
    }
}

/// The streams of one method.
pub(crate) struct Streams {
    method: u64,
    dedup: bool,
    high_water_mark: usize,
    slots: SlotTable<StreamSlot>,
    initiator_reads: Arc<dyn BatchDecode>,
    responder_reads: Arc<dyn BatchDecode>,
    acceptor: Option<Arc<dyn StreamAccept>>,
}

impl Streams {
    pub fn new(
        method: u64,
        dedup: bool,
        high_water_mark: usize,
        initiator_reads: Arc<dyn BatchDecode>,
        responder_reads: Arc<dyn BatchDecode>,
        acceptor: Option<Arc<dyn StreamAccept>>,
    ) -> Self {
        Self {
            method,
            dedup,
            high_water_mark: high_water_mark.max(1),
            slots: SlotTable::default(),
            initiator_reads,
            responder_reads,
            acceptor,
        }
    }

    /// Number of slots still holding an id.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Reserve an initiator slot. Nothing is sent until first use.
    pub fn create(&mut self) -> u64 {
        let id = self.slots.insert(StreamSlot::new(true, None, Phase::Idle));
        trace!(method = self.method, stream = id, "stream created");
        id
    }

    pub fn write(&mut self, id: u64, items: Vec<Bytes>, out: &mut Outbox) -> Result<bool> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or(RpcError::destroyed(Scope::Stream))?;
        if let Phase::Closed(closure) = &slot.phase {
            return Err(closure
                .error()
                .unwrap_or(RpcError::Usage(UsageError::WriteAfterEnd)));
        }
        if slot.end_requested {
            return Err(UsageError::WriteAfterEnd.into());
        }

        let mut wire = Wire {
            method: self.method,
            out,
        };
        wire.open(id, slot)?;
        slot.pending.extend(items);
        wire.flush(slot, self.dedup)?;
        Ok(slot.pending.is_empty())
    }

    pub fn end(&mut self, id: u64, out: &mut Outbox) -> Result<()> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or(RpcError::destroyed(Scope::Stream))?;
        if let Phase::Closed(closure) = &slot.phase {
            return closure.error().map_or(Ok(()), Err);
        }
        if slot.end_requested {
            return Ok(());
        }

        let mut wire = Wire {
            method: self.method,
            out,
        };
        wire.open(id, slot)?;
        slot.end_requested = true;
        wire.flush(slot, self.dedup)?;
        Ok(())
    }

    /// Destroy through the local handle. Idempotent.
    pub fn destroy(&mut self, id: u64, error: Option<ApplicationError>, out: &mut Outbox) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };

        let has_error = if error.is_some() { HAS_ERROR } else { 0 };
        let payload = error.as_ref().map(|err| ErrorMessage::from(err).to_bytes());
        let mut wire = Wire {
            method: self.method,
            out,
        };
        let sent = match (&slot.phase, slot.remote_id) {
            (Phase::Closed(_), _) => return,
            (Phase::Idle, _) => Ok(()),
            (Phase::Opening, _) => {
                slot.awaiting_open_reply = true;
                wire.send(id, CLOSE | IS_INITIATOR | has_error, payload)
            }
            (Phase::Open, Some(remote)) => wire.send(remote, CLOSE | has_error, payload),
            (Phase::Open, None) => Ok(()),
        };
        if let Err(err) = sent {
            debug!(method = self.method, stream = id, error = %err, "failed to send stream close");
        }

        debug!(method = self.method, stream = id, "stream destroyed");
        slot.close(Closure::Local, wire.out);
        self.reclaim(id);
    }

    /// The local handle is gone.
    ///
    /// An ended slot stays until its buffered batch and `END` are out and the
    /// peer has ended too; anything else unfinished is destroyed.
    pub fn release(&mut self, id: u64, out: &mut Outbox) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        slot.handle_alive = false;
        if !slot.is_closed() {
            if !slot.end_requested {
                self.destroy(id, None, out);
                return;
            }
            // Nobody reads any more; never hold the peer's writer back.
            slot.inbound.clear();
            if slot.local_paused {
                if let Some(remote) = slot.remote_id {
                    slot.local_paused = false;
                    let mut wire = Wire {
                        method: self.method,
                        out,
                    };
                    if let Err(err) = wire.control(remote, RESUME) {
                        debug!(method = self.method, stream = id, error = %err, "failed to resume released stream");
                    }
                }
            }
            trace!(method = self.method, stream = id, "released stream left to drain");
        }
        self.reclaim(id);
    }

    /// Close every slot without telling the peer.
    pub fn teardown(&mut self, scope: Scope, out: &mut Outbox) {
        for id in self.slots.ids() {
            if let Some(slot) = self.slots.get_mut(id) {
                slot.awaiting_open_reply = false;
                if !slot.is_closed() {
                    slot.close(Closure::Destroyed(scope), out);
                }
            }
            self.reclaim(id);
        }
    }

    fn reclaim(&mut self, id: u64) {
        let free = self
            .slots
            .get(id)
            .is_some_and(|slot| slot.is_closed() && !slot.handle_alive && !slot.awaiting_open_reply);
        if free {
            self.slots.remove(id);
            trace!(method = self.method, stream = id, "stream slot freed");
        }
    }

    pub fn poll_next(
        &mut self,
        id: u64,
        waker: Option<&Waker>,
        out: &mut Outbox,
    ) -> Poll<Option<Result<Item>>> {
        let Some(slot) = self.slots.get_mut(id) else {
            return Poll::Ready(Some(Err(RpcError::destroyed(Scope::Stream))));
        };
        let mut wire = Wire {
            method: self.method,
            out,
        };
        if let Err(err) = wire.open(id, slot) {
            return Poll::Ready(Some(Err(err.into())));
        }

        if let Some(item) = slot.inbound.pop_front() {
            if slot.local_paused && slot.inbound.len() < self.high_water_mark && !slot.is_closed() {
                if let Some(remote) = slot.remote_id {
                    slot.local_paused = false;
                    trace!(method = self.method, stream = id, "resuming remote writer");
                    if let Err(err) = wire.control(remote, RESUME) {
                        return Poll::Ready(Some(Err(err.into())));
                    }
                }
            }
            return Poll::Ready(Some(Ok(item)));
        }

        if slot.remote_ended {
            return Poll::Ready(None);
        }
        if let Phase::Closed(closure) = &slot.phase {
            if slot.error_reported {
                return Poll::Ready(None);
            }
            slot.error_reported = true;
            return Poll::Ready(closure.error().map(Err));
        }

        if let Some(waker) = waker {
            slot.read_waker = Some(waker.clone());
        }
        Poll::Pending
    }

    pub fn poll_opened(&mut self, id: u64, cx: &mut Context<'_>, out: &mut Outbox) -> Poll<Result<()>> {
        let Some(slot) = self.slots.get_mut(id) else {
            return Poll::Ready(Err(RpcError::destroyed(Scope::Stream)));
        };
        let mut wire = Wire {
            method: self.method,
            out,
        };
        if let Err(err) = wire.open(id, slot) {
            return Poll::Ready(Err(err.into()));
        }
        match &slot.phase {
            Phase::Open => Poll::Ready(Ok(())),
            Phase::Closed(closure) => Poll::Ready(closure.error().map_or(Ok(()), Err)),
            Phase::Idle | Phase::Opening => {
                slot.open_waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    pub fn poll_drained(&mut self, id: u64, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let Some(slot) = self.slots.get_mut(id) else {
            return Poll::Ready(Err(RpcError::destroyed(Scope::Stream)));
        };
        if let Phase::Closed(closure) = &slot.phase {
            return Poll::Ready(closure.error().map_or(Ok(()), Err));
        }
        if slot.pending.is_empty() {
            return Poll::Ready(Ok(()));
        }
        slot.drain_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    /// True once the reader will yield nothing more.
    pub fn is_finished(&self, id: u64) -> bool {
        self.slots.get(id).is_none_or(|slot| {
            slot.inbound.is_empty() && (slot.remote_ended || slot.is_closed())
        })
    }

    /// Route a `SEND` frame carrying stream sub-message bits.
    pub fn on_frame(&mut self, session: &Session, frame: Frame, out: &mut Outbox) -> std::result::Result<(), ProtocolError> {
        let initiator = frame.bitfield & IS_INITIATOR != 0;
        match flags::stream_message(frame.bitfield) {
            OPEN if initiator => self.on_open(session, frame, out),
            OPEN => self.on_open_reply(frame, out),
            CLOSE if initiator => {
                let remote = frame.id;
                match self
                    .slots
                    .find(|slot| !slot.initiator && !slot.is_closed() && slot.remote_id == Some(remote))
                {
                    Some(id) => self.on_close(id, frame, out),
                    None => {
                        self.dropped(&frame);
                        Ok(())
                    }
                }
            }
            CLOSE => self.on_close(frame.id, frame, out),
            PAUSE => {
                if let Some(slot) = live(&mut self.slots, frame.id) {
                    slot.remote_paused = true;
                    trace!(method = self.method, stream = frame.id, "remote paused");
                } else {
                    self.dropped(&frame);
                }
                Ok(())
            }
            RESUME => {
                let dedup = self.dedup;
                let Some(slot) = live(&mut self.slots, frame.id) else {
                    self.dropped(&frame);
                    return Ok(());
                };
                slot.remote_paused = false;
                let mut wire = Wire {
                    method: self.method,
                    out,
                };
                wire.flush(slot, dedup)?;
                self.reclaim(frame.id);
                Ok(())
            }
            DATA => self.on_data(frame, out),
            END => {
                let dedup = self.dedup;
                let Some(slot) = live(&mut self.slots, frame.id) else {
                    self.dropped(&frame);
                    return Ok(());
                };
                slot.remote_ended = true;
                out.wake(slot.read_waker.take());
                let mut wire = Wire {
                    method: self.method,
                    out,
                };
                wire.flush(slot, dedup)?;
                self.reclaim(frame.id);
                Ok(())
            }
            _ => {
                self.dropped(&frame);
                Ok(())
            }
        }
    }

    fn dropped(&self, frame: &Frame) {
        debug!(
            method = self.method,
            stream = frame.id,
            bitfield = %flags::describe(frame.bitfield),
            "frame for unknown stream dropped"
        );
    }

    fn on_open(&mut self, session: &Session, frame: Frame, out: &mut Outbox) -> std::result::Result<(), ProtocolError> {
        let Some(acceptor) = self.acceptor.clone() else {
            return Err(ProtocolError::NoStreamHandler(self.method));
        };

        let remote = frame.id;
        let id = self
            .slots
            .insert(StreamSlot::new(false, Some(remote), Phase::Open));
        let mut own_id = BytesMut::with_capacity(varint::uint_len(id));
        varint::put_uint(&mut own_id, id);

        let mut wire = Wire {
            method: self.method,
            out,
        };
        wire.send(remote, OPEN, Some(own_id.freeze()))?;
        wire.control(remote, RESUME)?;
        debug!(method = self.method, stream = id, remote, "stream accepted");

        wire.out.call(acceptor.accept(session, self.method, id));
        Ok(())
    }

    fn on_open_reply(&mut self, frame: Frame, out: &mut Outbox) -> std::result::Result<(), ProtocolError> {
        let dedup = self.dedup;
        let id = frame.id;
        let Some(slot) = self.slots.get_mut(id).filter(|slot| slot.initiator) else {
            self.dropped(&frame);
            return Ok(());
        };

        if slot.awaiting_open_reply {
            slot.awaiting_open_reply = false;
            self.reclaim(id);
            return Ok(());
        }
        if !matches!(slot.phase, Phase::Opening) {
            self.dropped(&frame);
            return Ok(());
        }

        let mut payload = frame.payload_or_empty();
        let remote = varint::get_uint(&mut payload)?;
        slot.remote_id = Some(remote);
        slot.phase = Phase::Open;
        out.wake(slot.open_waker.take());
        debug!(method = self.method, stream = id, remote, "stream open");

        let mut wire = Wire {
            method: self.method,
            out,
        };
        wire.control(remote, RESUME)?;
        wire.flush(slot, dedup)?;
        self.reclaim(id);
        Ok(())
    }

    fn on_close(&mut self, id: u64, frame: Frame, out: &mut Outbox) -> std::result::Result<(), ProtocolError> {
        let Some(slot) = live(&mut self.slots, id) else {
            self.dropped(&frame);
            return Ok(());
        };

        let error = match &frame.payload {
            Some(payload) if frame.bitfield & HAS_ERROR != 0 => {
                Some(ApplicationError::from(ErrorMessage::from_payload(payload)?))
            }
            _ => None,
        };
        let closure = match error {
            None if slot.remote_ended => Closure::Finished,
            error => Closure::Remote(error),
        };
        slot.remote_id = None;
        slot.close(closure, out);
        debug!(method = self.method, stream = id, "stream closed by peer");
        self.reclaim(id);
        Ok(())
    }

    fn on_data(&mut self, frame: Frame, out: &mut Outbox) -> std::result::Result<(), ProtocolError> {
        let id = frame.id;
        let high_water_mark = self.high_water_mark;
        let Some(slot) = self.slots.get_mut(id).filter(|slot| !slot.is_closed() && !slot.remote_ended) else {
            self.dropped(&frame);
            return Ok(());
        };

        let decoder = if slot.initiator {
            &self.initiator_reads
        } else {
            &self.responder_reads
        };
        let mut wire = Wire {
            method: self.method,
            out,
        };

        let items = match decoder.decode_batch(frame.payload_or_empty()) {
            Ok(items) => items,
            Err(err) => {
                debug!(method = self.method, stream = id, error = %err, "undecodable stream batch");
                if let Some(remote) = slot.remote_id {
                    let msg = ErrorMessage::new(err.to_string()).to_bytes();
                    wire.send(remote, CLOSE | HAS_ERROR, Some(msg))?;
                }
                slot.close(Closure::Failed(err), wire.out);
                self.reclaim(id);
                return Ok(());
            }
        };

        if !slot.handle_alive {
            trace!(method = self.method, stream = id, items = items.len(), "batch for released stream discarded");
            return Ok(());
        }
        trace!(method = self.method, stream = id, items = items.len(), "batch received");
        slot.inbound.extend(items);
        wire.out.wake(slot.read_waker.take());

        if slot.inbound.len() >= high_water_mark && !slot.local_paused {
            if let Some(remote) = slot.remote_id {
                slot.local_paused = true;
                trace!(method = self.method, stream = id, "pausing remote writer");
                wire.control(remote, PAUSE)?;
            }
        }
        Ok(())
    }
}

/// One side of a bidirectional stream.
///
/// `W` encodes the items this side writes, `R` decodes the items it reads.
/// Dropping the handle destroys a stream that was never ended. After
/// [`Stream::end`] the buffered items and `END` are still delivered.
pub struct Stream<W: Codec, R: Codec> {
    session: Session,
    method: u64,
    id: u64,
    writer: Arc<W>,
    reads: PhantomData<fn() -> R>,
}

impl<W: Codec, R: Codec> Stream<W, R> {
    pub(crate) fn new(session: Session, method: u64, id: u64, writer: Arc<W>) -> Self {
        Self {
            session,
            method,
            id,
            writer,
            reads: PhantomData,
        }
    }

    /// Local slot id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> u64 {
        self.method
    }

    /// Write one item.
    ///
    /// Returns `false` if the item was buffered because the remote reader is
    /// paused; await [`Stream::drained`] before writing more.
    pub fn write(&self, item: &W::Item) -> Result<bool> {
        self.write_encoded(vec![self.writer.to_bytes(item)])
    }

    /// Write several items as one batch.
    pub fn write_batch(&self, items: &[W::Item]) -> Result<bool> {
        let encoded = items.iter().map(|item| self.writer.to_bytes(item)).collect();
        self.write_encoded(encoded)
    }

    fn write_encoded(&self, items: Vec<Bytes>) -> Result<bool> {
        self.session
            .with_streams(self.method, |streams, out| streams.write(self.id, items, out))
            .unwrap_or(Err(RpcError::destroyed(Scope::Stream)))
    }

    /// Finish the write side. Sent after any buffered batch.
    pub fn end(&self) -> Result<()> {
        self.session
            .with_streams(self.method, |streams, out| streams.end(self.id, out))
            .unwrap_or(Err(RpcError::destroyed(Scope::Stream)))
    }

    /// Abort the stream, optionally telling the peer why.
    pub fn destroy(&self, error: Option<ApplicationError>) {
        self.session.with_streams(self.method, |streams, out| {
            streams.destroy(self.id, error, out)
        });
    }

    /// Resolves once the peer has acknowledged the stream.
    pub async fn opened(&self) -> Result<()> {
        poll_fn(|cx| {
            self.session
                .with_streams(self.method, |streams, out| streams.poll_opened(self.id, cx, out))
                .unwrap_or(Poll::Ready(Err(RpcError::destroyed(Scope::Stream))))
        })
        .await
    }

    /// Resolves once no written batch is waiting for the peer to resume.
    pub async fn drained(&self) -> Result<()> {
        poll_fn(|cx| {
            self.session
                .with_streams(self.method, |streams, _| streams.poll_drained(self.id, cx))
                .unwrap_or(Poll::Ready(Err(RpcError::destroyed(Scope::Stream))))
        })
        .await
    }

    /// Take the next queued item without waiting.
    ///
    /// `None` means nothing is available right now; use
    /// [`Stream::is_finished`] to tell that apart from the end of the stream.
    pub fn try_next(&mut self) -> Option<Result<R::Item>> {
        match self.poll_item(None) {
            Poll::Ready(item) => item,
            Poll::Pending => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.session
            .with_streams(self.method, |streams, _| streams.is_finished(self.id))
            .unwrap_or(true)
    }

    fn poll_item(&mut self, waker: Option<&Waker>) -> Poll<Option<Result<R::Item>>> {
        let polled = self
            .session
            .with_streams(self.method, |streams, out| streams.poll_next(self.id, waker, out))
            .unwrap_or(Poll::Ready(None));
        polled.map(|item| {
            item.map(|result| {
                result.and_then(|item| {
                    item.downcast::<R::Item>()
                        .map(|item| *item)
                        .map_err(|_| UsageError::ItemType.into())
                })
            })
        })
    }
}

impl<W: Codec, R: Codec> futures_core::Stream for Stream<W, R> {
    type Item = Result<R::Item>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_item(Some(cx.waker()))
    }
}

impl<W: Codec, R: Codec> Drop for Stream<W, R> {
    fn drop(&mut self) {
        self.session
            .with_streams(self.method, |streams, out| streams.release(self.id, out));
    }
}

impl<W: Codec, R: Codec> fmt::Debug for Stream<W, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("method", &self.method)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
