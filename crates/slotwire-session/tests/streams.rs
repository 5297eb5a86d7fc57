//! Stream lifecycle, batching and flow control between two in-memory sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use futures_util::StreamExt;
use slotwire_encoding::{Uint, Utf8};
use slotwire_frame::flags::{self, CLOSE, DATA, PAUSE};
use slotwire_frame::{decode_all, Frame, FrameConfig};
use slotwire_session::{
    pair, pair_with_config, ApplicationError, MethodOptions, RpcError, Scope, Session, SessionConfig, Stream, UsageError,
    WeakSession,
};
use tokio::sync::oneshot;

type Log = Arc<Mutex<Vec<Bytes>>>;
type Held<W, R> = Arc<Mutex<Option<Stream<W, R>>>>;

fn tapped_pair(config: SessionConfig) -> (Session, Session, Log, Log) {
    let to_right: Arc<OnceLock<WeakSession>> = Arc::default();
    let to_left: Arc<OnceLock<WeakSession>> = Arc::default();
    let left_log: Log = Arc::default();
    let right_log: Log = Arc::default();

    let left = Session::with_config(tap(Arc::clone(&to_right), Arc::clone(&left_log)), config.clone());
    let right = Session::with_config(tap(Arc::clone(&to_left), Arc::clone(&right_log)), config);
    to_right.set(right.downgrade()).unwrap();
    to_left.set(left.downgrade()).unwrap();
    (left, right, left_log, right_log)
}

fn tap(peer: Arc<OnceLock<WeakSession>>, log: Log) -> impl Fn(Bytes) + Send + Sync + 'static {
    move |bytes: Bytes| {
        log.lock().unwrap().push(bytes.clone());
        if let Some(session) = peer.get().and_then(WeakSession::upgrade) {
            session.recv(&bytes).unwrap();
        }
    }
}

fn frames(log: &Log) -> Vec<Frame> {
    log.lock()
        .unwrap()
        .iter()
        .flat_map(|bytes| decode_all(bytes, &FrameConfig::default()).unwrap())
        .collect()
}

fn count(log: &Log, message: u64) -> usize {
    frames(log)
        .iter()
        .filter(|frame| flags::stream_message(frame.bitfield) == message)
        .count()
}

/// Responder handler that parks the accepted stream for the test to drive.
fn hold<W, R>(held: &Held<W, R>) -> impl Fn(Stream<W, R>) + Send + Sync + 'static
where
    W: slotwire_encoding::Codec,
    R: slotwire_encoding::Codec,
{
    let held = Arc::clone(held);
    move |stream| {
        *held.lock().unwrap() = Some(stream);
    }
}

fn take<W, R>(held: &Held<W, R>) -> Stream<W, R>
where
    W: slotwire_encoding::Codec,
    R: slotwire_encoding::Codec,
{
    held.lock().unwrap().take().expect("stream was not accepted")
}

#[tokio::test]
async fn echo_stream_doubles_items() {
    let (client, server) = pair();
    server
        .register(
            0,
            MethodOptions::new(Uint, Uint).on_stream(|mut stream: Stream<Uint, Uint>| {
                tokio::spawn(async move {
                    while let Some(Ok(n)) = stream.next().await {
                        stream.write(&n).unwrap();
                        stream.write(&(n + 1)).unwrap();
                    }
                    stream.end().unwrap();
                });
            }),
        )
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let stream = method.create_request_stream().unwrap();
    stream.write(&1).unwrap();
    stream.write(&2).unwrap();
    stream.end().unwrap();

    let items: Vec<u64> = stream.map(Result::unwrap).collect().await;
    assert_eq!(items, vec![1, 2, 2, 3]);
    assert_eq!(method.active_streams(), 0);
}

#[tokio::test]
async fn echo_stream_survives_a_one_item_window() {
    let (client, server) = pair_with_config(SessionConfig::default().with_high_water_mark(1));
    server
        .register(
            0,
            MethodOptions::new(Uint, Uint).on_stream(|mut stream: Stream<Uint, Uint>| {
                tokio::spawn(async move {
                    while let Some(Ok(n)) = stream.next().await {
                        stream.write(&n).unwrap();
                        stream.write(&(n + 1)).unwrap();
                    }
                    stream.end().unwrap();
                });
            }),
        )
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let stream = method.create_request_stream().unwrap();
    stream.write(&1).unwrap();
    stream.write(&2).unwrap();
    stream.end().unwrap();

    let items: Vec<u64> = stream.map(Result::unwrap).collect().await;
    assert_eq!(items, vec![1, 2, 2, 3]);
    assert_eq!(method.active_streams(), 0);
}

#[tokio::test]
async fn ended_stream_delivers_buffered_items_after_drop() {
    let (client, server) = pair_with_config(SessionConfig::default().with_high_water_mark(1));
    let held: Held<Uint, Uint> = Arc::default();
    let server_method = server
        .register(0, MethodOptions::new(Uint, Uint).on_stream(hold(&held)))
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let writer = method.create_request_stream().unwrap();
    writer.opened().await.unwrap();
    assert!(writer.write(&1).unwrap());
    assert!(!writer.write(&2).unwrap());
    writer.end().unwrap();
    drop(writer);
    assert_eq!(method.active_streams(), 1);

    let mut reader = take(&held);
    assert_eq!(reader.try_next().unwrap().unwrap(), 1);
    assert_eq!(reader.try_next().unwrap().unwrap(), 2);
    assert!(reader.try_next().is_none());
    assert!(reader.is_finished());

    reader.end().unwrap();
    assert_eq!(method.active_streams(), 0);
    drop(reader);
    assert_eq!(server_method.active_streams(), 0);
}

#[tokio::test]
async fn dedup_baseline_follows_the_last_batch() {
    let (client, server, client_log, _) = tapped_pair(SessionConfig::default());
    let held: Held<Uint, Uint> = Arc::default();
    server
        .register(0, MethodOptions::new(Uint, Uint).dedup(true).on_stream(hold(&held)))
        .unwrap();
    let method = client
        .register(0, MethodOptions::new(Uint, Uint).dedup(true))
        .unwrap();

    let writer = method.create_request_stream().unwrap();
    writer.opened().await.unwrap();
    for n in [7, 8, 7] {
        writer.write(&n).unwrap();
    }
    assert_eq!(count(&client_log, DATA), 3);

    let mut reader = take(&held);
    let got: Vec<u64> = std::iter::from_fn(|| reader.try_next())
        .map(Result::unwrap)
        .collect();
    assert_eq!(got, vec![7, 8, 7]);
}

#[tokio::test]
async fn streams_on_one_method_are_independent() {
    let config = SessionConfig::default().with_high_water_mark(1);
    let (client, server, client_log, server_log) = tapped_pair(config);
    let accepted: Arc<Mutex<Vec<Stream<Uint, Uint>>>> = Arc::default();
    let sink = Arc::clone(&accepted);
    server
        .register(
            0,
            MethodOptions::new(Uint, Uint)
                .dedup(true)
                .on_stream(move |stream| sink.lock().unwrap().push(stream)),
        )
        .unwrap();
    let method = client
        .register(0, MethodOptions::new(Uint, Uint).dedup(true))
        .unwrap();

    let first = method.create_request_stream().unwrap();
    first.opened().await.unwrap();
    let second = method.create_request_stream().unwrap();
    second.opened().await.unwrap();
    let (mut first_reader, mut second_reader) = {
        let mut accepted = accepted.lock().unwrap();
        let second = accepted.pop().unwrap();
        (accepted.pop().unwrap(), second)
    };

    // Same item on both: each slot has its own dedup baseline.
    assert!(first.write(&7).unwrap());
    assert!(second.write(&7).unwrap());
    assert_eq!(count(&client_log, DATA), 2);
    assert_eq!(count(&server_log, PAUSE), 2);

    // Only the second reader drains, so only the second writer resumes.
    assert_eq!(second_reader.try_next().unwrap().unwrap(), 7);
    assert!(!first.write(&8).unwrap());
    assert!(second.write(&8).unwrap());
    assert_eq!(count(&client_log, DATA), 3);

    // The first slot's pending batch is flushed on its own resume.
    assert_eq!(first_reader.try_next().unwrap().unwrap(), 7);
    assert_eq!(count(&client_log, DATA), 4);
    assert_eq!(first_reader.try_next().unwrap().unwrap(), 8);
    assert_eq!(second_reader.try_next().unwrap().unwrap(), 8);
    assert_eq!(method.active_streams(), 2);
}

#[tokio::test]
async fn dedup_drops_repeated_batches() {
    let (client, server, client_log, _) = tapped_pair(SessionConfig::default());
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    server
        .register(
            0,
            MethodOptions::new(Uint, Uint)
                .dedup(true)
                .on_stream(move |stream: Stream<Uint, Uint>| {
                    let Some(tx) = tx.lock().unwrap().take() else {
                        return;
                    };
                    tokio::spawn(async move {
                        let items: Vec<u64> = stream.map(Result::unwrap).collect().await;
                        let _ = tx.send(items);
                    });
                }),
        )
        .unwrap();
    let method = client
        .register(0, MethodOptions::new(Uint, Uint).dedup(true))
        .unwrap();

    let stream = method.create_request_stream().unwrap();
    stream.opened().await.unwrap();
    for n in [1, 1, 1, 2] {
        stream.write(&n).unwrap();
    }
    stream.end().unwrap();

    assert_eq!(rx.await.unwrap(), vec![1, 2]);
    assert_eq!(count(&client_log, DATA), 2);
}

#[tokio::test]
async fn full_reader_pauses_the_writer_once() {
    let config = SessionConfig::default().with_high_water_mark(2);
    let (client, server, client_log, server_log) = tapped_pair(config);
    let held: Held<Uint, Uint> = Arc::default();
    server
        .register(0, MethodOptions::new(Uint, Uint).on_stream(hold(&held)))
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let writer = method.create_request_stream().unwrap();
    writer.opened().await.unwrap();
    assert!(writer.write(&1).unwrap());
    assert!(writer.write(&2).unwrap());
    assert!(!writer.write(&3).unwrap());
    assert!(!writer.write(&4).unwrap());
    assert!(!writer.write(&5).unwrap());
    assert_eq!(count(&server_log, PAUSE), 1);
    assert_eq!(count(&client_log, DATA), 2);

    let mut reader = take(&held);
    assert_eq!(reader.try_next().unwrap().unwrap(), 1);

    // Reading below the mark resumes the writer, which flushes one batch.
    assert_eq!(count(&client_log, DATA), 3);
    writer.drained().await.unwrap();

    let rest: Vec<u64> = std::iter::from_fn(|| reader.try_next())
        .map(Result::unwrap)
        .collect();
    assert_eq!(rest, vec![2, 3, 4, 5]);
    assert!(!reader.is_finished());
}

#[tokio::test]
async fn unused_stream_never_reaches_the_peer() {
    let (client, server, client_log, _) = tapped_pair(SessionConfig::default());
    let accepted = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&accepted);
    server
        .register(
            0,
            MethodOptions::new(Uint, Uint).on_stream(move |_stream: Stream<Uint, Uint>| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let first = method.create_request_stream().unwrap();
    first.destroy(None);
    drop(first);
    drop(method.create_request_stream().unwrap());

    assert!(client_log.lock().unwrap().is_empty());
    assert_eq!(accepted.load(Ordering::SeqCst), 0);
    assert_eq!(method.active_streams(), 0);
}

#[tokio::test]
async fn destroy_with_error_reaches_reader() {
    let (client, server) = pair();
    let held: Held<Uint, Uint> = Arc::default();
    server
        .register(0, MethodOptions::new(Uint, Uint).on_stream(hold(&held)))
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let mut local = method.create_request_stream().unwrap();
    local.opened().await.unwrap();
    local.destroy(Some(ApplicationError::new("stop").with_code("E_STOP")));

    let mut remote = take(&held);
    match remote.try_next() {
        Some(Err(RpcError::Application(err))) => {
            assert_eq!(err.message.as_deref(), Some("stop"));
            assert_eq!(err.code.as_deref(), Some("E_STOP"));
        }
        other => panic!("expected application error, got {other:?}"),
    }
    assert!(remote.try_next().is_none());
    assert!(remote.is_finished());

    assert!(matches!(
        local.next().await,
        Some(Err(RpcError::Usage(UsageError::Destroyed(Scope::Stream))))
    ));
    assert!(local.next().await.is_none());
    assert!(local.write(&1).unwrap_err().is_destroyed());
}

#[tokio::test]
async fn close_before_end_is_reported() {
    let (client, server) = pair();
    let held: Held<Uint, Uint> = Arc::default();
    server
        .register(0, MethodOptions::new(Uint, Uint).on_stream(hold(&held)))
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let mut local = method.create_request_stream().unwrap();
    local.opened().await.unwrap();
    take(&held).destroy(None);

    assert!(matches!(local.next().await, Some(Err(RpcError::RemoteClosed))));
    assert!(local.next().await.is_none());
}

#[tokio::test]
async fn write_after_end_fails() {
    let (client, server) = pair();
    let held: Held<Uint, Uint> = Arc::default();
    server
        .register(0, MethodOptions::new(Uint, Uint).on_stream(hold(&held)))
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let stream = method.create_request_stream().unwrap();
    stream.write(&1).unwrap();
    stream.end().unwrap();
    stream.end().unwrap();
    assert!(matches!(
        stream.write(&2).unwrap_err(),
        RpcError::Usage(UsageError::WriteAfterEnd)
    ));
}

#[tokio::test]
async fn ending_both_sides_frees_both_slots() {
    let (client, server, client_log, server_log) = tapped_pair(SessionConfig::default());
    let held: Held<Uint, Uint> = Arc::default();
    let server_method = server
        .register(0, MethodOptions::new(Uint, Uint).on_stream(hold(&held)))
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let mut local = method.create_request_stream().unwrap();
    local.end().unwrap();
    let mut remote = take(&held);
    remote.end().unwrap();

    assert!(local.next().await.is_none());
    assert!(remote.next().await.is_none());
    drop(local);
    drop(remote);

    assert_eq!(method.active_streams(), 0);
    assert_eq!(server_method.active_streams(), 0);
    assert_eq!(count(&client_log, CLOSE) + count(&server_log, CLOSE), 0);
}

#[tokio::test]
async fn undecodable_batch_closes_only_that_stream() {
    let (client, server) = pair();
    let held: Held<Uint, Uint> = Arc::default();
    let keep = Arc::clone(&held);
    server
        .register(
            0,
            MethodOptions::new(Uint, Uint).on_stream(move |stream: Stream<Uint, Uint>| {
                // Far longer than the payload: not a valid string length.
                stream.write(&300).unwrap();
                *keep.lock().unwrap() = Some(stream);
            }),
        )
        .unwrap();
    let method = client.register(0, MethodOptions::new(Utf8, Uint)).unwrap();

    let mut local = method.create_request_stream().unwrap();
    assert!(matches!(local.next().await, Some(Err(RpcError::Codec(_)))));

    let mut remote = take(&held);
    assert!(matches!(remote.try_next(), Some(Err(RpcError::Application(_)))));

    // The session is still usable.
    let mut again = method.create_request_stream().unwrap();
    assert!(matches!(again.next().await, Some(Err(RpcError::Codec(_)))));
}

#[tokio::test]
async fn close_while_opening_is_routed_by_initiator_id() {
    let (client, server) = pair();
    let held: Held<Uint, Uint> = Arc::default();
    server
        .register(0, MethodOptions::new(Uint, Uint).on_stream(hold(&held)))
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    client.cork();
    let local = method.create_request_stream().unwrap();
    local.write(&1).unwrap();
    local.destroy(None);
    client.uncork();

    let mut remote = take(&held);
    assert!(matches!(remote.try_next(), Some(Err(RpcError::RemoteClosed))));

    drop(local);
    assert_eq!(method.active_streams(), 0);
}

#[tokio::test]
async fn method_destroy_aborts_streams_silently() {
    let (client, server, client_log, _) = tapped_pair(SessionConfig::default());
    let held: Held<Uint, Uint> = Arc::default();
    server
        .register(0, MethodOptions::new(Uint, Uint).on_stream(hold(&held)))
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let mut local = method.create_request_stream().unwrap();
    local.opened().await.unwrap();
    let sent = client_log.lock().unwrap().len();

    method.destroy();
    assert!(matches!(
        local.next().await,
        Some(Err(RpcError::Usage(UsageError::Destroyed(Scope::Method))))
    ));
    assert!(local.write(&1).unwrap_err().is_destroyed());
    drop(local);
    assert_eq!(client_log.lock().unwrap().len(), sent);
}

#[tokio::test]
async fn session_destroy_fails_open_streams() {
    let (client, server) = pair();
    let held: Held<Uint, Uint> = Arc::default();
    server
        .register(0, MethodOptions::new(Uint, Uint).on_stream(hold(&held)))
        .unwrap();
    let method = client.register(0, MethodOptions::new(Uint, Uint)).unwrap();

    let mut local = method.create_request_stream().unwrap();
    local.opened().await.unwrap();
    client.destroy();

    assert!(matches!(
        local.next().await,
        Some(Err(RpcError::Usage(UsageError::Destroyed(Scope::Session))))
    ));
    assert!(method.create_request_stream().unwrap_err().is_destroyed());
}
