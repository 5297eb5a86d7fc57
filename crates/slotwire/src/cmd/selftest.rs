//! End-to-end checks over two sessions wired together in memory.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use futures_util::future::join_all;
use futures_util::StreamExt;
use slotwire_encoding::{Uint, Utf8};
use slotwire_session::{MethodOptions, Request, Session, SessionConfig, Stream, WeakSession};
use tracing::{debug, info};

use crate::cmd::SelftestArgs;
use crate::exit::{CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_checks, CheckOutput, OutputFormat};

type Check = std::result::Result<String, String>;

pub fn run(args: SelftestArgs, format: OutputFormat) -> CliResult<i32> {
    if args.high_water_mark == 0 {
        return Err(CliError::usage("--high-water-mark must be at least 1"));
    }
    let mut config = SessionConfig::default().with_high_water_mark(args.high_water_mark);
    if let Some(magic) = args.magic {
        config = config.with_magic(magic);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime: {err}")))?;

    let checks = runtime.block_on(async {
        vec![
            check("request", request_response(&config)).await,
            check("concurrent", concurrent_requests(&config)).await,
            check("cork", corked_batch(&config)).await,
            check("one-way", one_way_sends(&config)).await,
            check("stream", echo_stream(&config)).await,
            check("destroy", destroy_rejects(&config)).await,
        ]
    });

    print_checks(&checks, format);
    if checks.iter().all(|c| c.passed) {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

async fn check(name: &'static str, test: impl Future<Output = Check>) -> CheckOutput {
    let started = Instant::now();
    let result = test.await;
    debug!(check = name, elapsed_us = started.elapsed().as_micros() as u64, ok = result.is_ok(), "check finished");
    let (passed, detail) = match result {
        Ok(detail) => (true, detail),
        Err(detail) => (false, detail),
    };
    if !passed {
        info!(check = name, %detail, "check failed");
    }
    CheckOutput {
        name,
        passed,
        detail,
    }
}

/// Two sessions wired sink-to-recv, counting the left side's sink calls.
fn wired(config: &SessionConfig) -> (Session, Session, Arc<AtomicUsize>) {
    let to_right: Arc<OnceLock<WeakSession>> = Arc::default();
    let to_left: Arc<OnceLock<WeakSession>> = Arc::default();
    let writes = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&writes);
    let peer = Arc::clone(&to_right);
    let left = Session::with_config(
        move |bytes| {
            counter.fetch_add(1, Ordering::SeqCst);
            deliver(&peer, &bytes);
        },
        config.clone(),
    );
    let peer = Arc::clone(&to_left);
    let right = Session::with_config(move |bytes| deliver(&peer, &bytes), config.clone());

    let _ = to_right.set(right.downgrade());
    let _ = to_left.set(left.downgrade());
    (left, right, writes)
}

fn deliver(peer: &OnceLock<WeakSession>, bytes: &[u8]) {
    if let Some(session) = peer.get().and_then(WeakSession::upgrade) {
        if let Err(err) = session.recv(bytes) {
            info!(error = %err, "peer rejected frames");
        }
    }
}

fn fail(context: &str, err: impl std::fmt::Display) -> String {
    format!("{context}: {err}")
}

async fn request_response(config: &SessionConfig) -> Check {
    let (client, server, _) = wired(config);
    server
        .register(
            1,
            MethodOptions::new(Utf8, Utf8).on_request_fn(|name: String| {
                if name == "hello" {
                    Ok("world".to_string())
                } else {
                    Err(slotwire_session::ApplicationError::new("unexpected greeting"))
                }
            }),
        )
        .map_err(|err| fail("register", err))?;
    let method = client
        .register(1, MethodOptions::new(Utf8, Utf8))
        .map_err(|err| fail("register", err))?;

    let reply = method
        .request(&"hello".to_string())
        .await
        .map_err(|err| fail("request", err))?;
    if reply != "world" {
        return Err(format!("expected \"world\", got {reply:?}"));
    }
    Ok("hello -> world".to_string())
}

async fn concurrent_requests(config: &SessionConfig) -> Check {
    let (client, server, _) = wired(config);
    server
        .register(0, MethodOptions::new(Uint, Uint).on_request_fn(Ok))
        .map_err(|err| fail("register", err))?;
    let method = client
        .register(0, MethodOptions::new(Uint, Uint))
        .map_err(|err| fail("register", err))?;

    let calls: Vec<_> = (0..10).map(|n| method.request(&n)).collect();
    let mut results = Vec::with_capacity(calls.len());
    for result in join_all(calls).await {
        results.push(result.map_err(|err| fail("request", err))?);
    }
    if results != (0..10).collect::<Vec<u64>>() {
        return Err(format!("responses out of order: {results:?}"));
    }
    Ok("10 echoes matched".to_string())
}

async fn corked_batch(config: &SessionConfig) -> Check {
    let (client, server, writes) = wired(config);
    server
        .register(0, MethodOptions::new(Uint, Uint).on_request_fn(|n| Ok(n * n)))
        .map_err(|err| fail("register", err))?;
    let method = client
        .register(0, MethodOptions::new(Uint, Uint))
        .map_err(|err| fail("register", err))?;

    client.cork();
    let calls: Vec<_> = (1..=3).map(|n| method.request(&n)).collect();
    let corked = writes.load(Ordering::SeqCst);
    client.uncork();
    let uncorked = writes.load(Ordering::SeqCst);

    let mut squares = Vec::new();
    for result in join_all(calls).await {
        squares.push(result.map_err(|err| fail("request", err))?);
    }
    if corked != 0 || uncorked != 1 {
        return Err(format!("expected 0 then 1 writes, saw {corked} then {uncorked}"));
    }
    if squares != [1, 4, 9] {
        return Err(format!("unexpected responses {squares:?}"));
    }
    Ok("3 requests in 1 write".to_string())
}

async fn one_way_sends(config: &SessionConfig) -> Check {
    let (client, server, _) = wired(config);
    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    let sink = Arc::clone(&seen);
    server
        .register(
            2,
            MethodOptions::new(Uint, Uint).on_request(move |request: Request<Uint, Uint>| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push(request.data);
                }
            }),
        )
        .map_err(|err| fail("register", err))?;
    let method = client
        .register(2, MethodOptions::new(Uint, Uint))
        .map_err(|err| fail("register", err))?;

    for n in 0..5 {
        method.send(&n).map_err(|err| fail("send", err))?;
    }
    let seen = seen.lock().map(|seen| seen.clone()).unwrap_or_default();
    if seen != [0, 1, 2, 3, 4] {
        return Err(format!("handler saw {seen:?}"));
    }
    if client.pending_requests() != 0 {
        return Err("one-way send left a pending request".to_string());
    }
    Ok("5 sends in order".to_string())
}

async fn echo_stream(config: &SessionConfig) -> Check {
    let (client, server, _) = wired(config);
    server
        .register(
            3,
            MethodOptions::new(Uint, Uint).on_stream(|mut stream: Stream<Uint, Uint>| {
                tokio::spawn(async move {
                    while let Some(Ok(n)) = stream.next().await {
                        if stream.write(&n).and_then(|_| stream.write(&(n + 1))).is_err() {
                            return;
                        }
                    }
                    let _ = stream.end();
                });
            }),
        )
        .map_err(|err| fail("register", err))?;
    let method = client
        .register(3, MethodOptions::new(Uint, Uint))
        .map_err(|err| fail("register", err))?;

    let mut stream = method
        .create_request_stream()
        .map_err(|err| fail("create", err))?;
    for n in [1, 2] {
        stream.write(&n).map_err(|err| fail("write", err))?;
    }
    stream.end().map_err(|err| fail("end", err))?;

    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item.map_err(|err| fail("read", err))?);
    }
    if items != [1, 2, 2, 3] {
        return Err(format!("echo returned {items:?}"));
    }
    Ok("1,2 -> 1,2,2,3".to_string())
}

async fn destroy_rejects(config: &SessionConfig) -> Check {
    let (client, server, _) = wired(config);
    let held: Arc<Mutex<Vec<Request<Uint, Uint>>>> = Arc::default();
    let keep = Arc::clone(&held);
    server
        .register(
            0,
            MethodOptions::new(Uint, Uint).on_request(move |request| {
                if let Ok(mut held) = keep.lock() {
                    held.push(request);
                }
            }),
        )
        .map_err(|err| fail("register", err))?;
    let method = client
        .register(0, MethodOptions::new(Uint, Uint))
        .map_err(|err| fail("register", err))?;

    let pending = method.request(&1);
    client.destroy();
    client.destroy();

    match pending.await {
        Err(err) if err.is_destroyed() => {}
        other => return Err(format!("pending request resolved to {other:?}")),
    }
    match method.request(&2).await {
        Err(err) if err.is_destroyed() => {}
        other => return Err(format!("request after destroy resolved to {other:?}")),
    }
    Ok("pending and later calls rejected".to_string())
}
