//! Two in-memory sessions: a request, a batch of one-way sends and an echo
//! stream.
//!
//! Run with:
//!   cargo run --example echo-pair

use futures_util::StreamExt;
use slotwire::{pair, MethodOptions, Request, Stream, Uint, Utf8};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (client, server) = pair();

    server.register(
        1,
        MethodOptions::new(Utf8, Utf8).on_request_fn(|name: String| Ok(format!("hello {name}"))),
    )?;
    server.register(
        2,
        MethodOptions::new(Uint, Uint).on_request(|request: Request<Uint, Uint>| {
            eprintln!("server: one-way {}", request.data);
        }),
    )?;
    server.register(
        3,
        MethodOptions::new(Uint, Uint).on_stream(|mut stream: Stream<Uint, Uint>| {
            tokio::spawn(async move {
                while let Some(Ok(n)) = stream.next().await {
                    let _ = stream.write_batch(&[n, n * 10]);
                }
                let _ = stream.end();
            });
        }),
    )?;

    let greet = client.register(1, MethodOptions::new(Utf8, Utf8))?;
    println!("{}", greet.request(&"slotwire".to_string()).await?);

    let notify = client.register(2, MethodOptions::new(Uint, Uint))?;
    client.cork();
    for n in 0..3 {
        notify.send(&n)?;
    }
    client.uncork();

    let echo = client.register(3, MethodOptions::new(Uint, Uint))?;
    let mut stream = echo.create_request_stream()?;
    for n in 1..=3 {
        stream.write(&n)?;
    }
    stream.end()?;
    while let Some(item) = stream.next().await {
        println!("stream: {}", item?);
    }

    client.destroy();
    server.destroy();
    Ok(())
}
