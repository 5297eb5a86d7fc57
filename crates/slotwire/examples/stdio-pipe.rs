//! A session pair over a Unix socket pair, one reader thread per side.
//!
//! Each side's sink writes frames with a `FrameWriter`; a thread reads
//! complete frames with a `FrameReader` and feeds them to `recv`.
//!
//! Run with:
//!   cargo run --example stdio-pipe

#[cfg(unix)]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::os::unix::net::UnixStream;
    use std::sync::Mutex;
    use std::thread;

    use slotwire::frame::{FrameError, FrameReader, FrameWriter};
    use slotwire::{MethodOptions, Session, Uint};

    fn connect(stream: UnixStream) -> std::io::Result<(Session, thread::JoinHandle<()>)> {
        let writer = Mutex::new(FrameWriter::new(stream.try_clone()?));
        let session = Session::new(move |bytes| {
            let Ok(mut writer) = writer.lock() else {
                return;
            };
            if let Err(err) = writer.write_raw(&bytes) {
                eprintln!("write failed: {err}");
            }
        });

        let weak = session.downgrade();
        let reader = thread::spawn(move || {
            let mut reader = FrameReader::new(stream);
            loop {
                let batch = match reader.read_batch() {
                    Ok(batch) => batch,
                    Err(FrameError::ConnectionClosed) => break,
                    Err(err) => {
                        eprintln!("read failed: {err}");
                        break;
                    }
                };
                let Some(session) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = session.recv(&batch) {
                    eprintln!("protocol error: {err}");
                    session.destroy();
                    break;
                }
            }
        });
        Ok((session, reader))
    }

    let (left, right) = UnixStream::pair()?;
    let shutdown = left.try_clone()?;
    let (client, client_reader) = connect(left)?;
    let (server, server_reader) = connect(right)?;

    server.register(0, MethodOptions::new(Uint, Uint).on_request_fn(|n| Ok(n * n)))?;
    let square = client.register(0, MethodOptions::new(Uint, Uint))?;

    let runtime = tokio::runtime::Builder::new_current_thread().build()?;
    runtime.block_on(async {
        for n in [2, 3, 300] {
            println!("{n}^2 = {}", square.request(&n).await?);
        }
        Ok::<_, slotwire::RpcError>(())
    })?;

    client.destroy();
    server.destroy();
    shutdown.shutdown(std::net::Shutdown::Both)?;
    let _ = client_reader.join();
    let _ = server_reader.join();
    Ok(())
}

#[cfg(not(unix))]
fn main() {
    eprintln!("stdio-pipe needs Unix domain sockets");
}
