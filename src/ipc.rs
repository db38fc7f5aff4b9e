//! The channel between a running build script and the engine.
//!
//! While a script runs, the engine listens on a unix socket whose path is
//! passed in the script's environment.  `restamp ifchange dep...` inside the
//! script connects, writes one absolute path per line, half-closes the
//! connection and waits for a one line reply: "ok" once every dependency is
//! up to date, or "error: <message>".

use anyhow::{anyhow, bail, Context as _};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::process::{Child, ExitStatus};
use std::time::Duration;
use tracing::warn;

/// Environment variable holding the socket path of the parent build.
pub const SOCKET_VAR: &str = "RESTAMP_SOCKET";
/// Environment variable holding the project root.
pub const ROOT_VAR: &str = "RESTAMP_ROOT";
/// Environment variable holding the target being built.
pub const TARGET_VAR: &str = "RESTAMP_TARGET";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn serve_conn(
    stream: UnixStream,
    handle: &mut dyn FnMut(&str) -> anyhow::Result<()>,
) -> std::io::Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let mut result = Ok(());
    for line in BufReader::new(&stream).lines() {
        let line = line?;
        if line.is_empty() || result.is_err() {
            continue;
        }
        result = handle(&line);
    }
    let mut w = &stream;
    match result {
        Ok(()) => writeln!(w, "ok"),
        Err(err) => writeln!(w, "error: {}", format!("{:#}", err).replace('\n', " ")),
    }
}

/// Answer dependency requests from `child` until it exits, returning its
/// exit status.  Each requested path is passed to `handle`.
pub fn serve(
    listener: &UnixListener,
    child: &mut Child,
    mut handle: impl FnMut(&str) -> anyhow::Result<()>,
) -> anyhow::Result<ExitStatus> {
    listener.set_nonblocking(true)?;
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                // The client going away mid-request only hurts the client.
                if let Err(err) = serve_conn(stream, &mut handle) {
                    warn!(%err, "dependency request connection failed");
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                if let Some(status) = child.try_wait()? {
                    return Ok(status);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(err) => return Err(anyhow!("accept: {}", err)),
        }
    }
}

/// Client side: ask the engine listening on `socket` to bring `deps` up to
/// date.  Paths should be absolute, since the engine's working directory
/// may differ from ours.
pub fn request(socket: &Path, deps: &[String]) -> anyhow::Result<()> {
    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("connect to parent build at {}", socket.display()))?;
    for dep in deps {
        if dep.contains('\n') {
            bail!("bad dependency name {:?}", dep);
        }
        writeln!(stream, "{}", dep)?;
    }
    stream.shutdown(std::net::Shutdown::Write)?;

    let mut reply = String::new();
    stream.read_to_string(&mut reply)?;
    let reply = reply.trim_end();
    if reply == "ok" {
        return Ok(());
    }
    match reply.strip_prefix("error: ") {
        Some(msg) => bail!("{}", msg),
        None => bail!("unexpected reply from parent build: {:?}", reply),
    }
}
