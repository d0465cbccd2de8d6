use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::protocol::{MethodHandler, RtspRequest};
use crate::server::ServerContext;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
/// Read timeout of client sockets; bounds how long a connection takes to
/// notice shutdown.
const READ_POLL: Duration = Duration::from_millis(100);
const MAX_BODY_LEN: usize = 64 * 1024;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval.
/// On exit it joins every connection thread it spawned.
pub fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>, running: Arc<AtomicBool>) {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if let Err(e) = configure(&stream) {
                    tracing::warn!(%peer_addr, error = %e, "cannot configure client socket");
                    continue;
                }
                let ctx = ctx.clone();
                let running = running.clone();
                let spawned = thread::Builder::new()
                    .name(format!("rtsp-{peer_addr}"))
                    .spawn(move || Connection::handle(stream, peer_addr, ctx, running));
                match spawned {
                    Ok(handle) => connections.push(handle),
                    Err(e) => tracing::error!(%peer_addr, error = %e, "cannot spawn connection thread"),
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
        connections.retain(|c| !c.is_finished());
    }

    let open = connections.len();
    for connection in connections {
        if connection.join().is_err() {
            tracing::error!("RTSP connection thread panicked");
        }
    }
    tracing::debug!(joined = open, "accept loop exited");
}

fn configure(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_POLL))?;
    stream.set_nodelay(true)
}

enum ReadOutcome {
    Request(RtspRequest),
    Skip,
    Closed(&'static str),
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    handler: MethodHandler,
    peer_addr: SocketAddr,
    pending: String,
}

impl Connection {
    fn handle(
        stream: TcpStream,
        peer_addr: SocketAddr,
        ctx: Arc<ServerContext>,
        running: Arc<AtomicBool>,
    ) {
        tracing::info!(%peer_addr, "client connected");

        let reader_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%peer_addr, error = %e, "cannot clone client socket");
                return;
            }
        };

        let mut conn = Connection {
            reader: BufReader::new(reader_stream),
            writer: stream,
            handler: MethodHandler::new(ctx, peer_addr),
            peer_addr,
            pending: String::new(),
        };

        let reason = conn.run(&running);
        conn.handler.park();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, running: &AtomicBool) -> &'static str {
        while running.load(Ordering::SeqCst) {
            let request = match self.read_request(running) {
                ReadOutcome::Request(request) => request,
                ReadOutcome::Skip => continue,
                ReadOutcome::Closed(reason) => return reason,
            };

            tracing::debug!(
                peer = %self.peer_addr,
                method = %request.method,
                uri = %request.uri,
                version = %request.version,
                "request"
            );

            let response = self.handler.handle(&request);

            tracing::debug!(
                peer = %self.peer_addr,
                status = response.status_code,
                "response"
            );

            if self
                .writer
                .write_all(response.serialize().as_bytes())
                .is_err()
            {
                return "write error";
            }
        }

        "server shutting down"
    }

    /// Read one request head plus its body. Partial lines survive read
    /// timeouts so the shutdown flag can be polled mid-request.
    fn read_request(&mut self, running: &AtomicBool) -> ReadOutcome {
        loop {
            if !running.load(Ordering::SeqCst) {
                return ReadOutcome::Closed("server shutting down");
            }
            match self.reader.read_line(&mut self.pending) {
                Ok(0) => return ReadOutcome::Closed("connection closed by client"),
                Ok(_) => {
                    if !self.pending.ends_with('\n') {
                        continue;
                    }
                    if self.pending.ends_with("\r\n\r\n") || self.pending.ends_with("\n\n") {
                        break;
                    }
                    if self.pending.trim().is_empty() {
                        // Stray CRLF between requests.
                        self.pending.clear();
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(_) => return ReadOutcome::Closed("read error"),
            }
        }

        let head = std::mem::take(&mut self.pending);
        let mut request = match RtspRequest::parse(&head) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                return ReadOutcome::Skip;
            }
        };

        let len = match request.content_length() {
            Ok(len) if len <= MAX_BODY_LEN => len,
            Ok(len) => {
                tracing::warn!(peer = %self.peer_addr, len, "request body too large");
                return ReadOutcome::Closed("oversized request body");
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                return ReadOutcome::Skip;
            }
        };
        if len > 0 {
            let mut body = vec![0u8; len];
            let mut filled = 0;
            while filled < len {
                if !running.load(Ordering::SeqCst) {
                    return ReadOutcome::Closed("server shutting down");
                }
                match self.reader.read(&mut body[filled..]) {
                    Ok(0) => return ReadOutcome::Closed("connection closed by client"),
                    Ok(n) => filled += n,
                    Err(e)
                        if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                    Err(_) => return ReadOutcome::Closed("read error"),
                }
            }
            request.body = Some(String::from_utf8_lossy(&body).into_owned());
        }
        ReadOutcome::Request(request)
    }
}
