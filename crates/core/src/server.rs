use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::config::RtspParams;
use crate::error::{RelayError, Result};
use crate::messaging::ModuleRef;
use crate::session::SessionManager;
use crate::transport::tcp;

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Public host advertised in the SDP `o=` line.
    /// When `None`, host is inferred from request URI/client address.
    pub public_host: Option<String>,
    /// SDP origin username field (`o=<username> ...`).
    pub sdp_username: String,
    /// SDP origin session id field (`o=... <session-id> ...`).
    pub sdp_session_id: String,
    /// SDP origin session version field (`o=... ... <session-version> ...`).
    pub sdp_session_version: String,
    /// SDP session name (`s=`).
    pub sdp_session_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: "avrelay".to_string(),
        }
    }
}

/// State shared by the accept loop and every connection.
pub struct ServerContext {
    pub params: RtspParams,
    pub config: ServerConfig,
    pub sessions: SessionManager,
    /// Module the sender paths are resolved from.
    pub parent: ModuleRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Running,
    Stopped,
}

/// RTSP control endpoint.
///
/// Owns the TCP listener thread; each client connection gets its own
/// thread and [`MethodHandler`](crate::protocol::MethodHandler). Stream
/// redirects reach the RTP senders over the module bus from `parent`.
pub struct RtspServer {
    ctx: Arc<ServerContext>,
    running: Arc<AtomicBool>,
    state: ServerState,
    accept_thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl RtspServer {
    pub fn new(params: RtspParams, config: ServerConfig, parent: ModuleRef) -> Self {
        Self {
            ctx: Arc::new(ServerContext {
                params,
                config,
                sessions: SessionManager::new(),
                parent,
            }),
            running: Arc::new(AtomicBool::new(false)),
            state: ServerState::NotStarted,
            accept_thread: None,
            local_addr: None,
        }
    }

    /// Bind the listener and spawn the accept loop.
    pub fn start(&mut self) -> Result<()> {
        if self.state == ServerState::Running {
            return Err(RelayError::AlreadyRunning);
        }

        let bind_addr = self.ctx.params.bind_addr();
        let listener = TcpListener::bind(&bind_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let ctx = self.ctx.clone();
        let handle = thread::Builder::new()
            .name("rtsp-accept".to_string())
            .spawn(move || tcp::accept_loop(listener, ctx, running))?;

        tracing::info!(
            addr = %local_addr,
            av_type = ?self.ctx.params.av_type,
            video = self.ctx.params.video_codec.encoding_name(),
            "RTSP server listening"
        );

        self.accept_thread = Some(handle);
        self.local_addr = Some(local_addr);
        self.state = ServerState::Running;
        Ok(())
    }

    /// Stop accepting, close every connection and wait for all of them.
    ///
    /// Connections park their playing streams before they exit, so this
    /// returns only after the senders were redirected to loopback.
    pub fn stop(&mut self) {
        if self.state != ServerState::Running {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take()
            && handle.join().is_err()
        {
            tracing::error!("RTSP accept thread panicked");
        }
        self.state = ServerState::Stopped;
        tracing::info!("RTSP server stopped");
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ServerState::Running
    }

    /// Bound listener address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.filter(|_| self.is_running())
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.ctx.sessions
    }
}

impl Drop for RtspServer {
    fn drop(&mut self) {
        self.stop();
    }
}
