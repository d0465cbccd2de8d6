//! Error types for the relay library.

use std::fmt;

use crate::messaging::{MessagePath, ResponseStatus};

/// Errors that can occur in the relay library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Routing**: [`NoRoute`](Self::NoRoute), [`ResponseTimeout`](Self::ResponseTimeout),
///   [`ModuleGone`](Self::ModuleGone): a bus message could not be delivered
///   or answered. Nothing is partially delivered.
/// - **Codec**: [`UnsupportedCodec`](Self::UnsupportedCodec): the frame is
///   dropped, the stream continues.
/// - **Negotiation**: [`Parse`](Self::Parse), [`InvalidOption`](Self::InvalidOption),
///   [`InvalidReceiver`](Self::InvalidReceiver),
///   [`TransportNotConfigured`](Self::TransportNotConfigured),
///   [`SessionNotFound`](Self::SessionNotFound), [`UnknownTrack`](Self::UnknownTrack),
///   [`SenderRejected`](Self::SenderRejected): the setup attempt is rejected,
///   the server keeps running.
/// - **Lifecycle**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning), [`DisplayGone`](Self::DisplayGone),
///   [`ReconfigureFailed`](Self::ReconfigureFailed).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No module matches one of the path segments.
    #[error("no route to module path '{path}'")]
    NoRoute { path: MessagePath },

    /// The target module did not answer within the bounded wait.
    #[error("no response from '{path}' within timeout")]
    ResponseTimeout { path: MessagePath },

    /// The target module was destroyed while the message was in flight.
    #[error("target module is gone")]
    ModuleGone,

    /// The sender module answered a reconfiguration with a non-OK status.
    #[error("sender rejected request: {status} {detail}")]
    SenderRejected {
        status: ResponseStatus,
        detail: String,
    },

    /// Frame codec has no packetizer.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Receiver text does not fit the bounded receiver field or is not an address.
    #[error("invalid receiver: {0}")]
    InvalidReceiver(String),

    /// Malformed configuration option string.
    #[error("invalid option: {0}")]
    InvalidOption(String),

    /// No session with the given ID exists in the [`SessionManager`](crate::session::SessionManager).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// SETUP has not been completed for this subsession (no destination recorded).
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// SETUP named a track the server does not advertise.
    #[error("unknown track: {0}")]
    UnknownTrack(String),

    /// [`RtspServer::start`](crate::RtspServer::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`RtspServer::start`](crate::RtspServer::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// The display event loop has exited; no consumer is left to serve the request.
    #[error("display consumer is gone")]
    DisplayGone,

    /// The presentation backend could not rebuild its buffers.
    #[error("display reconfiguration failed: {0}")]
    ReconfigureFailed(String),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was present but not a number.
    InvalidContentLength,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid content length"),
        }
    }
}

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;
