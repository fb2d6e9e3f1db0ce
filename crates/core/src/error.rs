//! Error types for the RTSP publishing client.

use std::fmt;

/// Errors that can occur while publishing a stream.
///
/// Every variant belongs to one [`FailureKind`], which decides whether the
/// session state machine may retry after it:
///
/// - **Configuration**: [`EndpointMalformed`](Self::EndpointMalformed),
///   [`MissingVideoConfig`](Self::MissingVideoConfig),
///   [`InvalidThreshold`](Self::InvalidThreshold): never retried.
/// - **Handshake**: [`Handshake`](Self::Handshake),
///   [`AccessDenied`](Self::AccessDenied), [`Parse`](Self::Parse).
/// - **Authentication**: [`AuthRequired`](Self::AuthRequired),
///   [`AuthRejected`](Self::AuthRejected): surfaced as an auth error.
/// - **Transport**: [`Io`](Self::Io),
///   [`ConnectionClosed`](Self::ConnectionClosed).
/// - **Liveness**: [`ServerUnreachable`](Self::ServerUnreachable).
/// - **Capacity**: [`InvalidCapacity`](Self::InvalidCapacity).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Underlying I/O or socket error (including read timeouts).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The endpoint URL does not match `rtsp[s]://host[:port]/app[/stream]`.
    #[error("endpoint malformed, should be: rtsp://ip:port/appname/streamname (got {0:?})")]
    EndpointMalformed(String),

    /// Video is enabled but no SPS/PPS arrived within the wait window.
    #[error("missing video codec config (sps or pps is null)")]
    MissingVideoConfig,

    /// A handshake step answered with an unexpected status code.
    #[error("{step} failed with status {status}")]
    Handshake { step: &'static str, status: u16 },

    /// The server answered ANNOUNCE with 403.
    #[error("access denied")]
    AccessDenied,

    /// The server asked for credentials and none were configured.
    #[error("authentication required")]
    AuthRequired,

    /// The server rejected the configured credentials.
    #[error("authentication rejected")]
    AuthRejected,

    /// The server closed the signalling connection.
    #[error("connection closed by server")]
    ConnectionClosed,

    /// The heartbeat found the server unreachable.
    #[error("no response from server")]
    ServerUnreachable,

    /// Cache capacity must be at least one frame.
    #[error("invalid cache capacity: {0}")]
    InvalidCapacity(usize),

    /// Congestion threshold must be a percentage in `0..=100`.
    #[error("invalid congestion threshold: {0}%")]
    InvalidThreshold(f32),

    /// A server message could not be parsed (RFC 2326 §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },
}

/// Specific kind of RTSP response parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// The connection produced no status line.
    EmptyResponse,
    /// Status line did not have the expected `Version Code Reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// The body was not valid UTF-8.
    InvalidBody,
    /// `Content-Length` exceeded the accepted maximum.
    BodyTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyResponse => write!(f, "empty response"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidBody => write!(f, "invalid body"),
            Self::BodyTooLarge => write!(f, "body too large"),
        }
    }
}

/// Failure class used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Configuration,
    Handshake,
    Authentication,
    Transport,
    Liveness,
    Capacity,
}

impl FailureKind {
    /// Whether a failure of this class may be followed by a reconnect.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Handshake | Self::Transport | Self::Liveness)
    }
}

impl StreamError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::EndpointMalformed(_) | Self::MissingVideoConfig | Self::InvalidThreshold(_) => {
                FailureKind::Configuration
            }
            Self::Handshake { .. } | Self::AccessDenied | Self::Parse { .. } => {
                FailureKind::Handshake
            }
            Self::AuthRequired | Self::AuthRejected => FailureKind::Authentication,
            Self::Io(_) | Self::ConnectionClosed => FailureKind::Transport,
            Self::ServerUnreachable => FailureKind::Liveness,
            Self::InvalidCapacity(_) => FailureKind::Capacity,
        }
    }
}

/// Convenience alias for `Result<T, StreamError>`.
pub type Result<T> = std::result::Result<T, StreamError>;
