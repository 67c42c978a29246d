use thiserror::Error;

/// Terminal failure of a streaming transaction.
///
/// All of these are fail-fast: a broken stream is a broken stream, and
/// the client is informed by the stream closing. Only sink errors (which
/// live in the observability crate) are recovered locally.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The inactivity deadline elapsed with no upstream chunk, egress
    /// push, or policy keepalive.
    #[error("stream inactive for {0:.2}s")]
    Timeout(f64),

    /// A control message violated the expected protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The upstream connection failed mid-stream.
    #[error("upstream connection error: {0}")]
    Connection(String),

    /// A policy hook failed; the stream is aborted.
    #[error("policy error: {0}")]
    Policy(String),

    /// Unexpected internal failure.
    #[error("internal stream error: {0}")]
    Internal(String),
}

impl StreamError {
    /// Short machine-readable kind for records.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::Timeout(_) => "timeout",
            StreamError::Protocol(_) => "protocol",
            StreamError::Connection(_) => "connection",
            StreamError::Policy(_) => "policy",
            StreamError::Internal(_) => "internal",
        }
    }
}

/// Error raised inside a streaming policy hook.
///
/// The executor catches it, emits an error event, and aborts the stream.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PolicyError {
    /// What went wrong.
    pub message: String,
}

impl PolicyError {
    /// Creates a policy error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Rejection raised by `on_request` or `on_response`.
///
/// Surfaces to the client as a 4xx carrying the rejection message; no
/// upstream call is made for request rejections.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PolicyRejection {
    /// Reason shown to the client.
    pub message: String,
}

impl PolicyRejection {
    /// Creates a rejection with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
