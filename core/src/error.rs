//! Error types for the async HTTP client core.
//!
//! # Design
//! One enum covers every failure a caller or a handler can observe. Errors
//! raised while *building* a request (bad URL, unknown charset, missing file,
//! exhausted stream) are returned synchronously and no task is dispatched.
//! Errors raised after dispatch are delivered to the response handler through
//! `on_failure`, with the single exception of `Cancelled`, which is reported
//! through `on_cancel` and the request handle only.

use std::path::PathBuf;

/// Errors produced while building, dispatching, or decoding a request.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The URL could not be parsed after parameters were appended.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Client options could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The container's content encoding is not a known charset label.
    #[error("unsupported character encoding: {0}")]
    UnsupportedEncoding(String),

    /// A file parameter references a path that does not exist.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A single-use stream parameter was read by an earlier body.
    #[error("stream parameter `{0}` was already consumed")]
    StreamAlreadyConsumed(String),

    /// Reading a local body source failed while writing the entity.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport collaborator failed to produce a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response body could not be decoded into the handler's shape.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The response status was not classified as success by the handler.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The task was cancelled before it produced a usable response.
    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether a transport might reasonably retry after this error.
    ///
    /// Configuration and decode errors are deterministic and never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Io(_))
    }
}

/// A failure reported by the transport collaborator.
#[derive(Debug, thiserror::Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    message: String,
    timeout: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timeout: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_timeout(&self) -> bool {
        self.timeout
    }
}
