//! Errors reported through a stream's error channel

use std::fmt;

/// Failure surfaced by a stream
///
/// One failure is delivered to every pending write callback and kept as the
/// stream's error, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("write after end")]
    WriteAfterEnd,

    #[error("push after end of sequence")]
    PushAfterEof,

    #[error("stream was destroyed")]
    Destroyed,

    #[error("premature close")]
    PrematureClose,

    #[error("{0}")]
    Failed(String),
}

impl StreamError {
    /// Wrap an arbitrary producer or consumer failure
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
