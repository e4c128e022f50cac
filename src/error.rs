//! # Error Types
//!
//! The runtime surfaces a deliberately flat error taxonomy. Lower layers
//! return errors verbatim with a short context prefix; the collectives
//! annotate them with collective and rank context before handing them to
//! the caller. There is no retry logic anywhere in the crate; a failed
//! send or a lost peer surfaces directly to the user program, which for
//! most programs means aborting the world.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MeshError>;

/// The flat error set of the message-passing runtime.
///
/// - `Config` errors are fatal at initialization (bad environment, bind
///   failure).
/// - `Transport` errors are returned to the caller; most user programs
///   treat them as fatal.
/// - `ReceiveTimedOut` is returned when no matching message arrives within
///   the receive window.
/// - `Codec` errors are recoverable decode failures. Encode failures are
///   also reported through this variant but indicate a program bug.
/// - `Contract` errors are user errors caught at a collective call site
///   (size, divisibility, or element-type mismatches).
#[derive(Debug, Error)]
pub enum MeshError {
    /// Missing or invalid environment, or the listen endpoint could not be
    /// bound. Fatal at init.
    #[error("configuration error: {0}")]
    Config(String),

    /// An RPC could not be delivered: peer unreachable, oversized frame,
    /// connection reset, or the world was finalized mid-call.
    #[error("transport error: {0}")]
    Transport(String),

    /// No matching message arrived within the receive timeout.
    #[error("receive timed out")]
    ReceiveTimedOut,

    /// Payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A collective was invoked with mismatched sizes or element types.
    #[error("contract violation: {0}")]
    Contract(String),
}

impl MeshError {
    /// Prefix the error message with caller context.
    ///
    /// `ReceiveTimedOut` carries no message and is left untouched so that
    /// callers can still match on it after annotation.
    pub fn annotate(self, context: &str) -> Self {
        match self {
            MeshError::Config(msg) => MeshError::Config(format!("{context}: {msg}")),
            MeshError::Transport(msg) => MeshError::Transport(format!("{context}: {msg}")),
            MeshError::Codec(msg) => MeshError::Codec(format!("{context}: {msg}")),
            MeshError::Contract(msg) => MeshError::Contract(format!("{context}: {msg}")),
            MeshError::ReceiveTimedOut => MeshError::ReceiveTimedOut,
        }
    }
}

impl From<std::io::Error> for MeshError {
    fn from(err: std::io::Error) -> Self {
        MeshError::Transport(err.to_string())
    }
}
