//! Error types for the RCON client.

use thiserror::Error;

/// Errors that can occur while talking to a game server console.
#[derive(Error, Debug)]
pub enum RconError {
    /// The server could not be reached.
    #[error("RCON unreachable at {addr}: {reason}")]
    Unreachable {
        /// Address that was dialed.
        addr: String,
        /// Underlying cause.
        reason: String,
    },

    /// No matching response arrived in time.
    #[error("RCON timed out: {0}")]
    Timeout(String),

    /// The server rejected the password.
    #[error("RCON authentication failed")]
    Authentication,

    /// Malformed framing or an unexpected packet.
    #[error("RCON protocol error: {0}")]
    Protocol(String),

    /// The connection was already closed.
    #[error("RCON connection closed")]
    Closed,

    /// I/O error on an established connection.
    #[error("RCON I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RconError {
    /// Check if this error is transient and worth retrying on a later cycle.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::Timeout(_) | Self::Io(_) | Self::Closed
        )
    }
}

/// A specialized Result type for RCON operations.
pub type Result<T> = std::result::Result<T, RconError>;
