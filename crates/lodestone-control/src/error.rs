//! Error types for the control plane.
//!
//! Adapter errors are folded into one taxonomy so callers can decide between
//! "surface to the user" and "leave it to the next sweep" without looking at
//! which adapter failed.

use lodestone_core::ServerId;
use lodestone_launcher::LauncherError;
use lodestone_rcon::RconError;
use lodestone_store::{LifecycleState, StoreError};
use thiserror::Error;

/// A result type using `ControlError`.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Errors that can occur in control plane operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The server has no info record.
    #[error("server not found: {0}")]
    ServerNotFound(ServerId),

    /// The operation needs a live server.
    #[error("server {0} is not live; start it first")]
    ServerNotLive(ServerId),

    /// The requested state transition is not valid.
    #[error(
        "invalid state transition for server {server_id}: cannot transition from {from:?} to {to:?}"
    )]
    InvalidState {
        /// The server being transitioned.
        server_id: ServerId,
        /// The current state.
        from: LifecycleState,
        /// The requested target state.
        to: LifecycleState,
    },

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The launcher cannot provision another unit right now.
    #[error("insufficient capacity: {0}")]
    Capacity(String),

    /// The unit exited or vanished before it became ready.
    #[error("server {server_id} failed to start: {reason}")]
    LaunchFailed {
        /// The server being started.
        server_id: ServerId,
        /// Why the unit stopped.
        reason: String,
    },

    /// A console or launcher endpoint could not be reached.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// An operation ran past its bound.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The console rejected the configured password.
    #[error("console authentication failed")]
    Authentication,

    /// The console answered with something unexpected.
    #[error("console protocol error: {0}")]
    Protocol(String),

    /// Teardown gave up with records left behind.
    #[error("incomplete cleanup for server {server_id}: {remaining} records remain after deleting {deleted}")]
    IncompleteCleanup {
        /// The server being torn down.
        server_id: ServerId,
        /// Records deleted before giving up.
        deleted: usize,
        /// Records still present.
        remaining: usize,
    },

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Launcher error other than capacity.
    #[error("launcher error: {0}")]
    Launcher(LauncherError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LauncherError> for ControlError {
    fn from(err: LauncherError) -> Self {
        match err {
            LauncherError::Capacity(reason) => Self::Capacity(reason),
            other => Self::Launcher(other),
        }
    }
}

impl From<RconError> for ControlError {
    fn from(err: RconError) -> Self {
        match err {
            RconError::Unreachable { .. } | RconError::Closed | RconError::Io(_) => {
                Self::Unreachable(err.to_string())
            }
            RconError::Timeout(what) => Self::Timeout(what),
            RconError::Authentication => Self::Authentication,
            RconError::Protocol(what) => Self::Protocol(what),
        }
    }
}

impl ControlError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::ServerNotFound(_) => 404,
            Self::InvalidRequest(_) => 400,
            Self::ServerNotLive(_) | Self::InvalidState { .. } => 409,
            Self::Store(StoreError::Conflict { .. }) => 409,
            Self::Capacity(_) | Self::Unreachable(_) => 503,
            Self::Timeout(_) => 504,
            Self::LaunchFailed { .. }
            | Self::Authentication
            | Self::Protocol(_)
            | Self::Launcher(_) => 502,
            Self::IncompleteCleanup { .. } | Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error might be resolved by retrying.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Unreachable(_)
            | Self::Timeout(_)
            | Self::IncompleteCleanup { .. }
            | Self::Store(_)
            | Self::Internal(_) => true,
            Self::Launcher(err) => err.is_retriable(),
            _ => false,
        }
    }

    /// Returns true if a conditional write lost to a concurrent writer.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict { .. }))
    }

    /// Short machine-readable code for API responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ServerNotFound(_) => "server_not_found",
            Self::ServerNotLive(_) => "server_not_live",
            Self::InvalidState { .. } => "invalid_state",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Capacity(_) => "capacity",
            Self::LaunchFailed { .. } => "launch_failed",
            Self::Unreachable(_) => "unreachable",
            Self::Timeout(_) => "timeout",
            Self::Authentication => "authentication",
            Self::Protocol(_) => "protocol",
            Self::IncompleteCleanup { .. } => "incomplete_cleanup",
            Self::Store(StoreError::Conflict { .. }) => "conflict",
            Self::Store(_) => "store",
            Self::Launcher(_) => "launcher",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> ServerId {
        ServerId::parse("s1").unwrap()
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(ControlError::ServerNotFound(sid()).http_status_code(), 404);
        assert_eq!(ControlError::ServerNotLive(sid()).http_status_code(), 409);
        assert_eq!(
            ControlError::InvalidState {
                server_id: sid(),
                from: LifecycleState::Stopping,
                to: LifecycleState::Starting,
            }
            .http_status_code(),
            409
        );
        assert_eq!(ControlError::Capacity("full".into()).http_status_code(), 503);
        assert_eq!(ControlError::Timeout("poll".into()).http_status_code(), 504);
        assert_eq!(ControlError::Authentication.http_status_code(), 502);
        assert_eq!(
            ControlError::Store(StoreError::Conflict {
                key: "s1/info".into(),
                reason: "changed".into(),
            })
            .http_status_code(),
            409
        );
    }

    #[test]
    fn launcher_capacity_maps_to_capacity() {
        let err = ControlError::from(LauncherError::Capacity("quota".into()));
        assert!(matches!(err, ControlError::Capacity(ref r) if r == "quota"));
        assert!(!err.is_retriable());

        let err = ControlError::from(LauncherError::TaskNotFound("h1".into()));
        assert!(matches!(err, ControlError::Launcher(_)));
    }

    #[test]
    fn rcon_errors_map_to_taxonomy() {
        let unreachable = ControlError::from(RconError::Unreachable {
            addr: "10.0.0.5:25575".into(),
            reason: "refused".into(),
        });
        assert!(matches!(unreachable, ControlError::Unreachable(_)));
        assert!(unreachable.is_retriable());

        assert!(matches!(
            ControlError::from(RconError::Timeout("list".into())),
            ControlError::Timeout(_)
        ));
        assert!(matches!(
            ControlError::from(RconError::Authentication),
            ControlError::Authentication
        ));
        assert!(!ControlError::Authentication.is_retriable());
        assert!(matches!(
            ControlError::from(RconError::Protocol("bad".into())),
            ControlError::Protocol(_)
        ));
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ControlError::ServerNotLive(sid()).code(), "server_not_live");
        assert_eq!(ControlError::Capacity(String::new()).code(), "capacity");
    }
}
