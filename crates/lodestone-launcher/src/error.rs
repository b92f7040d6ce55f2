//! Error types for the launcher crate.

use thiserror::Error;

/// Errors that can occur while launching or inspecting compute units.
#[derive(Error, Debug)]
pub enum LauncherError {
    /// Kubernetes API error.
    #[error("Kubernetes API error: {0}")]
    KubeApi(#[from] kube::Error),

    /// The platform refused to provision a new unit.
    #[error("insufficient capacity: {0}")]
    Capacity(String),

    /// No compute unit exists for the handle.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LauncherError {
    /// Check if this error is retriable.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::KubeApi(_))
    }

    /// Check if the unit is known to be gone.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::TaskNotFound(_))
    }
}

/// A specialized Result type for launcher operations.
pub type Result<T> = std::result::Result<T, LauncherError>;
