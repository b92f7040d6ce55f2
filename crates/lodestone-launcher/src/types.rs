//! Types for the launcher crate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Port players connect to.
pub const GAME_PORT: u16 = 25565;

/// Port of the remote console.
pub const RCON_PORT: u16 = 25575;

/// What to run for one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container image.
    pub image: String,
    /// CPU allocation in millicores.
    pub cpu_millicores: u32,
    /// Memory allocation in megabytes.
    pub memory_mb: u32,
    /// Extra environment passed to the game server.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            image: "itzg/minecraft-server:latest".to_string(),
            cpu_millicores: 1024,
            memory_mb: 6144,
            env: BTreeMap::new(),
        }
    }
}

/// Phase of the compute unit lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    /// Accepted but containers are not yet running.
    Pending,
    /// Running with at least one container.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// At least one container failed.
    Failed,
    /// Status cannot be determined.
    #[default]
    Unknown,
}

impl TaskPhase {
    /// Parse a phase from a Kubernetes pod phase string.
    #[must_use]
    pub fn from_k8s_phase(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Check if the unit has exited.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Observed state of a compute unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescription {
    /// Whether the game server is up and accepting connections.
    pub running: bool,
    /// Lifecycle phase.
    pub phase: TaskPhase,
    /// Game address (`host:port`), once assigned.
    pub network_address: Option<String>,
    /// When the unit started.
    pub started_at: Option<DateTime<Utc>>,
    /// Human-readable status detail, usually a failure reason.
    pub message: Option<String>,
    /// The platform has no room to place the unit.
    #[serde(default)]
    pub unschedulable: bool,
}

/// Configuration for the Kubernetes launcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Kubernetes namespace for game server pods.
    pub namespace: String,
    /// Container image for the game server.
    pub image: String,
    /// Record table name handed to the server as `CONFIG_TABLE_NAME`.
    pub table_name: String,
    /// Default CPU allocation in millicores.
    pub cpu_millicores: u32,
    /// Default memory allocation in megabytes.
    pub memory_mb: u32,
    /// Maximum CPU allowed in millicores.
    pub max_cpu_millicores: u32,
    /// Maximum memory allowed in megabytes.
    pub max_memory_mb: u32,
    /// PVC holding world data, mounted per server when set.
    pub data_pvc_name: Option<String>,
    /// Secret holding the console password under the key `password`.
    pub rcon_secret_name: Option<String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            namespace: "game-servers".to_string(),
            image: "itzg/minecraft-server:latest".to_string(),
            table_name: "server-config".to_string(),
            cpu_millicores: 1024,
            memory_mb: 6144,
            max_cpu_millicores: 4096,
            max_memory_mb: 16384,
            data_pvc_name: None,
            rcon_secret_name: None,
        }
    }
}

impl LauncherConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `LAUNCH_NAMESPACE`: Kubernetes namespace for game server pods
    /// - `SERVER_IMAGE`: Container image for the game server
    /// - `CONFIG_TABLE_NAME`: Record table name passed to the server
    /// - `SERVER_CPU_MILLICORES`: CPU allocation
    /// - `SERVER_MEMORY_MB`: Memory allocation
    /// - `SERVER_DATA_PVC`: PVC for world data
    /// - `RCON_SECRET_NAME`: Secret holding the console password
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LAUNCH_NAMESPACE") {
            config.namespace = val;
        }
        if let Ok(val) = std::env::var("SERVER_IMAGE") {
            config.image = val;
        }
        if let Ok(val) = std::env::var("CONFIG_TABLE_NAME") {
            config.table_name = val;
        }
        if let Ok(val) = std::env::var("SERVER_CPU_MILLICORES") {
            if let Ok(n) = val.parse() {
                config.cpu_millicores = n;
            }
        }
        if let Ok(val) = std::env::var("SERVER_MEMORY_MB") {
            if let Ok(n) = val.parse() {
                config.memory_mb = n;
            }
        }
        if let Ok(val) = std::env::var("SERVER_DATA_PVC") {
            config.data_pvc_name = Some(val).filter(|v| !v.is_empty());
        }
        if let Ok(val) = std::env::var("RCON_SECRET_NAME") {
            config.rcon_secret_name = Some(val).filter(|v| !v.is_empty());
        }

        config
    }

    /// The container spec used when a caller does not override it.
    #[must_use]
    pub fn default_spec(&self) -> ContainerSpec {
        ContainerSpec {
            image: self.image.clone(),
            cpu_millicores: self.cpu_millicores,
            memory_mb: self.memory_mb,
            env: BTreeMap::new(),
        }
    }

    /// Validate resource requests against limits.
    ///
    /// # Errors
    ///
    /// Returns an error if CPU or memory exceed the configured maximums.
    pub fn validate_resources(&self, spec: &ContainerSpec) -> crate::Result<()> {
        if spec.cpu_millicores > self.max_cpu_millicores {
            return Err(crate::LauncherError::Config(format!(
                "CPU request {}m exceeds maximum {}m",
                spec.cpu_millicores, self.max_cpu_millicores
            )));
        }
        if spec.memory_mb > self.max_memory_mb {
            return Err(crate::LauncherError::Config(format!(
                "Memory request {}Mi exceeds maximum {}Mi",
                spec.memory_mb, self.max_memory_mb
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_phase_from_k8s() {
        assert_eq!(TaskPhase::from_k8s_phase("Running"), TaskPhase::Running);
        assert_eq!(TaskPhase::from_k8s_phase("Failed"), TaskPhase::Failed);
        assert_eq!(TaskPhase::from_k8s_phase("weird"), TaskPhase::Unknown);
    }

    #[test]
    fn terminal_phases() {
        assert!(TaskPhase::Failed.is_terminal());
        assert!(TaskPhase::Succeeded.is_terminal());
        assert!(!TaskPhase::Running.is_terminal());
        assert!(!TaskPhase::Pending.is_terminal());
    }

    #[test]
    fn config_defaults_match_server_sizing() {
        let config = LauncherConfig::default();
        assert_eq!(config.namespace, "game-servers");
        assert_eq!(config.cpu_millicores, 1024);
        assert_eq!(config.memory_mb, 6144);
        assert_eq!(config.default_spec().image, config.image);
    }

    #[test]
    fn config_validate_resources() {
        let config = LauncherConfig::default();
        assert!(config.validate_resources(&config.default_spec()).is_ok());

        let mut spec = config.default_spec();
        spec.cpu_millicores = 8000;
        assert!(config.validate_resources(&spec).is_err());

        let mut spec = config.default_spec();
        spec.memory_mb = 32768;
        assert!(config.validate_resources(&spec).is_err());
    }
}
