//! Kubernetes launcher for lodestone game servers.
//!
//! This crate provides the [`Launcher`] trait and the [`K8sLauncher`]
//! implementation, which runs each game server as a single pod. It handles:
//!
//! - Pod creation with the game and console ports exposed
//! - Idempotent termination (a pod that is already gone is not an error)
//! - Status inspection, including the address once the pod is ready
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               Lifecycle controller           │
//! └──────────────────────────────────────────────┘
//!          │ launch      │ terminate    │ describe
//!          ▼             ▼              ▼
//! ┌──────────────────────────────────────────────┐
//! │                 K8sLauncher                  │
//! │   ┌─────────────┐                            │
//! │   │ Pod builder │                            │
//! │   └─────────────┘                            │
//! └──────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │            Kubernetes API Server             │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use lodestone_core::ServerId;
//! use lodestone_launcher::{K8sLauncher, Launcher, LauncherConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LauncherConfig::default();
//! let spec = config.default_spec();
//! let launcher = K8sLauncher::new(config).await?;
//!
//! let server_id = ServerId::parse("vanilla")?;
//! let handle = launcher.launch(&server_id, &spec).await?;
//!
//! let task = launcher.describe(&handle).await?;
//! println!("running: {}, address: {:?}", task.running, task.network_address);
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! For testing without a real Kubernetes cluster, enable the `test-utils` feature
//! and use the mock launcher:
//!
//! ```ignore
//! use lodestone_core::ServerId;
//! use lodestone_launcher::{ContainerSpec, Launcher, MockLauncher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let launcher = MockLauncher::new();
//! let handle = launcher.launch(&ServerId::parse("s1")?, &ContainerSpec::default()).await?;
//! assert_eq!(launcher.launch_count(), 1);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod k8s;
pub mod pod;
pub mod types;

pub use error::{LauncherError, Result};
pub use k8s::{K8sLauncher, Launcher};
pub use types::{ContainerSpec, LauncherConfig, TaskDescription, TaskPhase, GAME_PORT, RCON_PORT};

#[cfg(any(test, feature = "test-utils"))]
pub use k8s::mock::MockLauncher;
