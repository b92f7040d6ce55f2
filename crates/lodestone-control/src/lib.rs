//! Lifecycle controller for lodestone game servers.
//!
//! This crate decides when game servers run. It starts them on request,
//! stops them once nobody has played for a while, keeps their whitelists in
//! step with the store, and creates or removes their records when servers
//! are provisioned or deprovisioned.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Gateway (HTTP)                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ControlPlaneService                      │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Start /    │ │  Config     │ │    Lifecycle        │    │
//! │  │  Sweep      │ │  Records    │ │    State Machine    │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │  Store   │   │ Launcher │   │   RCON   │
//!        │ (RocksDB)│   │  (K8s)   │   │  (TCP)   │
//!        └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use lodestone_control::{ControlPlane, ControlPlaneService};
//! use lodestone_core::ServerId;
//! use lodestone_launcher::{K8sLauncher, LauncherConfig};
//! use lodestone_rcon::RconConfig;
//! use lodestone_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/lodestone", "server-config")?);
//! let launcher = Arc::new(K8sLauncher::new(LauncherConfig::default()).await?);
//! let rcon = Arc::new(RconConfig::from_env().connector());
//!
//! let control = ControlPlaneService::with_defaults(store, launcher, rcon);
//! let outcome = control.start_server(&ServerId::parse("vanilla")?).await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```
//!
//! # State Machine
//!
//! - `Stopped` → `Starting` (start claimed)
//! - `Starting` → `Live` (unit ready) or `Stopped` (launch failed)
//! - `Live` → `Stopping` (idle) or `Stopped` (unit died)
//! - `Stopping` → `Stopped`
//!
//! See the [`lifecycle`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod lifecycle;
pub mod records;
pub mod schedule;
pub mod service;
pub mod types;

pub use error::{ControlError, Result};
pub use records::{ConfigRecordManager, EnsureOutcome};
pub use schedule::SweepSchedule;
pub use service::{ControlPlane, ControlPlaneService};
pub use types::{
    AccountMatch, ControlConfig, ProvisioningEvent, ProvisioningOutcome, RequestType,
    ResourceProperties, StartOutcome, SweepReport, WhitelistOutcome,
};

// Re-export commonly used types from dependencies for convenience
pub use lodestone_core::{PlayerName, ServerId, TaskHandle};
pub use lodestone_store::{InfoRecord, LifecycleState};
