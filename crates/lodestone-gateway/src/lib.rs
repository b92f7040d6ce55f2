//! HTTP gateway for the lodestone game-server control plane.
//!
//! This crate exposes the control plane over HTTP and drives the periodic
//! idle sweep. It handles:
//!
//! - Start and whitelist requests from game clients
//! - Provisioning events from the deployment pipeline
//! - The idle sweep, on a timer or on demand
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │ Game clients │  │   Pipeline   │  │  Scheduler   │
//! └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!        │                 │                 │
//!        ▼                 ▼                 ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                 lodestone-gateway                    │
//! │   ┌──────────────┐            ┌──────────────┐      │
//! │   │   Router     │            │   Sweeper    │      │
//! │   │  + Handlers  │            │   (timer)    │      │
//! │   └──────────────┘            └──────────────┘      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//!                 ┌──────────────────┐
//!                 │  Control Plane   │
//!                 └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use lodestone_gateway::{create_router, GatewayConfig, GatewayState};
//! use lodestone_control::ControlPlaneService;
//! use lodestone_launcher::{K8sLauncher, LauncherConfig};
//! use lodestone_rcon::RconConfig;
//! use lodestone_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/lodestone", "server-config")?);
//! let launcher = Arc::new(K8sLauncher::new(LauncherConfig::default()).await?);
//! let rcon = Arc::new(RconConfig::default().connector());
//! let control = Arc::new(ControlPlaneService::with_defaults(store, launcher, rcon));
//!
//! let state = GatewayState::new(control, GatewayConfig::default());
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;
pub use sweeper::spawn_sweeper;
