//! Core types and utilities for lodestone.
//!
//! This crate provides the foundational types used throughout the lodestone
//! game server control plane:
//!
//! - **Identifiers**: Strongly-typed IDs for servers, players, and compute tasks
//! - **Validation**: Parsing rules shared by the store, launcher, and gateway
//!
//! # Example
//!
//! ```
//! use lodestone_core::{PlayerName, ServerId, TaskHandle};
//!
//! // Parse a server ID
//! let server_id = ServerId::parse("vanilla").unwrap();
//!
//! // Player names follow game account rules
//! let player = PlayerName::parse("Notch").unwrap();
//!
//! // Task handles are opaque references issued by the launcher
//! let handle = TaskHandle::new("mc-vanilla-1a2b3c4d");
//! # let _ = (server_id, player, handle);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{IdError, PlayerName, ServerId, TaskHandle};
