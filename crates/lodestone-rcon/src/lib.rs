//! Remote console client for lodestone game servers.
//!
//! This crate speaks the game server's length-prefixed binary console
//! protocol. Connections are short lived: the control plane opens one per
//! operation, runs a command or two, and closes it on every exit path.
//!
//! - [`packet`]: frame encoding and decoding
//! - [`RconClient`]: an authenticated TCP session
//! - [`RconConnector`] / [`RconSession`]: the seam the control plane
//!   depends on, implemented by [`TcpRconConnector`]
//! - [`commands`]: `list` and `whitelist` helpers plus the player list parser
//!
//! # Example
//!
//! ```no_run
//! use lodestone_rcon::{commands, RconClient, RconOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = RconClient::connect("10.0.0.5:25575", "secret", RconOptions::default()).await?;
//! let output = client.execute(commands::LIST).await?;
//! let list = commands::parse_player_list(&output)?;
//! println!("{} players online", list.online);
//! client.close().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod packet;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use client::{RconClient, RconConnector, RconOptions, RconSession, TcpRconConnector};
pub use commands::{parse_player_list, PlayerList};
pub use config::{RconConfig, DEFAULT_RCON_PORT};
pub use error::{RconError, Result};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockFailure, MockRconConnector};
