//! Console connection settings.

use std::time::Duration;

use crate::client::{RconOptions, TcpRconConnector};

/// Default console port of the game server.
pub const DEFAULT_RCON_PORT: u16 = 25575;

/// Settings shared by every console connection.
#[derive(Clone)]
pub struct RconConfig {
    /// Console port on the game server host.
    pub port: u16,
    /// Console password.
    pub password: String,
    /// Per-operation timeout.
    pub timeout: Duration,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_RCON_PORT,
            password: String::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl std::fmt::Debug for RconConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconConfig")
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RconConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `RCON_PORT`: console port (default 25575)
    /// - `RCON_PASSWORD`: console password
    /// - `RCON_TIMEOUT_SECONDS`: connect and command timeout (default 5)
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("RCON_PORT") {
            if let Ok(port) = val.parse() {
                config.port = port;
            }
        }
        if let Ok(val) = std::env::var("RCON_PASSWORD") {
            config.password = val;
        }
        if let Ok(val) = std::env::var("RCON_TIMEOUT_SECONDS") {
            if let Ok(secs) = val.parse() {
                config.timeout = Duration::from_secs(secs);
            }
        }

        config
    }

    /// Connection options derived from the timeout.
    #[must_use]
    pub const fn options(&self) -> RconOptions {
        RconOptions {
            connect_timeout: self.timeout,
            command_timeout: self.timeout,
        }
    }

    /// Build a TCP connector from this configuration.
    #[must_use]
    pub fn connector(&self) -> TcpRconConnector {
        TcpRconConnector::new(self.password.clone(), self.options())
    }
}
