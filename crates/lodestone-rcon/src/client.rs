//! Remote console client and connection traits.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

use crate::error::{RconError, Result};
use crate::packet::{
    read_packet, write_packet, Packet, AUTH_FAILED_ID, MAX_COMMAND_LEN, SERVERDATA_AUTH,
    SERVERDATA_AUTH_RESPONSE, SERVERDATA_EXECCOMMAND, SERVERDATA_RESPONSE_VALUE,
};

/// Timeouts applied to a console connection.
#[derive(Debug, Clone, Copy)]
pub struct RconOptions {
    /// Bound on TCP connect plus authentication.
    pub connect_timeout: Duration,
    /// Bound on a single command round trip.
    pub command_timeout: Duration,
}

impl Default for RconOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
        }
    }
}

/// An authenticated console session.
#[async_trait]
pub trait RconSession: Send {
    /// Run a command and return its full output.
    async fn execute(&mut self, command: &str) -> Result<String>;

    /// Release the connection. Calling this more than once is a no-op.
    async fn close(&mut self);
}

/// Opens console sessions. Injected into the control plane so tests can
/// substitute a fake.
#[async_trait]
pub trait RconConnector: Send + Sync {
    /// Connect and authenticate to the console at `addr` (`host:port`).
    async fn connect(&self, addr: &str) -> Result<Box<dyn RconSession>>;
}

/// A TCP console connection.
///
/// At most one command is in flight at a time. Each command is followed by
/// an empty response-value packet; the server answers that marker only
/// after the full command output, so every packet carrying the command's
/// id up to the echoed marker belongs to the response.
pub struct RconClient {
    stream: Option<TcpStream>,
    addr: String,
    last_id: i32,
    options: RconOptions,
}

impl RconClient {
    /// Connect to `addr` and authenticate with `password`.
    ///
    /// # Errors
    ///
    /// Returns `RconError::Unreachable` if the connection cannot be made in
    /// time and `RconError::Authentication` if the password is rejected.
    pub async fn connect(addr: &str, password: &str, options: RconOptions) -> Result<Self> {
        let deadline = Instant::now() + options.connect_timeout;

        let stream = match tokio::time::timeout_at(deadline, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(RconError::Unreachable {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(RconError::Unreachable {
                    addr: addr.to_string(),
                    reason: "connect timed out".into(),
                })
            }
        };

        let mut client = Self {
            stream: Some(stream),
            addr: addr.to_string(),
            last_id: 0,
            options,
        };

        match tokio::time::timeout_at(deadline, client.authenticate(password)).await {
            Ok(Ok(())) => {
                tracing::debug!(addr, "RCON authenticated");
                Ok(client)
            }
            Ok(Err(e)) => {
                client.close().await;
                Err(e)
            }
            Err(_) => {
                client.close().await;
                Err(RconError::Unreachable {
                    addr: addr.to_string(),
                    reason: "authentication timed out".into(),
                })
            }
        }
    }

    /// Address this client is connected to.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether [`close`](Self::close) has been called or the connection
    /// was dropped after an error.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn next_id(&mut self) -> i32 {
        self.last_id = if self.last_id >= i32::MAX - 1 {
            1
        } else {
            self.last_id + 1
        };
        self.last_id
    }

    async fn authenticate(&mut self, password: &str) -> Result<()> {
        let id = self.next_id();
        let stream = self.stream.as_mut().ok_or(RconError::Closed)?;
        write_packet(stream, &Packet::new(id, SERVERDATA_AUTH, password)).await?;

        loop {
            let packet = read_packet(stream).await?;
            match packet.kind {
                // Some servers send an empty response value before the auth reply.
                SERVERDATA_RESPONSE_VALUE => continue,
                SERVERDATA_AUTH_RESPONSE if packet.id == id => return Ok(()),
                SERVERDATA_AUTH_RESPONSE if packet.id == AUTH_FAILED_ID => {
                    return Err(RconError::Authentication)
                }
                SERVERDATA_AUTH_RESPONSE => return Err(RconError::Authentication),
                other => {
                    return Err(RconError::Protocol(format!(
                        "unexpected packet type {other} during authentication"
                    )))
                }
            }
        }
    }

    /// Run a command and return its output.
    ///
    /// # Errors
    ///
    /// Returns `RconError::Protocol` for oversized commands or malformed
    /// replies and `RconError::Timeout` if the response does not complete
    /// in time. The connection is closed after any error.
    pub async fn execute(&mut self, command: &str) -> Result<String> {
        if command.len() > MAX_COMMAND_LEN {
            return Err(RconError::Protocol(format!(
                "command of {} bytes exceeds {MAX_COMMAND_LEN}",
                command.len()
            )));
        }

        let result = timeout(self.options.command_timeout, self.round_trip(command)).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => Err(RconError::Timeout(format!(
                "no response to command within {:?}",
                self.options.command_timeout
            ))),
        };
        if outcome.is_err() {
            self.close().await;
        }
        outcome
    }

    async fn round_trip(&mut self, command: &str) -> Result<String> {
        let id = self.next_id();
        let marker = self.next_id();
        let stream = self.stream.as_mut().ok_or(RconError::Closed)?;

        write_packet(stream, &Packet::new(id, SERVERDATA_EXECCOMMAND, command)).await?;
        write_packet(stream, &Packet::new(marker, SERVERDATA_RESPONSE_VALUE, "")).await?;

        let mut body = Vec::new();
        loop {
            let packet = read_packet(stream).await?;
            if packet.id == marker {
                break;
            }
            if packet.id == id {
                body.extend_from_slice(&packet.body);
            } else {
                tracing::trace!(id = packet.id, "Ignoring uncorrelated RCON packet");
            }
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Close the connection. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(addr = %self.addr, error = %e, "RCON shutdown failed");
            }
        }
    }
}

#[async_trait]
impl RconSession for RconClient {
    async fn execute(&mut self, command: &str) -> Result<String> {
        Self::execute(self, command).await
    }

    async fn close(&mut self) {
        Self::close(self).await;
    }
}

/// Connector that dials real game servers over TCP.
#[derive(Clone)]
pub struct TcpRconConnector {
    password: String,
    options: RconOptions,
}

impl TcpRconConnector {
    /// Create a connector using one password for every server.
    #[must_use]
    pub fn new(password: impl Into<String>, options: RconOptions) -> Self {
        Self {
            password: password.into(),
            options,
        }
    }
}

impl std::fmt::Debug for TcpRconConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpRconConnector")
            .field("password", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl RconConnector for TcpRconConnector {
    async fn connect(&self, addr: &str) -> Result<Box<dyn RconSession>> {
        let client = RconClient::connect(addr, &self.password, self.options).await?;
        Ok(Box::new(client))
    }
}
