//! In-memory console for tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{RconConnector, RconSession};
use crate::error::{RconError, Result};

/// How a mock console fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Connecting fails with `Unreachable`.
    Unreachable,
    /// Connecting fails with `Authentication`.
    Authentication,
    /// Commands fail with `Timeout`.
    Timeout,
}

#[derive(Default)]
struct MockState {
    players: HashMap<String, u32>,
    failures: HashMap<String, MockFailure>,
    whitelist: HashMap<String, HashSet<String>>,
    commands: Vec<(String, String)>,
    connects: usize,
    open_sessions: usize,
}

/// A fake console that answers `list` and `whitelist` commands per address.
#[derive(Clone, Default)]
pub struct MockRconConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockRconConnector {
    /// Create an empty mock. Unknown addresses report zero players.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the player count reported by the console at `addr`.
    pub fn set_players(&self, addr: &str, count: u32) {
        self.state.lock().players.insert(addr.to_string(), count);
    }

    /// Make the console at `addr` fail, or heal it with `None`.
    pub fn set_failure(&self, addr: &str, failure: Option<MockFailure>) {
        let mut state = self.state.lock();
        match failure {
            Some(f) => state.failures.insert(addr.to_string(), f),
            None => state.failures.remove(addr),
        };
    }

    /// Players currently whitelisted on `addr`.
    #[must_use]
    pub fn whitelist(&self, addr: &str) -> HashSet<String> {
        self.state
            .lock()
            .whitelist
            .get(addr)
            .cloned()
            .unwrap_or_default()
    }

    /// Every `(addr, command)` executed so far.
    #[must_use]
    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.lock().commands.clone()
    }

    /// Number of connection attempts.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Sessions connected but not yet closed.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.state.lock().open_sessions
    }
}

#[async_trait]
impl RconConnector for MockRconConnector {
    async fn connect(&self, addr: &str) -> Result<Box<dyn RconSession>> {
        let mut state = self.state.lock();
        state.connects += 1;
        match state.failures.get(addr) {
            Some(MockFailure::Unreachable) => {
                return Err(RconError::Unreachable {
                    addr: addr.to_string(),
                    reason: "mock unreachable".into(),
                })
            }
            Some(MockFailure::Authentication) => return Err(RconError::Authentication),
            Some(MockFailure::Timeout) | None => {}
        }
        state.open_sessions += 1;
        Ok(Box::new(MockSession {
            addr: addr.to_string(),
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }
}

struct MockSession {
    addr: String,
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

#[async_trait]
impl RconSession for MockSession {
    async fn execute(&mut self, command: &str) -> Result<String> {
        if self.closed {
            return Err(RconError::Closed);
        }
        let mut state = self.state.lock();
        state
            .commands
            .push((self.addr.clone(), command.to_string()));
        if state.failures.get(&self.addr) == Some(&MockFailure::Timeout) {
            return Err(RconError::Timeout("mock timeout".into()));
        }

        let mut words = command.split_whitespace();
        let reply = match (words.next(), words.next(), words.next()) {
            (Some("list"), None, None) => {
                let count = state.players.get(&self.addr).copied().unwrap_or(0);
                format!("There are {count} of a max of 20 players online: ")
            }
            (Some("whitelist"), Some("add"), Some(name)) => {
                state
                    .whitelist
                    .entry(self.addr.clone())
                    .or_default()
                    .insert(name.to_string());
                format!("Added {name} to the whitelist")
            }
            (Some("whitelist"), Some("remove"), Some(name)) => {
                if let Some(set) = state.whitelist.get_mut(&self.addr) {
                    set.remove(name);
                }
                format!("Removed {name} from the whitelist")
            }
            _ => format!("Unknown command: {command}"),
        };
        Ok(reply)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().open_sessions -= 1;
        }
    }
}
