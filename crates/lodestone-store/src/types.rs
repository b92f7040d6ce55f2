//! Domain types stored in the database.
//!
//! These types represent the persisted state of game servers: one `info`
//! record per server plus zero or more whitelist entries, all sharing the
//! server's partition key.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lodestone_core::{PlayerName, ServerId, TaskHandle};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Sort key value for the per-server info record.
pub const INFO_RECORD_TYPE: &str = "info";

/// Sort key prefix for whitelist entries (`whitelistEntry:<playerName>`).
pub const WHITELIST_RECORD_PREFIX: &str = "whitelistEntry:";

/// Lifecycle states for a game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LifecycleState {
    /// No compute unit should exist.
    Stopped = 1,
    /// A start has been claimed and a compute unit is being launched.
    Starting = 2,
    /// The compute unit is running and reachable.
    Live = 3,
    /// Shutdown has been requested and is in progress.
    Stopping = 4,
}

impl LifecycleState {
    /// All states, in index order.
    pub const ALL: [Self; 4] = [Self::Stopped, Self::Starting, Self::Live, Self::Stopping];

    /// Convert the state to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `LifecycleState`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Stopped),
            2 => Some(Self::Starting),
            3 => Some(Self::Live),
            4 => Some(Self::Stopping),
            _ => None,
        }
    }
}

/// The per-server info record. Sole source of truth for whether a compute
/// unit should exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoRecord {
    /// Partition key.
    pub server_id: ServerId,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Handle of the compute unit, present while one may exist.
    pub task_handle: Option<TaskHandle>,
    /// Game address (`host:port`) of the running unit.
    pub network_address: Option<String>,
    /// Last time a sweep observed a nonzero player count.
    pub last_seen_active_at: Option<DateTime<Utc>>,
    /// When `state` last changed.
    pub state_changed_at: DateTime<Utc>,
    /// Store-managed write counter, bumped on every successful put.
    #[serde(default)]
    pub revision: u64,
}

impl InfoRecord {
    /// A freshly provisioned, stopped server.
    #[must_use]
    pub fn new(server_id: ServerId) -> Self {
        Self {
            server_id,
            state: LifecycleState::Stopped,
            task_handle: None,
            network_address: None,
            last_seen_active_at: None,
            state_changed_at: Utc::now(),
            revision: 0,
        }
    }

    /// Whether the server is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state == LifecycleState::Live
    }

    /// The key of this record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::info(self.server_id.clone())
    }

    /// Return a copy moved into `state`, stamping the transition time.
    #[must_use]
    pub fn with_state(&self, state: LifecycleState) -> Self {
        Self {
            state,
            state_changed_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// A whitelist entry for one player on one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    /// Partition key.
    pub server_id: ServerId,
    /// The whitelisted player.
    pub player_name: PlayerName,
    /// Identity used for dedup: at most one entry per account key.
    pub account_key: String,
    /// When the entry was added.
    pub added_at: DateTime<Utc>,
}

impl WhitelistEntry {
    /// The key of this record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey::whitelist(self.server_id.clone(), self.player_name.clone())
    }
}

/// Discriminator (sort key) of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordType {
    /// The single `info` record.
    Info,
    /// A `whitelistEntry:<playerName>` record.
    WhitelistEntry(PlayerName),
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => f.write_str(INFO_RECORD_TYPE),
            Self::WhitelistEntry(name) => write!(f, "{WHITELIST_RECORD_PREFIX}{name}"),
        }
    }
}

impl FromStr for RecordType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == INFO_RECORD_TYPE {
            return Ok(Self::Info);
        }
        s.strip_prefix(WHITELIST_RECORD_PREFIX)
            .and_then(|name| PlayerName::parse(name).ok())
            .map(Self::WhitelistEntry)
            .ok_or_else(|| StoreError::Serialization(format!("unknown record type: {s}")))
    }
}

/// Full primary key of a record: `(serverId, recordType)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    /// Partition key.
    pub server_id: ServerId,
    /// Sort key.
    pub record_type: RecordType,
}

impl RecordKey {
    /// Key of the info record for a server.
    #[must_use]
    pub const fn info(server_id: ServerId) -> Self {
        Self {
            server_id,
            record_type: RecordType::Info,
        }
    }

    /// Key of a whitelist entry.
    #[must_use]
    pub const fn whitelist(server_id: ServerId, player_name: PlayerName) -> Self {
        Self {
            server_id,
            record_type: RecordType::WhitelistEntry(player_name),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server_id, self.record_type)
    }
}

/// Any record stored under a server's partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerRecord {
    /// The info record.
    Info(InfoRecord),
    /// A whitelist entry.
    WhitelistEntry(WhitelistEntry),
}

impl ServerRecord {
    /// The key of this record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Info(info) => info.key(),
            Self::WhitelistEntry(entry) => entry.key(),
        }
    }

    /// The partition this record belongs to.
    #[must_use]
    pub fn server_id(&self) -> &ServerId {
        match self {
            Self::Info(info) => &info.server_id,
            Self::WhitelistEntry(entry) => &entry.server_id,
        }
    }
}

/// Condition a write must satisfy against the currently stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Write unconditionally.
    None,
    /// The record must not exist yet.
    Absent,
    /// The info record of the record's server must exist.
    ParentExists,
    /// The stored info record must still be in `state` at `revision`.
    Prior {
        /// State the caller observed.
        state: LifecycleState,
        /// Revision the caller observed.
        revision: u64,
    },
}

impl Precondition {
    /// Expect the stored record to be exactly the one the caller read.
    #[must_use]
    pub const fn observed(info: &InfoRecord) -> Self {
        Self::Prior {
            state: info.state,
            revision: info.revision,
        }
    }
}

/// One page of a partition scan.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Records in key order.
    pub records: Vec<ServerRecord>,
    /// Continuation token; `None` once the partition is exhausted.
    pub next: Option<RecordKey>,
}

/// Outcome of a chunked batch delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDeleteReport {
    /// Number of keys deleted.
    pub deleted: usize,
    /// Number of batches issued.
    pub batches: usize,
    /// Keys still present after all retries.
    pub failed: Vec<RecordKey>,
}

impl BatchDeleteReport {
    /// Whether every key was deleted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_display_and_parse() {
        let name = PlayerName::parse("Bob").unwrap();
        let rt = RecordType::WhitelistEntry(name);
        assert_eq!(rt.to_string(), "whitelistEntry:Bob");
        assert_eq!("whitelistEntry:Bob".parse::<RecordType>().unwrap(), rt);
        assert_eq!("info".parse::<RecordType>().unwrap(), RecordType::Info);
        assert!("other".parse::<RecordType>().is_err());
    }

    #[test]
    fn lifecycle_state_u8_roundtrip() {
        for state in LifecycleState::ALL {
            assert_eq!(LifecycleState::from_u8(state.as_u8()), Some(state));
        }
        assert_eq!(LifecycleState::from_u8(0), None);
    }

    #[test]
    fn new_info_is_stopped() {
        let info = InfoRecord::new(ServerId::parse("s1").unwrap());
        assert_eq!(info.state, LifecycleState::Stopped);
        assert!(!info.is_live());
        assert!(info.task_handle.is_none());
    }
}
