//! Request, response and configuration types for control plane operations.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use lodestone_core::{PlayerName, ServerId, TaskHandle};
use lodestone_launcher::ContainerSpec;
use lodestone_rcon::DEFAULT_RCON_PORT;
use lodestone_store::LifecycleState;
use serde::{Deserialize, Serialize};

/// How whitelist requests decide that two player names belong to the same
/// account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountMatch {
    /// Names identify accounts verbatim.
    Exact,
    /// Names identify accounts ignoring ASCII case.
    #[default]
    CaseInsensitive,
    /// Requests carry an account id; names without one fall back to
    /// case-insensitive matching.
    AccountId,
}

impl AccountMatch {
    /// Derive the dedup key for a whitelist request.
    #[must_use]
    pub fn account_key(self, player: &PlayerName, account_id: Option<&str>) -> String {
        let account_id = account_id.map(str::trim).filter(|id| !id.is_empty());
        match (self, account_id) {
            (Self::AccountId, Some(id)) => format!("id:{}", id.to_ascii_lowercase()),
            (Self::Exact, _) => format!("name:{player}"),
            (Self::CaseInsensitive | Self::AccountId, _) => {
                format!("name:{}", player.as_str().to_ascii_lowercase())
            }
        }
    }
}

impl fmt::Display for AccountMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exact => "exact",
            Self::CaseInsensitive => "case_insensitive",
            Self::AccountId => "account_id",
        })
    }
}

impl FromStr for AccountMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "exact" => Ok(Self::Exact),
            "case_insensitive" => Ok(Self::CaseInsensitive),
            "account_id" => Ok(Self::AccountId),
            other => Err(format!("unknown account match rule: {other}")),
        }
    }
}

/// Configuration for the control plane service.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Seconds without players before a live server is stopped.
    pub idle_timeout_seconds: u64,
    /// How long a server may sit in `Starting` or `Stopping` before a sweep
    /// reconciles it (seconds).
    pub transition_grace_seconds: u64,
    /// `describe` polls before a launch is abandoned.
    pub launch_poll_attempts: u32,
    /// Delay before the second poll; doubles after each attempt.
    pub launch_poll_initial: Duration,
    /// Upper bound on the delay between polls.
    pub launch_poll_max: Duration,
    /// Live servers checked concurrently by one sweep.
    pub sweep_concurrency: usize,
    /// Console port on game server hosts.
    pub rcon_port: u16,
    /// Whitelist dedup rule.
    pub account_match: AccountMatch,
    /// Keys per teardown delete batch.
    pub delete_batch_size: usize,
    /// Attempts per delete batch, and backoff rounds per teardown pass.
    pub delete_attempts: u32,
    /// Delay before the first teardown retry round; grows linearly.
    pub delete_retry_backoff: Duration,
    /// Scan-and-delete passes before teardown reports incomplete cleanup.
    pub teardown_passes: u32,
    /// What every launched server runs.
    pub container: ContainerSpec,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 1200,    // 20 minutes
            transition_grace_seconds: 600, // 10 minutes
            launch_poll_attempts: 30,
            launch_poll_initial: Duration::from_secs(1),
            launch_poll_max: Duration::from_secs(10),
            sweep_concurrency: 8,
            rcon_port: DEFAULT_RCON_PORT,
            account_match: AccountMatch::default(),
            delete_batch_size: lodestone_store::MAX_BATCH_SIZE,
            delete_attempts: 3,
            delete_retry_backoff: Duration::from_millis(200),
            teardown_passes: 3,
            container: ContainerSpec::default(),
        }
    }
}

impl ControlConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `IDLE_TIMEOUT_MINUTES`: idle threshold (default 20)
    /// - `TRANSITION_GRACE_SECONDS`: stale transition bound (default 600)
    /// - `LAUNCH_POLL_ATTEMPTS`: readiness polls per start (default 30)
    /// - `SWEEP_CONCURRENCY`: parallel checks per sweep (default 8)
    /// - `RCON_PORT`: console port (default 25575)
    /// - `WHITELIST_ACCOUNT_MATCH`: `exact`, `case_insensitive` or `account_id`
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(minutes) = env_parse::<u64>("IDLE_TIMEOUT_MINUTES") {
            config.idle_timeout_seconds = minutes.saturating_mul(60);
        }
        if let Some(secs) = env_parse("TRANSITION_GRACE_SECONDS") {
            config.transition_grace_seconds = secs;
        }
        if let Some(attempts) = env_parse("LAUNCH_POLL_ATTEMPTS") {
            config.launch_poll_attempts = attempts;
        }
        if let Some(n) = env_parse::<usize>("SWEEP_CONCURRENCY") {
            config.sweep_concurrency = n.max(1);
        }
        if let Some(port) = env_parse("RCON_PORT") {
            config.rcon_port = port;
        }
        if let Ok(val) = std::env::var("WHITELIST_ACCOUNT_MATCH") {
            match val.parse() {
                Ok(rule) => config.account_match = rule,
                Err(e) => tracing::warn!(error = %e, "Ignoring WHITELIST_ACCOUNT_MATCH"),
            }
        }

        config
    }

    /// The idle threshold as a signed duration for timestamp arithmetic.
    #[must_use]
    pub fn idle_timeout(&self) -> chrono::Duration {
        seconds(self.idle_timeout_seconds)
    }

    /// The stale transition bound as a signed duration.
    #[must_use]
    pub fn transition_grace(&self) -> chrono::Duration {
        seconds(self.transition_grace_seconds)
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Result of a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StartOutcome {
    /// This call launched the server and it is now live.
    Launched {
        /// Handle of the new compute unit.
        task_handle: TaskHandle,
        /// Game address of the new unit.
        network_address: String,
    },
    /// The server was already starting or live.
    AlreadyRunning {
        /// State found in the store.
        state: LifecycleState,
    },
    /// A concurrent request claimed the start first.
    ClaimedElsewhere,
}

/// Result of a whitelist request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistOutcome {
    /// The player now on the whitelist.
    pub player_name: PlayerName,
    /// Previous names of the same account that were removed.
    pub replaced: Vec<PlayerName>,
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// The schedule was disarmed, so nothing was checked.
    pub skipped: bool,
    /// Live servers examined.
    pub checked: usize,
    /// Servers with players online.
    pub active: usize,
    /// Empty servers still inside the idle threshold.
    pub idle: usize,
    /// Servers stopped for inactivity.
    pub stopped: Vec<ServerId>,
    /// Live servers whose unit had died, moved to `Stopped`.
    pub healed: Vec<ServerId>,
    /// Stale `Starting`/`Stopping` records moved to `Stopped`.
    pub reconciled: Vec<ServerId>,
    /// Servers whose activity could not be determined.
    pub unreachable: usize,
    /// Servers that changed concurrently and were left alone.
    pub conflicts: usize,
    /// Servers whose check failed outright.
    pub failed: usize,
}

impl SweepReport {
    /// A report for a sweep that did not run.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Provisioning request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    /// A server was provisioned.
    Create,
    /// A server's provisioning was updated.
    Update,
    /// A server was deprovisioned.
    Delete,
}

/// Properties of a provisioned server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProperties {
    /// The server being provisioned.
    pub server_id: ServerId,
}

/// A provisioning lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisioningEvent {
    /// What happened.
    pub request_type: RequestType,
    /// Which server it happened to.
    pub resource_properties: ResourceProperties,
}

impl ProvisioningEvent {
    /// Build an event for `server_id`.
    #[must_use]
    pub const fn new(request_type: RequestType, server_id: ServerId) -> Self {
        Self {
            request_type,
            resource_properties: ResourceProperties { server_id },
        }
    }

    /// The server the event concerns.
    #[must_use]
    pub const fn server_id(&self) -> &ServerId {
        &self.resource_properties.server_id
    }
}

/// Result of a provisioning event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProvisioningOutcome {
    /// A fresh info record was written.
    Created,
    /// An info record already existed and was left untouched.
    AlreadyExists,
    /// Every record of the server was deleted.
    Deleted {
        /// Records deleted.
        records: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(s: &str) -> PlayerName {
        PlayerName::parse(s).unwrap()
    }

    #[test]
    fn control_config_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.idle_timeout_seconds, 1200);
        assert_eq!(config.idle_timeout(), chrono::Duration::minutes(20));
        assert_eq!(config.rcon_port, 25575);
        assert_eq!(config.delete_batch_size, 25);
        assert_eq!(config.account_match, AccountMatch::CaseInsensitive);
    }

    #[test]
    fn huge_durations_saturate() {
        let config = ControlConfig {
            idle_timeout_seconds: u64::MAX,
            ..ControlConfig::default()
        };
        assert_eq!(config.idle_timeout(), chrono::Duration::MAX);
    }

    #[test]
    fn account_keys() {
        let bob = player("Bob");
        assert_eq!(AccountMatch::Exact.account_key(&bob, None), "name:Bob");
        assert_eq!(
            AccountMatch::CaseInsensitive.account_key(&bob, Some("ignored")),
            "name:bob"
        );
        assert_eq!(
            AccountMatch::AccountId.account_key(&bob, Some("ABC-123")),
            "id:abc-123"
        );
        assert_eq!(AccountMatch::AccountId.account_key(&bob, Some("  ")), "name:bob");
    }

    #[test]
    fn account_match_parses() {
        assert_eq!("exact".parse::<AccountMatch>().unwrap(), AccountMatch::Exact);
        assert_eq!(
            "Case-Insensitive".parse::<AccountMatch>().unwrap(),
            AccountMatch::CaseInsensitive
        );
        assert_eq!(
            "account_id".parse::<AccountMatch>().unwrap(),
            AccountMatch::AccountId
        );
        assert!("nickname".parse::<AccountMatch>().is_err());
    }

    #[test]
    fn provisioning_event_wire_format() {
        let event: ProvisioningEvent = serde_json::from_str(
            r#"{"RequestType":"Delete","ResourceProperties":{"serverId":"s1"}}"#,
        )
        .unwrap();
        assert_eq!(event.request_type, RequestType::Delete);
        assert_eq!(event.server_id().as_str(), "s1");
    }

    #[test]
    fn start_outcome_is_tagged() {
        let json = serde_json::to_value(StartOutcome::ClaimedElsewhere).unwrap();
        assert_eq!(json["outcome"], "claimed_elsewhere");
    }
}
