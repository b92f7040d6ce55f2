//! Control plane service implementation.
//!
//! `ControlPlaneService` ties the record store, the launcher and the game
//! console together. Every state change is a conditional write against the
//! revision the caller read, so concurrent requests for the same server need
//! no lock: whoever loses the race sees a conflict and backs off.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use lodestone_core::{PlayerName, ServerId, TaskHandle};
use lodestone_launcher::Launcher;
use lodestone_rcon::{commands, RconConnector, RconSession};
use lodestone_store::{
    InfoRecord, LifecycleState, Precondition, ServerRecord, Store, WhitelistEntry,
};
use tracing::{debug, info, warn};

use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::records::{ConfigRecordManager, EnsureOutcome};
use crate::schedule::SweepSchedule;
use crate::types::{
    ControlConfig, ProvisioningEvent, ProvisioningOutcome, RequestType, StartOutcome,
    SweepReport, WhitelistOutcome,
};

/// Trait defining the control plane operations.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Start a server, or confirm it is already starting or live.
    ///
    /// At most one compute unit is launched however many callers race on
    /// the same server; every racer gets a success. Once this call claims the
    /// server, dropping the returned future does not abandon the launch.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ServerNotFound` if the server has no info record.
    /// Returns `ControlError::InvalidState` if the server is shutting down.
    /// Returns `ControlError::Capacity` if the launcher refuses the launch.
    async fn start_server(&self, server_id: &ServerId) -> Result<StartOutcome>;

    /// Whitelist a player on a live server, replacing any earlier name of
    /// the same account.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidRequest` for a malformed player name.
    /// Returns `ControlError::ServerNotLive` if the server is not live.
    async fn whitelist_player(
        &self,
        server_id: &ServerId,
        player_name: &str,
        account_id: Option<&str>,
    ) -> Result<WhitelistOutcome>;

    /// Stop servers that have been empty for the idle threshold and repair
    /// records that no longer match reality.
    ///
    /// Per-server failures are logged and counted, never propagated.
    async fn timeout_sweep(&self) -> Result<SweepReport>;

    /// Create or tear down a server's records.
    async fn handle_provisioning_event(
        &self,
        event: &ProvisioningEvent,
    ) -> Result<ProvisioningOutcome>;

    /// Get a server's info record.
    async fn get_server(&self, server_id: &ServerId) -> Result<InfoRecord>;
}

/// What one sweep found for one live server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerCheck {
    Active,
    Idle,
    Stopped,
    Healed,
    Unreachable,
    Conflict,
    Failed,
}

/// Implementation of the control plane.
pub struct ControlPlaneService<S: Store, L: Launcher, R: RconConnector> {
    store: Arc<S>,
    launcher: Arc<L>,
    rcon: Arc<R>,
    records: ConfigRecordManager<S>,
    schedule: Arc<SweepSchedule>,
    config: ControlConfig,
}

impl<S: Store, L: Launcher, R: RconConnector> Clone for ControlPlaneService<S, L, R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            launcher: Arc::clone(&self.launcher),
            rcon: Arc::clone(&self.rcon),
            records: self.records.clone(),
            schedule: Arc::clone(&self.schedule),
            config: self.config.clone(),
        }
    }
}

impl<S: Store, L: Launcher, R: RconConnector> ControlPlaneService<S, L, R> {
    /// Create a new control plane service.
    #[must_use]
    pub fn new(store: Arc<S>, launcher: Arc<L>, rcon: Arc<R>, config: ControlConfig) -> Self {
        Self {
            records: ConfigRecordManager::new(Arc::clone(&store), &config),
            store,
            launcher,
            rcon,
            schedule: Arc::new(SweepSchedule::new()),
            config,
        }
    }

    /// Create a new control plane service with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>, launcher: Arc<L>, rcon: Arc<R>) -> Self {
        Self::new(store, launcher, rcon, ControlConfig::default())
    }

    /// Get a reference to the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get the service configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Get the sweep schedule.
    #[must_use]
    pub const fn schedule(&self) -> &Arc<SweepSchedule> {
        &self.schedule
    }

    /// Arm the sweep for every server that is not stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn rearm_from_store(&self) -> Result<usize> {
        let armed = self.schedule.rearm_from_store(self.store.as_ref())?;
        info!(armed, "Re-armed sweep from store");
        Ok(armed)
    }

    fn load_info(&self, server_id: &ServerId) -> Result<InfoRecord> {
        self.store
            .get_info(server_id)?
            .ok_or_else(|| ControlError::ServerNotFound(server_id.clone()))
    }

    /// Conditionally move `info` to `to`, applying `update` to the new copy.
    fn transition(
        &self,
        info: &InfoRecord,
        to: LifecycleState,
        update: impl FnOnce(&mut InfoRecord),
    ) -> Result<InfoRecord> {
        lifecycle::validate_transition(&info.server_id, info.state, to)?;
        let mut next = info.with_state(to);
        update(&mut next);
        let stored = self.store.put_info(&next, Precondition::observed(info))?;
        info!(
            server_id = %info.server_id,
            from = ?info.state,
            to = ?to,
            revision = stored.revision,
            "State transition"
        );
        Ok(stored)
    }

    fn transition_to_stopped(&self, info: &InfoRecord) -> Result<InfoRecord> {
        let stopped = self.transition(info, LifecycleState::Stopped, |next| {
            next.task_handle = None;
            next.network_address = None;
        })?;
        self.disarm(&info.server_id);
        Ok(stopped)
    }

    /// Best-effort revert used on start failure paths.
    fn revert_to_stopped(&self, info: &InfoRecord) {
        if let Err(e) = self.transition_to_stopped(info) {
            warn!(server_id = %info.server_id, error = %e, "Could not revert to Stopped");
        }
    }

    fn disarm(&self, server_id: &ServerId) {
        self.schedule.disarm(server_id);
        // A start may have claimed the server between our write and the disarm.
        if let Ok(Some(info)) = self.store.get_info(server_id) {
            if lifecycle::is_active(info.state) {
                self.schedule.arm(server_id);
            }
        }
    }

    async fn terminate_quietly(&self, server_id: &ServerId, handle: &TaskHandle) {
        if let Err(e) = self.launcher.terminate(handle).await {
            warn!(
                server_id = %server_id,
                task_handle = %handle,
                error = %e,
                "Terminate failed"
            );
        }
    }

    /// Poll the launcher until the unit is running with an address.
    async fn await_address(&self, server_id: &ServerId, handle: &TaskHandle) -> Result<String> {
        let attempts = self.config.launch_poll_attempts.max(1);
        let mut delay = self.config.launch_poll_initial;

        for attempt in 1..=attempts {
            match self.launcher.describe(handle).await {
                Ok(task) if task.running => {
                    if let Some(address) = task.network_address {
                        return Ok(address);
                    }
                    debug!(server_id = %server_id, attempt, "Unit running without an address");
                }
                Ok(task) if task.unschedulable => {
                    return Err(ControlError::Capacity(task.message.unwrap_or_else(|| {
                        format!("no room to schedule {handle}")
                    })));
                }
                Ok(task) if task.phase.is_terminal() => {
                    let phase = task.phase;
                    return Err(ControlError::LaunchFailed {
                        server_id: server_id.clone(),
                        reason: task
                            .message
                            .unwrap_or_else(|| format!("unit exited in phase {phase:?}")),
                    });
                }
                Ok(task) => {
                    debug!(server_id = %server_id, attempt, phase = ?task.phase, "Waiting for unit");
                }
                Err(e) if e.is_not_found() => {
                    return Err(ControlError::LaunchFailed {
                        server_id: server_id.clone(),
                        reason: format!("{handle} disappeared"),
                    });
                }
                Err(e) => {
                    warn!(server_id = %server_id, attempt, error = %e, "Describe failed");
                }
            }

            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.config.launch_poll_max);
            }
        }

        Err(ControlError::Timeout(format!(
            "{handle} not ready after {attempts} polls"
        )))
    }

    /// Launch a unit for a server this request claimed and wait for it to
    /// come up. Every failure terminates the unit and releases the claim.
    async fn finish_start(&self, claimed: InfoRecord) -> Result<StartOutcome> {
        let server_id = &claimed.server_id;

        let handle = match self.launcher.launch(server_id, &self.config.container).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "Launch failed");
                self.revert_to_stopped(&claimed);
                return Err(e.into());
            }
        };
        info!(server_id = %server_id, task_handle = %handle, "Launched compute unit");

        // Record the handle before waiting so a crash here leaves it findable.
        let with_handle = InfoRecord {
            task_handle: Some(handle.clone()),
            ..claimed.clone()
        };
        let recorded = match self
            .store
            .put_info(&with_handle, Precondition::observed(&claimed))
        {
            Ok(recorded) => recorded,
            Err(e) => {
                self.terminate_quietly(server_id, &handle).await;
                self.revert_to_stopped(&claimed);
                return Err(e.into());
            }
        };

        let address = match self.await_address(server_id, &handle).await {
            Ok(address) => address,
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "Unit never became ready");
                self.terminate_quietly(server_id, &handle).await;
                self.revert_to_stopped(&recorded);
                return Err(e);
            }
        };

        let now = Utc::now();
        let live = self.transition(&recorded, LifecycleState::Live, |next| {
            next.network_address = Some(address.clone());
            next.last_seen_active_at = Some(now);
        });
        if let Err(e) = live {
            self.terminate_quietly(server_id, &handle).await;
            self.revert_to_stopped(&recorded);
            return Err(e);
        }

        info!(server_id = %server_id, address = %address, "Server is live");
        Ok(StartOutcome::Launched {
            task_handle: handle,
            network_address: address,
        })
    }

    fn whitelist_entries(&self, server_id: &ServerId) -> Result<Vec<WhitelistEntry>> {
        let mut entries = Vec::new();
        for record in self.store.scan_all(server_id) {
            if let ServerRecord::WhitelistEntry(entry) = record? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn apply_whitelist(
        &self,
        session: &mut dyn RconSession,
        server_id: &ServerId,
        player: &PlayerName,
        account_key: String,
        stale: Vec<WhitelistEntry>,
    ) -> Result<WhitelistOutcome> {
        let mut replaced = Vec::with_capacity(stale.len());
        for entry in stale {
            let remove = commands::whitelist_remove(entry.player_name.as_str());
            if let Err(e) = session.execute(&remove).await {
                warn!(
                    server_id = %server_id,
                    player = %entry.player_name,
                    error = %e,
                    "Console whitelist remove failed"
                );
            }
            self.store.delete(&entry.key())?;
            info!(
                server_id = %server_id,
                old = %entry.player_name,
                new = %player,
                "Replaced whitelist entry"
            );
            replaced.push(entry.player_name);
        }

        let output = session
            .execute(&commands::whitelist_add(player.as_str()))
            .await?;
        if output.contains("does not exist") {
            return Err(ControlError::InvalidRequest(format!(
                "unknown player {player}"
            )));
        }

        let entry = WhitelistEntry {
            server_id: server_id.clone(),
            player_name: player.clone(),
            account_key,
            added_at: Utc::now(),
        };
        match self
            .store
            .put(&ServerRecord::WhitelistEntry(entry), Precondition::ParentExists)
        {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                warn!(server_id = %server_id, player = %player, "Server deleted while whitelisting");
                return Err(ControlError::ServerNotFound(server_id.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        info!(server_id = %server_id, player = %player, "Whitelisted player");

        Ok(WhitelistOutcome {
            player_name: player.clone(),
            replaced,
        })
    }

    async fn player_count(&self, rcon_addr: &str) -> Result<u32> {
        let mut session = self.rcon.connect(rcon_addr).await?;
        let result = commands::query_player_list(session.as_mut()).await;
        session.close().await;
        Ok(result?.online)
    }

    /// Move `Starting`/`Stopping` records older than the grace period to
    /// `Stopped`, terminating their units first.
    async fn reconcile_stale_transitions(&self, now: DateTime<Utc>) -> Result<Vec<ServerId>> {
        let grace = self.config.transition_grace();
        let mut reconciled = Vec::new();

        for state in [LifecycleState::Starting, LifecycleState::Stopping] {
            for info in self.store.list_infos_by_state(state)? {
                if now - info.state_changed_at < grace {
                    continue;
                }
                warn!(
                    server_id = %info.server_id,
                    state = ?info.state,
                    since = %info.state_changed_at,
                    "Reconciling stale transition"
                );
                if let Some(handle) = &info.task_handle {
                    if let Err(e) = self.launcher.terminate(handle).await {
                        warn!(
                            server_id = %info.server_id,
                            error = %e,
                            "Terminate failed, retrying next sweep"
                        );
                        continue;
                    }
                }
                match self.transition_to_stopped(&info) {
                    Ok(_) => reconciled.push(info.server_id),
                    Err(e) if e.is_conflict() => {
                        debug!(server_id = %info.server_id, "Changed concurrently");
                    }
                    Err(e) => warn!(server_id = %info.server_id, error = %e, "Reconcile failed"),
                }
            }
        }

        Ok(reconciled)
    }

    /// Mark a live server stopped if its unit is gone. Returns `None` while
    /// the unit is alive or its state is unknown.
    async fn heal_if_dead(&self, info: &InfoRecord) -> Option<ServerCheck> {
        let dead = match &info.task_handle {
            None => true,
            Some(handle) => match self.launcher.describe(handle).await {
                Ok(task) if task.phase.is_terminal() => {
                    self.terminate_quietly(&info.server_id, handle).await;
                    true
                }
                Ok(_) => false,
                Err(e) if e.is_not_found() => true,
                Err(e) => {
                    warn!(server_id = %info.server_id, error = %e, "Could not describe unit");
                    false
                }
            },
        };
        if !dead {
            return None;
        }

        warn!(server_id = %info.server_id, "Compute unit is gone, marking server stopped");
        Some(match self.transition_to_stopped(info) {
            Ok(_) => ServerCheck::Healed,
            Err(e) if e.is_conflict() => ServerCheck::Conflict,
            Err(e) => {
                warn!(server_id = %info.server_id, error = %e, "Could not mark server stopped");
                ServerCheck::Failed
            }
        })
    }

    async fn check_live_server(&self, info: InfoRecord) -> (ServerId, ServerCheck) {
        let check = self.inspect_live_server(&info).await;
        (info.server_id, check)
    }

    async fn inspect_live_server(&self, info: &InfoRecord) -> ServerCheck {
        if let Some(check) = self.heal_if_dead(info).await {
            return check;
        }

        let Some(rcon_addr) = info
            .network_address
            .as_deref()
            .and_then(|addr| rcon_address(addr, self.config.rcon_port))
        else {
            warn!(server_id = %info.server_id, "Live server has no address");
            return ServerCheck::Unreachable;
        };

        let online = match self.player_count(&rcon_addr).await {
            Ok(online) => online,
            Err(e) => {
                warn!(
                    server_id = %info.server_id,
                    error = %e,
                    "Could not query players, leaving server alone"
                );
                return ServerCheck::Unreachable;
            }
        };

        let now = Utc::now();
        if online > 0 {
            debug!(server_id = %info.server_id, online, "Players online");
            let touched = InfoRecord {
                last_seen_active_at: Some(now),
                ..info.clone()
            };
            if let Err(e) = self.store.put_info(&touched, Precondition::observed(info)) {
                debug!(server_id = %info.server_id, error = %e, "Activity not recorded");
            }
            return ServerCheck::Active;
        }

        let last_active = info.last_seen_active_at.unwrap_or(info.state_changed_at);
        if now - last_active < self.config.idle_timeout() {
            debug!(server_id = %info.server_id, since = %last_active, "Empty but within threshold");
            return ServerCheck::Idle;
        }

        info!(server_id = %info.server_id, since = %last_active, "Stopping idle server");
        self.stop_idle(info).await
    }

    async fn stop_idle(&self, info: &InfoRecord) -> ServerCheck {
        let stopping = match self.transition(info, LifecycleState::Stopping, |_| {}) {
            Ok(stopping) => stopping,
            Err(e) if e.is_conflict() => return ServerCheck::Conflict,
            Err(e) => {
                warn!(server_id = %info.server_id, error = %e, "Could not mark server stopping");
                return ServerCheck::Failed;
            }
        };

        if let Some(handle) = &stopping.task_handle {
            if let Err(e) = self.launcher.terminate(handle).await {
                warn!(
                    server_id = %info.server_id,
                    error = %e,
                    "Terminate failed, server stays Stopping until reconciled"
                );
                return ServerCheck::Failed;
            }
        }

        match self.transition_to_stopped(&stopping) {
            Ok(_) => ServerCheck::Stopped,
            Err(e) if e.is_conflict() => ServerCheck::Conflict,
            Err(e) => {
                warn!(server_id = %info.server_id, error = %e, "Could not mark server stopped");
                ServerCheck::Failed
            }
        }
    }
}

/// Console address on the host of a game address.
fn rcon_address(network_address: &str, port: u16) -> Option<String> {
    let host = match network_address.rsplit_once(':') {
        Some((host, game_port)) if game_port.parse::<u16>().is_ok() => host,
        _ => network_address,
    };
    let host = host.trim();
    (!host.is_empty()).then(|| format!("{host}:{port}"))
}

#[async_trait]
impl<S, L, R> ControlPlane for ControlPlaneService<S, L, R>
where
    S: Store + 'static,
    L: Launcher + 'static,
    R: RconConnector + 'static,
{
    async fn start_server(&self, server_id: &ServerId) -> Result<StartOutcome> {
        let info = self.load_info(server_id)?;
        match info.state {
            LifecycleState::Starting | LifecycleState::Live => {
                debug!(server_id = %server_id, state = ?info.state, "Server already running");
                return Ok(StartOutcome::AlreadyRunning { state: info.state });
            }
            LifecycleState::Stopping => {
                return Err(ControlError::InvalidState {
                    server_id: server_id.clone(),
                    from: info.state,
                    to: LifecycleState::Starting,
                });
            }
            LifecycleState::Stopped => {}
        }

        let claimed = match self.transition(&info, LifecycleState::Starting, |next| {
            next.task_handle = None;
            next.network_address = None;
        }) {
            Ok(claimed) => claimed,
            Err(e) if e.is_conflict() => {
                info!(server_id = %server_id, "Start claimed by a concurrent request");
                return Ok(StartOutcome::ClaimedElsewhere);
            }
            Err(e) => return Err(e),
        };
        self.schedule.arm(server_id);

        // Once claimed, the start runs to completion even if the caller goes away.
        let this = self.clone();
        tokio::spawn(async move { this.finish_start(claimed).await })
            .await
            .map_err(|e| {
                ControlError::Internal(format!("start task for {server_id} failed: {e}"))
            })?
    }

    async fn whitelist_player(
        &self,
        server_id: &ServerId,
        player_name: &str,
        account_id: Option<&str>,
    ) -> Result<WhitelistOutcome> {
        let player = PlayerName::parse(player_name).map_err(|e| {
            ControlError::InvalidRequest(format!("invalid player name {player_name:?}: {e}"))
        })?;

        let info = self.load_info(server_id)?;
        if !info.is_live() {
            return Err(ControlError::ServerNotLive(server_id.clone()));
        }
        let rcon_addr = info
            .network_address
            .as_deref()
            .and_then(|addr| rcon_address(addr, self.config.rcon_port))
            .ok_or_else(|| ControlError::ServerNotLive(server_id.clone()))?;

        let account_key = self.config.account_match.account_key(&player, account_id);
        let stale: Vec<WhitelistEntry> = self
            .whitelist_entries(server_id)?
            .into_iter()
            .filter(|entry| entry.account_key == account_key && entry.player_name != player)
            .collect();

        let mut session = self.rcon.connect(&rcon_addr).await?;
        let result = self
            .apply_whitelist(session.as_mut(), server_id, &player, account_key, stale)
            .await;
        session.close().await;
        result
    }

    async fn timeout_sweep(&self) -> Result<SweepReport> {
        if !self.schedule.is_armed() {
            debug!("No servers armed, skipping sweep");
            return Ok(SweepReport::skipped());
        }

        let mut report = SweepReport {
            reconciled: self.reconcile_stale_transitions(Utc::now()).await?,
            ..SweepReport::default()
        };

        let live = self.store.list_infos_by_state(LifecycleState::Live)?;
        report.checked = live.len();

        let checks: Vec<(ServerId, ServerCheck)> = stream::iter(live)
            .map(|info| self.check_live_server(info))
            .buffer_unordered(self.config.sweep_concurrency.max(1))
            .collect()
            .await;

        for (server_id, check) in checks {
            match check {
                ServerCheck::Active => report.active += 1,
                ServerCheck::Idle => report.idle += 1,
                ServerCheck::Stopped => report.stopped.push(server_id),
                ServerCheck::Healed => report.healed.push(server_id),
                ServerCheck::Unreachable => report.unreachable += 1,
                ServerCheck::Conflict => report.conflicts += 1,
                ServerCheck::Failed => report.failed += 1,
            }
        }

        info!(
            checked = report.checked,
            active = report.active,
            idle = report.idle,
            stopped = report.stopped.len(),
            healed = report.healed.len(),
            reconciled = report.reconciled.len(),
            unreachable = report.unreachable,
            "Sweep complete"
        );
        Ok(report)
    }

    async fn handle_provisioning_event(
        &self,
        event: &ProvisioningEvent,
    ) -> Result<ProvisioningOutcome> {
        let server_id = event.server_id();
        info!(server_id = %server_id, request_type = ?event.request_type, "Provisioning event");

        match event.request_type {
            RequestType::Create | RequestType::Update => {
                Ok(match self.records.ensure_info(server_id)? {
                    EnsureOutcome::Created => ProvisioningOutcome::Created,
                    EnsureOutcome::Existed => ProvisioningOutcome::AlreadyExists,
                })
            }
            RequestType::Delete => {
                let records = self.records.teardown(server_id).await?;
                self.schedule.disarm(server_id);
                Ok(ProvisioningOutcome::Deleted { records })
            }
        }
    }

    async fn get_server(&self, server_id: &ServerId) -> Result<InfoRecord> {
        self.load_info(server_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lodestone_launcher::MockLauncher;
    use lodestone_rcon::{MockFailure, MockRconConnector};
    use lodestone_store::{Page, RecordKey, RocksStore};
    use tempfile::TempDir;

    type TestService = ControlPlaneService<RocksStore, MockLauncher, MockRconConnector>;

    struct Harness {
        service: Arc<TestService>,
        store: Arc<RocksStore>,
        launcher: Arc<MockLauncher>,
        rcon: Arc<MockRconConnector>,
        _dir: TempDir,
    }

    fn setup() -> Harness {
        setup_with(ControlConfig::default())
    }

    fn setup_with(config: ControlConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path(), "server-config").unwrap());
        let launcher = Arc::new(MockLauncher::new());
        let rcon = Arc::new(MockRconConnector::new());
        let service = Arc::new(ControlPlaneService::new(
            Arc::clone(&store),
            Arc::clone(&launcher),
            Arc::clone(&rcon),
            config,
        ));
        Harness {
            service,
            store,
            launcher,
            rcon,
            _dir: dir,
        }
    }

    fn sid(s: &str) -> ServerId {
        ServerId::parse(s).unwrap()
    }

    async fn provision(h: &Harness, id: &ServerId) {
        h.service
            .handle_provisioning_event(&ProvisioningEvent::new(RequestType::Create, id.clone()))
            .await
            .unwrap();
    }

    fn info(h: &Harness, id: &ServerId) -> InfoRecord {
        h.store.get_info(id).unwrap().unwrap()
    }

    /// Pretend the last player left `minutes` ago.
    fn backdate(h: &Harness, id: &ServerId, minutes: i64) {
        let current = info(h, id);
        let older = InfoRecord {
            last_seen_active_at: Some(Utc::now() - chrono::Duration::minutes(minutes)),
            ..current.clone()
        };
        h.store
            .put_info(&older, Precondition::observed(&current))
            .unwrap();
    }

    fn whitelisted(h: &Harness, id: &ServerId) -> Vec<String> {
        let mut names: Vec<String> = h
            .service
            .whitelist_entries(id)
            .unwrap()
            .into_iter()
            .map(|e| e.player_name.to_string())
            .collect();
        names.sort();
        names
    }

    async fn start_live(h: &Harness, id: &ServerId) {
        provision(h, id).await;
        h.service.start_server(id).await.unwrap();
        assert!(info(h, id).is_live());
    }

    #[tokio::test]
    async fn start_then_idle_shutdown() {
        let h = setup();
        let id = sid("s1");
        provision(&h, &id).await;
        h.launcher.set_address(&id, "10.0.0.5:25565");

        let outcome = h.service.start_server(&id).await.unwrap();
        assert_eq!(
            outcome,
            StartOutcome::Launched {
                task_handle: TaskHandle::new("h1"),
                network_address: "10.0.0.5:25565".to_string(),
            }
        );
        let record = info(&h, &id);
        assert!(record.is_live());
        assert_eq!(record.task_handle, Some(TaskHandle::new("h1")));
        assert!(h.service.schedule().is_armed_for(&id));

        backdate(&h, &id, 25);
        h.rcon.set_players("10.0.0.5:25575", 0);
        let report = h.service.timeout_sweep().await.unwrap();

        assert_eq!(report.stopped, vec![id.clone()]);
        let record = info(&h, &id);
        assert!(!record.is_live());
        assert_eq!(record.state, LifecycleState::Stopped);
        assert_eq!(record.task_handle, None);
        assert_eq!(record.network_address, None);
        assert_eq!(h.launcher.terminations(), vec![TaskHandle::new("h1")]);
        assert!(!h.service.schedule().is_armed());
        assert_eq!(h.rcon.open_sessions(), 0);
    }

    #[tokio::test]
    async fn start_is_idempotent_when_live() {
        let h = setup();
        let id = sid("s1");
        start_live(&h, &id).await;

        let outcome = h.service.start_server(&id).await.unwrap();
        assert_eq!(
            outcome,
            StartOutcome::AlreadyRunning {
                state: LifecycleState::Live
            }
        );
        assert_eq!(h.launcher.launch_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_launch_once() {
        let h = setup();
        let id = sid("s1");
        provision(&h, &id).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let service = Arc::clone(&h.service);
                let id = id.clone();
                tokio::spawn(async move { service.start_server(&id).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(h.launcher.launch_count(), 1);
        assert!(info(&h, &id).is_live());
    }

    #[tokio::test]
    async fn start_unknown_server() {
        let h = setup();
        let result = h.service.start_server(&sid("ghost")).await;
        assert!(matches!(result, Err(ControlError::ServerNotFound(_))));
        assert_eq!(h.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn start_while_stopping_is_rejected() {
        let h = setup();
        let id = sid("s1");
        let stopping = InfoRecord {
            state: LifecycleState::Stopping,
            ..InfoRecord::new(id.clone())
        };
        h.store.put_info(&stopping, Precondition::Absent).unwrap();

        let result = h.service.start_server(&id).await;
        assert!(matches!(
            result,
            Err(ControlError::InvalidState {
                from: LifecycleState::Stopping,
                to: LifecycleState::Starting,
                ..
            })
        ));
        assert_eq!(h.launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn capacity_failure_reverts_to_stopped() {
        let h = setup();
        let id = sid("s1");
        provision(&h, &id).await;
        h.launcher.refuse_launches(true);

        let result = h.service.start_server(&id).await;
        assert!(matches!(result, Err(ControlError::Capacity(_))));

        let record = info(&h, &id);
        assert_eq!(record.state, LifecycleState::Stopped);
        assert_eq!(record.task_handle, None);
        assert!(!h.service.schedule().is_armed());

        h.launcher.refuse_launches(false);
        assert!(h.service.start_server(&id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn launch_timeout_terminates_and_reverts() {
        let h = setup_with(ControlConfig {
            launch_poll_attempts: 5,
            ..ControlConfig::default()
        });
        let id = sid("s1");
        provision(&h, &id).await;
        h.launcher.never_ready(true);

        let result = h.service.start_server(&id).await;
        assert!(matches!(result, Err(ControlError::Timeout(_))));
        assert_eq!(h.launcher.terminations(), vec![TaskHandle::new("h1")]);
        assert_eq!(h.launcher.active_count(), 0);

        let record = info(&h, &id);
        assert_eq!(record.state, LifecycleState::Stopped);
        assert_eq!(record.task_handle, None);
    }

    #[tokio::test(start_paused = true)]
    async fn unschedulable_unit_reports_capacity() {
        let h = setup();
        let id = sid("s1");
        provision(&h, &id).await;
        h.launcher.unschedulable(true);

        let result = h.service.start_server(&id).await;
        match result {
            Err(ControlError::Capacity(reason)) => assert!(reason.contains("insufficient memory")),
            other => panic!("expected capacity error, got {other:?}"),
        }
        assert_eq!(h.launcher.terminations(), vec![TaskHandle::new("h1")]);
        assert_eq!(h.launcher.active_count(), 0);

        let record = info(&h, &id);
        assert_eq!(record.state, LifecycleState::Stopped);
        assert_eq!(record.task_handle, None);
        assert!(!h.service.schedule().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_start_request_still_goes_live() {
        let h = setup();
        let id = sid("s1");
        provision(&h, &id).await;
        h.launcher.set_polls_before_ready(3);

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(1500),
            h.service.start_server(&id),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(info(&h, &id).state, LifecycleState::Starting);

        tokio::time::sleep(std::time::Duration::from_secs(60)).await;

        let record = info(&h, &id);
        assert!(record.is_live());
        assert_eq!(record.task_handle, Some(TaskHandle::new("h1")));
        assert_eq!(h.launcher.launch_count(), 1);
        assert_eq!(
            h.service.start_server(&id).await.unwrap(),
            StartOutcome::AlreadyRunning {
                state: LifecycleState::Live
            }
        );
    }

    #[tokio::test]
    async fn sweep_is_a_no_op_when_disarmed() {
        let h = setup();
        provision(&h, &sid("s1")).await;

        let report = h.service.timeout_sweep().await.unwrap();
        assert!(report.skipped);
        assert_eq!(h.rcon.connect_count(), 0);
    }

    #[tokio::test]
    async fn sweep_never_stops_server_with_players() {
        let h = setup();
        let id = sid("s1");
        start_live(&h, &id).await;
        backdate(&h, &id, 60);
        h.rcon.set_players("10.0.0.1:25575", 3);

        let report = h.service.timeout_sweep().await.unwrap();
        assert_eq!(report.active, 1);
        assert!(report.stopped.is_empty());

        let record = info(&h, &id);
        assert!(record.is_live());
        let seen = record.last_seen_active_at.unwrap();
        assert!(Utc::now() - seen < chrono::Duration::minutes(1));
        assert!(h.launcher.terminations().is_empty());
    }

    #[tokio::test]
    async fn sweep_respects_idle_threshold() {
        let h = setup();
        let id = sid("s1");
        start_live(&h, &id).await;

        backdate(&h, &id, 19);
        let report = h.service.timeout_sweep().await.unwrap();
        assert_eq!(report.idle, 1);
        assert!(info(&h, &id).is_live());
        assert!(h.launcher.terminations().is_empty());

        backdate(&h, &id, 20);
        let report = h.service.timeout_sweep().await.unwrap();
        assert_eq!(report.stopped, vec![id.clone()]);
        assert_eq!(info(&h, &id).state, LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn unreachable_console_leaves_server_alone() {
        let h = setup();
        let id = sid("s1");
        start_live(&h, &id).await;
        backdate(&h, &id, 60);
        h.rcon
            .set_failure("10.0.0.1:25575", Some(MockFailure::Unreachable));

        let report = h.service.timeout_sweep().await.unwrap();
        assert_eq!(report.unreachable, 1);
        assert!(info(&h, &id).is_live());
        assert!(h.launcher.terminations().is_empty());

        h.rcon.set_failure("10.0.0.1:25575", Some(MockFailure::Timeout));
        let report = h.service.timeout_sweep().await.unwrap();
        assert_eq!(report.unreachable, 1);
        assert!(info(&h, &id).is_live());
        assert_eq!(h.rcon.open_sessions(), 0);
    }

    #[tokio::test]
    async fn sweep_heals_dead_units() {
        let h = setup();
        let crashed = sid("crashed");
        let vanished = sid("vanished");
        start_live(&h, &crashed).await;
        start_live(&h, &vanished).await;

        h.launcher.kill(&TaskHandle::new("h1"));
        h.launcher.forget(&TaskHandle::new("h2"));

        let mut report = h.service.timeout_sweep().await.unwrap();
        report.healed.sort();
        assert_eq!(report.healed, vec![crashed.clone(), vanished.clone()]);
        assert_eq!(info(&h, &crashed).state, LifecycleState::Stopped);
        assert_eq!(info(&h, &vanished).task_handle, None);
        assert_eq!(h.rcon.connect_count(), 0);
    }

    #[tokio::test]
    async fn sweep_reconciles_stale_transitions() {
        let h = setup();
        let stale = sid("stale");
        let fresh = sid("fresh");
        let stuck = InfoRecord {
            state: LifecycleState::Starting,
            task_handle: Some(TaskHandle::new("h7")),
            state_changed_at: Utc::now() - chrono::Duration::minutes(11),
            ..InfoRecord::new(stale.clone())
        };
        h.store.put_info(&stuck, Precondition::Absent).unwrap();
        let starting = InfoRecord {
            state: LifecycleState::Starting,
            ..InfoRecord::new(fresh.clone())
        };
        h.store.put_info(&starting, Precondition::Absent).unwrap();
        h.service.rearm_from_store().unwrap();

        let report = h.service.timeout_sweep().await.unwrap();
        assert_eq!(report.reconciled, vec![stale.clone()]);
        assert_eq!(info(&h, &stale).state, LifecycleState::Stopped);
        assert_eq!(info(&h, &fresh).state, LifecycleState::Starting);
        assert_eq!(h.launcher.terminations(), vec![TaskHandle::new("h7")]);
        assert!(h.service.schedule().is_armed_for(&fresh));
        assert!(!h.service.schedule().is_armed_for(&stale));
    }

    #[tokio::test]
    async fn sweep_handles_a_mixed_fleet() {
        let h = setup_with(ControlConfig {
            sweep_concurrency: 2,
            ..ControlConfig::default()
        });
        let busy = sid("busy");
        let idle = sid("idle");
        let recent = sid("recent");
        for (id, address) in [
            (&busy, "10.0.1.1:25565"),
            (&idle, "10.0.1.2:25565"),
            (&recent, "10.0.1.3:25565"),
        ] {
            h.launcher.set_address(id, address);
            start_live(&h, id).await;
        }
        backdate(&h, &busy, 90);
        backdate(&h, &idle, 30);
        backdate(&h, &recent, 5);
        h.rcon.set_players("10.0.1.1:25575", 4);

        let report = h.service.timeout_sweep().await.unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.active, 1);
        assert_eq!(report.idle, 1);
        assert_eq!(report.stopped, vec![idle.clone()]);

        let live = h
            .store
            .list_infos_by_state(LifecycleState::Live)
            .unwrap()
            .len();
        assert_eq!(live, 2);
        assert_eq!(h.launcher.active_count(), live);
        assert!(h.service.schedule().is_armed_for(&busy));
        assert!(!h.service.schedule().is_armed_for(&idle));
    }

    #[tokio::test]
    async fn whitelist_requires_live_server() {
        let h = setup();
        let id = sid("s1");
        provision(&h, &id).await;

        let result = h.service.whitelist_player(&id, "Bob", None).await;
        assert!(matches!(result, Err(ControlError::ServerNotLive(_))));
        assert_eq!(h.rcon.connect_count(), 0);
    }

    #[tokio::test]
    async fn whitelist_rejects_malformed_names() {
        let h = setup();
        let id = sid("s1");
        start_live(&h, &id).await;

        for name in ["", "bad name", "way_too_long_for_a_name", "semi;colon"] {
            let result = h.service.whitelist_player(&id, name, None).await;
            assert!(matches!(result, Err(ControlError::InvalidRequest(_))), "{name}");
        }
        assert_eq!(h.rcon.connect_count(), 0);
    }

    #[tokio::test]
    async fn whitelist_replaces_renamed_account() {
        let h = setup_with(ControlConfig {
            account_match: crate::types::AccountMatch::AccountId,
            ..ControlConfig::default()
        });
        let id = sid("s1");
        start_live(&h, &id).await;

        h.service
            .whitelist_player(&id, "Bob", Some("acct-42"))
            .await
            .unwrap();
        let outcome = h
            .service
            .whitelist_player(&id, "Bob_renamed", Some("acct-42"))
            .await
            .unwrap();

        assert_eq!(outcome.replaced, vec![PlayerName::parse("Bob").unwrap()]);
        assert_eq!(whitelisted(&h, &id), vec!["Bob_renamed"]);
        let console = h.rcon.whitelist("10.0.0.1:25575");
        assert_eq!(console.len(), 1);
        assert!(console.contains("Bob_renamed"));
        assert_eq!(h.rcon.open_sessions(), 0);
    }

    #[tokio::test]
    async fn whitelist_matches_names_case_insensitively_by_default() {
        let h = setup();
        let id = sid("s1");
        start_live(&h, &id).await;

        h.service.whitelist_player(&id, "bob", None).await.unwrap();
        h.service.whitelist_player(&id, "Alice", None).await.unwrap();
        let outcome = h.service.whitelist_player(&id, "Bob", None).await.unwrap();

        assert_eq!(outcome.replaced.len(), 1);
        assert_eq!(whitelisted(&h, &id), vec!["Alice", "Bob"]);
    }

    #[tokio::test]
    async fn whitelist_surfaces_unreachable_console() {
        let h = setup();
        let id = sid("s1");
        start_live(&h, &id).await;
        h.rcon
            .set_failure("10.0.0.1:25575", Some(MockFailure::Unreachable));

        let result = h.service.whitelist_player(&id, "Bob", None).await;
        assert!(matches!(result, Err(ControlError::Unreachable(_))));
        assert!(whitelisted(&h, &id).is_empty());
    }

    /// Deletes the server's info record right before a whitelist entry is
    /// written, as a teardown landing mid-request would.
    struct DeleteBeforeWhitelistStore {
        inner: RocksStore,
    }

    impl Store for DeleteBeforeWhitelistStore {
        fn get(&self, key: &RecordKey) -> lodestone_store::Result<Option<ServerRecord>> {
            self.inner.get(key)
        }

        fn put(
            &self,
            record: &ServerRecord,
            precondition: Precondition,
        ) -> lodestone_store::Result<u64> {
            if let ServerRecord::WhitelistEntry(entry) = record {
                self.inner.delete(&RecordKey::info(entry.server_id.clone()))?;
            }
            self.inner.put(record, precondition)
        }

        fn delete(&self, key: &RecordKey) -> lodestone_store::Result<bool> {
            self.inner.delete(key)
        }

        fn scan_page(
            &self,
            server_id: &ServerId,
            start_after: Option<&RecordKey>,
            limit: usize,
        ) -> lodestone_store::Result<Page> {
            self.inner.scan_page(server_id, start_after, limit)
        }

        fn list_infos_by_state(
            &self,
            state: LifecycleState,
        ) -> lodestone_store::Result<Vec<InfoRecord>> {
            self.inner.list_infos_by_state(state)
        }

        fn write_delete_batch(
            &self,
            keys: &[RecordKey],
        ) -> lodestone_store::Result<Vec<RecordKey>> {
            self.inner.write_delete_batch(keys)
        }
    }

    #[tokio::test]
    async fn whitelist_racing_deletion_leaves_no_entry() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DeleteBeforeWhitelistStore {
            inner: RocksStore::open(dir.path(), "server-config").unwrap(),
        });
        let rcon = Arc::new(MockRconConnector::new());
        let service = ControlPlaneService::with_defaults(
            Arc::clone(&store),
            Arc::new(MockLauncher::new()),
            Arc::clone(&rcon),
        );

        let id = sid("s1");
        let live = InfoRecord {
            state: LifecycleState::Live,
            task_handle: Some(TaskHandle::new("h1")),
            network_address: Some("10.0.0.1:25565".to_string()),
            ..InfoRecord::new(id.clone())
        };
        store.put_info(&live, Precondition::Absent).unwrap();

        let result = service.whitelist_player(&id, "Bob", None).await;
        assert!(matches!(result, Err(ControlError::ServerNotFound(_))));
        assert_eq!(store.inner.scan_all(&id).count(), 0);
        assert_eq!(rcon.open_sessions(), 0);
    }

    #[tokio::test]
    async fn provisioning_create_keeps_existing_state() {
        let h = setup();
        let id = sid("s1");
        start_live(&h, &id).await;

        let outcome = h
            .service
            .handle_provisioning_event(&ProvisioningEvent::new(RequestType::Update, id.clone()))
            .await
            .unwrap();
        assert_eq!(outcome, ProvisioningOutcome::AlreadyExists);
        assert!(info(&h, &id).is_live());
    }

    #[tokio::test]
    async fn provisioning_delete_removes_every_record() {
        let h = setup();
        let id = sid("s1");
        start_live(&h, &id).await;
        for i in 0..40 {
            let entry = WhitelistEntry {
                server_id: id.clone(),
                player_name: PlayerName::parse(&format!("p{i}")).unwrap(),
                account_key: format!("name:p{i}"),
                added_at: Utc::now(),
            };
            h.store
                .put(&ServerRecord::WhitelistEntry(entry), Precondition::None)
                .unwrap();
        }

        let outcome = h
            .service
            .handle_provisioning_event(&ProvisioningEvent::new(RequestType::Delete, id.clone()))
            .await
            .unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Deleted { records: 41 });
        assert_eq!(h.store.scan_all(&id).count(), 0);
        assert!(matches!(
            h.service.get_server(&id).await,
            Err(ControlError::ServerNotFound(_))
        ));
        assert!(!h.service.schedule().is_armed_for(&id));
    }

    #[tokio::test]
    async fn rearm_after_restart() {
        let h = setup();
        let id = sid("s1");
        start_live(&h, &id).await;

        let restarted = ControlPlaneService::new(
            Arc::clone(&h.store),
            Arc::clone(&h.launcher),
            Arc::clone(&h.rcon),
            ControlConfig::default(),
        );
        assert!(!restarted.schedule().is_armed());
        assert_eq!(restarted.rearm_from_store().unwrap(), 1);
        assert!(restarted.schedule().is_armed_for(&id));
    }

    #[test]
    fn rcon_address_uses_game_host() {
        assert_eq!(
            rcon_address("10.0.0.5:25565", 25575).as_deref(),
            Some("10.0.0.5:25575")
        );
        assert_eq!(
            rcon_address("mc.example.com", 25575).as_deref(),
            Some("mc.example.com:25575")
        );
        assert_eq!(
            rcon_address("[::1]:25565", 25575).as_deref(),
            Some("[::1]:25575")
        );
        assert_eq!(rcon_address("", 25575), None);
    }
}
