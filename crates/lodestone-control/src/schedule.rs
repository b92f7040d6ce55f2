//! Arming state of the periodic idle sweep.
//!
//! The sweep timer itself always ticks; it only does work while at least one
//! server is armed. Starting a server arms it, stopping it disarms it, so a
//! fleet with nothing running costs one lock acquisition per tick.

use std::collections::HashSet;

use lodestone_core::ServerId;
use lodestone_store::Store;
use parking_lot::Mutex;

/// Set of servers the sweep should look after.
#[derive(Debug, Default)]
pub struct SweepSchedule {
    armed: Mutex<HashSet<ServerId>>,
}

impl SweepSchedule {
    /// Create a disarmed schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the sweep for `server_id`. Returns false if it was already armed.
    pub fn arm(&self, server_id: &ServerId) -> bool {
        let newly = self.armed.lock().insert(server_id.clone());
        if newly {
            tracing::debug!(server_id = %server_id, "Sweep armed");
        }
        newly
    }

    /// Disarm the sweep for `server_id`.
    pub fn disarm(&self, server_id: &ServerId) -> bool {
        let removed = self.armed.lock().remove(server_id);
        if removed {
            tracing::debug!(server_id = %server_id, "Sweep disarmed");
        }
        removed
    }

    /// Whether any server is armed.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        !self.armed.lock().is_empty()
    }

    /// Whether `server_id` is armed.
    #[must_use]
    pub fn is_armed_for(&self, server_id: &ServerId) -> bool {
        self.armed.lock().contains(server_id)
    }

    /// Arm every server the store reports as not stopped.
    ///
    /// Called once at process start so a restart does not orphan running
    /// servers.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn rearm_from_store<S: Store + ?Sized>(&self, store: &S) -> lodestone_store::Result<usize> {
        let active = store.list_active_infos()?;
        let mut armed = self.armed.lock();
        let before = armed.len();
        armed.extend(active.into_iter().map(|info| info.server_id));
        Ok(armed.len() - before)
    }
}
