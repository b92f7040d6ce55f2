//! Config record lifecycle: what happens to a server's records when the
//! server is provisioned or deprovisioned.

use std::sync::Arc;
use std::time::Duration;

use lodestone_core::ServerId;
use lodestone_store::{InfoRecord, Precondition, RecordKey, Store};
use tracing::{info, warn};

use crate::error::{ControlError, Result};
use crate::lifecycle;
use crate::types::ControlConfig;

/// Outcome of creating a server's info record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// A fresh `Stopped` record was written.
    Created,
    /// A record already existed and was left untouched.
    Existed,
}

/// Creates and tears down the records of provisioned servers.
pub struct ConfigRecordManager<S: Store> {
    store: Arc<S>,
    batch_size: usize,
    attempts: u32,
    backoff: Duration,
    passes: u32,
}

impl<S: Store> Clone for ConfigRecordManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            batch_size: self.batch_size,
            attempts: self.attempts,
            backoff: self.backoff,
            passes: self.passes,
        }
    }
}

impl<S: Store> ConfigRecordManager<S> {
    /// Create a manager using the batching settings of `config`.
    #[must_use]
    pub fn new(store: Arc<S>, config: &ControlConfig) -> Self {
        Self {
            store,
            batch_size: config.delete_batch_size,
            attempts: config.delete_attempts.max(1),
            backoff: config.delete_retry_backoff,
            passes: config.teardown_passes.max(1),
        }
    }

    /// Write a `Stopped` info record unless one exists.
    ///
    /// Re-provisioning an existing server never resets its state.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn ensure_info(&self, server_id: &ServerId) -> Result<EnsureOutcome> {
        match self
            .store
            .put_info(&InfoRecord::new(server_id.clone()), Precondition::Absent)
        {
            Ok(_) => {
                info!(server_id = %server_id, "Created info record");
                Ok(EnsureOutcome::Created)
            }
            Err(e) if e.is_conflict() => {
                info!(server_id = %server_id, "Info record already exists");
                Ok(EnsureOutcome::Existed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every record of `server_id` and return how many were deleted.
    ///
    /// Each pass scans the whole partition and deletes what it found in
    /// batches. Keys a batch leaves unprocessed are retried with a growing
    /// delay; a pass that still cannot delete them fails the teardown. Passes
    /// repeat until a scan comes back empty, so records written while the
    /// teardown runs are caught too.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::IncompleteCleanup` if records remain.
    pub async fn teardown(&self, server_id: &ServerId) -> Result<usize> {
        if let Some(info) = self.store.get_info(server_id)? {
            if lifecycle::is_active(info.state) {
                warn!(
                    server_id = %server_id,
                    state = ?info.state,
                    "Deleting records of a server that may still be running"
                );
            }
        }

        let mut deleted = 0;
        for pass in 1..=self.passes {
            let keys = self.scan_keys(server_id)?;
            info!(server_id = %server_id, pass, "Got {} records", keys.len());
            if keys.is_empty() {
                return Ok(deleted);
            }
            deleted += self.delete_with_retries(server_id, keys, deleted).await?;
        }

        let remaining = self.scan_keys(server_id)?.len();
        if remaining == 0 {
            Ok(deleted)
        } else {
            Err(ControlError::IncompleteCleanup {
                server_id: server_id.clone(),
                deleted,
                remaining,
            })
        }
    }

    fn scan_keys(&self, server_id: &ServerId) -> Result<Vec<RecordKey>> {
        self.store
            .scan_all(server_id)
            .map(|record| record.map(|r| r.key()))
            .collect::<lodestone_store::Result<_>>()
            .map_err(Into::into)
    }

    async fn delete_with_retries(
        &self,
        server_id: &ServerId,
        keys: Vec<RecordKey>,
        deleted_before: usize,
    ) -> Result<usize> {
        let mut pending = keys;
        let mut deleted = 0;
        let mut round = 0;

        loop {
            let report = self
                .store
                .delete_chunked(&pending, self.batch_size, self.attempts);
            deleted += report.deleted;
            info!(
                server_id = %server_id,
                batches = report.batches,
                "Deleted {} records",
                report.deleted
            );
            if report.is_complete() {
                return Ok(deleted);
            }

            round += 1;
            if round >= self.attempts {
                warn!(
                    server_id = %server_id,
                    remaining = report.failed.len(),
                    "Giving up on unprocessed records"
                );
                return Err(ControlError::IncompleteCleanup {
                    server_id: server_id.clone(),
                    deleted: deleted_before + deleted,
                    remaining: report.failed.len(),
                });
            }

            warn!(
                server_id = %server_id,
                round,
                remaining = report.failed.len(),
                "Retrying unprocessed records"
            );
            tokio::time::sleep(self.backoff * round).await;
            pending = report.failed;
        }
    }
}
