//! `RocksDB` record store for lodestone.
//!
//! This crate persists per-server configuration records in a single logical
//! table keyed by `(serverId, recordType)`. Every server has one `info`
//! record holding its lifecycle state plus any number of whitelist entries.
//!
//! # Architecture
//!
//! A table named `T` uses two column families:
//!
//! - `T`: Primary records, keyed by `server_id || 0x00 || record_type`
//! - `T.info_by_state`: Index for listing info records by lifecycle state
//!
//! Writes to info records may carry a [`Precondition`]; a write whose
//! precondition no longer holds fails with [`StoreError::Conflict`] and
//! changes nothing.
//!
//! # Example
//!
//! ```no_run
//! use lodestone_core::ServerId;
//! use lodestone_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/tmp/lodestone-db", "server-config").unwrap();
//!
//! let server_id = ServerId::parse("vanilla").unwrap();
//! for record in store.scan_all(&server_id) {
//!     println!("{:?}", record.unwrap().key());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

use std::collections::VecDeque;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    BatchDeleteReport, InfoRecord, LifecycleState, Page, Precondition, RecordKey, RecordType,
    ServerRecord, WhitelistEntry,
};

use lodestone_core::ServerId;

/// Largest number of keys sent in one delete batch.
pub const MAX_BATCH_SIZE: usize = 25;

/// Page size used by [`Store::scan_all`].
pub const DEFAULT_SCAN_PAGE_SIZE: usize = 100;

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    /// Get a record by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get(&self, key: &RecordKey) -> Result<Option<ServerRecord>>;

    /// Write a record if `precondition` holds against the stored version.
    ///
    /// Returns the revision now stored. Info records get the stored revision
    /// plus one; whitelist entries always report zero.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the precondition does not hold.
    fn put(&self, record: &ServerRecord, precondition: Precondition) -> Result<u64>;

    /// Delete a record. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn delete(&self, key: &RecordKey) -> Result<bool>;

    /// Read up to `limit` records of a server, strictly after `start_after`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn scan_page(
        &self,
        server_id: &ServerId,
        start_after: Option<&RecordKey>,
        limit: usize,
    ) -> Result<Page>;

    /// List every info record currently in `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_infos_by_state(&self, state: LifecycleState) -> Result<Vec<InfoRecord>>;

    /// Delete one batch of at most [`MAX_BATCH_SIZE`] keys.
    ///
    /// Returns the keys that were not processed and must be retried.
    ///
    /// # Errors
    ///
    /// Returns an error if the whole batch failed.
    fn write_delete_batch(&self, keys: &[RecordKey]) -> Result<Vec<RecordKey>>;

    /// Get the info record of a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_info(&self, server_id: &ServerId) -> Result<Option<InfoRecord>> {
        match self.get(&RecordKey::info(server_id.clone()))? {
            Some(ServerRecord::Info(info)) => Ok(Some(info)),
            Some(ServerRecord::WhitelistEntry(_)) => Err(StoreError::Serialization(format!(
                "record at {server_id}/info is not an info record"
            ))),
            None => Ok(None),
        }
    }

    /// Write an info record and return it with its new revision.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the precondition does not hold.
    fn put_info(&self, info: &InfoRecord, precondition: Precondition) -> Result<InfoRecord> {
        let revision = self.put(&ServerRecord::Info(info.clone()), precondition)?;
        Ok(InfoRecord {
            revision,
            ..info.clone()
        })
    }

    /// List info records that are not `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_active_infos(&self) -> Result<Vec<InfoRecord>> {
        let mut infos = Vec::new();
        for state in [
            LifecycleState::Starting,
            LifecycleState::Live,
            LifecycleState::Stopping,
        ] {
            infos.extend(self.list_infos_by_state(state)?);
        }
        Ok(infos)
    }

    /// Iterate over every record of a server, following continuation
    /// tokens until the partition is exhausted.
    fn scan_all(&self, server_id: &ServerId) -> Scan<'_, Self>
    where
        Self: Sized,
    {
        Scan::new(self, server_id.clone(), DEFAULT_SCAN_PAGE_SIZE)
    }

    /// Delete `keys` in batches of at most `batch_size` (capped at
    /// [`MAX_BATCH_SIZE`]), retrying unprocessed keys up to `max_attempts`
    /// times per batch.
    fn delete_chunked(
        &self,
        keys: &[RecordKey],
        batch_size: usize,
        max_attempts: u32,
    ) -> BatchDeleteReport {
        let batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        let mut report = BatchDeleteReport::default();

        for chunk in keys.chunks(batch_size) {
            let mut pending = chunk.to_vec();
            let mut attempt = 0;
            while !pending.is_empty() && attempt < max_attempts.max(1) {
                attempt += 1;
                report.batches += 1;
                let sent = pending.len();
                pending = match self.write_delete_batch(&pending) {
                    Ok(unprocessed) => unprocessed,
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "Delete batch failed");
                        pending
                    }
                };
                let deleted = sent - pending.len();
                report.deleted += deleted;
                tracing::info!(batch = report.batches, attempt, "Deleted {deleted} records");
            }
            report.failed.extend(pending);
        }

        report
    }
}

/// Lazy iterator over a server's records. Created by [`Store::scan_all`].
pub struct Scan<'a, S: Store + ?Sized> {
    store: &'a S,
    server_id: ServerId,
    page_size: usize,
    cursor: Option<RecordKey>,
    buffer: VecDeque<ServerRecord>,
    pages: usize,
    done: bool,
}

impl<'a, S: Store + ?Sized> Scan<'a, S> {
    /// Start a scan of `server_id` reading `page_size` records per request.
    pub fn new(store: &'a S, server_id: ServerId, page_size: usize) -> Self {
        Self {
            store,
            server_id,
            page_size: page_size.max(1),
            cursor: None,
            buffer: VecDeque::new(),
            pages: 0,
            done: false,
        }
    }

    /// Number of pages fetched so far.
    #[must_use]
    pub const fn pages(&self) -> usize {
        self.pages
    }
}

impl<S: Store + ?Sized> Iterator for Scan<'_, S> {
    type Item = Result<ServerRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }

            let page = match self
                .store
                .scan_page(&self.server_id, self.cursor.as_ref(), self.page_size)
            {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            self.pages += 1;
            self.done = page.next.is_none();
            self.cursor = page.next;
            self.buffer.extend(page.records);
        }
    }
}
