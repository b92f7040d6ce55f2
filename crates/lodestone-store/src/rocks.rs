//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use lodestone_core::ServerId;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, records_cf, state_index_cf};
use crate::types::{InfoRecord, LifecycleState, Page, Precondition, RecordKey, ServerRecord};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    records_cf: String,
    state_cf: String,
    /// Serializes read-check-write sequences so conditional puts are atomic.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path, holding the
    /// logical table `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P, table: &str) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families(table)
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        tracing::debug!(table, "Opened record store");

        Ok(Self {
            db: Arc::new(db),
            records_cf: records_cf(table),
            state_cf: state_index_cf(table),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn read(&self, key: &RecordKey) -> Result<Option<ServerRecord>> {
        let cf = self.cf(&self.records_cf)?;
        self.db
            .get_cf(&cf, keys::record_key(key))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Queue the deletion of `key` (and its state index entry) into `batch`.
    fn stage_delete(&self, batch: &mut WriteBatch, key: &RecordKey) -> Result<bool> {
        let Some(existing) = self.read(key)? else {
            return Ok(false);
        };
        let cf_records = self.cf(&self.records_cf)?;
        batch.delete_cf(&cf_records, keys::record_key(key));
        if let ServerRecord::Info(info) = existing {
            let cf_state = self.cf(&self.state_cf)?;
            batch.delete_cf(
                &cf_state,
                keys::state_index_key(info.state.as_u8(), &info.server_id),
            );
        }
        Ok(true)
    }
}

/// Check `precondition` against what is stored at `key`.
fn check_precondition(
    key: &RecordKey,
    existing: Option<&ServerRecord>,
    precondition: Precondition,
) -> Result<()> {
    let conflict = |reason: String| StoreError::Conflict {
        key: key.to_string(),
        reason,
    };
    match (precondition, existing) {
        (Precondition::None | Precondition::ParentExists, _) | (Precondition::Absent, None) => {
            Ok(())
        }
        (Precondition::Absent, Some(_)) => Err(conflict("record already exists".into())),
        (Precondition::Prior { state, revision }, Some(ServerRecord::Info(info))) => {
            if info.state == state && info.revision == revision {
                Ok(())
            } else {
                Err(conflict(format!(
                    "expected {state:?}@{revision}, found {:?}@{}",
                    info.state, info.revision
                )))
            }
        }
        (Precondition::Prior { .. }, Some(ServerRecord::WhitelistEntry(_))) => {
            Err(conflict("not an info record".into()))
        }
        (Precondition::Prior { .. }, None) => Err(conflict("record does not exist".into())),
    }
}

impl Store for RocksStore {
    fn get(&self, key: &RecordKey) -> Result<Option<ServerRecord>> {
        self.read(key)
    }

    fn put(&self, record: &ServerRecord, precondition: Precondition) -> Result<u64> {
        let key = record.key();
        let _guard = self.write_lock.lock();

        let existing = self.read(&key)?;
        check_precondition(&key, existing.as_ref(), precondition)?;
        if precondition == Precondition::ParentExists {
            let parent = RecordKey::info(record.server_id().clone());
            if self.read(&parent)?.is_none() {
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                    reason: "parent info record does not exist".into(),
                });
            }
        }

        let cf_records = self.cf(&self.records_cf)?;
        let mut batch = WriteBatch::default();

        let revision = match record {
            ServerRecord::Info(info) => {
                let old = match existing {
                    Some(ServerRecord::Info(old)) => Some(old),
                    _ => None,
                };
                let revision = old.as_ref().map_or(1, |o| o.revision + 1);
                let stored = ServerRecord::Info(InfoRecord {
                    revision,
                    ..info.clone()
                });

                let cf_state = self.cf(&self.state_cf)?;
                if let Some(old) = old.filter(|o| o.state != info.state) {
                    batch.delete_cf(
                        &cf_state,
                        keys::state_index_key(old.state.as_u8(), &old.server_id),
                    );
                }
                batch.put_cf(
                    &cf_state,
                    keys::state_index_key(info.state.as_u8(), &info.server_id),
                    [],
                );
                batch.put_cf(&cf_records, keys::record_key(&key), Self::serialize(&stored)?);
                revision
            }
            ServerRecord::WhitelistEntry(_) => {
                batch.put_cf(&cf_records, keys::record_key(&key), Self::serialize(record)?);
                0
            }
        };

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(revision)
    }

    fn delete(&self, key: &RecordKey) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        let existed = self.stage_delete(&mut batch, key)?;
        if existed {
            self.db
                .write(batch)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(existed)
    }

    fn scan_page(
        &self,
        server_id: &ServerId,
        start_after: Option<&RecordKey>,
        limit: usize,
    ) -> Result<Page> {
        let cf = self.cf(&self.records_cf)?;
        let prefix = keys::server_prefix(server_id);
        let start = start_after.map_or_else(|| prefix.clone(), keys::record_key);

        let mut page = Page::default();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start, Direction::Forward));

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(&prefix) {
                break;
            }
            if start_after.is_some() && *key == *start {
                continue;
            }

            page.records.push(Self::deserialize(&value)?);
            if page.records.len() >= limit {
                page.next = Some(keys::decode_record_key(&key)?);
                break;
            }
        }

        Ok(page)
    }

    fn list_infos_by_state(&self, state: LifecycleState) -> Result<Vec<InfoRecord>> {
        let cf_state = self.cf(&self.state_cf)?;
        let prefix = keys::state_prefix(state.as_u8());

        let mut infos = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf_state, IteratorMode::From(&prefix, Direction::Forward));

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            let server_id = keys::extract_server_id_from_state_key(&key)?;
            if let Some(info) = self.get_info(&server_id)? {
                infos.push(info);
            }
        }

        Ok(infos)
    }

    fn write_delete_batch(&self, batch_keys: &[RecordKey]) -> Result<Vec<RecordKey>> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        for key in batch_keys {
            self.stage_delete(&mut batch, key)?;
        }
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WhitelistEntry;
    use chrono::Utc;
    use lodestone_core::{PlayerName, TaskHandle};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path(), "server-config").unwrap();
        (store, dir)
    }

    fn sid(s: &str) -> ServerId {
        ServerId::parse(s).unwrap()
    }

    fn whitelist(server: &str, name: &str) -> ServerRecord {
        ServerRecord::WhitelistEntry(WhitelistEntry {
            server_id: sid(server),
            player_name: PlayerName::parse(name).unwrap(),
            account_key: name.to_lowercase(),
            added_at: Utc::now(),
        })
    }

    #[test]
    fn info_crud() {
        let (store, _dir) = create_test_store();
        let info = InfoRecord::new(sid("s1"));

        let stored = store.put_info(&info, Precondition::Absent).unwrap();
        assert_eq!(stored.revision, 1);

        let fetched = store.get_info(&sid("s1")).unwrap().unwrap();
        assert_eq!(fetched, stored);

        assert!(store.delete(&info.key()).unwrap());
        assert!(store.get_info(&sid("s1")).unwrap().is_none());
        assert!(!store.delete(&info.key()).unwrap());
    }

    #[test]
    fn absent_precondition_rejects_existing() {
        let (store, _dir) = create_test_store();
        let info = InfoRecord::new(sid("s1"));
        store.put_info(&info, Precondition::Absent).unwrap();

        let err = store.put_info(&info, Precondition::Absent).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn prior_precondition_is_compare_and_set() {
        let (store, _dir) = create_test_store();
        let stopped = store
            .put_info(&InfoRecord::new(sid("s1")), Precondition::Absent)
            .unwrap();

        let starting = stopped.with_state(LifecycleState::Starting);
        let claimed = store
            .put_info(&starting, Precondition::observed(&stopped))
            .unwrap();
        assert_eq!(claimed.revision, 2);

        // A second writer holding the same stale observation loses.
        let err = store
            .put_info(&starting, Precondition::observed(&stopped))
            .unwrap_err();
        assert!(err.is_conflict());

        // Same state but newer revision still conflicts with the old token.
        let mut with_handle = claimed.clone();
        with_handle.task_handle = Some(TaskHandle::new("h1"));
        store
            .put_info(&with_handle, Precondition::observed(&claimed))
            .unwrap();
        let err = store
            .put_info(&claimed, Precondition::observed(&claimed))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn prior_precondition_requires_existing_record() {
        let (store, _dir) = create_test_store();
        let info = InfoRecord::new(sid("missing"));
        let err = store
            .put_info(&info, Precondition::observed(&info))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn parent_exists_rejects_orphan_entries() {
        let (store, _dir) = create_test_store();
        let entry = whitelist("s1", "Steve");

        let err = store.put(&entry, Precondition::ParentExists).unwrap_err();
        assert!(err.is_conflict());
        assert!(store.get(&entry.key()).unwrap().is_none());

        store
            .put_info(&InfoRecord::new(sid("s1")), Precondition::Absent)
            .unwrap();
        store.put(&entry, Precondition::ParentExists).unwrap();
        assert_eq!(store.get(&entry.key()).unwrap(), Some(entry.clone()));

        store.delete(&RecordKey::info(sid("s1"))).unwrap();
        let err = store
            .put(&whitelist("s1", "Alex"), Precondition::ParentExists)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn state_index_updated_on_change() {
        let (store, _dir) = create_test_store();
        let a = store
            .put_info(&InfoRecord::new(sid("a")), Precondition::Absent)
            .unwrap();
        store
            .put_info(&InfoRecord::new(sid("b")), Precondition::Absent)
            .unwrap();

        assert_eq!(
            store
                .list_infos_by_state(LifecycleState::Stopped)
                .unwrap()
                .len(),
            2
        );

        store
            .put_info(&a.with_state(LifecycleState::Live), Precondition::None)
            .unwrap();

        let live = store.list_infos_by_state(LifecycleState::Live).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].server_id, sid("a"));
        assert_eq!(
            store
                .list_infos_by_state(LifecycleState::Stopped)
                .unwrap()
                .len(),
            1
        );
        assert_eq!(store.list_active_infos().unwrap().len(), 1);
    }

    #[test]
    fn deleting_info_clears_state_index() {
        let (store, _dir) = create_test_store();
        let info = store
            .put_info(&InfoRecord::new(sid("s1")), Precondition::Absent)
            .unwrap();
        store.delete(&info.key()).unwrap();
        assert!(store
            .list_infos_by_state(LifecycleState::Stopped)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn scan_page_is_scoped_to_server() {
        let (store, _dir) = create_test_store();
        store
            .put_info(&InfoRecord::new(sid("s1")), Precondition::Absent)
            .unwrap();
        store.put(&whitelist("s1", "Alice"), Precondition::None).unwrap();
        store.put(&whitelist("s10", "Mallory"), Precondition::None).unwrap();

        let page = store.scan_page(&sid("s1"), None, 10).unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.next.is_none());
        assert!(page.records.iter().all(|r| r.server_id() == &sid("s1")));
    }

    #[test]
    fn scan_page_resumes_after_token() {
        let (store, _dir) = create_test_store();
        for name in ["A", "B", "C"] {
            store.put(&whitelist("s1", name), Precondition::None).unwrap();
        }

        let first = store.scan_page(&sid("s1"), None, 2).unwrap();
        assert_eq!(first.records.len(), 2);
        let token = first.next.unwrap();

        let second = store.scan_page(&sid("s1"), Some(&token), 2).unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(second.next.is_none());
        assert_ne!(second.records[0].key(), token);
    }

    #[test]
    fn write_delete_batch_ignores_missing_keys() {
        let (store, _dir) = create_test_store();
        store.put(&whitelist("s1", "Alice"), Precondition::None).unwrap();
        let keys = vec![
            whitelist("s1", "Alice").key(),
            whitelist("s1", "Ghost").key(),
        ];
        assert!(store.write_delete_batch(&keys).unwrap().is_empty());
        assert_eq!(store.scan_page(&sid("s1"), None, 10).unwrap().records.len(), 0);
    }
}
