//! `RocksDB` backend.
//!
//! Enabled with the `rocksdb-backend` feature.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::kv::{Backend, BatchEntry, KvStore};
use crate::schema::all_column_families;

/// RocksDB-backed key-value storage.
pub struct RocksBackend {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksBackend {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }
}

impl Backend for RocksBackend {
    fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.cf(cf)?;
        self.db
            .get_cf(&handle, key)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn scan_prefix(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let handle = self.cf(cf)?;
        let iter = self
            .db
            .iterator_cf(&handle, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn write_batch(&self, entries: Vec<BatchEntry>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for (cf, key, value) in entries {
            let handle = self.cf(cf)?;
            match value {
                Some(value) => batch.put_cf(&handle, key, value),
                None => batch.delete_cf(&handle, key),
            }
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

/// A store persisted in `RocksDB`.
pub type RocksStore = KvStore<RocksBackend>;

impl RocksStore {
    /// Open or create a `RocksDB`-backed store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::with_backend(RocksBackend::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use plans_core::{Plan, PrincipalId, UserPlan};
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn committed_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let plan = Plan::new("Pro", "pro");
        let principal = PrincipalId::generate();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            let mut tx = store.begin().unwrap();
            tx.put_plan(&plan).unwrap();
            tx.put_user_plan(&UserPlan::new(principal, plan.id)).unwrap();
            assert_eq!(tx.next_sequence_value("seq", 5).unwrap(), 5);
            tx.commit().unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        let mut tx = store.begin().unwrap();
        assert_eq!(tx.get_plan(&plan.id).unwrap().unwrap().slug, "pro");
        assert_eq!(tx.get_user_plan(&principal).unwrap().unwrap().plan_id, plan.id);
        assert_eq!(tx.next_sequence_value("seq", 5).unwrap(), 6);
    }

    #[test]
    fn dropped_transaction_writes_nothing() {
        let (store, _dir) = create_test_store();
        let plan = Plan::new("Pro", "pro");
        {
            let mut tx = store.begin().unwrap();
            tx.put_plan(&plan).unwrap();
        }
        let tx = store.begin().unwrap();
        assert!(tx.get_plan(&plan.id).unwrap().is_none());
    }
}
