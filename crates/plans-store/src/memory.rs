//! In-memory backend.
//!
//! The default store of the engine and of the test suites. Contents are lost when the
//! store is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::kv::{conflict, Backend, BatchEntry, KvStore};
use crate::schema::all_column_families;

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// Ordered maps, one per column family.
#[derive(Debug)]
pub struct MemoryBackend {
    tables: RwLock<HashMap<&'static str, Table>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        let tables = all_column_families()
            .into_iter()
            .map(|name| (name, Table::new()))
            .collect();
        Self {
            tables: RwLock::new(tables),
        }
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Database("memory backend lock poisoned".into())
}

fn unknown_cf(name: &str) -> StoreError {
    StoreError::Database(format!("column family not found: {name}"))
}

impl Backend for MemoryBackend {
    fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tables = self.tables.read().map_err(poisoned)?;
        let table = tables.get(cf).ok_or_else(|| unknown_cf(cf))?;
        Ok(table.get(key).cloned())
    }

    fn scan_prefix(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let tables = self.tables.read().map_err(poisoned)?;
        let table = tables.get(cf).ok_or_else(|| unknown_cf(cf))?;
        Ok(table
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn write_batch(&self, batch: Vec<BatchEntry>) -> Result<()> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        apply(&mut tables, batch)
    }

    fn write_batch_checked(&self, expected: Vec<BatchEntry>, batch: Vec<BatchEntry>) -> Result<()> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        for (cf, key, value) in &expected {
            let table = tables.get(cf).ok_or_else(|| unknown_cf(cf))?;
            if table.get(key) != value.as_ref() {
                return Err(conflict(key));
            }
        }
        apply(&mut tables, batch)
    }
}

fn apply(tables: &mut HashMap<&'static str, Table>, batch: Vec<BatchEntry>) -> Result<()> {
    if let Some((cf, _, _)) = batch.iter().find(|(cf, _, _)| !tables.contains_key(cf)) {
        return Err(unknown_cf(cf));
    }
    for (cf, key, value) in batch {
        let table = tables.get_mut(cf).ok_or_else(|| unknown_cf(cf))?;
        match value {
            Some(value) => table.insert(key, value),
            None => table.remove(&key),
        };
    }
    Ok(())
}

/// A store kept entirely in memory.
pub type MemoryStore = KvStore<MemoryBackend>;

impl MemoryStore {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_backend(MemoryBackend::default())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::cf;

    #[test]
    fn prefix_scan_is_ordered_and_bounded() {
        let backend = MemoryBackend::default();
        backend
            .write_batch(vec![
                (cf::COUNTERS, b"b2".to_vec(), Some(vec![2])),
                (cf::COUNTERS, b"a1".to_vec(), Some(vec![1])),
                (cf::COUNTERS, b"b1".to_vec(), Some(vec![3])),
                (cf::COUNTERS, b"c1".to_vec(), Some(vec![4])),
            ])
            .unwrap();

        let keys: Vec<_> = backend
            .scan_prefix(cf::COUNTERS, b"b")
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![b"b1".to_vec(), b"b2".to_vec()]);
    }

    #[test]
    fn batch_with_unknown_family_writes_nothing() {
        let backend = MemoryBackend::default();
        let result = backend.write_batch(vec![
            (cf::COUNTERS, b"a".to_vec(), Some(vec![1])),
            ("nope", b"a".to_vec(), Some(vec![1])),
        ]);
        assert!(result.is_err());
        assert_eq!(backend.get(cf::COUNTERS, b"a").unwrap(), None);
    }
}
