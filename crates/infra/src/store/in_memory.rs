use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use inflow_core::ExpectedVersion;

use super::{Record, RecordStore, StoreError, UniqueKey};

#[derive(Debug)]
struct Row<R> {
    seq: u64,
    record: R,
}

#[derive(Debug)]
struct Inner<R> {
    rows: HashMap<String, Row<R>>,
    unique: HashMap<(&'static str, String), String>,
    next_seq: u64,
}

impl<R> Default for Inner<R> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            unique: HashMap::new(),
            next_seq: 0,
        }
    }
}

/// In-memory record store.
///
/// Intended for tests/dev. Snapshots are cloned in and out.
#[derive(Debug)]
pub struct InMemoryRecordStore<R> {
    inner: RwLock<Inner<R>>,
}

impl<R> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl<R> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self::default()
    }
}

fn index_key(key: &UniqueKey) -> (&'static str, String) {
    (key.name, key.value.clone())
}

#[async_trait]
impl<R: Record> RecordStore<R> for InMemoryRecordStore<R> {
    async fn load(&self, id: &R::Id) -> Result<Option<R>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner.rows.get(&R::key(id)).map(|row| row.record.clone()))
    }

    async fn insert(&self, record: &R) -> Result<(), StoreError> {
        let key = record.record_key();
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        if inner.rows.contains_key(&key) {
            return Err(StoreError::Conflict(format!("{} {key} already exists", R::KIND)));
        }
        let unique_keys = record.unique_keys();
        if let Some(taken) = unique_keys
            .iter()
            .find(|k| inner.unique.contains_key(&index_key(k)))
        {
            return Err(StoreError::Conflict(format!(
                "{} with {} {} already exists",
                R::KIND,
                taken.name,
                taken.value
            )));
        }

        for unique in &unique_keys {
            inner.unique.insert(index_key(unique), key.clone());
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.rows.insert(
            key,
            Row {
                seq,
                record: record.clone(),
            },
        );
        Ok(())
    }

    async fn save(&self, record: &R, expected: ExpectedVersion) -> Result<(), StoreError> {
        let key = record.record_key();
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;

        let current = inner.rows.get(&key).ok_or(StoreError::NotFound)?;
        let stored_version = current.record.version();
        if !expected.matches(stored_version) {
            return Err(StoreError::Conflict(format!(
                "{} {key}: expected {expected:?}, found {stored_version}",
                R::KIND
            )));
        }

        let old_keys = current.record.unique_keys();
        let new_keys = record.unique_keys();
        if let Some(taken) = new_keys.iter().find(|k| {
            inner
                .unique
                .get(&index_key(k))
                .is_some_and(|owner| owner != &key)
        }) {
            return Err(StoreError::Conflict(format!(
                "{} with {} {} already exists",
                R::KIND,
                taken.name,
                taken.value
            )));
        }
        for old in &old_keys {
            inner.unique.remove(&index_key(old));
        }
        for new in &new_keys {
            inner.unique.insert(index_key(new), key.clone());
        }

        if let Some(row) = inner.rows.get_mut(&key) {
            row.record = record.clone();
        }
        Ok(())
    }

    async fn delete(&self, id: &R::Id) -> Result<(), StoreError> {
        let key = R::key(id);
        let mut inner = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        let row = inner.rows.remove(&key).ok_or(StoreError::NotFound)?;
        for unique in row.record.unique_keys() {
            inner.unique.remove(&index_key(&unique));
        }
        Ok(())
    }

    async fn find_by_key(&self, name: &'static str, value: &str) -> Result<Option<R>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(inner
            .unique
            .get(&(name, value.to_string()))
            .and_then(|key| inner.rows.get(key))
            .map(|row| row.record.clone()))
    }

    async fn list(&self) -> Result<Vec<R>, StoreError> {
        let inner = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let mut rows: Vec<&Row<R>> = inner.rows.values().collect();
        rows.sort_by_key(|row| row.seq);
        Ok(rows.into_iter().map(|row| row.record.clone()).collect())
    }
}
