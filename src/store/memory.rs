use super::{StateStore, StoreError};
use crate::shared::now_millis;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryInner {
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    lists: BTreeMap<String, Vec<String>>,
    locks: BTreeMap<String, LockEntry>,
}

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    expires_at: i64,
}

/// In-process store backend. Backs the test suite and local development
/// where no redis instance is available.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStore {
    fn hash_put(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hash_put_all(
        &self,
        key: &str,
        entries: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in entries {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        if let Some(hash) = inner.hashes.get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let inner = self.lock_inner();
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.lock_inner();
        Ok(inner.lists.get(key).cloned().unwrap_or_default())
    }

    fn list_trim_to_last(&self, key: &str, max_len: usize) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        if let Some(list) = inner.lists.get_mut(key) {
            let len = list.len();
            if len > max_len {
                list.drain(0..len - max_len);
            }
        }
        Ok(())
    }

    fn list_rewrite(&self, key: &str, values: &[String]) -> Result<(), StoreError> {
        let mut inner = self.lock_inner();
        inner.lists.insert(key.to_string(), values.to_vec());
        Ok(())
    }

    fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = now_millis();
        let mut inner = self.lock_inner();
        let held = inner
            .locks
            .get(key)
            .map(|entry| entry.expires_at > now)
            .unwrap_or(false);
        if held {
            return Ok(false);
        }
        inner.locks.insert(
            key.to_string(),
            LockEntry {
                token: token.to_string(),
                expires_at: now + ttl.as_millis() as i64,
            },
        );
        Ok(true)
    }

    fn release_lock(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock_inner();
        let matches = inner
            .locks
            .get(key)
            .map(|entry| entry.token == token)
            .unwrap_or(false);
        if matches {
            inner.locks.remove(key);
        }
        Ok(matches)
    }
}
