pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to connect to store at {url}: {message}")]
    Connect { url: String, message: String },
    #[error("store command failed: {0}")]
    Command(String),
}

/// Shared key-value persistence consumed by the state manager and the
/// resource locker. Implementations must be safe to call from multiple
/// worker threads.
pub trait StateStore: Send + Sync {
    fn hash_put(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    fn hash_put_all(
        &self,
        key: &str,
        entries: &BTreeMap<String, String>,
    ) -> Result<(), StoreError>;
    fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError>;
    fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError>;

    fn list_push(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;
    fn list_trim_to_last(&self, key: &str, max_len: usize) -> Result<(), StoreError>;
    fn list_rewrite(&self, key: &str, values: &[String]) -> Result<(), StoreError>;

    /// Set-if-not-exists with expiry. Returns true when the lock was taken.
    fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, StoreError>;
    /// Deletes the lock only while the stored token still matches.
    fn release_lock(&self, key: &str, token: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn container_states(&self) -> String {
        format!("{}:container_states", self.prefix)
    }

    pub fn active_operations(&self) -> String {
        format!("{}:active_operations", self.prefix)
    }

    pub fn operation_history(&self) -> String {
        format!("{}:operation_history", self.prefix)
    }

    pub fn container_lock(&self, container_id: &str) -> String {
        format!("{}:lock:{container_id}", self.prefix)
    }
}
