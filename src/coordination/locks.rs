use crate::config::LockSettings;
use crate::shared::new_lock_token;
use crate::store::{StateStore, StoreError, StoreKeys};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A held per-container advisory lock. Dropping the value does not release
/// the lock; the TTL covers crashes and the locker covers the normal path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLock {
    key: String,
    token: String,
}

impl ContainerLock {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Store-backed mutual exclusion for operations on one container. Locks are
/// advisory: only the coordinator consults them, and expiry via TTL is the
/// recovery path when a holder dies mid-operation.
pub struct ResourceLocker {
    store: Arc<dyn StateStore>,
    keys: StoreKeys,
    owner: String,
    ttl: Duration,
}

impl ResourceLocker {
    pub fn new(store: Arc<dyn StateStore>, keys: StoreKeys, settings: &LockSettings) -> Self {
        Self {
            store,
            keys,
            owner: settings.owner.clone(),
            ttl: Duration::from_secs(settings.ttl_secs),
        }
    }

    /// Returns `None` when another holder already owns the lock.
    pub fn acquire(&self, container_id: &str) -> Result<Option<ContainerLock>, StoreError> {
        let key = self.keys.container_lock(container_id);
        let token = new_lock_token(&self.owner);
        if self.store.acquire_lock(&key, &token, self.ttl)? {
            debug!(container = %container_id, "acquired container lock");
            Ok(Some(ContainerLock { key, token }))
        } else {
            debug!(container = %container_id, "container lock held elsewhere");
            Ok(None)
        }
    }

    /// Returns false when the lock had already expired or been re-acquired
    /// by another holder.
    pub fn release(&self, lock: &ContainerLock) -> Result<bool, StoreError> {
        self.store.release_lock(&lock.key, &lock.token)
    }
}
