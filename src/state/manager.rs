use super::container::{ContainerState, ContainerStatus, HealthStatus};
use super::operation::{ContainerOperation, OperationStatus};
use super::patterns::ManagedPatterns;
use super::StateError;
use crate::config::Settings;
use crate::inspector::ContainerInspector;
use crate::shared::now_millis;
use crate::store::{StateStore, StoreKeys};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const OPERATION_HISTORY_LIMIT: usize = 1000;

const RESTART_INTERRUPTION_MESSAGE: &str =
    "coordinator restarted while operation was in progress";

#[derive(Debug, Default)]
struct ManagerInner {
    states: BTreeMap<String, ContainerState>,
    active: BTreeMap<String, ContainerOperation>,
    history: VecDeque<ContainerOperation>,
}

/// Point-in-time aggregate over the tracked container map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub starting: usize,
    pub no_health_check: usize,
    pub running: usize,
    pub stopped: usize,
    pub restarting: usize,
    pub stale: usize,
    pub active_operations: usize,
    pub last_updated: i64,
}

/// Authoritative view of managed container state and the single owner of
/// operation records. All mutation goes through the one mutex; the public
/// query surface reads the in-memory maps and never touches the store or
/// the container runtime.
pub struct ContainerStateManager {
    inspector: Arc<dyn ContainerInspector>,
    store: Arc<dyn StateStore>,
    keys: StoreKeys,
    patterns: ManagedPatterns,
    scan_interval_secs: u64,
    stale_scan_threshold: u32,
    history_retention_ms: i64,
    inner: Mutex<ManagerInner>,
}

impl ContainerStateManager {
    pub fn new(
        inspector: Arc<dyn ContainerInspector>,
        store: Arc<dyn StateStore>,
        settings: &Settings,
    ) -> Result<Self, StateError> {
        let patterns = ManagedPatterns::compile(
            &settings.managed_containers,
            &settings.excluded_containers,
        )?;
        Ok(Self {
            inspector,
            store,
            keys: StoreKeys::new(settings.store.key_prefix.clone()),
            patterns,
            scan_interval_secs: settings.state_update_interval_secs,
            stale_scan_threshold: settings.stale_scan_threshold,
            history_retention_ms: settings
                .operation_history_retention_secs
                .saturating_mul(1_000),
            inner: Mutex::new(ManagerInner::default()),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, ManagerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads persisted state, tolerating corrupt records individually, then
    /// performs one immediate full scan. Fails only when the store or the
    /// container runtime is unreachable outright.
    pub fn initialize(&self) -> Result<(), StateError> {
        let now = now_millis();
        let persisted_states = self.store.hash_get_all(&self.keys.container_states())?;
        let persisted_ops = self.store.hash_get_all(&self.keys.active_operations())?;
        let persisted_history = self.store.list_range(&self.keys.operation_history())?;

        let mut terminal_moves = Vec::new();
        {
            let mut inner = self.lock_inner();
            for (container_id, raw) in persisted_states {
                match serde_json::from_str::<ContainerState>(&raw) {
                    Ok(state) => {
                        inner.states.insert(container_id, state);
                    }
                    Err(err) => {
                        warn!(container = %container_id, error = %err,
                              "skipping corrupt container state record");
                    }
                }
            }

            for raw in persisted_history {
                match serde_json::from_str::<ContainerOperation>(&raw) {
                    Ok(op) => inner.history.push_back(op),
                    Err(err) => {
                        warn!(error = %err, "skipping corrupt history record");
                    }
                }
            }

            for (operation_id, raw) in persisted_ops {
                match serde_json::from_str::<ContainerOperation>(&raw) {
                    Ok(mut op) => match op.status {
                        OperationStatus::Pending => {
                            inner.active.insert(operation_id, op);
                        }
                        OperationStatus::InProgress => {
                            // The thread executing this died with the process;
                            // nothing re-verifies the action, so the record is
                            // failed rather than left ambiguous.
                            op.mark_finished(
                                OperationStatus::Failed,
                                Some(RESTART_INTERRUPTION_MESSAGE.to_string()),
                                now,
                            );
                            warn!(operation = %operation_id,
                                  "in-progress operation interrupted by restart; marked failed");
                            inner.history.push_back(op.clone());
                            terminal_moves.push(op);
                        }
                        _ => {
                            // A terminal record stranded in the active hash:
                            // finish its move into the history list.
                            inner.history.push_back(op.clone());
                            terminal_moves.push(op);
                        }
                    },
                    Err(err) => {
                        warn!(operation = %operation_id, error = %err,
                              "skipping corrupt operation record");
                    }
                }
            }
            while inner.history.len() > OPERATION_HISTORY_LIMIT {
                inner.history.pop_front();
            }

            info!(
                containers = inner.states.len(),
                active_operations = inner.active.len(),
                history = inner.history.len(),
                "loaded persisted coordination state"
            );
        }

        for op in terminal_moves {
            self.persist_terminal_move(&op);
        }

        self.scan_once()?;
        Ok(())
    }

    pub fn is_container_managed(&self, name: &str) -> bool {
        self.patterns.matches(name)
    }

    pub fn container_state(&self, container_id: &str) -> Option<ContainerState> {
        self.lock_inner().states.get(container_id).cloned()
    }

    /// Names are not unique across recreations; the freshest entry wins,
    /// with creation time breaking same-scan ties.
    pub fn container_by_name(&self, name: &str) -> Option<ContainerState> {
        self.lock_inner()
            .states
            .values()
            .filter(|state| state.name == name)
            .max_by_key(|state| (state.last_updated, state.created_at))
            .cloned()
    }

    pub fn managed_containers(&self) -> Vec<ContainerState> {
        self.lock_inner().states.values().cloned().collect()
    }

    pub fn container_operations(&self, container_id: &str) -> Vec<ContainerOperation> {
        let inner = self.lock_inner();
        let mut ops: Vec<ContainerOperation> = inner
            .active
            .values()
            .filter(|op| op.container_id == container_id)
            .cloned()
            .collect();
        ops.sort_by_key(|op| op.requested_at);
        ops
    }

    pub fn active_operations(&self) -> Vec<ContainerOperation> {
        let inner = self.lock_inner();
        let mut ops: Vec<ContainerOperation> = inner.active.values().cloned().collect();
        ops.sort_by_key(|op| (op.priority, op.requested_at));
        ops
    }

    pub fn operation_history(&self) -> Vec<ContainerOperation> {
        self.lock_inner().history.iter().cloned().collect()
    }

    /// Inserts a pending operation and persists it immediately. Conflict and
    /// lock checks are the coordinator's responsibility, consulted before
    /// this call. Returns false, never errors: unknown container, duplicate
    /// id, non-pending record, or persistence failure (rolled back).
    pub fn register_operation(&self, op: ContainerOperation) -> bool {
        if op.status != OperationStatus::Pending {
            warn!(operation = %op.operation_id, status = %op.status,
                  "rejecting registration of non-pending operation");
            return false;
        }

        let mut inner = self.lock_inner();
        if !inner.states.contains_key(&op.container_id) {
            warn!(operation = %op.operation_id, container = %op.container_id,
                  "rejecting operation for untracked container");
            return false;
        }
        if inner.active.contains_key(&op.operation_id) {
            warn!(operation = %op.operation_id, "rejecting duplicate operation id");
            return false;
        }

        let operation_id = op.operation_id.clone();
        let encoded = match serde_json::to_string(&op) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(operation = %operation_id, error = %err,
                      "failed to encode operation");
                return false;
            }
        };
        inner.active.insert(operation_id.clone(), op);
        drop(inner);

        if let Err(err) =
            self.store
                .hash_put(&self.keys.active_operations(), &operation_id, &encoded)
        {
            warn!(operation = %operation_id, error = %err,
                  "failed to persist operation; rolling back registration");
            // Roll back only while still pending; a dispatcher may have
            // picked the record up between the insert and this write.
            let mut inner = self.lock_inner();
            if inner
                .active
                .get(&operation_id)
                .is_some_and(|op| op.status == OperationStatus::Pending)
            {
                inner.active.remove(&operation_id);
            }
            return false;
        }
        debug!(operation = %operation_id, "registered operation");
        true
    }

    /// Enforces the forward-only machine. A terminal transition atomically
    /// moves the record into the bounded history; later calls for the same
    /// id find nothing and return false.
    pub fn update_operation_status(
        &self,
        operation_id: &str,
        status: OperationStatus,
        error_message: Option<&str>,
    ) -> bool {
        let now = now_millis();
        let mut inner = self.lock_inner();
        let Some(current_status) = inner.active.get(operation_id).map(|op| op.status) else {
            debug!(operation = %operation_id, "status update for unknown operation");
            return false;
        };
        if !current_status.can_transition_to(status) {
            warn!(operation = %operation_id, from = %current_status, to = %status,
                  "rejecting invalid status transition");
            return false;
        }

        if status.is_terminal() {
            if let Some(mut op) = inner.active.remove(operation_id) {
                op.mark_finished(status, error_message.map(str::to_string), now);
                inner.history.push_back(op.clone());
                while inner.history.len() > OPERATION_HISTORY_LIMIT {
                    inner.history.pop_front();
                }
                drop(inner);
                self.persist_terminal_move(&op);
            }
        } else if let Some(op) = inner.active.get_mut(operation_id) {
            op.mark_started(now);
            let encoded = serde_json::to_string(op).ok();
            drop(inner);
            if let Some(encoded) = encoded {
                if let Err(err) =
                    self.store
                        .hash_put(&self.keys.active_operations(), operation_id, &encoded)
                {
                    warn!(operation = %operation_id, error = %err,
                          "failed to persist operation status update");
                }
            }
        }
        debug!(operation = %operation_id, status = %status, "operation status updated");
        true
    }

    fn persist_terminal_move(&self, op: &ContainerOperation) {
        if let Err(err) = self
            .store
            .hash_delete(&self.keys.active_operations(), &op.operation_id)
        {
            warn!(operation = %op.operation_id, error = %err,
                  "failed to remove terminal operation from store");
        }
        match serde_json::to_string(op) {
            Ok(encoded) => {
                if let Err(err) = self.store.list_push(&self.keys.operation_history(), &encoded)
                {
                    warn!(operation = %op.operation_id, error = %err,
                          "failed to append operation history");
                }
                if let Err(err) = self
                    .store
                    .list_trim_to_last(&self.keys.operation_history(), OPERATION_HISTORY_LIMIT)
                {
                    warn!(error = %err, "failed to trim operation history");
                }
            }
            Err(err) => {
                warn!(operation = %op.operation_id, error = %err,
                      "failed to encode history record");
            }
        }
    }

    pub fn health_summary(&self) -> HealthSummary {
        let inner = self.lock_inner();
        let mut summary = HealthSummary {
            total: inner.states.len(),
            active_operations: inner.active.len(),
            ..Default::default()
        };
        for state in inner.states.values() {
            if self.is_state_stale(state) {
                summary.stale += 1;
            }
            match state.health_status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
                HealthStatus::Starting => summary.starting += 1,
                HealthStatus::None => summary.no_health_check += 1,
            }
            match state.status {
                ContainerStatus::Running => summary.running += 1,
                ContainerStatus::Restarting => summary.restarting += 1,
                ContainerStatus::Exited | ContainerStatus::Paused | ContainerStatus::Dead => {
                    summary.stopped += 1
                }
            }
            summary.last_updated = summary.last_updated.max(state.last_updated);
        }
        summary
    }

    /// One full scan cycle: list, filter by managed patterns, inspect each
    /// match, replace entries, then persist the whole map in one batch.
    /// Per-container inspection failures are logged and skipped; only a
    /// failed listing aborts the cycle.
    pub fn scan_once(&self) -> Result<(), StateError> {
        let handles = self.inspector.list_containers(true)?;

        let mut fresh = Vec::new();
        for handle in handles {
            if !self.patterns.matches(&handle.name) {
                continue;
            }
            match self.inspector.inspect(&handle.id) {
                Ok(details) => fresh.push(details),
                Err(err) => {
                    warn!(container = %handle.id, name = %handle.name, error = %err,
                          "container inspection failed; keeping previous entry");
                }
            }
        }

        let scanned = fresh.len();
        let now = now_millis();
        let encoded_states = {
            let mut inner = self.lock_inner();
            for details in fresh {
                // last_updated must strictly increase even when two scans
                // land in the same millisecond.
                let last_updated = inner
                    .states
                    .get(&details.id)
                    .map(|prev| now.max(prev.last_updated + 1))
                    .unwrap_or(now);
                inner.states.insert(
                    details.id.clone(),
                    ContainerState::from_details(details, last_updated),
                );
            }
            for state in inner.states.values() {
                if state.is_stale(now, self.scan_interval_secs, self.stale_scan_threshold) {
                    warn!(container = %state.container_id, name = %state.name,
                          last_updated = state.last_updated,
                          "container missed by recent scans; entry is stale");
                }
            }
            encode_states(&inner.states)
        };

        if let Err(err) = self
            .store
            .hash_put_all(&self.keys.container_states(), &encoded_states)
        {
            warn!(error = %err, "failed to persist container state snapshot");
        }
        debug!(scanned, tracked = encoded_states.len(), "scan cycle complete");
        Ok(())
    }

    /// Hourly history retention sweep: drop expired entries, then rewrite
    /// the persisted list wholesale. Not atomic against concurrent writers;
    /// acceptable because history is append-only and read-mostly.
    pub fn cleanup_once(&self) {
        let cutoff = now_millis() - self.history_retention_ms;
        let encoded = {
            let mut inner = self.lock_inner();
            let before = inner.history.len();
            inner
                .history
                .retain(|op| op.completed_at.unwrap_or(op.requested_at) >= cutoff);
            let dropped = before - inner.history.len();
            if dropped > 0 {
                info!(dropped, "dropped expired operation history entries");
            }
            inner
                .history
                .iter()
                .filter_map(|op| serde_json::to_string(op).ok())
                .collect::<Vec<_>>()
        };

        if let Err(err) = self
            .store
            .list_rewrite(&self.keys.operation_history(), &encoded)
        {
            warn!(error = %err, "failed to rewrite persisted operation history");
        }
    }

    pub fn is_state_stale(&self, state: &ContainerState) -> bool {
        state.is_stale(now_millis(), self.scan_interval_secs, self.stale_scan_threshold)
    }

    /// Flushes the in-memory view to the store. Completes even when the
    /// flush fails; the next process start re-establishes state by scanning.
    pub fn shutdown(&self) {
        let (encoded_states, encoded_ops) = {
            let inner = self.lock_inner();
            (encode_states(&inner.states), encode_operations(&inner.active))
        };
        if let Err(err) = self
            .store
            .hash_put_all(&self.keys.container_states(), &encoded_states)
        {
            warn!(error = %err, "failed to flush container states on shutdown");
        }
        if let Err(err) = self
            .store
            .hash_put_all(&self.keys.active_operations(), &encoded_ops)
        {
            warn!(error = %err, "failed to flush active operations on shutdown");
        }
        info!("container state manager shut down");
    }
}

fn encode_states(states: &BTreeMap<String, ContainerState>) -> BTreeMap<String, String> {
    states
        .iter()
        .filter_map(|(id, state)| {
            serde_json::to_string(state)
                .ok()
                .map(|encoded| (id.clone(), encoded))
        })
        .collect()
}

fn encode_operations(ops: &BTreeMap<String, ContainerOperation>) -> BTreeMap<String, String> {
    ops.iter()
        .filter_map(|(id, op)| {
            serde_json::to_string(op).ok().map(|encoded| (id.clone(), encoded))
        })
        .collect()
}
