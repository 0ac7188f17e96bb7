use super::conflict::{ConflictDecision, ConflictDetector};
use super::locks::ResourceLocker;
use super::{CoordinationError, OperationExecutor};
use crate::shared::now_millis;
use crate::state::{
    ContainerOperation, ContainerStateManager, OperationStatus, OperationType,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Caller-facing request for one operation against a named container.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub container_name: String,
    pub operation_type: OperationType,
    pub priority: u8,
    pub requested_by: String,
    pub estimated_duration_ms: Option<i64>,
    pub dependencies: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl OperationRequest {
    pub fn new(
        container_name: impl Into<String>,
        operation_type: OperationType,
        priority: u8,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            container_name: container_name.into(),
            operation_type,
            priority,
            requested_by: requested_by.into(),
            estimated_duration_ms: None,
            dependencies: Vec::new(),
            metadata: Map::new(),
        }
    }
}

enum DependencyGate {
    Ready,
    Waiting,
    DependencyFailed { dependency: String },
}

/// The only component that moves operations through their lifecycle:
/// admission (conflict check + registration) and dispatch (dependency gate,
/// container lock, execution, terminal transition).
pub struct OperationCoordinator {
    manager: Arc<ContainerStateManager>,
    conflicts: ConflictDetector,
    locker: ResourceLocker,
    executor: Arc<dyn OperationExecutor>,
}

impl OperationCoordinator {
    pub fn new(
        manager: Arc<ContainerStateManager>,
        locker: ResourceLocker,
        executor: Arc<dyn OperationExecutor>,
    ) -> Self {
        Self {
            conflicts: ConflictDetector::new(Arc::clone(&manager)),
            manager,
            locker,
            executor,
        }
    }

    /// Admits a request as a pending operation and returns its id.
    pub fn submit(&self, request: OperationRequest) -> Result<String, CoordinationError> {
        let state = self
            .manager
            .container_by_name(&request.container_name)
            .ok_or_else(|| CoordinationError::UnknownContainer(request.container_name.clone()))?;

        let mut op = ContainerOperation::new(
            state.container_id,
            request.container_name,
            request.operation_type,
            request.priority,
            request.requested_by,
            now_millis(),
        )
        .with_dependencies(request.dependencies)
        .with_metadata(request.metadata);
        if let Some(estimated) = request.estimated_duration_ms {
            op = op.with_estimated_duration_ms(estimated);
        }

        if let ConflictDecision::Deny { reason } = self.conflicts.evaluate(&op) {
            return Err(CoordinationError::Conflict { reason });
        }

        let operation_id = op.operation_id.clone();
        if !self.manager.register_operation(op) {
            return Err(CoordinationError::RegisterRejected);
        }
        info!(operation = %operation_id, "operation admitted");
        Ok(operation_id)
    }

    /// Runs at most one pending operation to completion. Returns the id of
    /// the operation that ran, or `None` when nothing was ready.
    pub fn dispatch_once(&self) -> Result<Option<String>, CoordinationError> {
        let active = self.manager.active_operations();
        let active_ids: Vec<String> = active.iter().map(|op| op.operation_id.clone()).collect();
        let history: BTreeMap<String, OperationStatus> = self
            .manager
            .operation_history()
            .into_iter()
            .map(|op| (op.operation_id, op.status))
            .collect();

        // Already sorted by (priority, requested_at).
        for op in active {
            if op.status != OperationStatus::Pending {
                continue;
            }
            match self.dependency_gate(&op, &active_ids, &history) {
                DependencyGate::Ready => {}
                DependencyGate::Waiting => continue,
                DependencyGate::DependencyFailed { dependency } => {
                    warn!(
                        operation = %op.operation_id,
                        dependency = %dependency,
                        "cancelling operation whose dependency did not complete"
                    );
                    self.manager.update_operation_status(
                        &op.operation_id,
                        OperationStatus::Cancelled,
                        None,
                    );
                    continue;
                }
            }

            let Some(lock) = self.locker.acquire(&op.container_id)? else {
                continue;
            };

            if !self
                .manager
                .update_operation_status(&op.operation_id, OperationStatus::InProgress, None)
            {
                // Another path retired the record between the snapshot and now.
                if let Err(err) = self.locker.release(&lock) {
                    warn!(operation = %op.operation_id, error = %err, "failed to release lock");
                }
                continue;
            }

            info!(
                operation = %op.operation_id,
                container = %op.container_name,
                kind = %op.operation_type,
                "executing operation"
            );
            match self.executor.execute(&op) {
                Ok(()) => {
                    self.manager.update_operation_status(
                        &op.operation_id,
                        OperationStatus::Completed,
                        None,
                    );
                }
                Err(err) => {
                    warn!(operation = %op.operation_id, error = %err, "operation failed");
                    self.manager.update_operation_status(
                        &op.operation_id,
                        OperationStatus::Failed,
                        Some(&err.to_string()),
                    );
                }
            }
            if let Err(err) = self.locker.release(&lock) {
                warn!(operation = %op.operation_id, error = %err, "failed to release lock");
            }
            return Ok(Some(op.operation_id));
        }
        Ok(None)
    }

    fn dependency_gate(
        &self,
        op: &ContainerOperation,
        active_ids: &[String],
        history: &BTreeMap<String, OperationStatus>,
    ) -> DependencyGate {
        for dependency in &op.dependencies {
            if active_ids.contains(dependency) {
                return DependencyGate::Waiting;
            }
            match history.get(dependency) {
                Some(OperationStatus::Completed) => {}
                Some(_) => {
                    return DependencyGate::DependencyFailed {
                        dependency: dependency.clone(),
                    };
                }
                None => {
                    // Swept from history by retention; treat as satisfied.
                    warn!(
                        operation = %op.operation_id,
                        dependency = %dependency,
                        "dependency no longer known, treating as satisfied"
                    );
                }
            }
        }
        DependencyGate::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::coordination::ExecutorError;
    use crate::inspector::{ContainerDetails, ContainerHandle, ContainerInspector, InspectorError};
    use crate::state::{ContainerStatus, HealthStatus};
    use crate::store::{MemoryStore, StateStore, StoreKeys};
    use std::collections::{BTreeMap as StdBTreeMap, BTreeSet};
    use std::sync::Mutex;

    struct FixedInspector {
        containers: Vec<ContainerDetails>,
    }

    impl ContainerInspector for FixedInspector {
        fn list_containers(&self, _all: bool) -> Result<Vec<ContainerHandle>, InspectorError> {
            Ok(self
                .containers
                .iter()
                .map(|details| ContainerHandle {
                    id: details.id.clone(),
                    name: details.name.clone(),
                })
                .collect())
        }

        fn inspect(&self, id: &str) -> Result<ContainerDetails, InspectorError> {
            self.containers
                .iter()
                .find(|details| details.id == id)
                .cloned()
                .ok_or_else(|| InspectorError::NotFound {
                    container: id.to_string(),
                })
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        executed: Mutex<Vec<String>>,
        fail: Mutex<BTreeSet<String>>,
    }

    impl RecordingExecutor {
        fn fail_container(&self, id: &str) {
            self.fail.lock().expect("lock").insert(id.to_string());
        }

        fn executed(&self) -> Vec<String> {
            self.executed.lock().expect("lock").clone()
        }
    }

    impl OperationExecutor for RecordingExecutor {
        fn execute(&self, op: &ContainerOperation) -> Result<(), ExecutorError> {
            if self.fail.lock().expect("lock").contains(&op.container_id) {
                return Err(ExecutorError::Action {
                    container: op.container_id.clone(),
                    message: "engine said no".to_string(),
                });
            }
            self.executed
                .lock()
                .expect("lock")
                .push(op.operation_id.clone());
            Ok(())
        }

        fn force_stop(&self, _container_id: &str) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    fn details(id: &str, name: &str) -> ContainerDetails {
        ContainerDetails {
            id: id.to_string(),
            name: name.to_string(),
            status: ContainerStatus::Running,
            health: HealthStatus::Healthy,
            image: "nginx:1.27".to_string(),
            created_at: 1_000,
            started_at: Some(2_000),
            ports: StdBTreeMap::new(),
            labels: StdBTreeMap::new(),
            networks: BTreeSet::new(),
            mounts: Vec::new(),
            resource_usage: Default::default(),
        }
    }

    fn settings() -> Settings {
        Settings::from_str(
            r#"
managed_containers:
  - "web-*"
  - "db-*"
"#,
        )
        .expect("settings")
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        manager: Arc<ContainerStateManager>,
        executor: Arc<RecordingExecutor>,
        coordinator: OperationCoordinator,
    }

    fn fixture(containers: Vec<ContainerDetails>) -> Fixture {
        let settings = settings();
        let store = Arc::new(MemoryStore::new());
        let inspector = Arc::new(FixedInspector { containers });
        let manager = Arc::new(
            ContainerStateManager::new(inspector, Arc::clone(&store) as Arc<dyn StateStore>, &settings)
                .expect("manager"),
        );
        manager.scan_once().expect("scan");
        let executor = Arc::new(RecordingExecutor::default());
        let locker = ResourceLocker::new(
            Arc::clone(&store) as Arc<dyn StateStore>,
            StoreKeys::new(&settings.store.key_prefix),
            &settings.lock,
        );
        let coordinator = OperationCoordinator::new(
            Arc::clone(&manager),
            locker,
            Arc::clone(&executor) as Arc<dyn OperationExecutor>,
        );
        Fixture {
            store,
            manager,
            executor,
            coordinator,
        }
    }

    #[test]
    fn submit_resolves_the_container_by_name() {
        let fixture = fixture(vec![details("abc123", "web-1")]);
        let id = fixture
            .coordinator
            .submit(OperationRequest::new("web-1", OperationType::Restart, 2, "ops"))
            .expect("submit");
        let active = fixture.manager.active_operations();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].operation_id, id);
        assert_eq!(active[0].container_id, "abc123");
        assert_eq!(active[0].status, OperationStatus::Pending);
    }

    #[test]
    fn submit_rejects_unknown_containers() {
        let fixture = fixture(vec![details("abc123", "web-1")]);
        let err = fixture
            .coordinator
            .submit(OperationRequest::new("web-9", OperationType::Restart, 2, "ops"))
            .expect_err("unknown container");
        assert!(matches!(err, CoordinationError::UnknownContainer(name) if name == "web-9"));
    }

    #[test]
    fn conflicting_submission_is_denied_with_a_reason() {
        let fixture = fixture(vec![details("abc123", "web-1")]);
        let first = fixture
            .coordinator
            .submit(OperationRequest::new("web-1", OperationType::Restart, 2, "ops"))
            .expect("submit");
        let err = fixture
            .coordinator
            .submit(OperationRequest::new("web-1", OperationType::Stop, 2, "ops"))
            .expect_err("conflict");
        match err {
            CoordinationError::Conflict { reason } => assert!(reason.contains(&first)),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn backup_may_run_alongside_scale() {
        let fixture = fixture(vec![details("abc123", "web-1")]);
        fixture
            .coordinator
            .submit(OperationRequest::new("web-1", OperationType::Scale, 2, "ops"))
            .expect("scale");
        fixture
            .coordinator
            .submit(OperationRequest::new("web-1", OperationType::Backup, 3, "ops"))
            .expect("backup alongside scale");
    }

    #[test]
    fn dispatch_runs_the_highest_priority_oldest_pending_first() {
        let fixture = fixture(vec![details("abc123", "web-1"), details("def456", "db-1")]);
        let low = fixture
            .coordinator
            .submit(OperationRequest::new("web-1", OperationType::Restart, 4, "ops"))
            .expect("low");
        let high = fixture
            .coordinator
            .submit(OperationRequest::new("db-1", OperationType::Restart, 1, "ops"))
            .expect("high");

        let first = fixture.coordinator.dispatch_once().expect("dispatch");
        assert_eq!(first.as_deref(), Some(high.as_str()));
        let second = fixture.coordinator.dispatch_once().expect("dispatch");
        assert_eq!(second.as_deref(), Some(low.as_str()));
        assert_eq!(fixture.executor.executed(), vec![high.clone(), low.clone()]);

        let history = fixture.manager.operation_history();
        assert_eq!(history.len(), 2);
        assert!(history
            .iter()
            .all(|op| op.status == OperationStatus::Completed));
        assert!(fixture.manager.active_operations().is_empty());
    }

    #[test]
    fn executor_failure_marks_the_operation_failed() {
        let fixture = fixture(vec![details("abc123", "web-1")]);
        fixture.executor.fail_container("abc123");
        let id = fixture
            .coordinator
            .submit(OperationRequest::new("web-1", OperationType::Restart, 2, "ops"))
            .expect("submit");

        let ran = fixture.coordinator.dispatch_once().expect("dispatch");
        assert_eq!(ran.as_deref(), Some(id.as_str()));

        let history = fixture.manager.operation_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, OperationStatus::Failed);
        assert!(history[0]
            .error_message
            .as_deref()
            .expect("error message")
            .contains("engine said no"));

        // The lock was released despite the failure.
        fixture
            .coordinator
            .submit(OperationRequest::new("web-1", OperationType::Start, 2, "ops"))
            .expect("resubmit");
        assert!(fixture.coordinator.dispatch_once().expect("dispatch").is_some());
    }

    #[test]
    fn dependent_operation_waits_for_its_dependency() {
        let fixture = fixture(vec![details("abc123", "web-1"), details("def456", "db-1")]);
        let dep = fixture
            .coordinator
            .submit(OperationRequest::new("db-1", OperationType::Backup, 3, "ops"))
            .expect("dependency");
        let mut request = OperationRequest::new("web-1", OperationType::Restart, 1, "ops");
        request.dependencies = vec![dep.clone()];
        let dependent = fixture.coordinator.submit(request).expect("dependent");

        // Dependency is still pending, so the higher priority dependent is
        // skipped and the dependency itself runs.
        let first = fixture.coordinator.dispatch_once().expect("dispatch");
        assert_eq!(first.as_deref(), Some(dep.as_str()));
        let second = fixture.coordinator.dispatch_once().expect("dispatch");
        assert_eq!(second.as_deref(), Some(dependent.as_str()));
    }

    #[test]
    fn dependent_operation_is_cancelled_when_its_dependency_fails() {
        let fixture = fixture(vec![details("abc123", "web-1"), details("def456", "db-1")]);
        fixture.executor.fail_container("def456");
        let dep = fixture
            .coordinator
            .submit(OperationRequest::new("db-1", OperationType::Backup, 3, "ops"))
            .expect("dependency");
        let mut request = OperationRequest::new("web-1", OperationType::Restart, 1, "ops");
        request.dependencies = vec![dep.clone()];
        let dependent = fixture.coordinator.submit(request).expect("dependent");

        assert_eq!(
            fixture.coordinator.dispatch_once().expect("dispatch").as_deref(),
            Some(dep.as_str())
        );
        // The sweep that finds the failed dependency cancels the dependent
        // and keeps looking; nothing runnable remains.
        assert!(fixture.coordinator.dispatch_once().expect("dispatch").is_none());

        let cancelled = fixture
            .manager
            .operation_history()
            .into_iter()
            .find(|op| op.operation_id == dependent)
            .expect("dependent in history");
        assert_eq!(cancelled.status, OperationStatus::Cancelled);
    }

    #[test]
    fn unknown_dependency_is_treated_as_satisfied() {
        let fixture = fixture(vec![details("abc123", "web-1")]);
        let mut request = OperationRequest::new("web-1", OperationType::Restart, 2, "ops");
        request.dependencies = vec!["op-long-gone".to_string()];
        let id = fixture.coordinator.submit(request).expect("submit");
        assert_eq!(
            fixture.coordinator.dispatch_once().expect("dispatch").as_deref(),
            Some(id.as_str())
        );
    }

    #[test]
    fn held_lock_defers_dispatch_to_the_next_candidate() {
        let fixture = fixture(vec![details("abc123", "web-1"), details("def456", "db-1")]);
        let settings = settings();

        let blocked = fixture
            .coordinator
            .submit(OperationRequest::new("web-1", OperationType::Restart, 1, "ops"))
            .expect("blocked");
        let runnable = fixture
            .coordinator
            .submit(OperationRequest::new("db-1", OperationType::Restart, 2, "ops"))
            .expect("runnable");

        // A second coordinator instance holding the same store stands in for
        // another process owning the container lock.
        let foreign = ResourceLocker::new(
            Arc::clone(&fixture.store) as Arc<dyn StateStore>,
            StoreKeys::new(&settings.store.key_prefix),
            &settings.lock,
        );
        let held = foreign
            .acquire("abc123")
            .expect("acquire")
            .expect("lock granted");

        assert_eq!(
            fixture.coordinator.dispatch_once().expect("dispatch").as_deref(),
            Some(runnable.as_str())
        );
        foreign.release(&held).expect("release");
        assert_eq!(
            fixture.coordinator.dispatch_once().expect("dispatch").as_deref(),
            Some(blocked.as_str())
        );
    }
}
