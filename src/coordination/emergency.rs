use super::OperationExecutor;
use crate::config::EmergencySettings;
use crate::shared::now_millis;
use crate::state::{ContainerStateManager, HealthStatus, OperationStatus};
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmergencyFinding {
    StuckOperation {
        operation_id: String,
        container_id: String,
        overdue_ms: i64,
    },
    UnhealthySpike {
        count: usize,
        containers: Vec<String>,
    },
}

/// Escalation path for operations and containers that normal coordination
/// no longer reaches. Never part of the regular dispatch flow.
pub struct EmergencyHandler {
    manager: Arc<ContainerStateManager>,
    executor: Arc<dyn OperationExecutor>,
    stuck_grace_ms: i64,
    default_estimated_ms: i64,
    unhealthy_threshold: usize,
}

impl EmergencyHandler {
    pub fn new(
        manager: Arc<ContainerStateManager>,
        executor: Arc<dyn OperationExecutor>,
        settings: &EmergencySettings,
    ) -> Self {
        Self {
            manager,
            executor,
            stuck_grace_ms: (settings.stuck_grace_secs as i64).saturating_mul(1_000),
            default_estimated_ms: (settings.default_estimated_duration_secs as i64)
                .saturating_mul(1_000),
            unhealthy_threshold: settings.unhealthy_threshold,
        }
    }

    /// One sweep over live operations and container health. Stuck
    /// operations are forced to failed and their containers force-stopped;
    /// an unhealthy-container spike is reported but not acted on.
    pub fn check_once(&self) -> Vec<EmergencyFinding> {
        let now = now_millis();
        let mut findings = Vec::new();

        for op in self.manager.active_operations() {
            if op.status != OperationStatus::InProgress {
                continue;
            }
            let Some(started_at) = op.started_at else {
                continue;
            };
            let allowed = op
                .estimated_duration_ms
                .unwrap_or(self.default_estimated_ms)
                .saturating_add(self.stuck_grace_ms);
            let elapsed = now.saturating_sub(started_at);
            if elapsed <= allowed {
                continue;
            }

            let overdue_ms = elapsed - allowed;
            error!(
                operation = %op.operation_id,
                container = %op.container_name,
                overdue_ms,
                "forcing stuck operation to failed"
            );
            self.manager.update_operation_status(
                &op.operation_id,
                OperationStatus::Failed,
                Some("operation exceeded its estimated duration and was forced to failed"),
            );
            if let Err(err) = self.executor.force_stop(&op.container_id) {
                warn!(
                    operation = %op.operation_id,
                    container = %op.container_id,
                    error = %err,
                    "force stop of stuck container failed"
                );
            }
            findings.push(EmergencyFinding::StuckOperation {
                operation_id: op.operation_id,
                container_id: op.container_id,
                overdue_ms,
            });
        }

        let unhealthy: Vec<String> = self
            .manager
            .managed_containers()
            .into_iter()
            .filter(|state| state.health_status == HealthStatus::Unhealthy)
            .map(|state| state.name)
            .collect();
        if unhealthy.len() >= self.unhealthy_threshold {
            error!(
                count = unhealthy.len(),
                containers = ?unhealthy,
                "unhealthy container count at or above threshold"
            );
            findings.push(EmergencyFinding::UnhealthySpike {
                count: unhealthy.len(),
                containers: unhealthy,
            });
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::coordination::ExecutorError;
    use crate::inspector::{ContainerDetails, ContainerHandle, ContainerInspector, InspectorError};
    use crate::state::{ContainerOperation, ContainerStatus, OperationType};
    use crate::store::{MemoryStore, StateStore};
    use std::collections::{BTreeMap, BTreeSet};
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
    struct StopRecorder {
        stopped: Mutex<Vec<String>>,
    }

    impl OperationExecutor for StopRecorder {
        fn execute(&self, _op: &ContainerOperation) -> Result<(), ExecutorError> {
            Ok(())
        }

        fn force_stop(&self, container_id: &str) -> Result<(), ExecutorError> {
            self.stopped
                .lock()
                .expect("lock")
                .push(container_id.to_string());
            Ok(())
        }
    }

    fn details(id: &str, name: &str, health: HealthStatus) -> ContainerDetails {
        ContainerDetails {
            id: id.to_string(),
            name: name.to_string(),
            status: ContainerStatus::Running,
            health,
            image: "nginx:1.27".to_string(),
            created_at: 1_000,
            started_at: Some(2_000),
            ports: BTreeMap::new(),
            labels: BTreeMap::new(),
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
emergency:
  stuck_grace_secs: 1
  default_estimated_duration_secs: 1
  unhealthy_threshold: 2
"#,
        )
        .expect("settings")
    }

    fn handler(containers: Vec<ContainerDetails>) -> (Arc<ContainerStateManager>, EmergencyHandler) {
        let settings = settings();
        let store = Arc::new(MemoryStore::new());
        let inspector = Arc::new(FixedInspector { containers });
        let manager = Arc::new(
            ContainerStateManager::new(inspector, store as Arc<dyn StateStore>, &settings)
                .expect("manager"),
        );
        manager.scan_once().expect("scan");
        let handler = EmergencyHandler::new(
            Arc::clone(&manager),
            Arc::new(StopRecorder::default()),
            &settings.emergency,
        );
        (manager, handler)
    }

    fn register_started(
        manager: &ContainerStateManager,
        container_id: &str,
        started_at: i64,
    ) -> String {
        let op = ContainerOperation::new(
            container_id,
            "web-1",
            OperationType::Restart,
            2,
            "ops",
            started_at,
        );
        let id = op.operation_id.clone();
        assert!(manager.register_operation(op));
        assert!(manager.update_operation_status(&id, OperationStatus::InProgress, None));
        id
    }

    #[test]
    fn fresh_operations_are_left_alone() {
        let (manager, handler) = handler(vec![details("abc123", "web-1", HealthStatus::Healthy)]);
        let id = register_started(&manager, "abc123", now_millis());
        assert!(handler.check_once().is_empty());
        assert_eq!(
            manager.active_operations()[0].operation_id, id,
            "operation still live"
        );
    }

    #[test]
    fn overdue_operation_is_forced_to_failed_and_container_stopped() {
        let (manager, _) = handler(vec![details("abc123", "web-1", HealthStatus::Healthy)]);
        let id = register_started(&manager, "abc123", now_millis());

        // Zero allowance makes any in-progress operation overdue after a tick.
        let tight = EmergencySettings {
            check_interval_secs: 30,
            stuck_grace_secs: 0,
            default_estimated_duration_secs: 0,
            unhealthy_threshold: 99,
        };
        let stops = Arc::new(StopRecorder::default());
        let handler = EmergencyHandler::new(
            Arc::clone(&manager),
            Arc::clone(&stops) as Arc<dyn OperationExecutor>,
            &tight,
        );
        std::thread::sleep(std::time::Duration::from_millis(5));

        let findings = handler.check_once();
        assert_eq!(findings.len(), 1);
        match &findings[0] {
            EmergencyFinding::StuckOperation {
                operation_id,
                container_id,
                overdue_ms,
            } => {
                assert_eq!(operation_id, &id);
                assert_eq!(container_id, "abc123");
                assert!(*overdue_ms > 0);
            }
            other => panic!("expected stuck finding, got {other:?}"),
        }

        assert!(manager.active_operations().is_empty());
        let history = manager.operation_history();
        assert_eq!(history[0].status, OperationStatus::Failed);
        assert_eq!(
            stops.stopped.lock().expect("lock").as_slice(),
            ["abc123".to_string()]
        );
    }

    #[test]
    fn unhealthy_spike_is_reported_once_threshold_is_met() {
        let (_manager, handler) = handler(vec![
            details("a1", "web-1", HealthStatus::Unhealthy),
            details("b2", "web-2", HealthStatus::Unhealthy),
            details("c3", "web-3", HealthStatus::Healthy),
        ]);
        let findings = handler.check_once();
        assert_eq!(findings.len(), 1);
        match &findings[0] {
            EmergencyFinding::UnhealthySpike { count, containers } => {
                assert_eq!(*count, 2);
                assert!(containers.contains(&"web-1".to_string()));
                assert!(containers.contains(&"web-2".to_string()));
            }
            other => panic!("expected spike finding, got {other:?}"),
        }
    }

    #[test]
    fn below_threshold_health_produces_no_finding() {
        let (_manager, handler) = handler(vec![
            details("a1", "web-1", HealthStatus::Unhealthy),
            details("c3", "web-3", HealthStatus::Healthy),
        ]);
        assert!(handler.check_once().is_empty());
    }
}
